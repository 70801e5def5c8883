mod support;

use std::time::Duration;

use application::{RoomRepository, UserRepository};
use chrono::Utc;
use domain::UserStatus;
use futures_util::SinkExt;
use web_api::HeartbeatSettings;

use support::{next_event, TestServer};

#[tokio::test]
async fn direct_chat_partner_sees_online_then_offline() {
    let server = TestServer::start().await;
    let alice = server.user("Alice").await;
    let bob = server.user("Bob").await;
    server
        .store
        .find_or_create_direct_chat(alice, bob, Utc::now())
        .await
        .unwrap();

    let mut bob_ws = server.connect(bob).await;
    let mut alice_ws = server.connect(alice).await;

    let online = next_event(&mut bob_ws).await;
    assert_eq!(online["event"], "userStatusNotification");
    assert_eq!(online["data"]["userId"], alice.to_string());
    assert_eq!(online["data"]["status"], "online");

    alice_ws.close(None).await.unwrap();
    let offline = next_event(&mut bob_ws).await;
    assert_eq!(offline["event"], "userStatusNotification");
    assert_eq!(offline["data"]["status"], "offline");
    assert!(offline["data"]["lastSeenAt"].is_string());

    let stored = UserRepository::find_by_id(server.store.as_ref(), alice)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, UserStatus::Offline);
    assert!(stored.last_active.is_some());
}

#[tokio::test]
async fn silent_client_is_disconnected_after_liveness_window() {
    let server = TestServer::start_with_heartbeat(HeartbeatSettings {
        interval: Duration::from_millis(100),
        liveness_window: Duration::from_millis(300),
    })
    .await;
    let alice = server.user("Alice").await;

    // 不再读取：客户端不会回复 pong，也没有其他入站帧
    let _alice_ws = server.connect(alice).await;
    assert_eq!(server.backend.hub.connection_count().await, 1);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let user = UserRepository::find_by_id(server.store.as_ref(), alice)
            .await
            .unwrap()
            .unwrap();
        if user.status == UserStatus::Offline && user.last_active.is_some() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "connection was not dropped");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(server.backend.hub.connection_count().await, 0);
}
