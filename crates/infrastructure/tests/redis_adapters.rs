//! 需要真实 Redis：`REDIS_URL=redis://... cargo test -p infrastructure -- --ignored`

use std::time::Duration;

use application::{sweep_stale_connections, EventBus, PresenceRegistry};
use domain::{ConnectionId, DeliveryEvent, InstanceId, Topic, UserId};
use futures::StreamExt;
use infrastructure::{RedisEventBus, RedisKeys, RedisPresenceRegistry};
use uuid::Uuid;

fn client() -> redis::Client {
    let url = std::env::var("REDIS_URL").expect("REDIS_URL must be set");
    redis::Client::open(url).expect("redis client")
}

/// 每个测试使用独立前缀，互不干扰
fn isolated_keys() -> RedisKeys {
    RedisKeys::new(format!("test:{}:", Uuid::new_v4().simple()))
}

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn register_is_idempotent_and_counts_connections() {
    let registry = RedisPresenceRegistry::connect(
        &client(),
        InstanceId::new("node-a"),
        isolated_keys(),
        Duration::from_secs(60),
    )
    .await
    .unwrap();
    let user = UserId::generate();
    let (c1, c2) = (ConnectionId::generate(), ConnectionId::generate());

    let first = registry.register(user, c1).await.unwrap();
    assert!(first.came_online());
    assert!(!registry.register(user, c1).await.unwrap().newly_added);
    assert_eq!(registry.register(user, c2).await.unwrap().connection_count, 2);
    assert_eq!(
        registry.resolve_instance(c1).await.unwrap(),
        Some(InstanceId::new("node-a"))
    );

    let first = registry.deregister(user, c1).await.unwrap();
    assert!(first.removed);
    assert_eq!(first.remaining, 1);
    let repeated = registry.deregister(user, c1).await.unwrap();
    assert!(!repeated.removed);
    assert_eq!(repeated.remaining, 1);
    assert!(registry.deregister(user, c2).await.unwrap().went_offline());
    assert!(!registry.deregister(user, c2).await.unwrap().went_offline());
    assert!(registry.tracked_users().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn expired_connections_are_swept() {
    let registry = RedisPresenceRegistry::connect(
        &client(),
        InstanceId::new("node-b"),
        isolated_keys(),
        Duration::from_secs(1),
    )
    .await
    .unwrap();
    let user = UserId::generate();
    registry.register(user, ConnectionId::generate()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(2100)).await;
    let offline = sweep_stale_connections(&registry).await.unwrap();
    assert_eq!(offline, vec![user]);
    assert!(registry.connections_of(user).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn bus_delivers_to_every_subscriber() {
    let client = client();
    let keys = isolated_keys();
    let publisher = RedisEventBus::connect(&client, keys.clone()).await.unwrap();
    let subscriber = RedisEventBus::connect(&client, keys).await.unwrap();

    let mut first = subscriber.subscribe(Topic::UserStatus).await.unwrap();
    let mut second = publisher.subscribe(Topic::UserStatus).await.unwrap();

    let event = DeliveryEvent::online(UserId::generate());
    publisher.publish(Topic::UserStatus, &event).await.unwrap();

    let timeout = Duration::from_secs(2);
    assert_eq!(tokio::time::timeout(timeout, first.next()).await.unwrap(), Some(event.clone()));
    assert_eq!(tokio::time::timeout(timeout, second.next()).await.unwrap(), Some(event.clone()));

    assert!(publisher.publish(Topic::NewMessage, &event).await.is_err());
}
