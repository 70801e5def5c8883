//! 测试服务器：内存存储、内存在线注册表、进程内总线，监听随机端口

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use application::{
    ChatBackend, ChatBackendDependencies, LocalEventBus, MemoryPresenceRegistry, MemoryStore,
    MonotonicClock, ResubscribePolicy, StaticObjectStorage, TokenAuthority,
};
use chrono::Utc;
use config::{AppConfig, HistoryConfig};
use domain::{InstanceId, Room, RoomId, RoomKind, User, UserId};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use web_api::{router, AppState, HeartbeatSettings};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(2);

pub struct TestServer {
    pub addr: std::net::SocketAddr,
    pub store: Arc<MemoryStore>,
    pub tokens: Arc<TokenAuthority>,
    pub backend: ChatBackend,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with_heartbeat(HeartbeatSettings {
            interval: Duration::from_secs(25),
            liveness_window: Duration::from_secs(60),
        })
        .await
    }

    pub async fn start_with_heartbeat(heartbeat: HeartbeatSettings) -> Self {
        let config = AppConfig::default();
        let store = Arc::new(MemoryStore::new());
        let backend = ChatBackend::new(
            ChatBackendDependencies {
                users: store.clone(),
                rooms: store.clone(),
                messages: store.clone(),
                presence: Arc::new(MemoryPresenceRegistry::new(
                    InstanceId::new("test"),
                    heartbeat.liveness_window,
                )),
                bus: Arc::new(LocalEventBus::default()),
                storage: Arc::new(StaticObjectStorage::new("https://files.test")),
                clock: Arc::new(MonotonicClock::system()),
            },
            HistoryConfig::default(),
        );
        backend.start_dispatch(ResubscribePolicy::default()).await.expect("dispatch");
        let tokens = Arc::new(TokenAuthority::new(&config.jwt));
        let app = router(AppState::new(backend.clone(), tokens.clone(), heartbeat));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            store,
            tokens,
            backend,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/api/v1/ws", self.addr)
    }

    pub async fn user(&self, name: &str) -> UserId {
        let user = User::new(UserId::generate(), name, None);
        let id = user.id;
        self.store.insert_user(user).await;
        id
    }

    pub async fn group(&self, owner: UserId, members: &[UserId]) -> RoomId {
        let room = Room::owned(RoomId::generate(RoomKind::Group), "team", owner, None, Utc::now());
        let id = room.id;
        self.store.insert_room(room, members).await;
        id
    }

    /// 以查询参数携带访问令牌连接，并读掉 `userId` / `userData` / `chats` 三个首帧
    pub async fn connect(&self, user_id: UserId) -> Client {
        let token = self.tokens.issue_access(user_id).expect("token");
        let (mut client, _) = connect_async(format!("{}?access_token={token}", self.ws_url()))
            .await
            .expect("connect");
        for expected in ["userId", "userData", "chats"] {
            assert_eq!(next_event(&mut client).await["event"], expected);
        }
        client
    }

    /// 使用 Cookie 头携带凭证
    pub async fn connect_with_cookie(&self, cookie: &str) -> Result<Client, tokio_tungstenite::tungstenite::Error> {
        let mut request = self.ws_url().into_client_request()?;
        request
            .headers_mut()
            .insert("cookie", cookie.parse().expect("header value"));
        connect_async(request).await.map(|(client, _)| client)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn send_event(client: &mut Client, event: Value) {
    client
        .send(Message::text(event.to_string()))
        .await
        .expect("send");
}

/// 下一个文本帧；跳过控制帧
pub async fn next_event(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(WAIT, client.next())
            .await
            .expect("timed out")
            .expect("stream closed")
            .expect("frame");
        if let Message::Text(_) = &frame {
            return serde_json::from_str(frame.to_text().expect("text")).expect("json");
        }
    }
}

/// 指定时间内没有文本帧
pub async fn assert_quiet(client: &mut Client, within: Duration) {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        match tokio::time::timeout_at(deadline, client.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected frame: {}", text.as_str()),
            Ok(Some(Ok(_))) => continue,
            Ok(_) => return,
        }
    }
}
