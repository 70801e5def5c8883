//! 连接生命周期：上线、引导数据、心跳、下线与过期清扫

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use domain::{ConnectionId, DeliveryEvent, RoomKind, User, UserId, UserStatus};

use crate::bus::EventBus;
use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::hub::{ConnectionHub, OutboundReceiver};
use crate::outbound::{ChatPreview, ServerEvent, UserProfile};
use crate::presence::{sweep_stale_connections, PresenceRegistry};
use crate::repository::{MessageRepository, RoomRepository, UserRepository};

/// 会话列表最多返回的房间数
const CHAT_LIST_LIMIT: u32 = 20;

pub struct SessionDependencies {
    pub users: Arc<dyn UserRepository>,
    pub rooms: Arc<dyn RoomRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub presence: Arc<dyn PresenceRegistry>,
    pub bus: Arc<dyn EventBus>,
    pub hub: Arc<ConnectionHub>,
    pub clock: Arc<dyn Clock>,
}

/// 握手成功后的会话
pub struct ConnectedSession {
    pub user: User,
    pub outbound: OutboundReceiver,
    /// 依次发送：`userId`、`userData`、`chats`
    pub bootstrap: Vec<ServerEvent>,
}

pub struct SessionService {
    deps: SessionDependencies,
}

impl SessionService {
    pub fn new(deps: SessionDependencies) -> Self {
        Self { deps }
    }

    pub async fn connect(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<ConnectedSession, ApplicationError> {
        let user = self
            .deps
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(ApplicationError::unauthorized)?;

        let outbound = self.deps.hub.attach(connection_id, user_id).await;
        let registration = match self.deps.presence.register(user_id, connection_id).await {
            Ok(registration) => registration,
            Err(err) => {
                self.deps.hub.detach(connection_id).await;
                return Err(err.into());
            }
        };

        let chats = match self.announce_and_list(user_id, registration.came_online()).await {
            Ok(chats) => chats,
            Err(err) => {
                // 已挂到连接中心并登记在线，失败时必须撤销，否则会留下幽灵在线
                if let Err(cleanup) = self.disconnect(connection_id).await {
                    tracing::warn!(
                        user_id = %user_id,
                        connection_id = %connection_id,
                        error = %cleanup,
                        "会话建立失败后的清理未完成"
                    );
                }
                return Err(err);
            }
        };
        tracing::info!(
            user_id = %user_id,
            connection_id = %connection_id,
            connections = registration.connection_count,
            "用户已连接"
        );

        Ok(ConnectedSession {
            bootstrap: vec![
                ServerEvent::UserId(user_id),
                ServerEvent::UserData(UserProfile::from(&user)),
                ServerEvent::Chats(chats),
            ],
            user,
            outbound,
        })
    }

    async fn announce_and_list(
        &self,
        user_id: UserId,
        came_online: bool,
    ) -> Result<Vec<ChatPreview>, ApplicationError> {
        if came_online {
            self.deps
                .users
                .update_status(user_id, UserStatus::Online, None)
                .await?;
            self.publish(DeliveryEvent::online(user_id)).await;
        }
        self.chat_previews(user_id).await
    }

    /// 幂等；重复断开不会再次广播下线
    pub async fn disconnect(&self, connection_id: ConnectionId) -> Result<(), ApplicationError> {
        let Some(detached) = self.deps.hub.detach(connection_id).await else {
            return Ok(());
        };
        let user_id = detached.user_id;
        let outcome = self.deps.presence.deregister(user_id, connection_id).await?;
        tracing::info!(
            user_id = %user_id,
            connection_id = %connection_id,
            remaining = outcome.remaining,
            "连接已断开"
        );
        // 清扫可能已先一步移除了这个连接并广播过下线
        if outcome.went_offline() {
            self.mark_offline(user_id).await?;
        }
        Ok(())
    }

    pub async fn heartbeat(&self, connection_id: ConnectionId) -> Result<(), ApplicationError> {
        Ok(self.deps.presence.heartbeat(connection_id).await?)
    }

    /// 清理所有实例遗留的过期连接，返回因此下线的用户数
    pub async fn sweep(&self) -> Result<usize, ApplicationError> {
        let went_offline = sweep_stale_connections(self.deps.presence.as_ref()).await?;
        for user_id in &went_offline {
            self.mark_offline(*user_id).await?;
        }
        Ok(went_offline.len())
    }

    async fn mark_offline(&self, user_id: UserId) -> Result<(), ApplicationError> {
        let now = self.deps.clock.now();
        self.deps
            .users
            .update_status(user_id, UserStatus::Offline, Some(now))
            .await?;
        self.publish(DeliveryEvent::offline(user_id, now)).await;
        Ok(())
    }

    async fn publish(&self, event: DeliveryEvent) {
        let topic = event.topic();
        if let Err(err) = self.deps.bus.publish(topic, &event).await {
            tracing::error!(topic = topic.channel(), error = %err, "状态事件发布失败");
        }
    }

    /// 有消息的房间，按最近消息时间倒序
    pub async fn chat_previews(&self, user_id: UserId) -> Result<Vec<ChatPreview>, ApplicationError> {
        let memberships = self
            .deps
            .rooms
            .memberships_of(user_id, CHAT_LIST_LIMIT)
            .await?;

        let mut previews = Vec::with_capacity(memberships.len());
        for membership in memberships {
            let room_id = membership.room_id;
            let Some(last) = self
                .deps
                .messages
                .page(room_id, None, 1)
                .await?
                .into_iter()
                .next()
            else {
                continue;
            };
            let Some(room) = self.deps.rooms.find_by_id(room_id).await? else {
                continue;
            };

            let (chat_name, chat_image_url) = match room_id.kind() {
                RoomKind::Chat => {
                    let partner_id = self
                        .deps
                        .rooms
                        .members_of(room_id)
                        .await?
                        .into_iter()
                        .find(|member| *member != user_id);
                    let partner = match partner_id {
                        Some(id) => self.deps.users.find_by_id(id).await?,
                        None => None,
                    };
                    (
                        partner.as_ref().map(User::display_name),
                        partner.and_then(|user| user.image_url),
                    )
                }
                RoomKind::Group | RoomKind::Channel => (room.name.clone(), room.image_url.clone()),
            };
            let author = self.deps.users.find_by_id(last.sender_id).await?;

            previews.push(ChatPreview {
                room_id,
                chat_name,
                chat_image_url,
                message_user_name: author.as_ref().map(User::display_name),
                message_text: Some(last.text.clone()),
                last_message_time: Some(last.created_at),
                is_message_forwarded: last.forwarded_message_id.is_some(),
            });
        }
        Ok(previews)
    }
}

/// 周期性清扫过期连接
pub fn spawn_sweeper(sessions: Arc<SessionService>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match sessions.sweep().await {
                Ok(0) => {}
                Ok(count) => tracing::info!(count, "过期连接清扫完成"),
                Err(err) => tracing::warn!(error = %err, "过期连接清扫失败"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalEventBus;
    use crate::clock::MonotonicClock;
    use crate::memory::MemoryStore;
    use crate::presence::memory::MemoryPresenceRegistry;
    use chrono::Utc;
    use domain::{InstanceId, Message, MessageId, Topic};
    use futures::StreamExt;

    struct Fixture {
        store: Arc<MemoryStore>,
        bus: LocalEventBus,
        presence: MemoryPresenceRegistry,
        sessions: SessionService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let bus = LocalEventBus::default();
        let instance = InstanceId::new("node-a");
        let presence = MemoryPresenceRegistry::new(instance.clone(), Duration::from_secs(60));
        let sessions = SessionService::new(SessionDependencies {
            users: store.clone(),
            rooms: store.clone(),
            messages: store.clone(),
            presence: Arc::new(presence.clone()),
            bus: Arc::new(bus.clone()),
            hub: Arc::new(ConnectionHub::new(instance)),
            clock: Arc::new(MonotonicClock::system()),
        });
        Fixture {
            store,
            bus,
            presence,
            sessions,
        }
    }

    #[tokio::test]
    async fn only_first_and_last_connection_change_status() {
        let f = fixture();
        let alice = User::new(UserId::generate(), "Alice", None);
        f.store.insert_user(alice.clone()).await;
        let mut statuses = f.bus.subscribe(Topic::UserStatus).await.unwrap();

        let (c1, c2) = (ConnectionId::generate(), ConnectionId::generate());
        let session = f.sessions.connect(alice.id, c1).await.unwrap();
        assert_eq!(session.bootstrap[0], ServerEvent::UserId(alice.id));
        f.sessions.connect(alice.id, c2).await.unwrap();
        f.sessions.disconnect(c1).await.unwrap();
        f.sessions.disconnect(c1).await.unwrap();
        f.sessions.disconnect(c2).await.unwrap();

        let first = statuses.next().await.unwrap();
        assert_eq!(first, DeliveryEvent::online(alice.id));
        match statuses.next().await.unwrap() {
            DeliveryEvent::PresenceChanged { status, last_seen_at, .. } => {
                assert_eq!(status, UserStatus::Offline);
                assert!(last_seen_at.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
        let stored = UserRepository::find_by_id(f.store.as_ref(), alice.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, UserStatus::Offline);
        assert!(f.presence.connections_of(alice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_user_is_rejected() {
        let f = fixture();
        let err = f
            .sessions
            .connect(UserId::generate(), ConnectionId::generate())
            .await
            .err()
            .unwrap();
        assert_eq!(err.client_message(), "Unauthorized");
    }

    #[tokio::test]
    async fn chat_list_skips_rooms_without_messages() {
        let f = fixture();
        let alice = User::new(UserId::generate(), "Alice", None);
        let bob = User::new(UserId::generate(), "Bob", Some("Stone".into()));
        f.store.insert_user(alice.clone()).await;
        f.store.insert_user(bob.clone()).await;
        let chat = f
            .store
            .find_or_create_direct_chat(alice.id, bob.id, Utc::now())
            .await
            .unwrap();
        let empty = domain::Room::owned(
            domain::RoomId::generate(RoomKind::Group),
            "quiet",
            alice.id,
            None,
            Utc::now(),
        );
        f.store.insert_room(empty, &[alice.id]).await;
        f.store
            .insert_message(Message::compose(
                MessageId::generate(),
                chat,
                bob.id,
                "hello",
                None,
                Utc::now(),
            ))
            .await;

        let previews = f.sessions.chat_previews(alice.id).await.unwrap();
        assert_eq!(previews.len(), 1);
        assert_eq!(previews[0].room_id, chat);
        assert_eq!(previews[0].chat_name.as_deref(), Some("Bob Stone"));
        assert_eq!(previews[0].message_text.as_deref(), Some("hello"));
    }

    /// 上线状态写入失败的用户仓储
    struct FailingOnline(Arc<MemoryStore>);

    #[async_trait::async_trait]
    impl UserRepository for FailingOnline {
        async fn find_by_id(&self, id: UserId) -> Result<Option<User>, domain::RepositoryError> {
            UserRepository::find_by_id(self.0.as_ref(), id).await
        }

        async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>, domain::RepositoryError> {
            self.0.find_many(ids).await
        }

        async fn update_status(
            &self,
            id: UserId,
            status: UserStatus,
            last_active: Option<domain::Timestamp>,
        ) -> Result<(), domain::RepositoryError> {
            if status == UserStatus::Online {
                return Err(domain::RepositoryError::storage("connection reset"));
            }
            self.0.update_status(id, status, last_active).await
        }

        async fn search(&self, query: &str, limit: u32) -> Result<Vec<User>, domain::RepositoryError> {
            UserRepository::search(self.0.as_ref(), query, limit).await
        }
    }

    #[tokio::test]
    async fn failed_connect_leaves_no_hub_or_presence_entry() {
        let store = Arc::new(MemoryStore::new());
        let alice = User::new(UserId::generate(), "Alice", None);
        store.insert_user(alice.clone()).await;
        let instance = InstanceId::new("node-a");
        let presence = MemoryPresenceRegistry::new(instance.clone(), Duration::from_secs(60));
        let hub = Arc::new(ConnectionHub::new(instance));
        let sessions = SessionService::new(SessionDependencies {
            users: Arc::new(FailingOnline(store.clone())),
            rooms: store.clone(),
            messages: store.clone(),
            presence: Arc::new(presence.clone()),
            bus: Arc::new(LocalEventBus::default()),
            hub: hub.clone(),
            clock: Arc::new(MonotonicClock::system()),
        });

        let connection_id = ConnectionId::generate();
        assert!(sessions.connect(alice.id, connection_id).await.is_err());

        assert_eq!(hub.connection_count().await, 0);
        assert!(presence.connections_of(alice.id).await.unwrap().is_empty());
        sessions.disconnect(connection_id).await.unwrap();
    }
}
