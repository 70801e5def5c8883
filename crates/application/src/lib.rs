//! 应用层实现。
//!
//! 围绕领域模型的用例服务：握手鉴权、在线状态、消息写入与扇出、历史分页，
//! 以及对外部适配器（关系存储、事件总线、对象存储）的抽象。

pub mod auth;
pub mod backend;
pub mod bus;
pub mod clock;
pub mod enrich;
pub mod error;
pub mod fanout;
pub mod history;
pub mod hub;
pub mod ingest;
pub mod memory;
pub mod outbound;
pub mod presence;
pub mod repository;
pub mod rooms;
pub mod session;
pub mod storage;

pub use auth::{AuthError, Authenticated, Claims, HandshakeCredentials, TokenAuthority, TokenKind};
pub use backend::{ChatBackend, ChatBackendDependencies};
pub use bus::{BusError, EventBus, EventStream, LocalEventBus};
pub use clock::{Clock, MonotonicClock, SystemClock};
pub use enrich::MessageEnricher;
pub use error::ApplicationError;
pub use fanout::{spawn_dispatchers, Delivery, FanoutService, ResubscribePolicy};
pub use history::HistoryPager;
pub use hub::{ConnectionHub, DetachedConnection, OutboundReceiver, OutboundSender};
pub use ingest::{IngestStage, MessageIngest, MessageIngestDependencies, SendMessageRequest};
pub use memory::MemoryStore;
pub use outbound::ServerEvent;
pub use presence::{
    memory::MemoryPresenceRegistry, sweep_stale_connections, Deregistration, PresenceError,
    PresenceRegistry, Registration,
};
pub use repository::{MessageRepository, RoomRepository, UserRepository};
pub use rooms::{RoomService, RoomServiceDependencies};
pub use session::{spawn_sweeper, ConnectedSession, SessionDependencies, SessionService};
pub use storage::{new_object_key, ObjectStorage, PresignError, StaticObjectStorage, UploadTicket};
