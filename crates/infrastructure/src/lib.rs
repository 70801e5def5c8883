//! 基础设施层实现。
//!
//! PostgreSQL 仓储、Redis 在线注册表与事件总线、S3 预签名，实现应用层定义的接口。

pub mod builder;
pub mod migrations;
pub mod redis;
pub mod repository;
pub mod storage;

pub use builder::{Infrastructure, InfrastructureError};
pub use migrations::MIGRATOR;
pub use crate::redis::{RedisError, RedisEventBus, RedisKeys, RedisPresenceRegistry};
pub use repository::{
    create_pg_pool, PgMessageRepository, PgRoomRepository, PgStorage, PgUserRepository,
};
pub use storage::S3Presigner;
