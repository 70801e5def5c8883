use std::sync::Arc;
use std::time::Duration;

use application::{ChatBackendDependencies, Clock, MonotonicClock};
use config::AppConfig;
use domain::InstanceId;
use thiserror::Error;

use crate::{
    migrations::MIGRATOR,
    redis::{RedisError, RedisEventBus, RedisKeys, RedisPresenceRegistry},
    repository::{create_pg_pool, PgStorage},
    storage::S3Presigner,
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("redis error: {0}")]
    Redis(#[from] RedisError),
    #[error("object storage error: {0}")]
    Storage(#[from] application::PresignError),
}

/// 一个实例连接好的全部外部依赖
#[derive(Clone)]
pub struct Infrastructure {
    pub instance_id: InstanceId,
    pub storage: Arc<PgStorage>,
    pub presence: Arc<RedisPresenceRegistry>,
    pub bus: Arc<RedisEventBus>,
    pub objects: Arc<S3Presigner>,
    pub clock: Arc<dyn Clock>,
}

impl Infrastructure {
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let instance_id = config
            .server
            .instance_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .map(InstanceId::new)
            .unwrap_or_else(InstanceId::generate);

        let pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;
        MIGRATOR.run(&pool).await?;
        tracing::info!("数据库迁移完成");

        let client = redis::Client::open(config.redis.url.as_str()).map_err(RedisError::from)?;
        let keys = RedisKeys::new(config.redis.key_prefix.clone());
        let presence = RedisPresenceRegistry::connect(
            &client,
            instance_id.clone(),
            keys.clone(),
            Duration::from_secs(config.presence.liveness_window_seconds),
        )
        .await?;
        let bus = RedisEventBus::connect(&client, keys).await?;

        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::system());
        let objects = S3Presigner::new(&config.storage, clock.clone())?;

        tracing::info!(instance_id = %instance_id, "基础设施已就绪");
        Ok(Self {
            instance_id,
            storage: Arc::new(PgStorage::new(pool)),
            presence: Arc::new(presence),
            bus: Arc::new(bus),
            objects: Arc::new(objects),
            clock,
        })
    }

    pub fn backend_dependencies(&self) -> ChatBackendDependencies {
        ChatBackendDependencies {
            users: Arc::new(self.storage.user_repository.clone()),
            rooms: Arc::new(self.storage.room_repository.clone()),
            messages: Arc::new(self.storage.message_repository.clone()),
            presence: self.presence.clone(),
            bus: self.bus.clone(),
            storage: self.objects.clone(),
            clock: self.clock.clone(),
        }
    }
}
