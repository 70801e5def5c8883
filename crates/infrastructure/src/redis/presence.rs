//! Redis 在线状态注册表
//!
//! `user:{id}:sockets` 保存用户的连接集合，`presence:conn:{id}` 保存连接所在实例并带过期时间，
//! 过期即视为连接已失活，等待清扫。注册与注销用 Lua 脚本保证原子性。

use std::collections::HashSet;
use std::time::Duration;

use application::{Deregistration, PresenceError, PresenceRegistry, Registration};
use async_trait::async_trait;
use domain::{ConnectionId, InstanceId, UserId};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{RedisError, RedisKeys};

const REGISTER_SCRIPT: &str = r#"
local sockets_key = KEYS[1]
local conn_key = KEYS[2]
local users_key = KEYS[3]

local added = redis.call('SADD', sockets_key, ARGV[1])
redis.call('SET', conn_key, ARGV[2], 'EX', tonumber(ARGV[3]))
redis.call('SADD', users_key, ARGV[4])

return {added, redis.call('SCARD', sockets_key)}
"#;

const DEREGISTER_SCRIPT: &str = r#"
local sockets_key = KEYS[1]
local conn_key = KEYS[2]
local users_key = KEYS[3]

local removed = redis.call('SREM', sockets_key, ARGV[1])
redis.call('DEL', conn_key)
local remaining = redis.call('SCARD', sockets_key)
if remaining == 0 then
    redis.call('SREM', users_key, ARGV[2])
end

return {removed, remaining}
"#;

#[derive(Clone)]
pub struct RedisPresenceRegistry {
    instance_id: InstanceId,
    connection: ConnectionManager,
    keys: RedisKeys,
    liveness_window: Duration,
    register_script: redis::Script,
    deregister_script: redis::Script,
}

impl RedisPresenceRegistry {
    pub async fn connect(
        client: &redis::Client,
        instance_id: InstanceId,
        keys: RedisKeys,
        liveness_window: Duration,
    ) -> Result<Self, RedisError> {
        let connection = ConnectionManager::new(client.clone()).await?;
        tracing::info!(instance_id = %instance_id.as_str(), "Redis 在线注册表已连接");
        Ok(Self {
            instance_id,
            connection,
            keys,
            liveness_window,
            register_script: redis::Script::new(REGISTER_SCRIPT),
            deregister_script: redis::Script::new(DEREGISTER_SCRIPT),
        })
    }

    fn ttl_seconds(&self) -> u64 {
        self.liveness_window.as_secs().max(1)
    }
}

fn store_error(err: redis::RedisError) -> PresenceError {
    PresenceError::from(RedisError::from(err))
}

#[async_trait]
impl PresenceRegistry for RedisPresenceRegistry {
    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    async fn register(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<Registration, PresenceError> {
        let mut conn = self.connection.clone();
        let (added, count): (i64, i64) = self
            .register_script
            .key(self.keys.user_sockets(user_id))
            .key(self.keys.connection(connection_id))
            .key(self.keys.tracked_users())
            .arg(connection_id.to_string())
            .arg(self.instance_id.as_str())
            .arg(self.ttl_seconds())
            .arg(user_id.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        tracing::debug!(
            user_id = %user_id,
            connection_id = %connection_id,
            connections = count,
            "连接已注册"
        );
        Ok(Registration {
            newly_added: added == 1,
            connection_count: count.max(0) as usize,
        })
    }

    async fn deregister(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<Deregistration, PresenceError> {
        let mut conn = self.connection.clone();
        let (removed, remaining): (i64, i64) = self
            .deregister_script
            .key(self.keys.user_sockets(user_id))
            .key(self.keys.connection(connection_id))
            .key(self.keys.tracked_users())
            .arg(connection_id.to_string())
            .arg(user_id.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(Deregistration {
            removed: removed == 1,
            remaining: remaining.max(0) as usize,
        })
    }

    async fn connections_of(
        &self,
        user_id: UserId,
    ) -> Result<HashSet<ConnectionId>, PresenceError> {
        let mut conn = self.connection.clone();
        let members: Vec<String> = conn
            .smembers(self.keys.user_sockets(user_id))
            .await
            .map_err(store_error)?;
        members
            .iter()
            .map(|raw| {
                raw.parse::<ConnectionId>()
                    .map_err(|_| PresenceError::Corrupt(format!("connection id {raw}")))
            })
            .collect()
    }

    async fn resolve_instance(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<InstanceId>, PresenceError> {
        let mut conn = self.connection.clone();
        let instance: Option<String> = conn
            .get(self.keys.connection(connection_id))
            .await
            .map_err(store_error)?;
        Ok(instance.map(InstanceId::new))
    }

    async fn heartbeat(&self, connection_id: ConnectionId) -> Result<(), PresenceError> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .set_ex(
                self.keys.connection(connection_id),
                self.instance_id.as_str(),
                self.ttl_seconds(),
            )
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn tracked_users(&self) -> Result<Vec<UserId>, PresenceError> {
        let mut conn = self.connection.clone();
        let members: Vec<String> = conn
            .smembers(self.keys.tracked_users())
            .await
            .map_err(store_error)?;
        members
            .iter()
            .map(|raw| {
                raw.parse::<UserId>()
                    .map_err(|_| PresenceError::Corrupt(format!("user id {raw}")))
            })
            .collect()
    }
}
