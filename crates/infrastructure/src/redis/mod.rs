//! Redis 适配器
//!
//! 在线注册表（集合 + 带过期的存活标记）与基于 Pub/Sub 的事件总线。

pub mod bus;
pub mod error;
pub mod presence;

pub use bus::RedisEventBus;
pub use error::{RedisError, RedisResult};
pub use presence::RedisPresenceRegistry;

use domain::{ConnectionId, UserId};

/// 所有键与频道共享的命名空间前缀
#[derive(Debug, Clone)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// 用户的活跃连接集合
    pub fn user_sockets(&self, user_id: UserId) -> String {
        format!("{}user:{}:sockets", self.prefix, user_id)
    }

    /// 连接的存活标记，值为所在实例
    pub fn connection(&self, connection_id: ConnectionId) -> String {
        format!("{}presence:conn:{}", self.prefix, connection_id)
    }

    /// 至少有一个注册连接的用户
    pub fn tracked_users(&self) -> String {
        format!("{}presence:users", self.prefix)
    }

    pub fn channel(&self, topic: domain::Topic) -> String {
        format!("{}{}", self.prefix, topic.channel())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn keys_carry_prefix() {
        let keys = RedisKeys::new("chat:");
        let user = UserId::from(Uuid::nil());
        assert_eq!(
            keys.user_sockets(user),
            "chat:user:00000000-0000-0000-0000-000000000000:sockets"
        );
        assert_eq!(keys.tracked_users(), "chat:presence:users");
        assert_eq!(keys.channel(domain::Topic::UserStatus), "chat:userStatus");
    }
}
