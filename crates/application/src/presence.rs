use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use domain::{ConnectionId, InstanceId, UserId};

#[derive(Debug, Clone, Error)]
pub enum PresenceError {
    #[error("presence store unavailable: {0}")]
    Store(String),
    #[error("corrupt presence entry: {0}")]
    Corrupt(String),
}

/// `register` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// 本次调用是否真正新增了连接（重复注册为 false）
    pub newly_added: bool,
    /// 注册后该用户的连接总数
    pub connection_count: usize,
}

impl Registration {
    /// 只有第一个连接新加入时才需要广播上线
    pub fn came_online(&self) -> bool {
        self.newly_added && self.connection_count == 1
    }
}

/// `deregister` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deregistration {
    /// 本次调用是否真正移除了连接（已被其他调用移除时为 false）
    pub removed: bool,
    /// 注销后该用户剩余的连接数
    pub remaining: usize,
}

impl Deregistration {
    /// 并发注销同一连接时只有一方得到 true，下线只广播一次
    pub fn went_offline(&self) -> bool {
        self.removed && self.remaining == 0
    }
}

/// 在线状态注册表：用户 -> 活跃连接集合，所有实例共享。
///
/// 条目是尽力而为的：实例崩溃会留下过期条目，直到存活窗口过后被清扫。
/// 每个句柄绑定一个实例标识，注册的连接记录在该实例名下。
#[async_trait]
pub trait PresenceRegistry: Send + Sync {
    fn instance_id(&self) -> &InstanceId;

    /// 幂等添加
    async fn register(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<Registration, PresenceError>;

    /// 幂等移除
    async fn deregister(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<Deregistration, PresenceError>;

    async fn connections_of(&self, user_id: UserId)
        -> Result<HashSet<ConnectionId>, PresenceError>;

    /// 连接所在实例；存活标记过期后返回 `None`
    async fn resolve_instance(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<InstanceId>, PresenceError>;

    /// 刷新连接的存活标记
    async fn heartbeat(&self, connection_id: ConnectionId) -> Result<(), PresenceError>;

    /// 当前至少有一个已注册连接的用户
    async fn tracked_users(&self) -> Result<Vec<UserId>, PresenceError>;
}

/// 清扫存活标记已过期的连接，返回因此完全下线的用户。
///
/// 每个实例都会运行清扫；只有亲手移除最后一个连接的那次调用把用户计为下线。
pub async fn sweep_stale_connections(
    registry: &dyn PresenceRegistry,
) -> Result<Vec<UserId>, PresenceError> {
    let mut went_offline = Vec::new();
    for user_id in registry.tracked_users().await? {
        let connections = registry.connections_of(user_id).await?;
        for connection_id in connections {
            if registry.resolve_instance(connection_id).await?.is_some() {
                continue;
            }
            let outcome = registry.deregister(user_id, connection_id).await?;
            if !outcome.removed {
                continue;
            }
            tracing::info!(
                user_id = %user_id,
                connection_id = %connection_id,
                remaining = outcome.remaining,
                "清理过期连接"
            );
            if outcome.went_offline() {
                went_offline.push(user_id);
            }
        }
    }
    Ok(went_offline)
}

/// 内存实现的在线状态注册表（用于测试和单实例部署）
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct State {
        sockets: HashMap<UserId, HashSet<ConnectionId>>,
        liveness: HashMap<ConnectionId, (InstanceId, Instant)>,
    }

    /// 多个句柄可以共享同一份状态，模拟多实例共享存储
    #[derive(Clone)]
    pub struct MemoryPresenceRegistry {
        instance_id: InstanceId,
        liveness_window: Duration,
        state: Arc<Mutex<State>>,
    }

    impl MemoryPresenceRegistry {
        pub fn new(instance_id: InstanceId, liveness_window: Duration) -> Self {
            Self {
                instance_id,
                liveness_window,
                state: Arc::new(Mutex::new(State::default())),
            }
        }

        /// 共享状态、以另一个实例身份操作的句柄
        pub fn for_instance(&self, instance_id: InstanceId) -> Self {
            Self {
                instance_id,
                liveness_window: self.liveness_window,
                state: Arc::clone(&self.state),
            }
        }
    }

    #[async_trait]
    impl PresenceRegistry for MemoryPresenceRegistry {
        fn instance_id(&self) -> &InstanceId {
            &self.instance_id
        }

        async fn register(
            &self,
            user_id: UserId,
            connection_id: ConnectionId,
        ) -> Result<Registration, PresenceError> {
            let mut state = self.state.lock().await;
            let deadline = Instant::now() + self.liveness_window;
            state
                .liveness
                .insert(connection_id, (self.instance_id.clone(), deadline));
            let sockets = state.sockets.entry(user_id).or_default();
            let newly_added = sockets.insert(connection_id);
            Ok(Registration {
                newly_added,
                connection_count: sockets.len(),
            })
        }

        async fn deregister(
            &self,
            user_id: UserId,
            connection_id: ConnectionId,
        ) -> Result<Deregistration, PresenceError> {
            let mut state = self.state.lock().await;
            state.liveness.remove(&connection_id);
            let (removed, remaining) = match state.sockets.get_mut(&user_id) {
                Some(sockets) => (sockets.remove(&connection_id), sockets.len()),
                None => (false, 0),
            };
            if remaining == 0 {
                state.sockets.remove(&user_id);
            }
            Ok(Deregistration { removed, remaining })
        }

        async fn connections_of(
            &self,
            user_id: UserId,
        ) -> Result<HashSet<ConnectionId>, PresenceError> {
            let state = self.state.lock().await;
            Ok(state.sockets.get(&user_id).cloned().unwrap_or_default())
        }

        async fn resolve_instance(
            &self,
            connection_id: ConnectionId,
        ) -> Result<Option<InstanceId>, PresenceError> {
            let state = self.state.lock().await;
            let now = Instant::now();
            Ok(state
                .liveness
                .get(&connection_id)
                .filter(|(_, deadline)| *deadline > now)
                .map(|(instance, _)| instance.clone()))
        }

        async fn heartbeat(&self, connection_id: ConnectionId) -> Result<(), PresenceError> {
            let mut state = self.state.lock().await;
            let deadline = Instant::now() + self.liveness_window;
            state
                .liveness
                .insert(connection_id, (self.instance_id.clone(), deadline));
            Ok(())
        }

        async fn tracked_users(&self) -> Result<Vec<UserId>, PresenceError> {
            let state = self.state.lock().await;
            Ok(state.sockets.keys().copied().collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryPresenceRegistry;
    use super::*;
    use std::time::Duration;

    fn registry() -> MemoryPresenceRegistry {
        MemoryPresenceRegistry::new(InstanceId::new("node-a"), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let registry = registry();
        let user = UserId::generate();
        let conn = ConnectionId::generate();

        let first = registry.register(user, conn).await.unwrap();
        assert!(first.came_online());
        let once = registry.connections_of(user).await.unwrap();

        let second = registry.register(user, conn).await.unwrap();
        assert!(!second.newly_added);
        assert!(!second.came_online());
        assert_eq!(registry.connections_of(user).await.unwrap(), once);
    }

    #[tokio::test]
    async fn deregister_absent_entry_is_harmless() {
        let registry = registry();
        let user = UserId::generate();
        let conn = ConnectionId::generate();

        assert!(!registry.deregister(user, conn).await.unwrap().removed);
        registry.register(user, conn).await.unwrap();
        assert!(registry.deregister(user, conn).await.unwrap().went_offline());
        let again = registry.deregister(user, conn).await.unwrap();
        assert_eq!(again, Deregistration { removed: false, remaining: 0 });
        assert!(!again.went_offline());
        assert!(registry.connections_of(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_tab_does_not_come_online_again() {
        let registry = registry();
        let user = UserId::generate();
        assert!(registry.register(user, ConnectionId::generate()).await.unwrap().came_online());
        let second = registry.register(user, ConnectionId::generate()).await.unwrap();
        assert!(second.newly_added);
        assert_eq!(second.connection_count, 2);
        assert!(!second.came_online());
    }

    #[tokio::test]
    async fn resolves_owning_instance() {
        let node_a = registry();
        let node_b = node_a.for_instance(InstanceId::new("node-b"));
        let user = UserId::generate();
        let conn = ConnectionId::generate();
        node_b.register(user, conn).await.unwrap();

        assert_eq!(
            node_a.resolve_instance(conn).await.unwrap(),
            Some(InstanceId::new("node-b"))
        );
        assert!(node_a.connections_of(user).await.unwrap().contains(&conn));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_expired_connections() {
        let registry = registry();
        let stale_user = UserId::generate();
        let live_user = UserId::generate();
        let stale = ConnectionId::generate();
        let live = ConnectionId::generate();
        registry.register(stale_user, stale).await.unwrap();
        registry.register(live_user, live).await.unwrap();

        tokio::time::advance(Duration::from_secs(45)).await;
        registry.heartbeat(live).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;

        let offline = sweep_stale_connections(&registry).await.unwrap();
        assert_eq!(offline, vec![stale_user]);
        assert!(registry.connections_of(stale_user).await.unwrap().is_empty());
        assert_eq!(registry.connections_of(live_user).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_sweeps_report_offline_once() {
        let node_a = registry();
        let node_b = node_a.for_instance(InstanceId::new("node-b"));
        let user = UserId::generate();
        node_a.register(user, ConnectionId::generate()).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;

        let (from_a, from_b) = tokio::join!(
            sweep_stale_connections(&node_a),
            sweep_stale_connections(&node_b)
        );
        let total = from_a.unwrap().len() + from_b.unwrap().len();
        assert_eq!(total, 1);
        assert!(node_a.tracked_users().await.unwrap().is_empty());
    }
}
