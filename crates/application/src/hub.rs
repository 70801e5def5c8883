//! 本实例连接中心
//!
//! 保存本实例上的连接及其加入的房间，是唯一能向 socket 写数据的组件。
//! 不了解其他实例：跨实例成员只能通过事件总线的处理器触达。

use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, RwLock};

use domain::{ConnectionId, InstanceId, RoomId, UserId};

use crate::outbound::ServerEvent;

pub type OutboundSender = mpsc::UnboundedSender<ServerEvent>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<ServerEvent>;

struct LocalConnection {
    user_id: UserId,
    sender: OutboundSender,
    rooms: HashSet<RoomId>,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, LocalConnection>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

/// 断开时从连接中心移除的连接信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedConnection {
    pub user_id: UserId,
    pub rooms: Vec<RoomId>,
}

pub struct ConnectionHub {
    instance_id: InstanceId,
    state: RwLock<HubState>,
}

impl ConnectionHub {
    pub fn new(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            state: RwLock::new(HubState::default()),
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// 注册本地连接，返回该连接的出站队列
    pub async fn attach(&self, connection_id: ConnectionId, user_id: UserId) -> OutboundReceiver {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state.write().await;
        if let Some(previous) = state.connections.insert(
            connection_id,
            LocalConnection {
                user_id,
                sender,
                rooms: HashSet::new(),
            },
        ) {
            for room_id in previous.rooms {
                remove_from_room(&mut state.rooms, room_id, connection_id);
            }
        }
        tracing::debug!(connection_id = %connection_id, user_id = %user_id, "连接已注册到连接中心");
        receiver
    }

    pub async fn detach(&self, connection_id: ConnectionId) -> Option<DetachedConnection> {
        let mut state = self.state.write().await;
        let connection = state.connections.remove(&connection_id)?;
        let rooms: Vec<RoomId> = connection.rooms.into_iter().collect();
        for room_id in &rooms {
            remove_from_room(&mut state.rooms, *room_id, connection_id);
        }
        Some(DetachedConnection {
            user_id: connection.user_id,
            rooms,
        })
    }

    /// 幂等加入；连接不存在时返回 false
    pub async fn join(&self, connection_id: ConnectionId, room_id: RoomId) -> bool {
        let mut state = self.state.write().await;
        let Some(connection) = state.connections.get_mut(&connection_id) else {
            return false;
        };
        connection.rooms.insert(room_id);
        state.rooms.entry(room_id).or_default().insert(connection_id);
        true
    }

    pub async fn leave(&self, connection_id: ConnectionId, room_id: RoomId) {
        let mut state = self.state.write().await;
        if let Some(connection) = state.connections.get_mut(&connection_id) {
            connection.rooms.remove(&room_id);
        }
        remove_from_room(&mut state.rooms, room_id, connection_id);
    }

    pub async fn is_joined(&self, connection_id: ConnectionId, room_id: RoomId) -> bool {
        let state = self.state.read().await;
        state
            .rooms
            .get(&room_id)
            .is_some_and(|members| members.contains(&connection_id))
    }

    pub async fn is_local(&self, connection_id: ConnectionId) -> bool {
        self.state.read().await.connections.contains_key(&connection_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// 推送给单个本地连接；连接不在本实例或已关闭时返回 false
    pub async fn push_to_connection(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        let state = self.state.read().await;
        match state.connections.get(&connection_id) {
            Some(connection) => connection.sender.send(event).is_ok(),
            None => false,
        }
    }

    /// 推送给本实例上所有加入了该房间的连接，返回送达数量
    pub async fn push_to_room(&self, room_id: RoomId, event: ServerEvent) -> usize {
        let state = self.state.read().await;
        let Some(members) = state.rooms.get(&room_id) else {
            return 0;
        };
        members
            .iter()
            .filter_map(|id| state.connections.get(id))
            .filter(|connection| connection.sender.send(event.clone()).is_ok())
            .count()
    }
}

fn remove_from_room(
    rooms: &mut HashMap<RoomId, HashSet<ConnectionId>>,
    room_id: RoomId,
    connection_id: ConnectionId,
) {
    if let Some(members) = rooms.get_mut(&room_id) {
        members.remove(&connection_id);
        if members.is_empty() {
            rooms.remove(&room_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::RoomKind;

    fn hub() -> ConnectionHub {
        ConnectionHub::new(InstanceId::new("node-a"))
    }

    #[tokio::test]
    async fn room_push_reaches_only_joined_connections() {
        let hub = hub();
        let room = RoomId::generate(RoomKind::Group);
        let (a, b) = (ConnectionId::generate(), ConnectionId::generate());
        let mut rx_a = hub.attach(a, UserId::generate()).await;
        let mut rx_b = hub.attach(b, UserId::generate()).await;

        assert!(hub.join(a, room).await);
        assert!(hub.join(a, room).await);
        assert_eq!(hub.push_to_room(room, ServerEvent::error("x")).await, 1);

        assert_eq!(rx_a.recv().await, Some(ServerEvent::error("x")));
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_and_detach_clean_up_rooms() {
        let hub = hub();
        let room = RoomId::generate(RoomKind::Channel);
        let other = RoomId::generate(RoomKind::Chat);
        let conn = ConnectionId::generate();
        let user = UserId::generate();
        let _rx = hub.attach(conn, user).await;

        hub.join(conn, room).await;
        hub.join(conn, other).await;
        hub.leave(conn, room).await;
        assert!(!hub.is_joined(conn, room).await);
        assert!(hub.is_joined(conn, other).await);

        let detached = hub.detach(conn).await.unwrap();
        assert_eq!(detached.user_id, user);
        assert_eq!(detached.rooms, vec![other]);
        assert_eq!(hub.push_to_room(other, ServerEvent::error("x")).await, 0);
        assert!(hub.detach(conn).await.is_none());
    }

    #[tokio::test]
    async fn unknown_connection_cannot_join() {
        let hub = hub();
        assert!(!hub.join(ConnectionId::generate(), RoomId::generate(RoomKind::Group)).await);
        assert!(!hub.push_to_connection(ConnectionId::generate(), ServerEvent::error("x")).await);
    }
}
