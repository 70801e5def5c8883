//! 总线事件到本地连接的分发
//!
//! 每个实例订阅全部主题。收到事件后先规划投递（查询成员与在线连接），再按到达顺序推送：
//! 规划可以并发进行，推送通过前一个事件的完成信号串行化，因此同一主题内的推送顺序与总线一致。

use std::sync::Arc;
use std::time::Duration;

use config::RedisConfig;
use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use domain::{ConnectionId, DeliveryEvent, RoomId, Topic, UserId};

use crate::bus::{BusError, EventBus};
use crate::error::ApplicationError;
use crate::hub::ConnectionHub;
use crate::outbound::{DeletedMessage, ServerEvent, StatusNotification};
use crate::presence::PresenceRegistry;
use crate::repository::RoomRepository;

/// 单次推送
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Room(RoomId, ServerEvent),
    Connection(ConnectionId, ServerEvent),
}

pub struct FanoutService {
    hub: Arc<ConnectionHub>,
    presence: Arc<dyn PresenceRegistry>,
    rooms: Arc<dyn RoomRepository>,
}

impl FanoutService {
    pub fn new(
        hub: Arc<ConnectionHub>,
        presence: Arc<dyn PresenceRegistry>,
        rooms: Arc<dyn RoomRepository>,
    ) -> Self {
        Self {
            hub,
            presence,
            rooms,
        }
    }

    /// 规划一个事件在本实例上的全部推送
    pub async fn plan(&self, event: &DeliveryEvent) -> Result<Vec<Delivery>, ApplicationError> {
        let mut deliveries = Vec::new();
        match event {
            DeliveryEvent::MessageDelivered {
                room_id,
                origin,
                message,
            } => {
                // 发起实例已在写入后直接推送给自己的加入者
                if origin != self.hub.instance_id() {
                    deliveries.push(Delivery::Room(
                        *room_id,
                        ServerEvent::NewMessage(message.clone()),
                    ));
                }
                let summary = ServerEvent::NewMessageNotification(message.summary());
                for member in self.rooms.members_of(*room_id).await? {
                    let connections = self.local_connections_of(member).await;
                    // 用户在任一本地标签页中打开了该房间时不再提醒；其他实例上的标签页无法在此得知
                    if self.any_joined(&connections, *room_id).await {
                        continue;
                    }
                    for connection_id in connections {
                        deliveries.push(Delivery::Connection(connection_id, summary.clone()));
                    }
                }
            }
            DeliveryEvent::MessageEdited {
                room_id,
                origin,
                edit,
            } => {
                if origin != self.hub.instance_id() {
                    deliveries.push(Delivery::Room(*room_id, ServerEvent::EditMessage(edit.clone())));
                }
            }
            DeliveryEvent::MessageDeleted {
                room_id,
                origin,
                message_id,
            } => {
                if origin != self.hub.instance_id() {
                    deliveries.push(Delivery::Room(
                        *room_id,
                        ServerEvent::DeleteMessage(DeletedMessage {
                            room_id: *room_id,
                            message_id: *message_id,
                        }),
                    ));
                }
            }
            DeliveryEvent::PresenceChanged {
                user_id,
                status,
                last_seen_at,
            } => {
                let notification = ServerEvent::UserStatusNotification(StatusNotification {
                    user_id: *user_id,
                    status: *status,
                    last_seen_at: *last_seen_at,
                });
                for partner in self.rooms.direct_chat_partners(*user_id).await? {
                    for connection_id in self.local_connections_of(partner).await {
                        deliveries.push(Delivery::Connection(connection_id, notification.clone()));
                    }
                }
            }
        }
        Ok(deliveries)
    }

    pub async fn apply(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            match delivery {
                Delivery::Room(room_id, event) => {
                    let reached = self.hub.push_to_room(room_id, event).await;
                    tracing::trace!(room_id = %room_id, reached, "房间推送完成");
                }
                Delivery::Connection(connection_id, event) => {
                    self.hub.push_to_connection(connection_id, event).await;
                }
            }
        }
    }

    pub async fn deliver(&self, event: &DeliveryEvent) -> Result<(), ApplicationError> {
        let deliveries = self.plan(event).await?;
        self.apply(deliveries).await;
        Ok(())
    }

    async fn any_joined(&self, connections: &[ConnectionId], room_id: RoomId) -> bool {
        for connection_id in connections {
            if self.hub.is_joined(*connection_id, room_id).await {
                return true;
            }
        }
        false
    }

    /// 注册表中属于本实例的连接；注册表读取失败时只记录日志
    async fn local_connections_of(&self, user_id: UserId) -> Vec<ConnectionId> {
        let connections = match self.presence.connections_of(user_id).await {
            Ok(connections) => connections,
            Err(err) => {
                tracing::warn!(user_id = %user_id, error = %err, "读取在线连接失败");
                return Vec::new();
            }
        };
        let mut local = Vec::new();
        for connection_id in connections {
            if self.hub.is_local(connection_id).await {
                local.push(connection_id);
            }
        }
        local
    }
}

/// 订阅断开后的重连退避
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResubscribePolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl ResubscribePolicy {
    /// 第 `attempt` 次重连前的等待时间（从 1 开始），按 2 的幂递增并封顶
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for ResubscribePolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl From<&RedisConfig> for ResubscribePolicy {
    fn from(config: &RedisConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.reconnect_interval_ms),
            max_delay: Duration::from_millis(config.max_reconnect_interval_ms),
        }
    }
}

/// 订阅全部主题并启动分发循环。
///
/// 首次订阅失败直接返回错误；运行中订阅断开则按退避策略重新订阅，不会放弃。
pub async fn spawn_dispatchers(
    fanout: Arc<FanoutService>,
    bus: Arc<dyn EventBus>,
    policy: ResubscribePolicy,
) -> Result<Vec<JoinHandle<()>>, BusError> {
    let mut handles = Vec::with_capacity(Topic::ALL.len());
    for topic in Topic::ALL {
        let stream = bus.subscribe(topic).await?;
        let fanout = Arc::clone(&fanout);
        let bus = Arc::clone(&bus);
        handles.push(tokio::spawn(async move {
            tracing::info!(topic = topic.channel(), "事件分发已启动");
            let mut stream = stream;
            let mut retry_count = 0u32;
            loop {
                let handled = dispatch(Arc::clone(&fanout), stream).await;
                if handled > 0 {
                    retry_count = 0;
                }
                tracing::warn!(topic = topic.channel(), handled, "事件订阅已断开，准备重新订阅");
                stream = resubscribe(bus.as_ref(), topic, policy, &mut retry_count).await;
                tracing::info!(topic = topic.channel(), retry_count, "事件订阅已恢复");
            }
        }));
    }
    Ok(handles)
}

async fn resubscribe(
    bus: &dyn EventBus,
    topic: Topic,
    policy: ResubscribePolicy,
    retry_count: &mut u32,
) -> crate::bus::EventStream {
    loop {
        *retry_count = retry_count.saturating_add(1);
        tokio::time::sleep(policy.delay(*retry_count)).await;
        match bus.subscribe(topic).await {
            Ok(stream) => return stream,
            Err(err) => tracing::error!(
                topic = topic.channel(),
                retry_count = *retry_count,
                error = %err,
                "重新订阅失败"
            ),
        }
    }
}

/// 消费一条订阅流直到结束，返回处理的事件数
async fn dispatch(fanout: Arc<FanoutService>, mut stream: crate::bus::EventStream) -> usize {
    let mut handled = 0;
    let mut previous: Option<oneshot::Receiver<()>> = None;
    while let Some(event) = stream.next().await {
        handled += 1;
        let (done, gate) = oneshot::channel();
        let wait_for = previous.replace(gate);
        let fanout = Arc::clone(&fanout);
        tokio::spawn(async move {
            let planned = fanout.plan(&event).await;
            if let Some(wait_for) = wait_for {
                // 前一个任务异常退出时发送端被丢弃，同样视为完成
                let _ = wait_for.await;
            }
            match planned {
                Ok(deliveries) => fanout.apply(deliveries).await,
                Err(err) => {
                    tracing::error!(topic = event.topic().channel(), error = %err, "事件分发失败")
                }
            }
            let _ = done.send(());
        });
    }
    handled
}
