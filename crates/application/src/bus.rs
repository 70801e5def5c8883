//! 跨实例事件总线抽象
//!
//! 两个主题：`newMessage` 与 `userStatus`。投递是广播语义，每个订阅的实例都会收到；
//! 只在同一主题、同一发布者内保持底层通道的顺序。

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;
use tokio::sync::broadcast;

use domain::{DeliveryEvent, Topic};

#[derive(Debug, Clone, Error)]
pub enum BusError {
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("event codec error: {0}")]
    Codec(String),
}

pub type EventStream = Pin<Box<dyn Stream<Item = DeliveryEvent> + Send>>;

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: Topic, event: &DeliveryEvent) -> Result<(), BusError>;

    /// 订阅一个主题；流结束表示订阅断开
    async fn subscribe(&self, topic: Topic) -> Result<EventStream, BusError>;
}

/// 进程内事件总线，基于 tokio broadcast。
///
/// 克隆共享同一组通道，因此测试中的多个"实例"可以挂在同一条总线上。
#[derive(Clone)]
pub struct LocalEventBus {
    new_message: broadcast::Sender<DeliveryEvent>,
    user_status: broadcast::Sender<DeliveryEvent>,
}

impl LocalEventBus {
    pub fn new(capacity: usize) -> Self {
        let (new_message, _) = broadcast::channel(capacity);
        let (user_status, _) = broadcast::channel(capacity);
        Self {
            new_message,
            user_status,
        }
    }

    fn sender(&self, topic: Topic) -> &broadcast::Sender<DeliveryEvent> {
        match topic {
            Topic::NewMessage => &self.new_message,
            Topic::UserStatus => &self.user_status,
        }
    }
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for LocalEventBus {
    async fn publish(&self, topic: Topic, event: &DeliveryEvent) -> Result<(), BusError> {
        if event.topic() != topic {
            return Err(BusError::Publish(format!(
                "event does not belong to topic {}",
                topic.channel()
            )));
        }
        // 没有订阅者时事件直接丢弃
        let _ = self.sender(topic).send(event.clone());
        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> Result<EventStream, BusError> {
        let receiver = self.sender(topic).subscribe();
        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "本地事件总线订阅者落后，丢弃事件");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::UserId;
    use futures::StreamExt;

    #[tokio::test]
    async fn every_subscriber_receives_event() {
        let bus = LocalEventBus::default();
        let mut a = bus.subscribe(Topic::UserStatus).await.unwrap();
        let mut b = bus.clone().subscribe(Topic::UserStatus).await.unwrap();

        let event = DeliveryEvent::online(UserId::generate());
        bus.publish(Topic::UserStatus, &event).await.unwrap();

        assert_eq!(a.next().await, Some(event.clone()));
        assert_eq!(b.next().await, Some(event));
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = LocalEventBus::default();
        let mut messages = bus.subscribe(Topic::NewMessage).await.unwrap();
        bus.publish(Topic::UserStatus, &DeliveryEvent::online(UserId::generate()))
            .await
            .unwrap();
        let nothing =
            tokio::time::timeout(std::time::Duration::from_millis(50), messages.next()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn rejects_mismatched_topic() {
        let bus = LocalEventBus::default();
        let result = bus
            .publish(Topic::NewMessage, &DeliveryEvent::online(UserId::generate()))
            .await;
        assert!(matches!(result, Err(BusError::Publish(_))));
    }
}
