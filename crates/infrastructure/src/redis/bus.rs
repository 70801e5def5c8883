//! 基于 Redis Pub/Sub 的跨实例事件总线
//!
//! 每个主题对应一个频道，负载为 JSON 编码的 `DeliveryEvent`。
//! Pub/Sub 不持久化：订阅断开期间发布的事件会丢失，由客户端通过历史补齐。

use application::{BusError, EventBus, EventStream};
use async_trait::async_trait;
use domain::{DeliveryEvent, Topic};
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{RedisError, RedisKeys};

#[derive(Clone)]
pub struct RedisEventBus {
    client: redis::Client,
    publisher: ConnectionManager,
    keys: RedisKeys,
}

impl RedisEventBus {
    pub async fn connect(client: &redis::Client, keys: RedisKeys) -> Result<Self, RedisError> {
        let publisher = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client: client.clone(),
            publisher,
            keys,
        })
    }
}

pub(crate) fn encode(event: &DeliveryEvent) -> Result<String, RedisError> {
    Ok(serde_json::to_string(event)?)
}

pub(crate) fn decode(payload: &str) -> Result<DeliveryEvent, RedisError> {
    Ok(serde_json::from_str(payload)?)
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, topic: Topic, event: &DeliveryEvent) -> Result<(), BusError> {
        if event.topic() != topic {
            return Err(BusError::Publish(format!(
                "event does not belong to topic {}",
                topic.channel()
            )));
        }
        let payload = encode(event)?;
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn
            .publish(self.keys.channel(topic), payload)
            .await
            .map_err(|err| BusError::from(RedisError::from(err)))?;
        tracing::trace!(topic = topic.channel(), receivers, "事件已发布");
        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> Result<EventStream, BusError> {
        let channel = self.keys.channel(topic);
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|err| BusError::Subscribe(format!("获取 PubSub 连接失败: {err}")))?;
        pubsub
            .subscribe(&channel)
            .await
            .map_err(|err| BusError::Subscribe(format!("订阅频道 {channel} 失败: {err}")))?;
        tracing::info!(channel = %channel, "已订阅事件频道");

        let stream = pubsub.into_on_message().filter_map(move |msg| async move {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::warn!(error = %err, "事件负载读取失败");
                    return None;
                }
            };
            match decode(&payload) {
                Ok(event) if event.topic() == topic => Some(event),
                Ok(_) => {
                    tracing::warn!(topic = topic.channel(), "事件主题与频道不一致，已丢弃");
                    None
                }
                Err(err) => {
                    tracing::warn!(error = %err, "事件解码失败，已丢弃");
                    None
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::UserId;

    #[test]
    fn codec_keeps_event_intact() {
        let event = DeliveryEvent::offline(UserId::generate(), Utc::now());
        let decoded = decode(&encode(&event).unwrap()).unwrap();
        assert_eq!(decoded, event);
        assert!(decode("{\"kind\":\"unknown\"}").is_err());
    }
}
