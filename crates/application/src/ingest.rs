//! 入站消息处理
//!
//! 发送流程：`Received -> RoomResolved -> Persisted -> Enriched -> Published`，
//! 任一步骤失败即终止，失败前不会发布任何事件。编辑与删除为 `Requested -> Applied`，
//! 都先做权限检查，只广播轻量事件。

use std::fmt;
use std::sync::Arc;

use domain::{
    Attachment, AttachmentUpload, ConnectionId, DeliveryEvent, DomainError, Message, MessageEdit, MessageId,
    MessageView, RoomId, RoomKind, RoomTarget, Topic, UserId,
};

use crate::bus::EventBus;
use crate::clock::Clock;
use crate::enrich::MessageEnricher;
use crate::error::ApplicationError;
use crate::hub::ConnectionHub;
use crate::outbound::{DeletedMessage, ServerEvent};
use crate::repository::{MessageRepository, RoomRepository, UserRepository};

const MAX_TEXT_CHARS: usize = 4096;
const MAX_ATTACHMENTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Received,
    RoomResolved,
    Persisted,
    Enriched,
    Published,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestStage::Received => "received",
            IngestStage::RoomResolved => "room_resolved",
            IngestStage::Persisted => "persisted",
            IngestStage::Enriched => "enriched",
            IngestStage::Published => "published",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    /// `{kind}-{uuid}`，或私聊对象的裸用户ID
    pub room_id: String,
    pub text: String,
    pub attachments: Vec<AttachmentUpload>,
    /// 客户端关联标识，原样回传
    pub temp_id: Option<String>,
    pub original_message_id: Option<MessageId>,
    /// 发起请求的连接；首次私聊时加入新建的房间，以便收到自己的 `newMessage`
    pub origin_connection: Option<ConnectionId>,
}

pub struct MessageIngestDependencies {
    pub users: Arc<dyn UserRepository>,
    pub rooms: Arc<dyn RoomRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub enricher: Arc<MessageEnricher>,
    pub bus: Arc<dyn EventBus>,
    pub hub: Arc<ConnectionHub>,
    pub clock: Arc<dyn Clock>,
}

pub struct MessageIngest {
    deps: MessageIngestDependencies,
}

impl MessageIngest {
    pub fn new(deps: MessageIngestDependencies) -> Self {
        Self { deps }
    }

    pub async fn send(
        &self,
        sender_id: UserId,
        request: SendMessageRequest,
    ) -> Result<MessageView, ApplicationError> {
        let mut stage = IngestStage::Received;
        let result = self.run_send(sender_id, request, &mut stage).await;
        if let Err(err) = &result {
            tracing::warn!(
                user_id = %sender_id,
                stage = %stage,
                error = %err,
                "消息处理失败"
            );
        }
        result
    }

    async fn run_send(
        &self,
        sender_id: UserId,
        request: SendMessageRequest,
        stage: &mut IngestStage,
    ) -> Result<MessageView, ApplicationError> {
        validate_content(&request.text, request.attachments.len())?;

        let target = RoomTarget::parse(&request.room_id)?;
        let is_direct = matches!(target, RoomTarget::Direct(_));
        let room_id = self.resolve_room(sender_id, target).await?;
        if let (true, Some(connection_id)) = (is_direct, request.origin_connection) {
            self.deps.hub.join(connection_id, room_id).await;
        }
        *stage = IngestStage::RoomResolved;

        let now = self.deps.clock.now();
        let message = Message::compose(
            MessageId::generate(),
            room_id,
            sender_id,
            request.text,
            request.original_message_id,
            now,
        );
        let attachments: Vec<Attachment> = request
            .attachments
            .into_iter()
            .map(|upload| Attachment::from_upload(message.id, upload))
            .collect();
        self.deps
            .messages
            .create_with_attachments(&message, &attachments)
            .await
            .map_err(ApplicationError::MessageCreationFailed)?;
        self.touch_room(room_id, now).await;
        *stage = IngestStage::Persisted;

        let sender = self.deps.users.find_by_id(sender_id).await?;
        let view = self
            .deps
            .enricher
            .enrich_one(&message, sender.as_ref(), &attachments)
            .await
            .with_temp_id(request.temp_id);
        *stage = IngestStage::Enriched;

        self.publish_new(&view).await;
        *stage = IngestStage::Published;

        tracing::info!(
            message_id = %view.id,
            room_id = %room_id,
            user_id = %sender_id,
            attachments = view.attachments.len(),
            "消息已发布"
        );
        Ok(view)
    }

    /// 已物化的房间需要发送者是成员；裸用户ID按用户对查找或创建私聊
    async fn resolve_room(
        &self,
        sender_id: UserId,
        target: RoomTarget,
    ) -> Result<RoomId, ApplicationError> {
        match target {
            RoomTarget::Room(room_id) => {
                self.ensure_member(room_id, sender_id).await?;
                Ok(room_id)
            }
            RoomTarget::Direct(partner_id) => {
                if partner_id == sender_id {
                    return Err(ApplicationError::validation("Cannot start a chat with yourself"));
                }
                self.deps
                    .users
                    .find_by_id(partner_id)
                    .await?
                    .ok_or(DomainError::UserNotFound)?;
                let room_id = self
                    .deps
                    .rooms
                    .find_or_create_direct_chat(sender_id, partner_id, self.deps.clock.now())
                    .await?;
                tracing::debug!(room_id = %room_id, user_id = %sender_id, "私聊房间已解析");
                Ok(room_id)
            }
        }
    }

    async fn ensure_member(&self, room_id: RoomId, user_id: UserId) -> Result<(), ApplicationError> {
        if self.deps.rooms.is_member(room_id, user_id).await? {
            Ok(())
        } else {
            Err(ApplicationError::unauthorized())
        }
    }

    async fn touch_room(&self, room_id: RoomId, at: domain::Timestamp) {
        if let Err(err) = self.deps.rooms.touch_last_message(room_id, at).await {
            tracing::warn!(room_id = %room_id, error = %err, "更新房间最近消息时间失败");
        }
    }

    /// 本地加入者直接推送，同时发布到总线供其他实例与未读提醒使用
    async fn publish_new(&self, view: &MessageView) {
        self.deps
            .hub
            .push_to_room(view.room_id, ServerEvent::NewMessage(view.clone()))
            .await;

        let event = DeliveryEvent::MessageDelivered {
            room_id: view.room_id,
            origin: self.deps.hub.instance_id().clone(),
            message: view.clone(),
        };
        self.publish(event).await;
    }

    async fn publish(&self, event: DeliveryEvent) {
        let topic = event.topic();
        if let Err(err) = self.deps.bus.publish(topic, &event).await {
            // 消息已持久化，不回滚也不重试；远端实例的客户端通过历史补齐
            tracing::error!(topic = topic.channel(), error = %err, "事件发布失败");
        }
    }

    pub async fn edit(
        &self,
        requester: UserId,
        message_id: MessageId,
        text: String,
    ) -> Result<MessageEdit, ApplicationError> {
        validate_content(&text, 0)?;

        let mut message = self
            .deps
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or(DomainError::MessageNotFound)?;
        if message.sender_id != requester {
            return Err(DomainError::not_allowed("You can only edit your own messages").into());
        }

        message.edit(text, self.deps.clock.now())?;
        self.deps.messages.update_text(&message).await?;

        let edit = MessageEdit {
            id: message.id,
            updated_at: message.updated_at,
            text: message.text.clone(),
            is_edited: true,
        };
        self.deps
            .hub
            .push_to_room(message.room_id, ServerEvent::EditMessage(edit.clone()))
            .await;
        self.publish(DeliveryEvent::MessageEdited {
            room_id: message.room_id,
            origin: self.deps.hub.instance_id().clone(),
            edit: edit.clone(),
        })
        .await;

        tracing::info!(message_id = %message.id, user_id = %requester, "消息已编辑");
        Ok(edit)
    }

    /// 私聊只有作者可删除；群组/频道作者或所有者可删除
    pub async fn delete(
        &self,
        requester: UserId,
        message_id: MessageId,
    ) -> Result<DeletedMessage, ApplicationError> {
        let message = self
            .deps
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or(DomainError::MessageNotFound)?;

        let is_author = message.sender_id == requester;
        let allowed = match message.room_id.kind() {
            RoomKind::Chat => is_author,
            RoomKind::Group | RoomKind::Channel => {
                is_author
                    || self
                        .deps
                        .rooms
                        .find_by_id(message.room_id)
                        .await?
                        .is_some_and(|room| room.is_owned_by(requester))
            }
        };
        if !allowed {
            return Err(ApplicationError::unauthorized());
        }

        if !self
            .deps
            .messages
            .soft_delete(message_id, self.deps.clock.now())
            .await?
        {
            return Err(DomainError::MessageNotFound.into());
        }

        let deleted = DeletedMessage {
            room_id: message.room_id,
            message_id,
        };
        self.deps
            .hub
            .push_to_room(message.room_id, ServerEvent::DeleteMessage(deleted.clone()))
            .await;
        self.publish(DeliveryEvent::MessageDeleted {
            room_id: message.room_id,
            origin: self.deps.hub.instance_id().clone(),
            message_id,
        })
        .await;

        tracing::info!(message_id = %message_id, user_id = %requester, "消息已删除");
        Ok(deleted)
    }

    /// 转发到多个房间：复制正文，附件新建行但复用存储对象
    pub async fn forward(
        &self,
        requester: UserId,
        message_id: MessageId,
        room_ids: Vec<String>,
    ) -> Result<Vec<MessageView>, ApplicationError> {
        if room_ids.is_empty() {
            return Err(ApplicationError::validation("Invalid data"));
        }
        let targets = room_ids
            .iter()
            .map(|raw| raw.parse::<RoomId>())
            .collect::<Result<Vec<_>, _>>()?;

        let source = self
            .deps
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("Original message not found"))?;
        self.ensure_member(source.room_id, requester).await?;
        for room_id in &targets {
            self.ensure_member(*room_id, requester).await?;
        }

        let source_attachments = self.deps.messages.attachments_of(&[source.id]).await?;
        let author = self.deps.users.find_by_id(source.sender_id).await?;

        let mut forwarded = Vec::with_capacity(targets.len());
        for room_id in targets {
            let now = self.deps.clock.now();
            let copy = Message::forward_of(&source, MessageId::generate(), room_id, now);
            let attachments: Vec<Attachment> = source_attachments
                .iter()
                .map(|attachment| attachment.relink(copy.id))
                .collect();
            self.deps
                .messages
                .create_with_attachments(&copy, &attachments)
                .await
                .map_err(ApplicationError::MessageCreationFailed)?;
            self.touch_room(room_id, now).await;

            let view = self
                .deps
                .enricher
                .enrich_one(&copy, author.as_ref(), &attachments)
                .await;
            self.publish_new(&view).await;
            forwarded.push(view);
        }

        tracing::info!(
            message_id = %message_id,
            user_id = %requester,
            rooms = forwarded.len(),
            "消息已转发"
        );
        Ok(forwarded)
    }
}

fn validate_content(text: &str, attachments: usize) -> Result<(), ApplicationError> {
    if text.trim().is_empty() && attachments == 0 {
        return Err(ApplicationError::validation("Message is empty"));
    }
    if text.chars().count() > MAX_TEXT_CHARS {
        return Err(ApplicationError::validation("Message is too long"));
    }
    if attachments > MAX_ATTACHMENTS {
        return Err(ApplicationError::validation("Too many attachments"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_message_without_attachments_is_rejected() {
        assert!(validate_content("   ", 0).is_err());
        assert!(validate_content("", 1).is_ok());
        assert!(validate_content("hi", 0).is_ok());
        assert!(validate_content(&"x".repeat(MAX_TEXT_CHARS + 1), 0).is_err());
        assert!(validate_content("hi", MAX_ATTACHMENTS + 1).is_err());
    }

    #[test]
    fn stage_names() {
        assert_eq!(IngestStage::RoomResolved.to_string(), "room_resolved");
        assert_eq!(IngestStage::Published.to_string(), "published");
    }
}
