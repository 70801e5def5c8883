//! 跨实例投递事件
//!
//! 事件总线上传输的信封。只携带扇出所需的最小反规范化投影，从不持久化。

use serde::{Deserialize, Serialize};

use crate::message::{Attachment, Message};
use crate::user::{User, UserStatus};
use crate::value_objects::{AttachmentId, InstanceId, MessageId, RoomId, Timestamp, UserId};

/// 总线主题
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "newMessage")]
    NewMessage,
    #[serde(rename = "userStatus")]
    UserStatus,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::NewMessage, Topic::UserStatus];

    pub fn channel(self) -> &'static str {
        match self {
            Topic::NewMessage => "newMessage",
            Topic::UserStatus => "userStatus",
        }
    }

    pub fn from_channel(channel: &str) -> Option<Self> {
        Topic::ALL.into_iter().find(|topic| topic.channel() == channel)
    }
}

/// 附件的客户端视图：签名URL失败时 `file_url` 为空
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentView {
    pub id: AttachmentId,
    #[serde(rename = "fileURL")]
    pub file_url: Option<String>,
    pub file_name: String,
    pub save_as_media: bool,
    /// 以字符串传输，避免客户端大整数精度问题
    pub file_size: Option<String>,
    pub file_base64_blur: Option<String>,
}

impl AttachmentView {
    pub fn new(attachment: &Attachment, file_url: Option<String>) -> Self {
        Self {
            id: attachment.id,
            file_url,
            file_name: attachment.name.clone(),
            save_as_media: attachment.persist_name,
            file_size: attachment.file_size.map(|size| size.to_string()),
            file_base64_blur: attachment.preview_blob.clone(),
        }
    }
}

/// 经过补全（发送者名称、附件URL）的消息，推送给加入房间的连接
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub text: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub original_message_id: Option<MessageId>,
    pub forwarded_message_id: Option<MessageId>,
    pub is_edited: bool,
    pub user_name: Option<String>,
    #[serde(rename = "imgURL")]
    pub img_url: Option<String>,
    pub attachments: Vec<AttachmentView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
}

impl MessageView {
    pub fn new(message: &Message, sender: Option<&User>, attachments: Vec<AttachmentView>) -> Self {
        Self {
            id: message.id,
            room_id: message.room_id,
            user_id: message.sender_id,
            text: message.text.clone(),
            created_at: message.created_at,
            updated_at: message.updated_at,
            original_message_id: message.original_message_id,
            forwarded_message_id: message.forwarded_message_id,
            is_edited: message.is_edited,
            user_name: sender.map(|user| user.name.clone()),
            img_url: sender.and_then(|user| user.image_url.clone()),
            attachments,
            temp_id: None,
        }
    }

    pub fn with_temp_id(mut self, temp_id: Option<String>) -> Self {
        self.temp_id = temp_id;
        self
    }

    pub fn summary(&self) -> MessageSummary {
        MessageSummary {
            room_id: self.room_id,
            user_name: self.user_name.clone(),
            user_id: self.user_id,
            text: self.text.clone(),
            is_attachment: !self.attachments.is_empty(),
            last_message_time: self.created_at,
        }
    }
}

/// 未读提醒使用的精简消息摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    pub room_id: RoomId,
    pub user_name: Option<String>,
    pub user_id: UserId,
    pub text: String,
    pub is_attachment: bool,
    pub last_message_time: Timestamp,
}

/// 编辑后的轻量通知
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEdit {
    pub id: MessageId,
    pub updated_at: Timestamp,
    pub text: String,
    pub is_edited: bool,
}

/// 总线事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DeliveryEvent {
    /// 新消息。`origin` 为发送者所在实例，该实例已直接完成本地推送。
    #[serde(rename_all = "camelCase")]
    MessageDelivered {
        room_id: RoomId,
        origin: InstanceId,
        message: MessageView,
    },
    #[serde(rename_all = "camelCase")]
    MessageEdited {
        room_id: RoomId,
        origin: InstanceId,
        edit: MessageEdit,
    },
    #[serde(rename_all = "camelCase")]
    MessageDeleted {
        room_id: RoomId,
        origin: InstanceId,
        message_id: MessageId,
    },
    #[serde(rename_all = "camelCase")]
    PresenceChanged {
        user_id: UserId,
        status: UserStatus,
        last_seen_at: Option<Timestamp>,
    },
}

impl DeliveryEvent {
    pub fn topic(&self) -> Topic {
        match self {
            DeliveryEvent::MessageDelivered { .. }
            | DeliveryEvent::MessageEdited { .. }
            | DeliveryEvent::MessageDeleted { .. } => Topic::NewMessage,
            DeliveryEvent::PresenceChanged { .. } => Topic::UserStatus,
        }
    }

    pub fn online(user_id: UserId) -> Self {
        DeliveryEvent::PresenceChanged {
            user_id,
            status: UserStatus::Online,
            last_seen_at: None,
        }
    }

    pub fn offline(user_id: UserId, last_seen_at: Timestamp) -> Self {
        DeliveryEvent::PresenceChanged {
            user_id,
            status: UserStatus::Offline,
            last_seen_at: Some(last_seen_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn event_topics() {
        let user_id = UserId::generate();
        assert_eq!(DeliveryEvent::online(user_id).topic(), Topic::UserStatus);
        let deleted = DeliveryEvent::MessageDeleted {
            room_id: RoomId::generate(crate::RoomKind::Group),
            origin: InstanceId::new("a"),
            message_id: MessageId::generate(),
        };
        assert_eq!(deleted.topic(), Topic::NewMessage);
        assert_eq!(Topic::from_channel("userStatus"), Some(Topic::UserStatus));
        assert_eq!(Topic::from_channel("other"), None);
    }

    #[test]
    fn presence_payload_shape() {
        let user_id = UserId::generate();
        let at = Utc::now();
        let json = serde_json::to_value(DeliveryEvent::offline(user_id, at)).unwrap();
        assert_eq!(json["kind"], "presenceChanged");
        assert_eq!(json["status"], "offline");
        assert_eq!(json["userId"], user_id.to_string());
        assert!(json["lastSeenAt"].is_string());
    }
}
