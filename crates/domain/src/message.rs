use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{AttachmentId, MessageId, RoomId, Timestamp, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    #[serde(rename = "userId")]
    pub sender_id: UserId,
    pub text: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// 回复的原消息
    pub original_message_id: Option<MessageId>,
    /// 转发来源
    pub forwarded_message_id: Option<MessageId>,
    pub is_edited: bool,
    #[serde(skip_serializing)] // 软删除标记不暴露给客户端
    pub deleted_at: Option<Timestamp>,
}

impl Message {
    pub fn compose(
        id: MessageId,
        room_id: RoomId,
        sender_id: UserId,
        text: impl Into<String>,
        original_message_id: Option<MessageId>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            room_id,
            sender_id,
            text: text.into(),
            created_at,
            updated_at: created_at,
            original_message_id,
            forwarded_message_id: None,
            is_edited: false,
            deleted_at: None,
        }
    }

    /// 以 `source` 为来源在另一个房间创建转发副本
    pub fn forward_of(
        source: &Message,
        id: MessageId,
        room_id: RoomId,
        created_at: Timestamp,
    ) -> Self {
        Self {
            forwarded_message_id: Some(source.id),
            ..Self::compose(id, room_id, source.sender_id, source.text.clone(), None, created_at)
        }
    }

    pub fn edit(&mut self, text: impl Into<String>, at: Timestamp) -> Result<(), DomainError> {
        if self.is_deleted() {
            return Err(DomainError::MessageDeleted);
        }
        self.text = text.into();
        self.is_edited = true;
        self.updated_at = at;
        Ok(())
    }

    pub fn soft_delete(&mut self, at: Timestamp) {
        if self.deleted_at.is_none() {
            self.deleted_at = Some(at);
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn cursor(&self) -> MessageCursor {
        MessageCursor::new(self.created_at, self.id)
    }
}

/// 键集分页游标：(createdAt, id)。
///
/// createdAt 本身并不唯一（同一毫秒插入），因此在相同时间戳内以 id 作为决胜键。
/// 字段顺序即比较顺序，派生的 `Ord` 就是分页使用的全序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCursor {
    pub created_at: Timestamp,
    pub id: MessageId,
}

impl MessageCursor {
    pub fn new(created_at: Timestamp, id: MessageId) -> Self {
        Self { created_at, id }
    }

    /// `other` 是否严格排在游标之前（更旧）
    pub fn precedes(&self, other: &MessageCursor) -> bool {
        other < self
    }
}

/// 客户端上传完成后随消息提交的附件描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentUpload {
    pub key: String,
    pub name: String,
    /// 下载时保留原始文件名
    #[serde(default)]
    pub save_as_media: bool,
    #[serde(default)]
    pub file_size: Option<i64>,
    #[serde(default)]
    pub file_base64_blur: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: AttachmentId,
    pub message_id: MessageId,
    pub key: String,
    pub name: String,
    pub persist_name: bool,
    pub file_size: Option<i64>,
    pub preview_blob: Option<String>,
}

impl Attachment {
    pub fn from_upload(message_id: MessageId, upload: AttachmentUpload) -> Self {
        Self {
            id: AttachmentId::generate(),
            message_id,
            key: upload.key,
            name: upload.name,
            persist_name: upload.save_as_media,
            file_size: upload.file_size,
            preview_blob: upload.file_base64_blur,
        }
    }

    /// 转发时复用同一个存储对象，只生成新的附件行
    pub fn relink(&self, message_id: MessageId) -> Self {
        Self {
            id: AttachmentId::generate(),
            message_id,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn message_at(created_at: Timestamp) -> Message {
        Message::compose(
            MessageId::generate(),
            RoomId::Group(Uuid::new_v4()),
            UserId::generate(),
            "hi",
            None,
            created_at,
        )
    }

    #[test]
    fn cursor_breaks_ties_by_id() {
        let now = Utc::now();
        let low = MessageCursor::new(now, MessageId::from(Uuid::from_u128(1)));
        let high = MessageCursor::new(now, MessageId::from(Uuid::from_u128(2)));
        assert!(high.precedes(&low));
        assert!(!low.precedes(&high));
        assert!(!low.precedes(&low));

        let older = MessageCursor::new(now - Duration::milliseconds(1), MessageId::from(Uuid::from_u128(9)));
        assert!(low.precedes(&older));
    }

    #[test]
    fn deleted_message_cannot_be_edited() {
        let now = Utc::now();
        let mut message = message_at(now);
        message.edit("edited", now).unwrap();
        assert!(message.is_edited);
        assert_eq!(message.text, "edited");

        message.soft_delete(now);
        assert!(message.is_deleted());
        assert_eq!(message.edit("again", now), Err(DomainError::MessageDeleted));
    }

    #[test]
    fn forward_keeps_provenance() {
        let now = Utc::now();
        let source = message_at(now);
        let target = RoomId::Channel(Uuid::new_v4());
        let copy = Message::forward_of(&source, MessageId::generate(), target, now);
        assert_eq!(copy.forwarded_message_id, Some(source.id));
        assert_eq!(copy.room_id, target);
        assert_eq!(copy.text, source.text);
        assert!(!copy.is_edited);
    }
}
