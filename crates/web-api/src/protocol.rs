//! 客户端 -> 服务端事件
//!
//! 文本帧格式 `{"event": "<名称>", "data": {...}}`，字段 camelCase。
//! 房间标识保持字符串，由应用层解析，以便返回 "Invalid room id"。

use chrono::{DateTime, Utc};
use domain::{AttachmentUpload, MessageId, UserId};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    Search(SearchRequest),
    EnterChat(RoomRef),
    LeaveChat(RoomRef),
    SendMessage(SendMessagePayload),
    DeleteMessage(MessageRef),
    EditMessage(EditMessagePayload),
    GetOlderMessages(OlderMessagesPayload),
    CreateNewGroup(CreateGroupPayload),
    CreateNewChannel(CreateChannelPayload),
    AddUserInGroup(AddUsersPayload),
    LeaveGroup(GroupRef),
    Subscribe(RoomRef),
    UnsubscribeChannel(ChannelRef),
    ForwardMessages(ForwardPayload),
    RequestUploadUrls(UploadUrlsPayload),
}

impl ClientEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// 事件名，用于日志
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Search(_) => "search",
            ClientEvent::EnterChat(_) => "enterChat",
            ClientEvent::LeaveChat(_) => "leaveChat",
            ClientEvent::SendMessage(_) => "sendMessage",
            ClientEvent::DeleteMessage(_) => "deleteMessage",
            ClientEvent::EditMessage(_) => "editMessage",
            ClientEvent::GetOlderMessages(_) => "getOlderMessages",
            ClientEvent::CreateNewGroup(_) => "createNewGroup",
            ClientEvent::CreateNewChannel(_) => "createNewChannel",
            ClientEvent::AddUserInGroup(_) => "addUserInGroup",
            ClientEvent::LeaveGroup(_) => "leaveGroup",
            ClientEvent::Subscribe(_) => "subscribe",
            ClientEvent::UnsubscribeChannel(_) => "unsubscribeChannel",
            ClientEvent::ForwardMessages(_) => "forwardMessages",
            ClientEvent::RequestUploadUrls(_) => "requestUploadUrls",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchRequest {
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRef {
    pub group_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRef {
    pub channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub room_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentUpload>,
    #[serde(default)]
    pub temp_id: Option<String>,
    #[serde(default)]
    pub original_message_id: Option<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessagePayload {
    pub message_id: MessageId,
    pub edited_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OlderMessagesPayload {
    pub room_id: String,
    pub last_message_id: MessageId,
    pub last_message_created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupPayload {
    pub title: String,
    #[serde(default)]
    pub img_url: Option<String>,
    #[serde(default)]
    pub users: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChannelPayload {
    pub title: String,
    #[serde(default)]
    pub img_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddUsersPayload {
    pub group_id: String,
    pub user_ids: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardPayload {
    pub room_ids: Vec<String>,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadUrlsPayload {
    pub extensions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_send_message_with_defaults() {
        let frame = json!({
            "event": "sendMessage",
            "data": {"roomId": "group-5d4f7a52-7c4b-4a6d-9a8e-0f1f2a3b4c5d", "text": "hi", "tempId": "t1"}
        });
        let event = ClientEvent::parse(&frame.to_string()).unwrap();
        let ClientEvent::SendMessage(payload) = event else {
            panic!("unexpected event");
        };
        assert_eq!(payload.text, "hi");
        assert_eq!(payload.temp_id.as_deref(), Some("t1"));
        assert!(payload.attachments.is_empty());
        assert!(payload.original_message_id.is_none());
    }

    #[test]
    fn parses_older_messages_cursor() {
        let id = MessageId::generate();
        let frame = json!({
            "event": "getOlderMessages",
            "data": {
                "roomId": "chat-5d4f7a52-7c4b-4a6d-9a8e-0f1f2a3b4c5d",
                "lastMessageId": id,
                "lastMessageCreatedAt": "2024-05-01T12:00:00.123456Z"
            }
        });
        let event = ClientEvent::parse(&frame.to_string()).unwrap();
        assert_eq!(event.name(), "getOlderMessages");
        let ClientEvent::GetOlderMessages(payload) = event else {
            panic!("unexpected event");
        };
        assert_eq!(payload.last_message_id, id);
    }

    #[test]
    fn unknown_event_is_rejected() {
        assert!(ClientEvent::parse(r#"{"event": "dropTables", "data": {}}"#).is_err());
        assert!(ClientEvent::parse(r#"{"event": "search"}"#).is_err());
        assert!(ClientEvent::parse("not json").is_err());
    }
}
