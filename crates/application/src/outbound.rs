//! 服务端推送给客户端的事件
//!
//! 线上格式为 `{"event": "<名称>", "data": <负载>}`，字段使用 camelCase。

use serde::Serialize;

use domain::{
    MessageEdit, MessageId, MessageSummary, MessageView, Room, RoomId, Timestamp, User, UserId,
    UserStatus,
};

use crate::storage::UploadTicket;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    TokenRefreshed(TokenRefreshed),
    UserId(UserId),
    UserData(UserProfile),
    Chats(Vec<ChatPreview>),
    EnterChat(EnterChatPayload),
    NewMessage(MessageView),
    NewMessageNotification(MessageSummary),
    UserStatusNotification(StatusNotification),
    OlderMessages(Vec<MessageView>),
    DeleteMessage(DeletedMessage),
    EditMessage(MessageEdit),
    SearchResult(Vec<SearchHit>),
    ForwardMessages(ForwardOutcome),
    UploadUrls(Vec<UploadTicket>),
    GroupCreated(RoomCreated),
    CreateNewChannel(RoomCreated),
    AddUserInGroup(MembersAdded),
    UserLeftGroup(MembershipChange),
    SubscribeChannel(MembershipChange),
    UserUnsubscribeChannel(MembershipChange),
    Error(ErrorPayload),
    UploadError(UploadErrorPayload),
}

impl ServerEvent {
    pub fn error(msg: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload { msg: msg.into() })
    }

    pub fn upload_error(message: impl Into<String>) -> Self {
        ServerEvent::UploadError(UploadErrorPayload {
            message: message.into(),
        })
    }

    /// 事件名，用于日志
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::TokenRefreshed(_) => "tokenRefreshed",
            ServerEvent::UserId(_) => "userId",
            ServerEvent::UserData(_) => "userData",
            ServerEvent::Chats(_) => "chats",
            ServerEvent::EnterChat(_) => "enterChat",
            ServerEvent::NewMessage(_) => "newMessage",
            ServerEvent::NewMessageNotification(_) => "newMessageNotification",
            ServerEvent::UserStatusNotification(_) => "userStatusNotification",
            ServerEvent::OlderMessages(_) => "olderMessages",
            ServerEvent::DeleteMessage(_) => "deleteMessage",
            ServerEvent::EditMessage(_) => "editMessage",
            ServerEvent::SearchResult(_) => "searchResult",
            ServerEvent::ForwardMessages(_) => "forwardMessages",
            ServerEvent::UploadUrls(_) => "uploadUrls",
            ServerEvent::GroupCreated(_) => "groupCreated",
            ServerEvent::CreateNewChannel(_) => "createNewChannel",
            ServerEvent::AddUserInGroup(_) => "addUserInGroup",
            ServerEvent::UserLeftGroup(_) => "userLeftGroup",
            ServerEvent::SubscribeChannel(_) => "subscribeChannel",
            ServerEvent::UserUnsubscribeChannel(_) => "userUnsubscribeChannel",
            ServerEvent::Error(_) => "error",
            ServerEvent::UploadError(_) => "uploadError",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRefreshed {
    pub access_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub name: String,
    pub last_name: Option<String>,
    #[serde(rename = "imgURL")]
    pub img_url: Option<String>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            name: user.name.clone(),
            last_name: user.last_name.clone(),
            img_url: user.image_url.clone(),
        }
    }
}

/// 会话列表中的一项
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPreview {
    pub room_id: RoomId,
    pub chat_name: Option<String>,
    #[serde(rename = "chatImageURL")]
    pub chat_image_url: Option<String>,
    pub message_user_name: Option<String>,
    pub message_text: Option<String>,
    pub last_message_time: Option<Timestamp>,
    pub is_message_forwarded: bool,
}

/// 房间在进入时展示的信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RoomType {
    Chat,
    Group,
    Channel,
    /// 尚未创建私聊的对方用户
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomData {
    pub room_type: RoomType,
    /// 已物化房间为房间ID，未创建私聊时为对方用户ID
    pub id: String,
    pub room_name: Option<String>,
    #[serde(rename = "imgURL")]
    pub img_url: Option<String>,
    pub is_active: Option<UserStatus>,
    pub last_active_time: Option<Timestamp>,
    pub number_of_members: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_member: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<UserId>,
}

impl RoomData {
    pub fn for_partner(room_type: RoomType, id: String, partner: Option<&User>) -> Self {
        Self {
            room_type,
            id,
            room_name: partner.map(User::display_name),
            img_url: partner.and_then(|user| user.image_url.clone()),
            is_active: partner.map(|user| user.status),
            last_active_time: partner.and_then(|user| user.last_active),
            number_of_members: None,
            is_member: None,
            owner_id: None,
        }
    }

    pub fn for_owned_room(room_type: RoomType, room: &Room, members: u64) -> Self {
        Self {
            room_type,
            id: room.id.to_string(),
            room_name: room.name.clone(),
            img_url: room.image_url.clone(),
            is_active: None,
            last_active_time: None,
            number_of_members: Some(members),
            is_member: None,
            owner_id: room.owner_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnterChatPayload {
    pub room_data: RoomData,
    /// 时间正序
    pub messages: Vec<MessageView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotification {
    pub user_id: UserId,
    pub status: UserStatus,
    pub last_seen_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedMessage {
    pub room_id: RoomId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchHitKind {
    User,
    Channel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    #[serde(rename = "type")]
    pub kind: SearchHitKind,
    /// 用户ID或频道房间ID
    pub id: String,
    pub name: Option<String>,
    pub last_name: Option<String>,
    #[serde(rename = "imgURL")]
    pub img_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardOutcome {
    pub success: bool,
    pub messages: Vec<MessageView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomCreated {
    pub room_id: RoomId,
    #[serde(rename = "chatImgURL")]
    pub chat_img_url: Option<String>,
    pub chat_name: Option<String>,
}

impl From<&Room> for RoomCreated {
    fn from(room: &Room) -> Self {
        Self {
            room_id: room.id,
            chat_img_url: room.image_url.clone(),
            chat_name: room.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MembersAdded {
    pub success: bool,
    pub group_id: RoomId,
    pub added_user_ids: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipChange {
    pub user_id: UserId,
    pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub msg: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadErrorPayload {
    pub message: String,
}
