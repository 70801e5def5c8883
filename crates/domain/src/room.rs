use serde::{Deserialize, Serialize};

use crate::value_objects::{RoomId, Timestamp, UserId};

/// 房间。私聊没有名称和所有者，群组/频道由所有者创建。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub name: Option<String>,
    pub owner_id: Option<UserId>,
    #[serde(rename = "imgURL")]
    pub image_url: Option<String>,
    /// 仅频道有意义：是否出现在搜索结果中
    pub is_public: bool,
    pub created_at: Timestamp,
}

impl Room {
    pub fn direct_chat(id: RoomId, created_at: Timestamp) -> Self {
        Self {
            id,
            name: None,
            owner_id: None,
            image_url: None,
            is_public: false,
            created_at,
        }
    }

    pub fn owned(
        id: RoomId,
        name: impl Into<String>,
        owner_id: UserId,
        image_url: Option<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            name: Some(name.into()),
            owner_id: Some(owner_id),
            image_url,
            is_public: true,
            created_at,
        }
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.owner_id == Some(user_id)
    }
}

/// 用户与房间的成员关系
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMembership {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub joined_at: Timestamp,
    pub last_message_time: Option<Timestamp>,
}

impl RoomMembership {
    pub fn new(room_id: RoomId, user_id: UserId, joined_at: Timestamp) -> Self {
        Self {
            room_id,
            user_id,
            joined_at,
            last_message_time: None,
        }
    }
}
