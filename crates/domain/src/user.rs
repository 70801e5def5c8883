use serde::{Deserialize, Serialize};

use crate::value_objects::{Timestamp, UserId};

/// 在线状态。由是否存在至少一个已注册连接推导得出。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Online,
    Offline,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Online => "online",
            UserStatus::Offline => "offline",
        }
    }
}

impl std::str::FromStr for UserStatus {
    type Err = crate::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(UserStatus::Online),
            "offline" => Ok(UserStatus::Offline),
            other => Err(crate::DomainError::invalid_argument("user_status", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub last_name: Option<String>,
    #[serde(rename = "imgURL")]
    pub image_url: Option<String>,
    pub status: UserStatus,
    pub last_active: Option<Timestamp>,
}

impl User {
    pub fn new(id: UserId, name: impl Into<String>, last_name: Option<String>) -> Self {
        Self {
            id,
            name: name.into(),
            last_name,
            image_url: None,
            status: UserStatus::Offline,
            last_active: None,
        }
    }

    /// 展示用全名："名 姓"
    pub fn display_name(&self) -> String {
        match self.last_name.as_deref().map(str::trim) {
            Some(last) if !last.is_empty() => format!("{} {}", self.name, last),
            _ => self.name.clone(),
        }
    }

    pub fn go_online(&mut self) {
        self.status = UserStatus::Online;
    }

    pub fn go_offline(&mut self, at: Timestamp) {
        self.status = UserStatus::Offline;
        self.last_active = Some(at);
    }
}
