use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// 统一的时间戳类型。
pub type Timestamp = chrono::DateTime<chrono::Utc>;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(id: Uuid) -> Self {
                Self(id)
            }

            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|_| DomainError::invalid_argument(stringify!($name), "not a uuid"))
            }
        }
    };
}

uuid_id!(
    /// 用户唯一标识。
    UserId
);
uuid_id!(
    /// 消息唯一标识。
    MessageId
);
uuid_id!(
    /// 附件唯一标识。
    AttachmentId
);
uuid_id!(
    /// 单个 WebSocket 连接的标识，在实例内唯一。
    ConnectionId
);

/// 服务实例标识（多实例部署时用于定位连接所在实例）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn generate() -> Self {
        Self(format!("instance-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 房间类型。前缀决定消息使用哪一个外键。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Chat,
    Group,
    Channel,
}

impl RoomKind {
    pub fn prefix(self) -> &'static str {
        match self {
            RoomKind::Chat => "chat",
            RoomKind::Group => "group",
            RoomKind::Channel => "channel",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "chat" => Some(RoomKind::Chat),
            "group" => Some(RoomKind::Group),
            "channel" => Some(RoomKind::Channel),
            _ => None,
        }
    }
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// 已物化的房间标识，线上格式为 `{kind}-{uuid}`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoomId {
    Chat(Uuid),
    Group(Uuid),
    Channel(Uuid),
}

impl RoomId {
    pub fn new(kind: RoomKind, id: Uuid) -> Self {
        match kind {
            RoomKind::Chat => RoomId::Chat(id),
            RoomKind::Group => RoomId::Group(id),
            RoomKind::Channel => RoomId::Channel(id),
        }
    }

    pub fn generate(kind: RoomKind) -> Self {
        Self::new(kind, Uuid::new_v4())
    }

    pub fn kind(&self) -> RoomKind {
        match self {
            RoomId::Chat(_) => RoomKind::Chat,
            RoomId::Group(_) => RoomKind::Group,
            RoomId::Channel(_) => RoomKind::Channel,
        }
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            RoomId::Chat(id) | RoomId::Group(id) | RoomId::Channel(id) => *id,
        }
    }

    /// 按 (chat, group, channel) 顺序返回外键列，恰好一个为 `Some`。
    pub fn foreign_keys(&self) -> (Option<Uuid>, Option<Uuid>, Option<Uuid>) {
        match self {
            RoomId::Chat(id) => (Some(*id), None, None),
            RoomId::Group(id) => (None, Some(*id), None),
            RoomId::Channel(id) => (None, None, Some(*id)),
        }
    }

    /// 从外键列还原房间标识；要求恰好一列非空。
    pub fn from_foreign_keys(
        chat: Option<Uuid>,
        group: Option<Uuid>,
        channel: Option<Uuid>,
    ) -> Result<Self, DomainError> {
        match (chat, group, channel) {
            (Some(id), None, None) => Ok(RoomId::Chat(id)),
            (None, Some(id), None) => Ok(RoomId::Group(id)),
            (None, None, Some(id)) => Ok(RoomId::Channel(id)),
            _ => Err(DomainError::invalid_argument(
                "room_id",
                "exactly one room foreign key must be set",
            )),
        }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind().prefix(), self.uuid())
    }
}

impl FromStr for RoomId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match RoomTarget::parse(s)? {
            RoomTarget::Room(room_id) => Ok(room_id),
            RoomTarget::Direct(_) => Err(DomainError::MalformedRoomId(s.to_owned())),
        }
    }
}

impl Serialize for RoomId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RoomId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// 客户端发来的房间目标：已存在的房间，或尚未物化的私聊对象（裸用户ID）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomTarget {
    Room(RoomId),
    Direct(UserId),
}

impl RoomTarget {
    /// 在入口处解析一次，下游全部使用穷尽匹配。
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let raw = raw.trim();
        if let Some((prefix, rest)) = raw.split_once('-') {
            if let Some(kind) = RoomKind::from_prefix(prefix) {
                let id = Uuid::parse_str(rest)
                    .map_err(|_| DomainError::MalformedRoomId(raw.to_owned()))?;
                return Ok(RoomTarget::Room(RoomId::new(kind, id)));
            }
        }
        Uuid::parse_str(raw)
            .map(|id| RoomTarget::Direct(UserId::from(id)))
            .map_err(|_| DomainError::MalformedRoomId(raw.to_owned()))
    }
}

impl fmt::Display for RoomTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomTarget::Room(room_id) => write!(f, "{room_id}"),
            RoomTarget::Direct(user_id) => write!(f, "{user_id}"),
        }
    }
}
