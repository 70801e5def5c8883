//! 聊天系统核心领域模型
//!
//! 包含用户、房间、消息等核心实体，房间标识的解析规则，以及跨实例投递事件。

pub mod errors;
pub mod events;
pub mod message;
pub mod room;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use events::*;
pub use message::*;
pub use room::*;
pub use user::*;
pub use value_objects::*;
