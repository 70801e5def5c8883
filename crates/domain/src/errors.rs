//! 领域模型错误定义
//!
//! 定义了领域层与仓储边界上可能出现的错误类型。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 参数校验失败
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// 房间ID既不是 `{kind}-{uuid}` 也不是裸用户ID
    #[error("malformed room id: {0}")]
    MalformedRoomId(String),

    #[error("room not found")]
    RoomNotFound,

    #[error("message not found")]
    MessageNotFound,

    #[error("user not found")]
    UserNotFound,

    /// 已删除的消息不能再编辑
    #[error("message already deleted")]
    MessageDeleted,

    #[error("operation not allowed: {0}")]
    OperationNotAllowed(String),
}

impl DomainError {
    /// 创建参数校验错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_allowed(message: impl Into<String>) -> Self {
        Self::OperationNotAllowed(message.into())
    }
}

/// 仓储（外部关系型存储）错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,

    #[error("record already exists")]
    Conflict,

    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
