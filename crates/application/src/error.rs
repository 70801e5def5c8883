use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::auth::AuthError;
use crate::bus::BusError;
use crate::presence::PresenceError;
use crate::storage::PresignError;

/// 应用层错误。
///
/// 单个连接的请求错误在处理边界被转换成只发给该连接的 `error` / `uploadError` 事件。
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),
    /// 房间标识无法解析
    #[error("room resolution failed: {0}")]
    RoomResolution(DomainError),
    /// 发送消息时消息或附件写入失败
    #[error("message creation failed: {0}")]
    MessageCreationFailed(RepositoryError),
    #[error("persistence error: {0}")]
    Persistence(RepositoryError),
    #[error("{0}")]
    Authorization(String),
    #[error("{0}")]
    NotFound(String),
    #[error("presign error: {0}")]
    Presign(#[from] PresignError),
    #[error("presence error: {0}")]
    Presence(#[from] PresenceError),
    #[error("event bus error: {0}")]
    Bus(#[from] BusError),
    #[error("{0}")]
    Validation(String),
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl ApplicationError {
    pub fn unauthorized() -> Self {
        ApplicationError::Authorization("Unauthorized".into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        ApplicationError::NotFound(what.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApplicationError::Validation(message.into())
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }

    /// 发送失败要以 `uploadError` 事件通知发送者
    pub fn is_upload_error(&self) -> bool {
        matches!(self, ApplicationError::MessageCreationFailed(_))
    }

    /// 返回给客户端的提示文本，不泄露内部细节
    pub fn client_message(&self) -> String {
        match self {
            ApplicationError::Authentication(_) => "Unauthorized".into(),
            ApplicationError::RoomResolution(_) => "Invalid room id".into(),
            ApplicationError::MessageCreationFailed(_) => "Message creation failed!".into(),
            ApplicationError::Authorization(message)
            | ApplicationError::NotFound(message)
            | ApplicationError::Validation(message) => message.clone(),
            ApplicationError::Persistence(_)
            | ApplicationError::Presign(_)
            | ApplicationError::Presence(_)
            | ApplicationError::Bus(_)
            | ApplicationError::Infrastructure(_) => "An error occurred".into(),
        }
    }
}

impl From<DomainError> for ApplicationError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::MalformedRoomId(_) => ApplicationError::RoomResolution(value),
            DomainError::RoomNotFound => ApplicationError::not_found("Room not found"),
            DomainError::MessageNotFound => ApplicationError::not_found("Message not found"),
            DomainError::UserNotFound => ApplicationError::not_found("User not found"),
            DomainError::MessageDeleted => ApplicationError::not_found("Message not found"),
            DomainError::OperationNotAllowed(message) => ApplicationError::Authorization(message),
            DomainError::InvalidArgument { field, reason } => {
                ApplicationError::Validation(format!("{field}: {reason}"))
            }
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Persistence(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_domain_errors_to_client_messages() {
        let err = ApplicationError::from(DomainError::MessageNotFound);
        assert_eq!(err.client_message(), "Message not found");

        let err = ApplicationError::from(DomainError::not_allowed(
            "You can only edit your own messages",
        ));
        assert!(matches!(err, ApplicationError::Authorization(_)));
        assert_eq!(err.client_message(), "You can only edit your own messages");

        let err = ApplicationError::from(DomainError::MalformedRoomId("x".into()));
        assert!(matches!(err, ApplicationError::RoomResolution(_)));
    }

    #[test]
    fn only_creation_failures_are_upload_errors() {
        let err = ApplicationError::MessageCreationFailed(RepositoryError::storage("boom"));
        assert!(err.is_upload_error());
        assert_eq!(err.client_message(), "Message creation failed!");

        let err = ApplicationError::Persistence(RepositoryError::storage("boom"));
        assert!(!err.is_upload_error());
        assert_eq!(err.client_message(), "An error occurred");
    }
}
