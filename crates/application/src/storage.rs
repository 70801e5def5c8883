//! 对象存储协作方：签发限时的上传/下载URL

use async_trait::async_trait;
use data_encoding::HEXLOWER;
use rand::RngCore;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum PresignError {
    #[error("invalid file extension: {0}")]
    InvalidExtension(String),
    #[error("signing failed: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadTicket {
    pub url: String,
    pub key: String,
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn issue_upload_url(&self, extension: &str) -> Result<UploadTicket, PresignError>;

    /// `download_name` 存在时强制浏览器以该文件名下载
    async fn issue_download_url(
        &self,
        key: &str,
        download_name: Option<String>,
    ) -> Result<String, PresignError>;
}

/// 上传对象键：16 字节随机数的十六进制 + 扩展名
pub fn new_object_key(extension: &str) -> Result<String, PresignError> {
    let extension = extension.trim().trim_start_matches('.');
    let valid = !extension.is_empty()
        && extension.len() <= 16
        && extension.chars().all(|c| c.is_ascii_alphanumeric());
    if !valid {
        return Err(PresignError::InvalidExtension(extension.to_string()));
    }
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    Ok(format!(
        "{}.{}",
        HEXLOWER.encode(&bytes),
        extension.to_ascii_lowercase()
    ))
}

/// 不签名的对象存储，URL 直接拼接在公开地址后（本地开发与测试）
pub struct StaticObjectStorage {
    base_url: String,
}

impl StaticObjectStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ObjectStorage for StaticObjectStorage {
    async fn issue_upload_url(&self, extension: &str) -> Result<UploadTicket, PresignError> {
        let key = new_object_key(extension)?;
        Ok(UploadTicket {
            url: format!("{}/{}", self.base_url, key),
            key,
        })
    }

    async fn issue_download_url(
        &self,
        key: &str,
        download_name: Option<String>,
    ) -> Result<String, PresignError> {
        Ok(match download_name {
            Some(name) => format!("{}/{}?download={}", self.base_url, key, name),
            None => format!("{}/{}", self.base_url, key),
        })
    }
}
