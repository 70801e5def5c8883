//! 连接令牌认证
//!
//! 握手时携带两个令牌：短期访问令牌与长期刷新令牌。访问令牌有效则直接通过；
//! 访问令牌缺失或过期时用刷新令牌换发新的访问令牌。令牌只在握手时校验一次，
//! 用户ID随后缓存在连接上。

use chrono::{Duration, Utc};
use config::JwtConfig;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use domain::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("token issue failed: {0}")]
    Issue(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// JWT Claims 结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// 握手时提取到的凭证
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeCredentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl HandshakeCredentials {
    pub fn new(access_token: Option<String>, refresh_token: Option<String>) -> Self {
        let non_empty = |token: Option<String>| token.filter(|t| !t.trim().is_empty());
        Self {
            access_token: non_empty(access_token),
            refresh_token: non_empty(refresh_token),
        }
    }
}

/// 认证结果；走刷新路径时带上新签发的访问令牌
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub user_id: UserId,
    pub renewed_access_token: Option<String>,
}

enum Verification {
    Valid(UserId),
    Expired,
    Invalid,
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

pub struct TokenAuthority {
    access: KeyPair,
    refresh: KeyPair,
    access_ttl: Duration,
    refresh_ttl: Duration,
    validation: Validation,
}

impl TokenAuthority {
    pub fn new(config: &JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            access: KeyPair::from_secret(&config.access_secret),
            refresh: KeyPair::from_secret(&config.refresh_secret),
            access_ttl: Duration::minutes(config.access_ttl_minutes),
            refresh_ttl: Duration::days(config.refresh_ttl_days),
            validation,
        }
    }

    pub fn issue_access(&self, user_id: UserId) -> Result<String, AuthError> {
        self.issue(TokenKind::Access, user_id, self.access_ttl)
    }

    pub fn issue_refresh(&self, user_id: UserId) -> Result<String, AuthError> {
        self.issue(TokenKind::Refresh, user_id, self.refresh_ttl)
    }

    fn issue(&self, kind: TokenKind, user_id: UserId, ttl: Duration) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.into(),
            kind,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.keys(kind).encoding)
            .map_err(|err| AuthError::Issue(err.to_string()))
    }

    fn keys(&self, kind: TokenKind) -> &KeyPair {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    fn verify(&self, kind: TokenKind, token: &str) -> Verification {
        match decode::<Claims>(token, &self.keys(kind).decoding, &self.validation) {
            Ok(data) if data.claims.kind == kind => Verification::Valid(UserId::from(data.claims.sub)),
            Ok(_) => Verification::Invalid,
            Err(err) if matches!(err.kind(), ErrorKind::ExpiredSignature) => Verification::Expired,
            Err(_) => Verification::Invalid,
        }
    }

    pub fn verify_access(&self, token: &str) -> Result<UserId, AuthError> {
        match self.verify(TokenKind::Access, token) {
            Verification::Valid(user_id) => Ok(user_id),
            Verification::Expired | Verification::Invalid => Err(AuthError::Unauthenticated),
        }
    }

    pub fn verify_refresh(&self, token: &str) -> Result<UserId, AuthError> {
        match self.verify(TokenKind::Refresh, token) {
            Verification::Valid(user_id) => Ok(user_id),
            Verification::Expired | Verification::Invalid => Err(AuthError::Unauthenticated),
        }
    }

    /// 握手认证。
    ///
    /// 1. 访问令牌有效 -> 返回其中的用户ID
    /// 2. 访问令牌缺失或过期，且刷新令牌有效 -> 签发新访问令牌并再次校验
    /// 3. 其他情况（包括访问令牌签名错误）-> `Unauthenticated`
    pub fn authenticate(&self, credentials: &HandshakeCredentials) -> Result<Authenticated, AuthError> {
        let access = credentials
            .access_token
            .as_deref()
            .map(|token| self.verify(TokenKind::Access, token));

        match access {
            Some(Verification::Valid(user_id)) => {
                return Ok(Authenticated {
                    user_id,
                    renewed_access_token: None,
                })
            }
            Some(Verification::Invalid) => return Err(AuthError::Unauthenticated),
            Some(Verification::Expired) | None => {}
        }

        let refresh = credentials
            .refresh_token
            .as_deref()
            .ok_or(AuthError::Unauthenticated)?;
        let user_id = self.verify_refresh(refresh)?;

        let renewed = self.issue_access(user_id)?;
        if self.verify_access(&renewed)? != user_id {
            return Err(AuthError::Unauthenticated);
        }
        tracing::debug!(user_id = %user_id, "访问令牌已通过刷新令牌续签");

        Ok(Authenticated {
            user_id,
            renewed_access_token: Some(renewed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority() -> TokenAuthority {
        TokenAuthority::new(&JwtConfig {
            access_secret: "access-secret-for-tests-0123456789abcdef".into(),
            refresh_secret: "refresh-secret-for-tests-0123456789abcdef".into(),
            access_ttl_minutes: 15,
            refresh_ttl_days: 7,
        })
    }

    fn expired(authority: &TokenAuthority, kind: TokenKind, user_id: UserId) -> String {
        authority.issue(kind, user_id, Duration::hours(-1)).unwrap()
    }

    #[test]
    fn valid_access_token() {
        let authority = authority();
        let user_id = UserId::generate();
        let credentials = HandshakeCredentials::new(Some(authority.issue_access(user_id).unwrap()), None);
        let result = authority.authenticate(&credentials).unwrap();
        assert_eq!(result.user_id, user_id);
        assert_eq!(result.renewed_access_token, None);
    }

    #[test]
    fn expired_access_falls_back_to_refresh() {
        let authority = authority();
        let user_id = UserId::generate();
        let credentials = HandshakeCredentials::new(
            Some(expired(&authority, TokenKind::Access, user_id)),
            Some(authority.issue_refresh(user_id).unwrap()),
        );
        let result = authority.authenticate(&credentials).unwrap();
        assert_eq!(result.user_id, user_id);
        let renewed = result.renewed_access_token.unwrap();
        assert_eq!(authority.verify_access(&renewed).unwrap(), user_id);
    }

    #[test]
    fn missing_access_uses_refresh() {
        let authority = authority();
        let user_id = UserId::generate();
        let credentials = HandshakeCredentials::new(None, Some(authority.issue_refresh(user_id).unwrap()));
        assert_eq!(authority.authenticate(&credentials).unwrap().user_id, user_id);
    }

    #[test]
    fn expired_access_without_refresh_fails() {
        let authority = authority();
        let user_id = UserId::generate();
        let credentials =
            HandshakeCredentials::new(Some(expired(&authority, TokenKind::Access, user_id)), None);
        assert_eq!(authority.authenticate(&credentials), Err(AuthError::Unauthenticated));
    }

    #[test]
    fn expired_refresh_fails() {
        let authority = authority();
        let user_id = UserId::generate();
        let credentials = HandshakeCredentials::new(
            None,
            Some(expired(&authority, TokenKind::Refresh, user_id)),
        );
        assert_eq!(authority.authenticate(&credentials), Err(AuthError::Unauthenticated));
    }

    #[test]
    fn tampered_access_is_not_rescued_by_refresh() {
        let authority = authority();
        let user_id = UserId::generate();
        let credentials = HandshakeCredentials::new(
            Some("not-a-jwt".into()),
            Some(authority.issue_refresh(user_id).unwrap()),
        );
        assert_eq!(authority.authenticate(&credentials), Err(AuthError::Unauthenticated));
    }

    #[test]
    fn tokens_are_not_interchangeable() {
        let authority = authority();
        let user_id = UserId::generate();
        let refresh = authority.issue_refresh(user_id).unwrap();
        assert!(authority.verify_access(&refresh).is_err());
        let access = authority.issue_access(user_id).unwrap();
        assert!(authority.verify_refresh(&access).is_err());
    }

    #[test]
    fn blank_tokens_count_as_absent() {
        let credentials = HandshakeCredentials::new(Some("  ".into()), Some(String::new()));
        assert_eq!(credentials, HandshakeCredentials::default());
        assert_eq!(authority().authenticate(&credentials), Err(AuthError::Unauthenticated));
    }
}
