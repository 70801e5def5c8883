//! 握手凭证提取
//!
//! 优先级：`Cookie`（`accessToken` / `refreshToken`）-> `Authorization: Bearer` 与
//! `X-Refresh-Token` -> 查询参数 `access_token` / `refresh_token`。每个令牌独立按此顺序取值。

use application::HandshakeCredentials;
use axum::http::{header, HeaderMap};
use serde::Deserialize;

const ACCESS_COOKIE: &str = "accessToken";
const REFRESH_COOKIE: &str = "refreshToken";
const REFRESH_HEADER: &str = "x-refresh-token";

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

pub fn extract_credentials(headers: &HeaderMap, query: TokenQuery) -> HandshakeCredentials {
    let access = cookie(headers, ACCESS_COOKIE)
        .or_else(|| bearer(headers))
        .or(query.access_token);
    let refresh = cookie(headers, REFRESH_COOKIE)
        .or_else(|| header_value(headers, REFRESH_HEADER))
        .or(query.refresh_token);
    HandshakeCredentials::new(access, refresh)
}

fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    header_value(headers, header::AUTHORIZATION.as_str())?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn cookie_wins_over_header_and_query() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; accessToken=from-cookie; refreshToken=r-cookie"),
        );
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        let query = TokenQuery {
            access_token: Some("from-query".into()),
            refresh_token: None,
        };
        let creds = extract_credentials(&headers, query);
        assert_eq!(creds.access_token.as_deref(), Some("from-cookie"));
        assert_eq!(creds.refresh_token.as_deref(), Some("r-cookie"));
    }

    #[test]
    fn falls_back_per_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        let query = TokenQuery {
            access_token: Some("ignored".into()),
            refresh_token: Some("from-query".into()),
        };
        let creds = extract_credentials(&headers, query);
        assert_eq!(creds.access_token.as_deref(), Some("abc"));
        assert_eq!(creds.refresh_token.as_deref(), Some("from-query"));
    }

    #[test]
    fn refresh_header_and_empty_values() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("accessToken="));
        headers.insert(REFRESH_HEADER, HeaderValue::from_static("r-header"));
        let creds = extract_credentials(&headers, TokenQuery::default());
        assert_eq!(creds.access_token, None);
        assert_eq!(creds.refresh_token.as_deref(), Some("r-header"));
    }
}
