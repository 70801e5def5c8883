//! Web API 层。
//!
//! Axum 路由与 WebSocket 连接：握手认证、事件协议、逐连接的请求处理。

mod auth;
mod error;
mod handler;
mod protocol;
mod routes;
mod state;
mod ws_connection;

pub use auth::{extract_credentials, TokenQuery};
pub use error::ApiError;
pub use handler::RequestHandler;
pub use protocol::ClientEvent;
pub use routes::router;
pub use state::{AppState, HeartbeatSettings};
