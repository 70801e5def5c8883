use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_credentials, TokenQuery};
use crate::ws_connection::WebSocketConnection;
use crate::{error::ApiError, state::AppState};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new().route("/ws", get(websocket_upgrade))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// 握手在升级之前完成认证，失败直接返回 401
async fn websocket_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let credentials = extract_credentials(&headers, query);
    let authenticated = state.tokens.authenticate(&credentials).map_err(|err| {
        tracing::info!(error = %err, "WebSocket upgrade rejected");
        ApiError::from(err)
    })?;

    let connection = WebSocketConnection::new(
        state,
        authenticated.user_id,
        authenticated.renewed_access_token,
    );
    Ok(ws.on_upgrade(move |socket| connection.run(socket)))
}
