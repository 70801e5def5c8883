use std::sync::Arc;
use std::time::Duration;

use application::{ChatBackend, TokenAuthority};
use config::PresenceConfig;

/// 心跳参数：定时发送 ping 并刷新存活标记，超过存活窗口无任何入站帧则断开
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatSettings {
    pub interval: Duration,
    pub liveness_window: Duration,
}

impl From<&PresenceConfig> for HeartbeatSettings {
    fn from(config: &PresenceConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.heartbeat_interval_seconds),
            liveness_window: Duration::from_secs(config.liveness_window_seconds),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub backend: ChatBackend,
    pub tokens: Arc<TokenAuthority>,
    pub heartbeat: HeartbeatSettings,
}

impl AppState {
    pub fn new(backend: ChatBackend, tokens: Arc<TokenAuthority>, heartbeat: HeartbeatSettings) -> Self {
        Self {
            backend,
            tokens,
            heartbeat,
        }
    }
}
