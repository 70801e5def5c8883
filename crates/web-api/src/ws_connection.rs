use std::sync::Arc;

use application::outbound::TokenRefreshed;
use application::{ConnectionHub, OutboundReceiver, ServerEvent, SessionService};
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{ConnectionId, UserId};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::handler::{error_event, RequestHandler};
use crate::protocol::ClientEvent;
use crate::state::AppState;

type WsSink = SplitSink<WebSocket, WsMessage>;

/// WebSocket 连接管理器
///
/// 封装单个已认证连接的生命周期：
/// - 会话建立与首帧（`tokenRefreshed`、`userId`、`userData`、`chats`）
/// - 写任务：统一处理对 sender 的写操作（服务端事件与控制帧）
/// - 请求任务：按到达顺序逐个处理客户端事件，与读循环解耦
/// - 心跳：定时 ping 并刷新存活标记，超出存活窗口无入站帧则断开
/// - 资源清理
pub struct WebSocketConnection {
    state: AppState,
    user_id: UserId,
    connection_id: ConnectionId,
    renewed_access_token: Option<String>,
}

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    Ping,
    Pong(Bytes),
    Close,
}

/// 交给请求任务的入站项；格式错误的帧也排队，保证回复顺序
#[derive(Debug)]
enum Inbound {
    Event(ClientEvent),
    Malformed,
}

impl WebSocketConnection {
    pub fn new(state: AppState, user_id: UserId, renewed_access_token: Option<String>) -> Self {
        Self {
            state,
            user_id,
            connection_id: ConnectionId::generate(),
            renewed_access_token,
        }
    }

    pub async fn run(self, mut socket: WebSocket) {
        let sessions = self.state.backend.sessions.clone();
        let session = match sessions.connect(self.user_id, self.connection_id).await {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(user_id = %self.user_id, error = %err, "会话建立失败");
                if let Ok(text) = serde_json::to_string(&error_event(&err)) {
                    let _ = socket.send(WsMessage::Text(text.into())).await;
                }
                let _ = socket.send(WsMessage::Close(None)).await;
                return;
            }
        };
        tracing::info!(
            user_id = %self.user_id,
            connection_id = %self.connection_id,
            "WebSocket 连接已建立"
        );

        let (mut sink, incoming) = socket.split();

        let mut greeting = Vec::with_capacity(session.bootstrap.len() + 1);
        if let Some(access_token) = self.renewed_access_token.clone() {
            greeting.push(ServerEvent::TokenRefreshed(TokenRefreshed { access_token }));
        }
        greeting.extend(session.bootstrap);
        for event in &greeting {
            if send_event(&mut sink, event).await.is_err() {
                tracing::warn!(connection_id = %self.connection_id, "首帧发送失败");
                self.cleanup(&sessions).await;
                return;
            }
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(sink, session.outbound, cmd_rx));

        // 请求任务不随读循环结束而取消：已开始的发送会完成持久化与发布
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(process_requests(
            RequestHandler::new(self.state.backend.clone(), self.user_id, self.connection_id),
            self.state.backend.hub.clone(),
            self.connection_id,
            inbound_rx,
        ));

        self.read_loop(incoming, &sessions, &cmd_tx, &inbound_tx).await;

        drop(inbound_tx);
        self.cleanup(&sessions).await;
        let _ = cmd_tx.send(WsCommand::Close);
        drop(cmd_tx);
        if let Err(err) = writer.await {
            tracing::warn!(error = %err, "WebSocket发送任务异常结束");
        }
        tracing::info!(
            user_id = %self.user_id,
            connection_id = %self.connection_id,
            "WebSocket连接已断开，在线状态已清理"
        );
    }

    async fn read_loop(
        &self,
        mut incoming: SplitStream<WebSocket>,
        sessions: &Arc<SessionService>,
        cmd_tx: &mpsc::UnboundedSender<WsCommand>,
        inbound_tx: &mpsc::UnboundedSender<Inbound>,
    ) {
        let heartbeat = self.state.heartbeat;
        let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat.interval, heartbeat.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                frame = incoming.next() => {
                    let message = match frame {
                        Some(Ok(message)) => message,
                        Some(Err(err)) => {
                            tracing::debug!(error = %err, "WebSocket读取失败");
                            break;
                        }
                        None => break,
                    };
                    last_seen = Instant::now();
                    match message {
                        WsMessage::Text(text) => {
                            let item = match ClientEvent::parse(text.as_str()) {
                                Ok(event) => Inbound::Event(event),
                                Err(err) => {
                                    tracing::debug!(error = %err, "无法解析的客户端事件");
                                    Inbound::Malformed
                                }
                            };
                            if inbound_tx.send(item).is_err() {
                                break;
                            }
                        }
                        WsMessage::Binary(_) => {
                            if inbound_tx.send(Inbound::Malformed).is_err() {
                                break;
                            }
                        }
                        WsMessage::Ping(data) => {
                            tracing::debug!("收到ping消息，发送pong回应");
                            if cmd_tx.send(WsCommand::Pong(data)).is_err() {
                                break;
                            }
                        }
                        WsMessage::Pong(_) => {
                            if let Err(err) = sessions.heartbeat(self.connection_id).await {
                                tracing::warn!(error = %err, "存活标记刷新失败");
                            }
                        }
                        WsMessage::Close(_) => {
                            tracing::info!("WebSocket收到关闭消息");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if last_seen.elapsed() > heartbeat.liveness_window {
                        tracing::info!(connection_id = %self.connection_id, "心跳超时，断开连接");
                        break;
                    }
                    if cmd_tx.send(WsCommand::Ping).is_err() {
                        break;
                    }
                    if let Err(err) = sessions.heartbeat(self.connection_id).await {
                        tracing::warn!(error = %err, "存活标记刷新失败");
                    }
                }
            }
        }
    }

    async fn cleanup(&self, sessions: &SessionService) {
        if let Err(err) = sessions.disconnect(self.connection_id).await {
            tracing::error!(
                error = %err,
                user_id = %self.user_id,
                connection_id = %self.connection_id,
                "Failed to cleanup user presence"
            );
        }
    }
}

async fn send_event(sink: &mut WsSink, event: &ServerEvent) -> Result<(), axum::Error> {
    let payload = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(err) => {
            tracing::warn!(event = event.name(), error = %err, "failed to serialize websocket payload");
            return Ok(());
        }
    };
    sink.send(WsMessage::Text(payload.into())).await
}

async fn write_loop(
    mut sink: WsSink,
    mut outbound: OutboundReceiver,
    mut commands: mpsc::UnboundedReceiver<WsCommand>,
) {
    loop {
        tokio::select! {
            biased;
            Some(event) = outbound.recv() => {
                if send_event(&mut sink, &event).await.is_err() {
                    tracing::warn!("Failed to send event");
                    break;
                }
            }
            Some(command) = commands.recv() => {
                let frame = match command {
                    WsCommand::Ping => WsMessage::Ping(Bytes::new()),
                    WsCommand::Pong(data) => WsMessage::Pong(data),
                    WsCommand::Close => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        break;
                    }
                };
                if sink.send(frame).await.is_err() {
                    tracing::warn!("Failed to send control frame");
                    break;
                }
            }
            else => break,
        }
    }
    tracing::debug!("WebSocket发送任务结束");
}

async fn process_requests(
    handler: RequestHandler,
    hub: Arc<ConnectionHub>,
    connection_id: ConnectionId,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
) {
    while let Some(item) = inbound.recv().await {
        let reply = match item {
            Inbound::Event(event) => handler.handle(event).await,
            Inbound::Malformed => Some(ServerEvent::error("Invalid data")),
        };
        if let Some(reply) = reply {
            hub.push_to_connection(connection_id, reply).await;
        }
    }
}
