//! 单个连接的请求分发：客户端事件 -> 应用服务 -> 回复事件

use application::outbound::ForwardOutcome;
use application::{ApplicationError, ChatBackend, SendMessageRequest, ServerEvent};
use domain::{ConnectionId, MessageCursor, RoomId, UserId};

use crate::protocol::ClientEvent;

/// 请求处理器，绑定到一个已认证连接
#[derive(Clone)]
pub struct RequestHandler {
    backend: ChatBackend,
    user_id: UserId,
    connection_id: ConnectionId,
}

impl RequestHandler {
    pub fn new(backend: ChatBackend, user_id: UserId, connection_id: ConnectionId) -> Self {
        Self {
            backend,
            user_id,
            connection_id,
        }
    }

    /// 处理一个事件。失败转换为只发给本连接的 `error` / `uploadError`。
    ///
    /// 返回 `None` 表示结果已经通过房间推送送达，不需要单独回复。
    pub async fn handle(&self, event: ClientEvent) -> Option<ServerEvent> {
        let name = event.name();
        match self.dispatch(event).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(
                    user_id = %self.user_id,
                    connection_id = %self.connection_id,
                    event = name,
                    error = %err,
                    "请求处理失败"
                );
                Some(error_event(&err))
            }
        }
    }

    async fn dispatch(&self, event: ClientEvent) -> Result<Option<ServerEvent>, ApplicationError> {
        let backend = &self.backend;
        let (user, conn) = (self.user_id, self.connection_id);

        let reply = match event {
            ClientEvent::Search(req) => {
                ServerEvent::SearchResult(backend.rooms.search(user, &req.query).await?)
            }
            ClientEvent::EnterChat(req) => {
                ServerEvent::EnterChat(backend.rooms.enter_chat(conn, user, &req.room_id).await?)
            }
            ClientEvent::LeaveChat(req) => {
                backend.rooms.leave_chat(conn, &req.room_id).await;
                return Ok(None);
            }
            ClientEvent::SendMessage(req) => {
                backend
                    .ingest
                    .send(
                        user,
                        SendMessageRequest {
                            room_id: req.room_id,
                            text: req.text,
                            attachments: req.attachments,
                            temp_id: req.temp_id,
                            original_message_id: req.original_message_id,
                            origin_connection: Some(conn),
                        },
                    )
                    .await?;
                return Ok(None);
            }
            ClientEvent::DeleteMessage(req) => {
                backend.ingest.delete(user, req.message_id).await?;
                return Ok(None);
            }
            ClientEvent::EditMessage(req) => {
                backend
                    .ingest
                    .edit(user, req.message_id, req.edited_text)
                    .await?;
                return Ok(None);
            }
            ClientEvent::GetOlderMessages(req) => {
                let room_id: RoomId = req.room_id.parse()?;
                let cursor = MessageCursor::new(req.last_message_created_at, req.last_message_id);
                ServerEvent::OlderMessages(
                    backend.rooms.older_messages(user, room_id, cursor).await?,
                )
            }
            ClientEvent::CreateNewGroup(req) => ServerEvent::GroupCreated(
                backend
                    .rooms
                    .create_group(user, &req.title, req.users, req.img_url)
                    .await?,
            ),
            ClientEvent::CreateNewChannel(req) => ServerEvent::CreateNewChannel(
                backend
                    .rooms
                    .create_channel(user, &req.title, req.img_url)
                    .await?,
            ),
            ClientEvent::AddUserInGroup(req) => {
                let group_id: RoomId = req.group_id.parse()?;
                ServerEvent::AddUserInGroup(
                    backend.rooms.add_users(user, group_id, req.user_ids).await?,
                )
            }
            ClientEvent::LeaveGroup(req) => {
                let group_id: RoomId = req.group_id.parse()?;
                ServerEvent::UserLeftGroup(backend.rooms.leave_group(conn, user, group_id).await?)
            }
            ClientEvent::Subscribe(req) => {
                let channel_id: RoomId = req.room_id.parse()?;
                ServerEvent::SubscribeChannel(
                    backend.rooms.subscribe(conn, user, channel_id).await?,
                )
            }
            ClientEvent::UnsubscribeChannel(req) => {
                let channel_id: RoomId = req.channel_id.parse()?;
                ServerEvent::UserUnsubscribeChannel(
                    backend.rooms.unsubscribe(conn, user, channel_id).await?,
                )
            }
            ClientEvent::ForwardMessages(req) => {
                let messages = backend
                    .ingest
                    .forward(user, req.message_id, req.room_ids)
                    .await?;
                ServerEvent::ForwardMessages(ForwardOutcome {
                    success: true,
                    messages,
                })
            }
            ClientEvent::RequestUploadUrls(req) => {
                ServerEvent::UploadUrls(backend.rooms.request_upload_urls(&req.extensions).await?)
            }
        };
        Ok(Some(reply))
    }
}

pub fn error_event(err: &ApplicationError) -> ServerEvent {
    if err.is_upload_error() {
        ServerEvent::upload_error(err.client_message())
    } else {
        ServerEvent::error(err.client_message())
    }
}
