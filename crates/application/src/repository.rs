//! 关系型存储协作方接口
//!
//! 所有读取方法都隐式排除已软删除的消息，这是实现方必须遵守的约定。

use async_trait::async_trait;
use domain::{
    Attachment, Message, MessageCursor, MessageId, RepositoryError, Room, RoomId, RoomMembership,
    Timestamp, User, UserId, UserStatus,
};

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;

    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>, RepositoryError>;

    async fn update_status(
        &self,
        id: UserId,
        status: UserStatus,
        last_active: Option<Timestamp>,
    ) -> Result<(), RepositoryError>;

    /// 名或姓包含查询串（不区分大小写）
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<User>, RepositoryError>;
}

#[async_trait]
pub trait RoomRepository: Send + Sync {
    async fn find_by_id(&self, id: RoomId) -> Result<Option<Room>, RepositoryError>;

    /// 创建房间并写入成员，单个事务
    async fn create_with_members(
        &self,
        room: Room,
        members: &[UserId],
    ) -> Result<Room, RepositoryError>;

    /// 按无序用户对查找或创建私聊，并发调用也只会产生一个房间
    async fn find_or_create_direct_chat(
        &self,
        a: UserId,
        b: UserId,
        at: Timestamp,
    ) -> Result<RoomId, RepositoryError>;

    async fn find_direct_chat(&self, a: UserId, b: UserId)
        -> Result<Option<RoomId>, RepositoryError>;

    async fn members_of(&self, room_id: RoomId) -> Result<Vec<UserId>, RepositoryError>;

    async fn is_member(&self, room_id: RoomId, user_id: UserId) -> Result<bool, RepositoryError>;

    /// 只添加尚不是成员的用户，返回实际新增的用户
    async fn add_members(
        &self,
        room_id: RoomId,
        users: &[UserId],
        at: Timestamp,
    ) -> Result<Vec<UserId>, RepositoryError>;

    /// 返回是否确实移除了成员
    async fn remove_member(&self, room_id: RoomId, user_id: UserId)
        -> Result<bool, RepositoryError>;

    /// 用户所在房间，按最近消息时间倒序
    async fn memberships_of(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<RoomMembership>, RepositoryError>;

    /// 与该用户有私聊的所有用户
    async fn direct_chat_partners(&self, user_id: UserId) -> Result<Vec<UserId>, RepositoryError>;

    async fn touch_last_message(&self, room_id: RoomId, at: Timestamp)
        -> Result<(), RepositoryError>;

    /// 名称包含查询串的公开频道
    async fn search_public_channels(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<Room>, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 消息与附件作为一个原子单元写入
    async fn create_with_attachments(
        &self,
        message: &Message,
        attachments: &[Attachment],
    ) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;

    async fn update_text(&self, message: &Message) -> Result<(), RepositoryError>;

    /// 设置 deletedAt；消息不存在或已删除时返回 false
    async fn soft_delete(&self, id: MessageId, at: Timestamp) -> Result<bool, RepositoryError>;

    /// 键集分页：按 (createdAt desc, id desc) 排序，`before` 存在时只返回严格排在游标之前的消息
    async fn page(
        &self,
        room_id: RoomId,
        before: Option<MessageCursor>,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn attachments_of(
        &self,
        message_ids: &[MessageId],
    ) -> Result<Vec<Attachment>, RepositoryError>;
}
