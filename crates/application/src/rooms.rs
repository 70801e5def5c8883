//! 房间相关请求：进入/离开、历史、搜索、群组与频道管理、上传地址

use std::sync::Arc;

use config::HistoryConfig;
use domain::{
    ConnectionId, DomainError, MessageCursor, MessageView, Room, RoomId, RoomKind, RoomTarget,
    UserId,
};

use crate::clock::Clock;
use crate::enrich::MessageEnricher;
use crate::error::ApplicationError;
use crate::history::HistoryPager;
use crate::hub::ConnectionHub;
use crate::outbound::{
    EnterChatPayload, MembersAdded, MembershipChange, RoomCreated, RoomData, RoomType, SearchHit,
    SearchHitKind,
};
use crate::repository::{RoomRepository, UserRepository};
use crate::storage::{ObjectStorage, UploadTicket};

const SEARCH_LIMIT: u32 = 10;
const MAX_UPLOADS_PER_REQUEST: usize = 10;
const MAX_ROOM_NAME_CHARS: usize = 100;

pub struct RoomServiceDependencies {
    pub users: Arc<dyn UserRepository>,
    pub rooms: Arc<dyn RoomRepository>,
    pub pager: Arc<HistoryPager>,
    pub enricher: Arc<MessageEnricher>,
    pub storage: Arc<dyn ObjectStorage>,
    pub hub: Arc<ConnectionHub>,
    pub clock: Arc<dyn Clock>,
}

pub struct RoomService {
    deps: RoomServiceDependencies,
    history: HistoryConfig,
}

impl RoomService {
    pub fn new(deps: RoomServiceDependencies, history: HistoryConfig) -> Self {
        Self { deps, history }
    }

    /// 进入房间：加入本地房间推送，返回房间信息与最新一页消息（时间正序）。
    ///
    /// 目标为尚无私聊的用户时只返回对方信息，不加入任何房间。
    pub async fn enter_chat(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        raw_room_id: &str,
    ) -> Result<EnterChatPayload, ApplicationError> {
        let (room_data, room_id) = match RoomTarget::parse(raw_room_id)? {
            RoomTarget::Direct(partner_id) => {
                let partner = self
                    .deps
                    .users
                    .find_by_id(partner_id)
                    .await?
                    .ok_or(DomainError::UserNotFound)?;
                match self.deps.rooms.find_direct_chat(user_id, partner_id).await? {
                    Some(room_id) => (
                        RoomData::for_partner(RoomType::Chat, room_id.to_string(), Some(&partner)),
                        Some(room_id),
                    ),
                    None => (
                        RoomData::for_partner(RoomType::User, partner_id.to_string(), Some(&partner)),
                        None,
                    ),
                }
            }
            RoomTarget::Room(room_id) => {
                let room = self.find_room(room_id).await?;
                let is_member = self.deps.rooms.is_member(room_id, user_id).await?;
                let data = match room_id.kind() {
                    RoomKind::Chat => {
                        if !is_member {
                            return Err(ApplicationError::unauthorized());
                        }
                        let partner = self.partner_of(room_id, user_id).await?;
                        RoomData::for_partner(RoomType::Chat, room_id.to_string(), partner.as_ref())
                    }
                    RoomKind::Group => {
                        if !is_member {
                            return Err(ApplicationError::unauthorized());
                        }
                        let members = self.deps.rooms.members_of(room_id).await?.len() as u64;
                        RoomData::for_owned_room(RoomType::Group, &room, members)
                    }
                    RoomKind::Channel => {
                        if !is_member && !room.is_public {
                            return Err(ApplicationError::unauthorized());
                        }
                        let members = self.deps.rooms.members_of(room_id).await?.len() as u64;
                        let mut data = RoomData::for_owned_room(RoomType::Channel, &room, members);
                        data.is_member = Some(is_member);
                        data
                    }
                };
                (data, Some(room_id))
            }
        };

        let messages = match room_id {
            Some(room_id) => {
                self.deps.hub.join(connection_id, room_id).await;
                let page = self
                    .deps
                    .pager
                    .initial_page(room_id, self.history.initial_page_size)
                    .await?;
                let mut views = self.deps.enricher.enrich_many(&page).await?;
                views.reverse();
                views
            }
            None => Vec::new(),
        };

        tracing::debug!(
            connection_id = %connection_id,
            room = raw_room_id,
            messages = messages.len(),
            "进入房间"
        );
        Ok(EnterChatPayload {
            room_data,
            messages,
        })
    }

    /// 只影响本连接的推送；格式错误的房间标识直接忽略
    pub async fn leave_chat(&self, connection_id: ConnectionId, raw_room_id: &str) {
        match raw_room_id.parse::<RoomId>() {
            Ok(room_id) => self.deps.hub.leave(connection_id, room_id).await,
            Err(err) => tracing::debug!(error = %err, "离开房间：房间标识无效"),
        }
    }

    /// 游标之前的一页历史，时间正序
    pub async fn older_messages(
        &self,
        user_id: UserId,
        room_id: RoomId,
        before: MessageCursor,
    ) -> Result<Vec<MessageView>, ApplicationError> {
        self.ensure_readable(room_id, user_id).await?;
        let page = self
            .deps
            .pager
            .older_page(room_id, before, self.history.older_page_size)
            .await?;
        let mut views = self.deps.enricher.enrich_many(&page).await?;
        views.reverse();
        Ok(views)
    }

    /// 按名字搜索用户（不含自己）与公开频道
    pub async fn search(
        &self,
        user_id: UserId,
        query: &str,
    ) -> Result<Vec<SearchHit>, ApplicationError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let users = self.deps.users.search(query, SEARCH_LIMIT + 1).await?;
        let channels = self
            .deps
            .rooms
            .search_public_channels(query, SEARCH_LIMIT)
            .await?;

        let mut hits: Vec<SearchHit> = users
            .into_iter()
            .filter(|user| user.id != user_id)
            .take(SEARCH_LIMIT as usize)
            .map(|user| SearchHit {
                kind: SearchHitKind::User,
                id: user.id.to_string(),
                name: Some(user.name),
                last_name: user.last_name,
                img_url: user.image_url,
            })
            .collect();
        hits.extend(channels.into_iter().map(|room| SearchHit {
            kind: SearchHitKind::Channel,
            id: room.id.to_string(),
            name: room.name,
            last_name: None,
            img_url: room.image_url,
        }));
        Ok(hits)
    }

    pub async fn create_group(
        &self,
        owner_id: UserId,
        name: &str,
        member_ids: Vec<UserId>,
        image_url: Option<String>,
    ) -> Result<RoomCreated, ApplicationError> {
        let name = validate_room_name(name)?;
        let mut members = vec![owner_id];
        for member in member_ids {
            if !members.contains(&member) {
                members.push(member);
            }
        }
        let found = self.deps.users.find_many(&members).await?;
        if found.len() != members.len() {
            return Err(DomainError::UserNotFound.into());
        }

        let room = Room::owned(
            RoomId::generate(RoomKind::Group),
            name,
            owner_id,
            image_url,
            self.deps.clock.now(),
        );
        let room = self.deps.rooms.create_with_members(room, &members).await?;
        tracing::info!(room_id = %room.id, owner_id = %owner_id, members = members.len(), "群组已创建");
        Ok(RoomCreated::from(&room))
    }

    pub async fn create_channel(
        &self,
        owner_id: UserId,
        name: &str,
        image_url: Option<String>,
    ) -> Result<RoomCreated, ApplicationError> {
        let name = validate_room_name(name)?;
        let room = Room::owned(
            RoomId::generate(RoomKind::Channel),
            name,
            owner_id,
            image_url,
            self.deps.clock.now(),
        );
        let room = self.deps.rooms.create_with_members(room, &[owner_id]).await?;
        tracing::info!(room_id = %room.id, owner_id = %owner_id, "频道已创建");
        Ok(RoomCreated::from(&room))
    }

    /// 只添加尚不是成员的用户；全部已在群中时报错
    pub async fn add_users(
        &self,
        requester: UserId,
        group_id: RoomId,
        user_ids: Vec<UserId>,
    ) -> Result<MembersAdded, ApplicationError> {
        expect_kind(group_id, RoomKind::Group)?;
        self.find_room(group_id).await?;
        if !self.deps.rooms.is_member(group_id, requester).await? {
            return Err(ApplicationError::unauthorized());
        }
        if user_ids.is_empty() {
            return Err(ApplicationError::validation("Invalid data"));
        }
        let found = self.deps.users.find_many(&user_ids).await?;
        if found.is_empty() {
            return Err(DomainError::UserNotFound.into());
        }
        let existing: Vec<UserId> = found.into_iter().map(|user| user.id).collect();

        let added = self
            .deps
            .rooms
            .add_members(group_id, &existing, self.deps.clock.now())
            .await?;
        if added.is_empty() {
            return Err(ApplicationError::validation("All users are already in the group"));
        }
        tracing::info!(room_id = %group_id, added = added.len(), "群组成员已添加");
        Ok(MembersAdded {
            success: true,
            group_id,
            added_user_ids: added,
        })
    }

    pub async fn leave_group(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        group_id: RoomId,
    ) -> Result<MembershipChange, ApplicationError> {
        expect_kind(group_id, RoomKind::Group)?;
        self.find_room(group_id).await?;
        if !self.deps.rooms.remove_member(group_id, user_id).await? {
            return Err(ApplicationError::Authorization(
                "You are not a member of this group".into(),
            ));
        }
        self.deps.hub.leave(connection_id, group_id).await;
        Ok(MembershipChange {
            user_id,
            room_id: group_id,
        })
    }

    pub async fn subscribe(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        channel_id: RoomId,
    ) -> Result<MembershipChange, ApplicationError> {
        expect_kind(channel_id, RoomKind::Channel)?;
        let channel = self.find_room(channel_id).await?;
        if !channel.is_public {
            return Err(ApplicationError::unauthorized());
        }
        self.deps
            .rooms
            .add_members(channel_id, &[user_id], self.deps.clock.now())
            .await?;
        self.deps.hub.join(connection_id, channel_id).await;
        Ok(MembershipChange {
            user_id,
            room_id: channel_id,
        })
    }

    /// 所有者不能退订自己的频道
    pub async fn unsubscribe(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        channel_id: RoomId,
    ) -> Result<MembershipChange, ApplicationError> {
        expect_kind(channel_id, RoomKind::Channel)?;
        let channel = self.find_room(channel_id).await?;
        if channel.is_owned_by(user_id) {
            return Err(ApplicationError::Authorization(
                "Owner cannot unsubscribe from the channel".into(),
            ));
        }
        if !self.deps.rooms.remove_member(channel_id, user_id).await? {
            return Err(ApplicationError::Authorization(
                "You are not subscribed to this channel".into(),
            ));
        }
        self.deps.hub.leave(connection_id, channel_id).await;
        Ok(MembershipChange {
            user_id,
            room_id: channel_id,
        })
    }

    /// 为客户端直传签发上传地址，顺序与扩展名一致
    pub async fn request_upload_urls(
        &self,
        extensions: &[String],
    ) -> Result<Vec<UploadTicket>, ApplicationError> {
        if extensions.is_empty() || extensions.len() > MAX_UPLOADS_PER_REQUEST {
            return Err(ApplicationError::validation("Invalid data"));
        }
        let mut tickets = Vec::with_capacity(extensions.len());
        for extension in extensions {
            tickets.push(self.deps.storage.issue_upload_url(extension).await?);
        }
        Ok(tickets)
    }

    async fn find_room(&self, room_id: RoomId) -> Result<Room, ApplicationError> {
        Ok(self
            .deps
            .rooms
            .find_by_id(room_id)
            .await?
            .ok_or(DomainError::RoomNotFound)?)
    }

    async fn partner_of(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<domain::User>, ApplicationError> {
        let partner = self
            .deps
            .rooms
            .members_of(room_id)
            .await?
            .into_iter()
            .find(|member| *member != user_id);
        match partner {
            Some(partner_id) => Ok(self.deps.users.find_by_id(partner_id).await?),
            None => Ok(None),
        }
    }

    /// 成员可读；公开频道任何人可读
    async fn ensure_readable(&self, room_id: RoomId, user_id: UserId) -> Result<(), ApplicationError> {
        if self.deps.rooms.is_member(room_id, user_id).await? {
            return Ok(());
        }
        if room_id.kind() == RoomKind::Channel && self.find_room(room_id).await?.is_public {
            return Ok(());
        }
        Err(ApplicationError::unauthorized())
    }
}

fn expect_kind(room_id: RoomId, kind: RoomKind) -> Result<(), ApplicationError> {
    if room_id.kind() == kind {
        Ok(())
    } else {
        Err(ApplicationError::validation("Invalid room id"))
    }
}

fn validate_room_name(name: &str) -> Result<&str, ApplicationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApplicationError::validation("Name is required"));
    }
    if name.chars().count() > MAX_ROOM_NAME_CHARS {
        return Err(ApplicationError::validation("Name is too long"));
    }
    Ok(name)
}
