//! 历史消息分页
//!
//! 键集分页，游标为客户端已持有的最旧消息的 (createdAt, id)。返回结果为新到旧，
//! 调用方反转后得到时间正序。

use std::sync::Arc;

use domain::{Message, MessageCursor, RoomId};

use crate::error::ApplicationError;
use crate::repository::MessageRepository;

pub struct HistoryPager {
    messages: Arc<dyn MessageRepository>,
}

impl HistoryPager {
    pub fn new(messages: Arc<dyn MessageRepository>) -> Self {
        Self { messages }
    }

    /// 最新的一页，新到旧
    pub async fn initial_page(
        &self,
        room_id: RoomId,
        page_size: u32,
    ) -> Result<Vec<Message>, ApplicationError> {
        Ok(self.messages.page(room_id, None, page_size).await?)
    }

    /// 严格排在游标之前的一页，新到旧
    pub async fn older_page(
        &self,
        room_id: RoomId,
        before: MessageCursor,
        page_size: u32,
    ) -> Result<Vec<Message>, ApplicationError> {
        Ok(self.messages.page(room_id, Some(before), page_size).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};
    use domain::{MessageId, RoomKind, UserId};
    use std::collections::HashSet;
    use uuid::Uuid;

    /// 20 条消息，每 4 条共享同一个时间戳；其中 3 条已删除
    async fn seeded() -> (Arc<MemoryStore>, RoomId, Vec<Message>) {
        let store = Arc::new(MemoryStore::new());
        let room = RoomId::generate(RoomKind::Group);
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut visible = Vec::new();
        for i in 0..20u128 {
            let at = base + Duration::milliseconds((i / 4) as i64);
            let mut message = Message::compose(
                MessageId::from(Uuid::from_u128(1000 - i * 7)),
                room,
                UserId::generate(),
                format!("m{i}"),
                None,
                at,
            );
            if matches!(i, 3 | 9 | 10) {
                message.soft_delete(at);
            } else {
                visible.push(message.clone());
            }
            store.insert_message(message).await;
        }
        visible.sort_by(|a, b| b.cursor().cmp(&a.cursor()));
        (store, room, visible)
    }

    #[tokio::test]
    async fn paging_has_no_duplicates_or_gaps() {
        let (store, room, full_scan) = seeded().await;
        let pager = HistoryPager::new(store);

        for page_size in [1u32, 3, 4, 10] {
            let mut collected = pager.initial_page(room, page_size).await.unwrap();
            let mut last_len = collected.len();
            while last_len == page_size as usize {
                let cursor = collected.last().unwrap().cursor();
                let older = pager.older_page(room, cursor, page_size).await.unwrap();
                last_len = older.len();
                collected.extend(older);
            }

            let ids: Vec<MessageId> = collected.iter().map(|m| m.id).collect();
            let unique: HashSet<MessageId> = ids.iter().copied().collect();
            assert_eq!(unique.len(), ids.len(), "page size {page_size}");
            let expected: Vec<MessageId> = full_scan.iter().map(|m| m.id).collect();
            assert_eq!(ids, expected, "page size {page_size}");
        }
    }

    #[tokio::test]
    async fn older_page_is_strictly_before_cursor() {
        let (store, room, full_scan) = seeded().await;
        let pager = HistoryPager::new(store);
        let cursor = full_scan[5].cursor();

        let page = pager.older_page(room, cursor, 10).await.unwrap();
        assert!(page.len() <= 10);
        assert!(page.iter().all(|m| cursor.precedes(&m.cursor())));
        assert!(page.windows(2).all(|w| w[0].cursor() > w[1].cursor()));
        assert_eq!(page[0].id, full_scan[6].id);
    }

    #[tokio::test]
    async fn deleted_cursor_message_does_not_break_sequence() {
        let (store, room, full_scan) = seeded().await;
        let deleted = store
            .raw_message(MessageId::from(Uuid::from_u128(1000 - 9 * 7)))
            .await
            .unwrap();
        let pager = HistoryPager::new(store);

        let page = pager.older_page(room, deleted.cursor(), 50).await.unwrap();
        let expected: Vec<MessageId> = full_scan
            .iter()
            .filter(|m| deleted.cursor().precedes(&m.cursor()))
            .map(|m| m.id)
            .collect();
        assert_eq!(page.iter().map(|m| m.id).collect::<Vec<_>>(), expected);
    }

    #[tokio::test]
    async fn repeated_calls_are_deterministic() {
        let (store, room, full_scan) = seeded().await;
        let pager = HistoryPager::new(store);
        let cursor = full_scan[2].cursor();
        let first = pager.older_page(room, cursor, 4).await.unwrap();
        let second = pager.older_page(room, cursor, 4).await.unwrap();
        assert_eq!(first, second);
    }
}
