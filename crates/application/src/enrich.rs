//! 消息补全：发送者信息与附件下载URL

use std::collections::HashMap;
use std::sync::Arc;

use domain::{Attachment, AttachmentView, Message, MessageId, MessageView, User, UserId};

use crate::error::ApplicationError;
use crate::repository::{MessageRepository, UserRepository};
use crate::storage::ObjectStorage;

pub struct MessageEnricher {
    users: Arc<dyn UserRepository>,
    messages: Arc<dyn MessageRepository>,
    storage: Arc<dyn ObjectStorage>,
}

impl MessageEnricher {
    pub fn new(
        users: Arc<dyn UserRepository>,
        messages: Arc<dyn MessageRepository>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        Self {
            users,
            messages,
            storage,
        }
    }

    /// 签发下载URL；失败时降级为 `None`，不影响整条消息
    pub async fn attachment_view(&self, attachment: &Attachment) -> AttachmentView {
        let download_name = attachment.persist_name.then(|| attachment.name.clone());
        let url = match self
            .storage
            .issue_download_url(&attachment.key, download_name)
            .await
        {
            Ok(url) => Some(url),
            Err(err) => {
                tracing::warn!(
                    attachment_id = %attachment.id,
                    error = %err,
                    "附件下载地址签发失败，降级为空URL"
                );
                None
            }
        };
        AttachmentView::new(attachment, url)
    }

    /// 已知附件时的单条补全（发送路径）
    pub async fn enrich_one(
        &self,
        message: &Message,
        sender: Option<&User>,
        attachments: &[Attachment],
    ) -> MessageView {
        let mut views = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            views.push(self.attachment_view(attachment).await);
        }
        MessageView::new(message, sender, views)
    }

    /// 批量补全，保持输入顺序
    pub async fn enrich_many(&self, messages: &[Message]) -> Result<Vec<MessageView>, ApplicationError> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let message_ids: Vec<MessageId> = messages.iter().map(|m| m.id).collect();
        let mut sender_ids: Vec<UserId> = messages.iter().map(|m| m.sender_id).collect();
        sender_ids.sort();
        sender_ids.dedup();

        let senders: HashMap<UserId, User> = self
            .users
            .find_many(&sender_ids)
            .await?
            .into_iter()
            .map(|user| (user.id, user))
            .collect();

        let mut attachments: HashMap<MessageId, Vec<Attachment>> = HashMap::new();
        for attachment in self.messages.attachments_of(&message_ids).await? {
            attachments
                .entry(attachment.message_id)
                .or_default()
                .push(attachment);
        }

        let mut views = Vec::with_capacity(messages.len());
        for message in messages {
            let own = attachments.remove(&message.id).unwrap_or_default();
            views.push(
                self.enrich_one(message, senders.get(&message.sender_id), &own)
                    .await,
            );
        }
        Ok(views)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::storage::{MockObjectStorage, PresignError};
    use chrono::Utc;
    use domain::{AttachmentUpload, RoomId, RoomKind};
    use mockall::predicate::eq;

    fn upload(key: &str, name: &str, save_as_media: bool) -> AttachmentUpload {
        AttachmentUpload {
            key: key.into(),
            name: name.into(),
            save_as_media,
            file_size: Some(2048),
            file_base64_blur: None,
        }
    }

    #[tokio::test]
    async fn presign_failure_degrades_to_null_url() {
        let store = Arc::new(MemoryStore::new());
        let mut storage = MockObjectStorage::new();
        storage
            .expect_issue_download_url()
            .with(eq("ok.png"), eq(None::<String>))
            .returning(|key, _| Ok(format!("https://cdn/{key}")));
        storage
            .expect_issue_download_url()
            .with(eq("broken.pdf"), eq(Some("report.pdf".to_string())))
            .returning(|_, _| Err(PresignError::Signing("clock skew".into())));

        let enricher = MessageEnricher::new(store.clone(), store.clone(), Arc::new(storage));
        let message = Message::compose(
            MessageId::generate(),
            RoomId::generate(RoomKind::Group),
            UserId::generate(),
            "files",
            None,
            Utc::now(),
        );
        let attachments = vec![
            Attachment::from_upload(message.id, upload("ok.png", "ok.png", false)),
            Attachment::from_upload(message.id, upload("broken.pdf", "report.pdf", true)),
        ];

        let view = enricher.enrich_one(&message, None, &attachments).await;
        assert_eq!(view.attachments.len(), 2);
        assert_eq!(view.attachments[0].file_url.as_deref(), Some("https://cdn/ok.png"));
        assert_eq!(view.attachments[1].file_url, None);
        assert_eq!(view.attachments[1].file_size.as_deref(), Some("2048"));
        assert!(view.attachments[1].save_as_media);
    }
}
