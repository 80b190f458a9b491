//! Message dispatcher.
//!
//! Validates and persists messages against the chat state machine
//! (`ACTIVE -> ACTIVE`, `ARCHIVED -> ACTIVE`, `BLOCKED -> error`), then hands
//! the resulting events to the publisher.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, FixedOffset, Utc};
use haggle_common::{AppError, AppResult, IdGenerator, config::ChatConfig};
use haggle_db::{
    entities::{
        chat::{self, ChatStatus},
        chat_message::{self, DELETED_CONTENT, MessageType},
    },
    repositories::{ChatMessageRepository, ChatRepository},
};
use sea_orm::Set;
use serde::Serialize;

use crate::services::directory::{UserDirectoryService, UserSummary};
use crate::services::event_publisher::EventPublisherService;
use crate::services::locks::KeyedLocks;

/// Longest accepted text body or note, in characters.
pub const MAX_CONTENT_CHARS: usize = 5000;

/// A message as returned to clients and carried by events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub message_type: MessageType,
    pub content: Option<String>,
    pub offer_amount: Option<i64>,
    pub offer_id: Option<String>,
    pub offer_expires_at: Option<DateTime<FixedOffset>>,
    pub notes: Option<String>,
    pub reply_to_id: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<FixedOffset>,
    pub edited_at: Option<DateTime<FixedOffset>>,
    pub deleted_at: Option<DateTime<FixedOffset>>,
    /// Sender display fields
    pub sender: Option<UserSummary>,
}

impl MessageView {
    /// Build a view from a stored row.
    #[must_use]
    pub fn from_model(message: chat_message::Model, sender: Option<UserSummary>) -> Self {
        Self {
            id: message.id,
            chat_id: message.chat_id,
            sender_id: message.sender_id,
            message_type: message.message_type,
            content: message.content,
            offer_amount: message.offer_amount,
            offer_id: message.offer_id,
            offer_expires_at: message.offer_expires_at,
            notes: message.notes,
            reply_to_id: message.reply_to_id,
            is_read: message.is_read,
            created_at: message.created_at,
            edited_at: message.edited_at,
            deleted_at: message.deleted_at,
            sender,
        }
    }

    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Input for sending a message.
#[derive(Debug, Clone)]
pub struct SendMessageInput {
    pub message_type: MessageType,
    pub content: Option<String>,
    pub offer_amount: Option<i64>,
    pub reply_to_id: Option<String>,
}

impl SendMessageInput {
    /// A plain text message.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Text,
            content: Some(content.into()),
            offer_amount: None,
            reply_to_id: None,
        }
    }
}

/// Everything a message row can carry, before validation.
#[derive(Debug, Clone)]
pub(crate) struct MessageDraft {
    pub message_type: MessageType,
    pub content: Option<String>,
    pub offer_amount: Option<i64>,
    pub offer_id: Option<String>,
    pub offer_expires_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub reply_to_id: Option<String>,
}

impl From<SendMessageInput> for MessageDraft {
    fn from(input: SendMessageInput) -> Self {
        Self {
            message_type: input.message_type,
            content: input.content,
            offer_amount: input.offer_amount,
            offer_id: None,
            offer_expires_at: None,
            notes: None,
            reply_to_id: input.reply_to_id,
        }
    }
}

/// A page of chat history in chronological order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<MessageView>,
    /// Whether older messages exist before the first one returned.
    pub has_more: bool,
}

/// Message service.
#[derive(Clone)]
pub struct MessageService {
    chat_repo: ChatRepository,
    message_repo: ChatMessageRepository,
    users: UserDirectoryService,
    event_publisher: Option<EventPublisherService>,
    edit_window: chrono::Duration,
    id_gen: IdGenerator,
    /// Per-chat locks shared with the negotiation service.
    offer_locks: KeyedLocks,
}

impl MessageService {
    /// Create a new message service.
    #[must_use]
    pub fn new(
        chat_repo: ChatRepository,
        message_repo: ChatMessageRepository,
        users: UserDirectoryService,
        config: &ChatConfig,
    ) -> Self {
        Self {
            chat_repo,
            message_repo,
            users,
            event_publisher: None,
            edit_window: config.edit_window(),
            id_gen: IdGenerator::new(),
            offer_locks: KeyedLocks::new(),
        }
    }

    pub(crate) const fn offer_locks(&self) -> &KeyedLocks {
        &self.offer_locks
    }

    /// Set the event publisher.
    pub fn set_event_publisher(&mut self, event_publisher: EventPublisherService) {
        self.event_publisher = Some(event_publisher);
    }

    /// Load a chat, requiring `user_id` to be one of its participants.
    pub async fn chat_for_participant(
        &self,
        chat_id: &str,
        user_id: &str,
    ) -> AppResult<chat::Model> {
        let chat = self.chat_repo.get_by_id(chat_id).await?;

        if !chat.is_participant(user_id) {
            return Err(AppError::Forbidden(
                "Not a participant in this chat".to_string(),
            ));
        }

        Ok(chat)
    }

    /// Send a text, image, offer or counter-offer message.
    ///
    /// Offer responses go through the negotiation service.
    pub async fn send(
        &self,
        chat_id: &str,
        sender_id: &str,
        input: SendMessageInput,
    ) -> AppResult<MessageView> {
        if input.message_type.is_offer_response() {
            return Err(AppError::Validation(
                "Offer responses are created by responding to an offer".to_string(),
            ));
        }

        // Offers serialize with responses in the same chat
        let _guard = if input.message_type.is_offer() {
            Some(self.offer_locks.lock(chat_id).await)
        } else {
            None
        };

        self.dispatch(chat_id, sender_id, input.into()).await
    }

    /// Validate, persist and announce a message.
    pub(crate) async fn dispatch(
        &self,
        chat_id: &str,
        sender_id: &str,
        draft: MessageDraft,
    ) -> AppResult<MessageView> {
        let chat = self.chat_for_participant(chat_id, sender_id).await?;
        let draft = normalize_draft(draft)?;

        if let Some(reply_to_id) = draft.reply_to_id.as_deref() {
            let in_chat = self
                .message_repo
                .find_by_id(reply_to_id)
                .await?
                .is_some_and(|target| target.chat_id == chat.id);
            if !in_chat {
                return Err(AppError::Validation(
                    "Reply target is not a message in this chat".to_string(),
                ));
            }
        }

        if chat.status == ChatStatus::Blocked {
            return Err(AppError::BusinessLogic(
                "Cannot send messages to a blocked chat".to_string(),
            ));
        }

        let model = chat_message::ActiveModel {
            id: Set(self.id_gen.generate()),
            chat_id: Set(chat.id.clone()),
            sender_id: Set(sender_id.to_string()),
            message_type: Set(draft.message_type),
            content: Set(draft.content),
            offer_amount: Set(draft.offer_amount),
            offer_id: Set(draft.offer_id),
            offer_expires_at: Set(draft.offer_expires_at.map(Into::into)),
            notes: Set(draft.notes),
            reply_to_id: Set(draft.reply_to_id),
            is_read: Set(false),
            created_at: Set(Utc::now().into()),
            edited_at: Set(None),
            deleted_at: Set(None),
        };

        // The append re-checks BLOCKED under the row lock
        let appended = self.message_repo.append(model).await?;

        tracing::info!(
            chat_id = %appended.chat.id,
            message_id = %appended.message.id,
            sender_id = %sender_id,
            message_type = ?appended.message.message_type,
            reactivated = appended.reactivated,
            "Message sent"
        );

        let sender = self.sender_summary(sender_id).await;
        let view = MessageView::from_model(appended.message, sender);

        if let Some(ref event_publisher) = self.event_publisher {
            if appended.reactivated
                && let Err(e) = event_publisher
                    .publish_chat_status_changed(&appended.chat, sender_id)
                    .await
            {
                tracing::warn!(error = %e, "Failed to publish chat reactivation");
            }

            if let Err(e) = event_publisher
                .publish_message_created(&appended.chat, &view)
                .await
            {
                tracing::warn!(error = %e, "Failed to publish message created event");
            }
        }

        Ok(view)
    }

    /// Fetch a page of history, walking backwards from `before_id`.
    pub async fn get_messages(
        &self,
        chat_id: &str,
        user_id: &str,
        limit: u64,
        before_id: Option<&str>,
    ) -> AppResult<MessagePage> {
        let chat = self.chat_for_participant(chat_id, user_id).await?;

        let cursor = match before_id {
            Some(id) => Some(
                self.message_repo
                    .find_by_id(id)
                    .await?
                    .filter(|message| message.chat_id == chat.id)
                    .ok_or_else(|| {
                        AppError::Validation("Cursor is not a message in this chat".to_string())
                    })?,
            ),
            None => None,
        };

        let mut rows = self
            .message_repo
            .find_page(&chat.id, limit + 1, cursor.as_ref())
            .await?;

        let has_more = rows.len() as u64 > limit;
        rows.truncate(limit as usize);
        rows.reverse();

        Ok(MessagePage {
            messages: self.with_senders(rows).await?,
            has_more,
        })
    }

    /// Mark messages as read by `reader_id`.
    ///
    /// Only messages from the other participant that are still unread are
    /// touched; `None` acknowledges everything unread in the chat.
    pub async fn mark_read(
        &self,
        chat_id: &str,
        reader_id: &str,
        message_ids: Option<&[String]>,
    ) -> AppResult<u64> {
        let chat = self.chat_for_participant(chat_id, reader_id).await?;

        let ids = self
            .message_repo
            .find_unread_ids(&chat.id, reader_id, message_ids)
            .await?;
        let count = self
            .message_repo
            .mark_as_read(&chat.id, reader_id, &ids)
            .await?;

        if count > 0 {
            tracing::debug!(chat_id = %chat.id, reader_id = %reader_id, count, "Messages read");

            if let Some(ref event_publisher) = self.event_publisher
                && let Err(e) = event_publisher
                    .publish_messages_read(&chat, reader_id, &ids)
                    .await
            {
                tracing::warn!(error = %e, "Failed to publish messages read event");
            }
        }

        Ok(count)
    }

    /// Edit the content of a text message within the edit window.
    pub async fn edit(
        &self,
        message_id: &str,
        user_id: &str,
        new_content: &str,
    ) -> AppResult<MessageView> {
        let message = self.message_repo.get_by_id(message_id).await?;

        if message.sender_id != user_id {
            return Err(AppError::Forbidden(
                "Only the sender can edit a message".to_string(),
            ));
        }
        if message.message_type != MessageType::Text {
            return Err(AppError::BusinessLogic(
                "Only text messages can be edited".to_string(),
            ));
        }
        if message.is_deleted() {
            return Err(AppError::BusinessLogic(
                "Deleted messages cannot be edited".to_string(),
            ));
        }
        if Utc::now() - message.created_at.with_timezone(&Utc) > self.edit_window {
            return Err(AppError::BusinessLogic(
                "The edit window for this message has elapsed".to_string(),
            ));
        }

        let content = normalize_text(Some(new_content.to_string()))?
            .ok_or_else(|| AppError::Validation("Message content is required".to_string()))?;

        let chat = self.chat_repo.get_by_id(&message.chat_id).await?;

        let mut active: chat_message::ActiveModel = message.into();
        active.content = Set(Some(content));
        active.edited_at = Set(Some(Utc::now().into()));
        let updated = self.message_repo.update(active).await?;

        tracing::info!(chat_id = %chat.id, message_id = %updated.id, "Message edited");

        let sender = self.sender_summary(user_id).await;
        let view = MessageView::from_model(updated, sender);

        if let Some(ref event_publisher) = self.event_publisher
            && let Err(e) = event_publisher.publish_message_edited(&chat, &view).await
        {
            tracing::warn!(error = %e, "Failed to publish message edited event");
        }

        Ok(view)
    }

    /// Soft-delete a message: the row stays, its content is replaced.
    ///
    /// Deleting an already deleted message is a no-op.
    pub async fn soft_delete(&self, message_id: &str, user_id: &str) -> AppResult<MessageView> {
        let message = self.message_repo.get_by_id(message_id).await?;

        if message.sender_id != user_id {
            return Err(AppError::Forbidden(
                "Only the sender can delete a message".to_string(),
            ));
        }

        let sender = self.sender_summary(user_id).await;

        if message.is_deleted() {
            return Ok(MessageView::from_model(message, sender));
        }

        let chat = self.chat_repo.get_by_id(&message.chat_id).await?;

        let mut active: chat_message::ActiveModel = message.into();
        active.content = Set(Some(DELETED_CONTENT.to_string()));
        active.deleted_at = Set(Some(Utc::now().into()));
        let deleted = self.message_repo.update(active).await?;

        tracing::info!(chat_id = %chat.id, message_id = %deleted.id, "Message deleted");

        if let Some(ref event_publisher) = self.event_publisher
            && let Err(e) = event_publisher.publish_message_deleted(&chat, &deleted).await
        {
            tracing::warn!(error = %e, "Failed to publish message deleted event");
        }

        Ok(MessageView::from_model(deleted, sender))
    }

    /// Search live message content across every chat of `user_id`.
    pub async fn search(
        &self,
        user_id: &str,
        query: &str,
        limit: u64,
    ) -> AppResult<Vec<MessageView>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::Validation(
                "Search query must not be empty".to_string(),
            ));
        }

        let chat_ids = self.chat_repo.find_ids_for_user(user_id).await?;
        let rows = self.message_repo.search(&chat_ids, query, limit).await?;

        self.with_senders(rows).await
    }

    /// Attach sender summaries to a batch of rows.
    pub(crate) async fn with_senders(
        &self,
        rows: Vec<chat_message::Model>,
    ) -> AppResult<Vec<MessageView>> {
        let sender_ids: Vec<String> = rows
            .iter()
            .map(|row| row.sender_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let senders: HashMap<String, UserSummary> = self
            .users
            .get_users(&sender_ids)
            .await?
            .into_iter()
            .map(|user| (user.id.clone(), user))
            .collect();

        Ok(rows
            .into_iter()
            .map(|row| {
                let sender = senders.get(&row.sender_id).cloned();
                MessageView::from_model(row, sender)
            })
            .collect())
    }

    /// Sender display fields; a lookup failure only costs the decoration.
    async fn sender_summary(&self, user_id: &str) -> Option<UserSummary> {
        match self.users.get_user(user_id).await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(error = %e, user_id = %user_id, "Failed to load sender summary");
                None
            }
        }
    }
}

/// Trim text, treating blank as absent, and enforce the length cap.
fn normalize_text(text: Option<String>) -> AppResult<Option<String>> {
    let Some(text) = text else {
        return Ok(None);
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_CONTENT_CHARS {
        return Err(AppError::Validation(format!(
            "Content must be at most {MAX_CONTENT_CHARS} characters"
        )));
    }

    Ok(Some(trimmed.to_string()))
}

/// Enforce the per-type field rules and drop fields a type does not carry.
fn normalize_draft(draft: MessageDraft) -> AppResult<MessageDraft> {
    let content = normalize_text(draft.content)?;
    let notes = normalize_text(draft.notes)?;

    match draft.message_type {
        MessageType::Text | MessageType::Image => {
            if content.is_none() {
                return Err(AppError::Validation(
                    "Message content is required".to_string(),
                ));
            }

            Ok(MessageDraft {
                content,
                offer_amount: None,
                offer_id: None,
                offer_expires_at: None,
                notes: None,
                ..draft
            })
        }
        MessageType::Offer | MessageType::CounterOffer => {
            match draft.offer_amount {
                Some(amount) if amount > 0 => {}
                _ => {
                    return Err(AppError::Validation(
                        "Offer amount must be greater than zero".to_string(),
                    ));
                }
            }

            if let Some(expires_at) = draft.offer_expires_at
                && expires_at <= Utc::now()
            {
                return Err(AppError::Validation(
                    "Offer expiry must be in the future".to_string(),
                ));
            }

            Ok(MessageDraft {
                content,
                notes,
                offer_id: None,
                ..draft
            })
        }
        MessageType::OfferAccepted | MessageType::OfferRejected => {
            if draft.offer_id.is_none() {
                return Err(AppError::Validation(
                    "Offer responses must reference an offer".to_string(),
                ));
            }

            Ok(MessageDraft {
                content,
                notes,
                offer_expires_at: None,
                ..draft
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::directory::DbDirectory;
    use haggle_db::repositories::{ListingRepository, UserRepository};
    use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase};
    use std::sync::Arc;

    fn draft(message_type: MessageType) -> MessageDraft {
        MessageDraft {
            message_type,
            content: None,
            offer_amount: None,
            offer_id: None,
            offer_expires_at: None,
            notes: None,
            reply_to_id: None,
        }
    }

    fn service(db: DatabaseConnection) -> MessageService {
        let db = Arc::new(db);
        let directory = DbDirectory::new(
            UserRepository::new(Arc::clone(&db)),
            ListingRepository::new(Arc::clone(&db)),
        );
        MessageService::new(
            ChatRepository::new(Arc::clone(&db)),
            ChatMessageRepository::new(db),
            Arc::new(directory),
            &ChatConfig::default(),
        )
    }

    fn chat() -> chat::Model {
        chat::Model {
            id: "chat1".to_string(),
            buyer_id: "buyer1".to_string(),
            vendor_id: "vendor1".to_string(),
            listing_id: None,
            status: ChatStatus::Active,
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    #[test]
    fn test_text_requires_content() {
        let mut text = draft(MessageType::Text);
        text.content = Some("   ".to_string());

        assert!(matches!(
            normalize_draft(text),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_text_is_trimmed_and_drops_offer_fields() {
        let mut text = draft(MessageType::Text);
        text.content = Some("  hi there ".to_string());
        text.offer_amount = Some(100);

        let normalized = normalize_draft(text).unwrap();
        assert_eq!(normalized.content.as_deref(), Some("hi there"));
        assert!(normalized.offer_amount.is_none());
    }

    #[test]
    fn test_content_length_cap() {
        let mut text = draft(MessageType::Text);
        text.content = Some("x".repeat(MAX_CONTENT_CHARS + 1));

        assert!(matches!(
            normalize_draft(text),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_offer_requires_positive_amount() {
        let mut offer = draft(MessageType::Offer);
        offer.offer_amount = Some(0);
        assert!(matches!(
            normalize_draft(offer.clone()),
            Err(AppError::Validation(_))
        ));

        offer.offer_amount = None;
        assert!(matches!(
            normalize_draft(offer.clone()),
            Err(AppError::Validation(_))
        ));

        offer.offer_amount = Some(10_000);
        let normalized = normalize_draft(offer).unwrap();
        assert_eq!(normalized.offer_amount, Some(10_000));
        assert!(normalized.content.is_none());
    }

    #[test]
    fn test_offer_expiry_must_be_future() {
        let mut offer = draft(MessageType::CounterOffer);
        offer.offer_amount = Some(500);
        offer.offer_expires_at = Some(Utc::now() - chrono::Duration::minutes(1));

        assert!(matches!(
            normalize_draft(offer),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_response_requires_offer_reference() {
        assert!(matches!(
            normalize_draft(draft(MessageType::OfferAccepted)),
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_send_rejects_offer_response_type() {
        let service = service(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let input = SendMessageInput {
            message_type: MessageType::OfferAccepted,
            content: None,
            offer_amount: Some(100),
            reply_to_id: None,
        };

        let result = service.send("chat1", "buyer1", input).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_send_by_outsider_is_forbidden() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[chat()]])
            .into_connection();
        let service = service(db);

        let result = service
            .send("chat1", "stranger", SendMessageInput::text("hello"))
            .await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_send_to_blocked_chat_fails_before_insert() {
        let mut blocked = chat();
        blocked.status = ChatStatus::Blocked;
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[blocked]])
            .into_connection();
        let service = service(db);

        let result = service
            .send("chat1", "buyer1", SendMessageInput::text("hello"))
            .await;
        assert!(matches!(result, Err(AppError::BusinessLogic(_))));
    }

    #[tokio::test]
    async fn test_search_rejects_blank_query() {
        let service = service(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let result = service.search("buyer1", "   ", 10).await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
