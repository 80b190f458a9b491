//! Conversation store.
//!
//! Owns chat lifecycle: creation (one live chat per listing/buyer/vendor
//! triple), participant access, status transitions and listing views.

use chrono::Utc;
use haggle_common::{AppError, AppResult, IdGenerator};
use haggle_db::{
    entities::{
        chat::{self, ChatStatus},
        user::UserRole,
    },
    repositories::{ChatMessageRepository, ChatRepository},
};
use sea_orm::Set;
use serde::Serialize;

use crate::services::directory::{
    ListingDirectoryService, ListingSummary, UserDirectoryService, UserSummary,
};
use crate::services::event_publisher::EventPublisherService;
use crate::services::locks::KeyedLocks;
use crate::services::message::{MessageService, MessageView, SendMessageInput};

/// Input for opening a chat.
#[derive(Debug, Clone)]
pub struct CreateChatInput {
    pub listing_id: Option<String>,
    pub buyer_id: String,
    pub vendor_id: String,
    pub initial_message: Option<String>,
}

/// Outcome of [`ChatService::create_or_get_chat`].
#[derive(Debug, Clone)]
pub struct ChatCreation {
    pub chat: chat::Model,
    pub is_new: bool,
    /// The opening message, when one was given for a new chat.
    pub initial_message: Option<MessageView>,
}

/// A chat with its participants and listing resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatDetails {
    #[serde(flatten)]
    pub chat: ChatView,
    pub buyer: Option<UserSummary>,
    pub vendor: Option<UserSummary>,
    pub listing: Option<ListingSummary>,
}

/// Wire shape of a chat row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatView {
    pub id: String,
    pub buyer_id: String,
    pub vendor_id: String,
    pub listing_id: Option<String>,
    pub status: ChatStatus,
    pub created_at: chrono::DateTime<chrono::FixedOffset>,
    pub updated_at: chrono::DateTime<chrono::FixedOffset>,
}

impl From<chat::Model> for ChatView {
    fn from(chat: chat::Model) -> Self {
        Self {
            id: chat.id,
            buyer_id: chat.buyer_id,
            vendor_id: chat.vendor_id,
            listing_id: chat.listing_id,
            status: chat.status,
            created_at: chat.created_at,
            updated_at: chat.updated_at,
        }
    }
}

/// One row of a user's inbox.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    #[serde(flatten)]
    pub chat: ChatView,
    pub counterpart: Option<UserSummary>,
    pub listing: Option<ListingSummary>,
    pub last_message: Option<MessageView>,
    pub unread_count: u64,
}

/// A page of a user's inbox.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPage {
    pub chats: Vec<ChatSummary>,
    pub page: u64,
    pub limit: u64,
    pub has_more: bool,
}

/// Chat service.
#[derive(Clone)]
pub struct ChatService {
    chat_repo: ChatRepository,
    message_repo: ChatMessageRepository,
    users: UserDirectoryService,
    listings: ListingDirectoryService,
    messages: MessageService,
    event_publisher: Option<EventPublisherService>,
    locks: KeyedLocks,
    id_gen: IdGenerator,
}

impl ChatService {
    /// Create a new chat service.
    #[must_use]
    pub fn new(
        chat_repo: ChatRepository,
        message_repo: ChatMessageRepository,
        users: UserDirectoryService,
        listings: ListingDirectoryService,
        messages: MessageService,
    ) -> Self {
        Self {
            chat_repo,
            message_repo,
            users,
            listings,
            messages,
            event_publisher: None,
            locks: KeyedLocks::new(),
            id_gen: IdGenerator::new(),
        }
    }

    /// Set the event publisher.
    pub fn set_event_publisher(&mut self, event_publisher: EventPublisherService) {
        self.event_publisher = Some(event_publisher);
    }

    /// Open the chat for a (listing, buyer, vendor) triple, or return the
    /// existing one.
    ///
    /// An archived chat is reactivated; active and blocked chats come back
    /// unchanged. The initial message is only sent for a new chat.
    pub async fn create_or_get_chat(&self, input: CreateChatInput) -> AppResult<ChatCreation> {
        if input.buyer_id == input.vendor_id {
            return Err(AppError::Validation(
                "Cannot open a chat with yourself".to_string(),
            ));
        }

        let vendor = self
            .users
            .get_user(&input.vendor_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User not found: {}", input.vendor_id)))?;
        if vendor.role != UserRole::Vendor {
            return Err(AppError::Validation(format!(
                "User {} is not a vendor",
                vendor.id
            )));
        }

        if let Some(listing_id) = input.listing_id.as_deref() {
            let listing = self
                .listings
                .get_listing(listing_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Listing not found: {listing_id}")))?;

            if listing.vendor_id != input.vendor_id {
                return Err(AppError::Validation(
                    "Listing does not belong to this vendor".to_string(),
                ));
            }
        }

        let key = format!(
            "create:{}:{}:{}",
            input.listing_id.as_deref().unwrap_or("-"),
            input.buyer_id,
            input.vendor_id
        );
        let _guard = self.locks.lock(&key).await;

        if let Some(existing) = self
            .chat_repo
            .find_by_participants(input.listing_id.as_deref(), &input.buyer_id, &input.vendor_id)
            .await?
        {
            let chat = if existing.status == ChatStatus::Archived {
                let chat = self
                    .chat_repo
                    .update_status(existing, ChatStatus::Active)
                    .await?;
                tracing::info!(chat_id = %chat.id, "Archived chat reactivated");
                self.announce_status(&chat, &input.buyer_id).await;
                chat
            } else {
                existing
            };

            return Ok(ChatCreation {
                chat,
                is_new: false,
                initial_message: None,
            });
        }

        let now = Utc::now();
        let model = chat::ActiveModel {
            id: Set(self.id_gen.generate()),
            buyer_id: Set(input.buyer_id.clone()),
            vendor_id: Set(input.vendor_id.clone()),
            listing_id: Set(input.listing_id.clone()),
            status: Set(ChatStatus::Active),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        let created = self.chat_repo.create(model).await?;

        tracing::info!(
            chat_id = %created.id,
            buyer_id = %created.buyer_id,
            vendor_id = %created.vendor_id,
            listing_id = ?created.listing_id,
            "Chat created"
        );

        let Some(text) = input.initial_message else {
            return Ok(ChatCreation {
                chat: created,
                is_new: true,
                initial_message: None,
            });
        };

        let message = self
            .messages
            .send(&created.id, &input.buyer_id, SendMessageInput::text(text))
            .await?;

        // The send bumped updated_at
        let chat = self.chat_repo.get_by_id(&created.id).await?;

        Ok(ChatCreation {
            chat,
            is_new: true,
            initial_message: Some(message),
        })
    }

    /// Get a chat with participant and listing summaries.
    pub async fn get_chat(&self, chat_id: &str, user_id: &str) -> AppResult<ChatDetails> {
        let chat = self.messages.chat_for_participant(chat_id, user_id).await?;

        let participants = self
            .users
            .get_users(&[chat.buyer_id.clone(), chat.vendor_id.clone()])
            .await?;
        let buyer = participants.iter().find(|u| u.id == chat.buyer_id).cloned();
        let vendor = participants.iter().find(|u| u.id == chat.vendor_id).cloned();

        let listing = match chat.listing_id.as_deref() {
            Some(listing_id) => self.listings.get_listing(listing_id).await?,
            None => None,
        };

        Ok(ChatDetails {
            chat: chat.into(),
            buyer,
            vendor,
            listing,
        })
    }

    /// Whether `user_id` takes part in the chat. Unknown chats are `NotFound`.
    pub async fn is_participant(&self, chat_id: &str, user_id: &str) -> AppResult<bool> {
        let chat = self.chat_repo.get_by_id(chat_id).await?;
        Ok(chat.is_participant(user_id))
    }

    /// List a user's chats, most recently active first.
    ///
    /// `page` is 1-based.
    pub async fn list_chats_for_user(
        &self,
        user_id: &str,
        page: u64,
        limit: u64,
        status: Option<ChatStatus>,
    ) -> AppResult<ChatPage> {
        let page = page.max(1);
        let offset = (page - 1).saturating_mul(limit);

        let chats = self
            .chat_repo
            .find_for_user(user_id, status, limit, offset)
            .await?;
        let has_more = chats.len() as u64 == limit;

        let mut summaries = Vec::with_capacity(chats.len());
        for chat in chats {
            let counterpart = match chat.counterpart_of(user_id) {
                Some(id) => self.users.get_user(id).await?,
                None => None,
            };

            let listing = match chat.listing_id.as_deref() {
                Some(listing_id) => self.listings.get_listing(listing_id).await?,
                None => None,
            };

            let last_message = match self.message_repo.find_latest_in_chat(&chat.id).await? {
                Some(row) => self.messages.with_senders(vec![row]).await?.pop(),
                None => None,
            };

            let unread_count = self
                .message_repo
                .count_unread_in_chat(&chat.id, user_id)
                .await?;

            summaries.push(ChatSummary {
                chat: chat.into(),
                counterpart,
                listing,
                last_message,
                unread_count,
            });
        }

        Ok(ChatPage {
            chats: summaries,
            page,
            limit,
            has_more,
        })
    }

    /// Change a chat's status.
    ///
    /// Participants may change their own chats; admins may change any chat.
    /// Setting the current status again is a no-op and is not broadcast.
    pub async fn set_chat_status(
        &self,
        chat_id: &str,
        user_id: &str,
        status: ChatStatus,
    ) -> AppResult<chat::Model> {
        let _guard = self.locks.lock(&format!("status:{chat_id}")).await;

        let chat = self.chat_repo.get_by_id(chat_id).await?;

        if !chat.is_participant(user_id) {
            let is_admin = self
                .users
                .get_user(user_id)
                .await?
                .is_some_and(|user| user.is_admin());
            if !is_admin {
                return Err(AppError::Forbidden(
                    "Not a participant in this chat".to_string(),
                ));
            }
        }

        if chat.status == status {
            return Ok(chat);
        }

        let previous = chat.status;
        let updated = self.chat_repo.update_status(chat, status).await?;

        tracing::info!(
            chat_id = %updated.id,
            from = ?previous,
            to = ?status,
            changed_by = %user_id,
            "Chat status changed"
        );

        self.announce_status(&updated, user_id).await;

        Ok(updated)
    }

    /// Archive every active chat anchored to a removed listing.
    pub async fn archive_chats_for_listing(&self, listing_id: &str) -> AppResult<u64> {
        let chats = self
            .chat_repo
            .find_by_listing(listing_id, ChatStatus::Active)
            .await?;

        let mut archived = 0;
        for chat in chats {
            let _guard = self.locks.lock(&format!("status:{}", chat.id)).await;

            // Re-read under the lock; a concurrent change wins
            let current = self.chat_repo.get_by_id(&chat.id).await?;
            if current.status != ChatStatus::Active {
                continue;
            }

            let updated = self
                .chat_repo
                .update_status(current, ChatStatus::Archived)
                .await?;
            self.announce_status(&updated, "system").await;
            archived += 1;
        }

        tracing::info!(listing_id = %listing_id, archived, "Listing chats archived");

        Ok(archived)
    }

    /// Unread messages across every chat of the user.
    pub async fn unread_total(&self, user_id: &str) -> AppResult<u64> {
        let chat_ids = self.chat_repo.find_ids_for_user(user_id).await?;
        self.message_repo
            .count_unread_in_chats(&chat_ids, user_id)
            .await
    }

    async fn announce_status(&self, chat: &chat::Model, changed_by: &str) {
        if let Some(ref event_publisher) = self.event_publisher
            && let Err(e) = event_publisher
                .publish_chat_status_changed(chat, changed_by)
                .await
        {
            tracing::warn!(error = %e, "Failed to publish chat status change");
        }
    }
}
