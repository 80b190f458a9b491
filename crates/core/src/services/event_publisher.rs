//! Event publisher service.
//!
//! Decouples the chat services from realtime delivery. The fanout service
//! is the live implementation; tests and headless tools use the no-op one.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use haggle_common::AppResult;
use haggle_db::entities::{
    chat::{self, ChatStatus},
    chat_message,
};
use serde::Serialize;
use std::sync::Arc;

use crate::services::message::MessageView;

/// Realtime events pushed to chat participants.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "type",
    content = "body",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ChatEvent {
    /// A message was appended to a chat.
    MessageCreated {
        chat_id: String,
        recipient_id: String,
        message: MessageView,
    },
    /// A reader acknowledged messages.
    MessagesRead {
        chat_id: String,
        reader_id: String,
        message_ids: Vec<String>,
    },
    /// A text message was edited.
    MessageEdited {
        chat_id: String,
        message: MessageView,
    },
    /// A message was soft-deleted.
    MessageDeleted {
        chat_id: String,
        message_id: String,
        deleted_at: DateTime<FixedOffset>,
    },
    /// A chat moved between ACTIVE, ARCHIVED and BLOCKED.
    ChatStatusChanged {
        chat_id: String,
        status: ChatStatus,
        changed_by: String,
    },
    /// A participant started or stopped typing.
    Typing {
        chat_id: String,
        user_id: String,
        is_typing: bool,
    },
    /// A participant joined a chat or went offline.
    Presence {
        chat_id: String,
        user_id: String,
        online: bool,
    },
}

impl ChatEvent {
    /// The chat this event belongs to.
    #[must_use]
    pub fn chat_id(&self) -> &str {
        match self {
            Self::MessageCreated { chat_id, .. }
            | Self::MessagesRead { chat_id, .. }
            | Self::MessageEdited { chat_id, .. }
            | Self::MessageDeleted { chat_id, .. }
            | Self::ChatStatusChanged { chat_id, .. }
            | Self::Typing { chat_id, .. }
            | Self::Presence { chat_id, .. } => chat_id,
        }
    }

    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MessageCreated { .. } => "messageCreated",
            Self::MessagesRead { .. } => "messagesRead",
            Self::MessageEdited { .. } => "messageEdited",
            Self::MessageDeleted { .. } => "messageDeleted",
            Self::ChatStatusChanged { .. } => "chatStatusChanged",
            Self::Typing { .. } => "typing",
            Self::Presence { .. } => "presence",
        }
    }
}

/// Trait for publishing chat events.
///
/// Implementations must not block the caller on delivery: the message is
/// already persisted when these are called.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// A message was appended; the counterpart gets an offline notification
    /// if they have no live connection.
    async fn publish_message_created(
        &self,
        chat: &chat::Model,
        message: &MessageView,
    ) -> AppResult<()>;

    /// Messages were marked read by `reader_id`.
    async fn publish_messages_read(
        &self,
        chat: &chat::Model,
        reader_id: &str,
        message_ids: &[String],
    ) -> AppResult<()>;

    /// A message's content was edited.
    async fn publish_message_edited(
        &self,
        chat: &chat::Model,
        message: &MessageView,
    ) -> AppResult<()>;

    /// A message was soft-deleted.
    async fn publish_message_deleted(
        &self,
        chat: &chat::Model,
        message: &chat_message::Model,
    ) -> AppResult<()>;

    /// The chat's status changed.
    async fn publish_chat_status_changed(
        &self,
        chat: &chat::Model,
        changed_by: &str,
    ) -> AppResult<()>;
}

/// A no-op implementation of EventPublisher for tests or when realtime
/// delivery is disabled.
#[derive(Clone, Default)]
pub struct NoOpEventPublisher;

#[async_trait]
impl EventPublisher for NoOpEventPublisher {
    async fn publish_message_created(
        &self,
        _chat: &chat::Model,
        _message: &MessageView,
    ) -> AppResult<()> {
        Ok(())
    }

    async fn publish_messages_read(
        &self,
        _chat: &chat::Model,
        _reader_id: &str,
        _message_ids: &[String],
    ) -> AppResult<()> {
        Ok(())
    }

    async fn publish_message_edited(
        &self,
        _chat: &chat::Model,
        _message: &MessageView,
    ) -> AppResult<()> {
        Ok(())
    }

    async fn publish_message_deleted(
        &self,
        _chat: &chat::Model,
        _message: &chat_message::Model,
    ) -> AppResult<()> {
        Ok(())
    }

    async fn publish_chat_status_changed(
        &self,
        _chat: &chat::Model,
        _changed_by: &str,
    ) -> AppResult<()> {
        Ok(())
    }
}

/// Type alias for a shared event publisher.
pub type EventPublisherService = Arc<dyn EventPublisher>;
