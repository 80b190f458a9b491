//! Offline notification sink.
//!
//! When a message lands for a participant with no live connection, the
//! fanout hands a notification to a sink (push, email, a Redis queue, ...).

use async_trait::async_trait;
use haggle_common::AppResult;
use haggle_db::entities::chat_message::MessageType;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::services::message::MessageView;

/// Longest message preview carried in a notification, in characters.
const PREVIEW_CHARS: usize = 120;

/// What happened, from the recipient's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    NewMessage,
    NewOffer,
    OfferAccepted,
    OfferRejected,
}

impl From<MessageType> for NotificationKind {
    fn from(message_type: MessageType) -> Self {
        match message_type {
            MessageType::Text | MessageType::Image => Self::NewMessage,
            MessageType::Offer | MessageType::CounterOffer => Self::NewOffer,
            MessageType::OfferAccepted => Self::OfferAccepted,
            MessageType::OfferRejected => Self::OfferRejected,
        }
    }
}

/// Notification for a participant who is not connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineNotification {
    pub recipient_id: String,
    pub kind: NotificationKind,
    pub chat_id: String,
    pub message_id: String,
    pub sender_id: String,
    pub preview: Option<String>,
    pub offer_amount: Option<i64>,
}

impl OfflineNotification {
    /// Build the notification for `recipient_id` about `message`.
    #[must_use]
    pub fn for_message(recipient_id: &str, message: &MessageView) -> Self {
        let preview = match message.message_type {
            MessageType::Text => message
                .content
                .as_deref()
                .map(|text| text.chars().take(PREVIEW_CHARS).collect()),
            _ => message.notes.clone(),
        };

        Self {
            recipient_id: recipient_id.to_string(),
            kind: message.message_type.into(),
            chat_id: message.chat_id.clone(),
            message_id: message.id.clone(),
            sender_id: message.sender_id.clone(),
            preview,
            offer_amount: message.offer_amount,
        }
    }
}

/// Destination for offline notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification.
    async fn notify(&self, notification: &OfflineNotification) -> AppResult<()>;
}

/// Type alias for a shared notification sink.
pub type NotificationSinkService = Arc<dyn NotificationSink>;

/// Sink that drops every notification.
#[derive(Clone, Default)]
pub struct NoOpNotificationSink;

#[async_trait]
impl NotificationSink for NoOpNotificationSink {
    async fn notify(&self, _notification: &OfflineNotification) -> AppResult<()> {
        Ok(())
    }
}

/// Sink that only records notifications in the log.
#[derive(Clone, Default)]
pub struct LoggingNotificationSink;

#[async_trait]
impl NotificationSink for LoggingNotificationSink {
    async fn notify(&self, notification: &OfflineNotification) -> AppResult<()> {
        tracing::info!(
            recipient_id = %notification.recipient_id,
            chat_id = %notification.chat_id,
            message_id = %notification.message_id,
            kind = ?notification.kind,
            "Offline notification"
        );
        Ok(())
    }
}
