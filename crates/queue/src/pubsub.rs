//! Redis notification sink.
//!
//! Each notification is published on `{prefix}notifications` and pushed onto
//! the `{prefix}notifications:queue` list, which is capped so an absent
//! worker cannot grow it without bound.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fred::clients::Client;
use fred::error::{Error as RedisError, ErrorKind as RedisErrorKind};
use fred::interfaces::{ClientLike, ListInterface, PubsubInterface};
use fred::types::config::Config as RedisConfig;
use haggle_common::{AppError, AppResult, IdGenerator};
use haggle_core::{NotificationSink, OfflineNotification};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Maximum number of queued notifications kept for workers.
pub const MAX_QUEUE_LEN: i64 = 10_000;

/// Channel and key names under a prefix.
pub mod channel_names {
    /// Pub/Sub channel for live consumers.
    #[must_use]
    pub fn notifications(prefix: &str) -> String {
        format!("{prefix}notifications")
    }

    /// List consumed by the notification workers.
    #[must_use]
    pub fn notification_queue(prefix: &str) -> String {
        format!("{prefix}notifications:queue")
    }
}

/// What goes over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEnvelope {
    /// Delivery id, distinct from the message id.
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// The notification itself, flattened into the envelope.
    #[serde(flatten)]
    pub notification: OfflineNotification,
}

/// Notification sink backed by Redis.
#[derive(Clone)]
pub struct RedisNotificationSink {
    client: Client,
    channel: String,
    queue: String,
    id_gen: IdGenerator,
}

impl RedisNotificationSink {
    /// Connect to Redis.
    pub async fn new(redis_url: &str, prefix: &str) -> Result<Self, RedisError> {
        let config = RedisConfig::from_url(redis_url)?;

        let client = Client::new(config, None, None, None);
        client.init().await?;

        info!(prefix, "Redis notification sink initialized");

        Ok(Self {
            client,
            channel: channel_names::notifications(prefix),
            queue: channel_names::notification_queue(prefix),
            id_gen: IdGenerator::new(),
        })
    }

    /// Wrap a notification for delivery.
    #[must_use]
    pub fn envelope(&self, notification: &OfflineNotification) -> NotificationEnvelope {
        NotificationEnvelope {
            id: self.id_gen.generate(),
            created_at: Utc::now(),
            notification: notification.clone(),
        }
    }

    /// Publish and enqueue one envelope.
    pub async fn deliver(&self, envelope: &NotificationEnvelope) -> Result<(), RedisError> {
        let payload = serde_json::to_string(envelope).map_err(|e| {
            RedisError::new(
                RedisErrorKind::InvalidArgument,
                format!("Serialization error: {e}"),
            )
        })?;

        let _: () = self.client.publish(&self.channel, payload.as_str()).await?;
        let _: () = self.client.lpush(&self.queue, payload).await?;
        let _: () = self.client.ltrim(&self.queue, 0, MAX_QUEUE_LEN - 1).await?;

        debug!(
            recipient = %envelope.notification.recipient_id,
            message_id = %envelope.notification.message_id,
            "Queued offline notification"
        );
        Ok(())
    }

    /// Close the connection.
    pub async fn shutdown(&self) -> Result<(), RedisError> {
        self.client.quit().await?;
        info!("Redis notification sink shutdown");
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for RedisNotificationSink {
    async fn notify(&self, notification: &OfflineNotification) -> AppResult<()> {
        let envelope = self.envelope(notification);
        self.deliver(&envelope)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use haggle_core::NotificationKind;

    #[test]
    fn test_channel_names() {
        assert_eq!(channel_names::notifications("haggle:"), "haggle:notifications");
        assert_eq!(
            channel_names::notification_queue("haggle:"),
            "haggle:notifications:queue"
        );
    }

    #[test]
    fn test_envelope_is_flat() {
        let envelope = NotificationEnvelope {
            id: "n1".to_string(),
            created_at: Utc::now(),
            notification: OfflineNotification {
                recipient_id: "vendor1".to_string(),
                kind: NotificationKind::NewOffer,
                chat_id: "chat1".to_string(),
                message_id: "msg1".to_string(),
                sender_id: "buyer1".to_string(),
                preview: None,
                offer_amount: Some(12_000),
            },
        };

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["id"], "n1");
        assert_eq!(json["recipientId"], "vendor1");
        assert_eq!(json["kind"], "newOffer");
        assert_eq!(json["offerAmount"], 12_000);

        let parsed: NotificationEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.notification, envelope.notification);
    }
}
