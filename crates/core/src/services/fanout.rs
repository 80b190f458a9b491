//! Realtime fanout.
//!
//! Pushes chat events to the live connections of chat participants and
//! hands messages for offline recipients to the notification sink. Delivery
//! is best effort: the message row is the durable record.

use std::time::Duration;

use async_trait::async_trait;
use haggle_common::{AppResult, config::ChatConfig};
use haggle_db::entities::{chat, chat_message};
use tokio::sync::mpsc::error::TrySendError;

use crate::services::event_publisher::{ChatEvent, EventPublisher};
use crate::services::message::MessageView;
use crate::services::notification::{NotificationSinkService, OfflineNotification};
use crate::services::presence::{ConnectionId, EventSender, PresenceRegistry};
use crate::services::typing::TypingTracker;

/// Fanout service.
#[derive(Clone)]
pub struct FanoutService {
    presence: PresenceRegistry,
    typing: TypingTracker,
    notifier: NotificationSinkService,
    notify_timeout: Duration,
}

impl FanoutService {
    /// Create a new fanout service.
    #[must_use]
    pub fn new(
        presence: PresenceRegistry,
        notifier: NotificationSinkService,
        config: &ChatConfig,
    ) -> Self {
        Self {
            presence,
            typing: TypingTracker::new(config.typing_timeout()),
            notifier,
            notify_timeout: config.notify_timeout(),
        }
    }

    /// The registry this fanout delivers through.
    #[must_use]
    pub const fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// The typing state this fanout maintains.
    #[must_use]
    pub const fn typing(&self) -> &TypingTracker {
        &self.typing
    }

    /// Push an event to every live connection of either participant.
    ///
    /// Returns the number of connections that accepted it.
    pub async fn broadcast_to_chat(&self, chat: &chat::Model, event: &ChatEvent) -> usize {
        let targets = self.presence.senders_for_users(&chat.participants()).await;
        deliver(&targets, event)
    }

    /// Push an event to the connections currently subscribed to a chat,
    /// skipping `except_user`'s own connections.
    pub async fn broadcast_to_subscribers(
        &self,
        chat_id: &str,
        event: &ChatEvent,
        except_user: Option<&str>,
    ) -> usize {
        let targets = self.presence.subscribers_of(chat_id, except_user).await;
        deliver(&targets, event)
    }

    /// Hand a notification to the sink if its recipient has no live
    /// connection.
    ///
    /// Runs in the background under its own timeout; failures are logged.
    pub fn notify_offline(&self, notification: OfflineNotification) {
        let fanout = self.clone();

        tokio::spawn(async move {
            if fanout.presence.is_online(&notification.recipient_id).await {
                return;
            }

            match tokio::time::timeout(
                fanout.notify_timeout,
                fanout.notifier.notify(&notification),
            )
            .await
            {
                Ok(Ok(())) => {
                    tracing::debug!(
                        recipient_id = %notification.recipient_id,
                        message_id = %notification.message_id,
                        "Offline notification handed off"
                    );
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        error = %e,
                        recipient_id = %notification.recipient_id,
                        "Offline notification failed"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        recipient_id = %notification.recipient_id,
                        timeout_ms = fanout.notify_timeout.as_millis() as u64,
                        "Offline notification timed out"
                    );
                }
            }
        });
    }

    /// Update a typing indicator and tell the other subscribers.
    ///
    /// A start clears itself after the typing timeout unless refreshed.
    pub async fn broadcast_typing(&self, chat_id: &str, user_id: &str, is_typing: bool) {
        if is_typing {
            let ticket = self.typing.start(chat_id, user_id).await;
            if ticket.started {
                self.send_typing(chat_id, user_id, true).await;
            }

            let fanout = self.clone();
            let chat_id = chat_id.to_string();
            let user_id = user_id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(fanout.typing.timeout()).await;
                if fanout
                    .typing
                    .expire(&chat_id, &user_id, ticket.generation)
                    .await
                {
                    tracing::debug!(chat_id = %chat_id, user_id = %user_id, "Typing expired");
                    fanout.send_typing(&chat_id, &user_id, false).await;
                }
            });
        } else if self.typing.stop(chat_id, user_id).await {
            self.send_typing(chat_id, user_id, false).await;
        }
    }

    /// Clear a user's typing indicators in the given chats.
    pub async fn clear_typing(&self, chat_ids: &[String], user_id: &str) {
        for chat_id in chat_ids {
            if self.typing.stop(chat_id, user_id).await {
                self.send_typing(chat_id, user_id, false).await;
            }
        }
    }

    async fn send_typing(&self, chat_id: &str, user_id: &str, is_typing: bool) {
        let event = ChatEvent::Typing {
            chat_id: chat_id.to_string(),
            user_id: user_id.to_string(),
            is_typing,
        };
        self.broadcast_to_subscribers(chat_id, &event, Some(user_id))
            .await;
    }
}

/// Offer the event to every target without waiting on any of them.
fn deliver(targets: &[(ConnectionId, EventSender)], event: &ChatEvent) -> usize {
    let mut delivered = 0;

    for (connection_id, sender) in targets {
        match sender.try_send(event.clone()) {
            Ok(()) => delivered += 1,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    event = event.name(),
                    "Outbound queue full, dropping event"
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(connection_id = %connection_id, "Connection already closed");
            }
        }
    }

    tracing::debug!(
        chat_id = %event.chat_id(),
        event = event.name(),
        delivered,
        targets = targets.len(),
        "Event fanned out"
    );

    delivered
}

#[async_trait]
impl EventPublisher for FanoutService {
    async fn publish_message_created(
        &self,
        chat: &chat::Model,
        message: &MessageView,
    ) -> AppResult<()> {
        let recipient_id = chat
            .counterpart_of(&message.sender_id)
            .unwrap_or_default()
            .to_string();

        let event = ChatEvent::MessageCreated {
            chat_id: chat.id.clone(),
            recipient_id: recipient_id.clone(),
            message: message.clone(),
        };
        self.broadcast_to_chat(chat, &event).await;

        if !recipient_id.is_empty() {
            self.notify_offline(OfflineNotification::for_message(&recipient_id, message));
        }

        Ok(())
    }

    async fn publish_messages_read(
        &self,
        chat: &chat::Model,
        reader_id: &str,
        message_ids: &[String],
    ) -> AppResult<()> {
        let event = ChatEvent::MessagesRead {
            chat_id: chat.id.clone(),
            reader_id: reader_id.to_string(),
            message_ids: message_ids.to_vec(),
        };
        self.broadcast_to_chat(chat, &event).await;
        Ok(())
    }

    async fn publish_message_edited(
        &self,
        chat: &chat::Model,
        message: &MessageView,
    ) -> AppResult<()> {
        let event = ChatEvent::MessageEdited {
            chat_id: chat.id.clone(),
            message: message.clone(),
        };
        self.broadcast_to_chat(chat, &event).await;
        Ok(())
    }

    async fn publish_message_deleted(
        &self,
        chat: &chat::Model,
        message: &chat_message::Model,
    ) -> AppResult<()> {
        let Some(deleted_at) = message.deleted_at else {
            return Ok(());
        };

        let event = ChatEvent::MessageDeleted {
            chat_id: chat.id.clone(),
            message_id: message.id.clone(),
            deleted_at,
        };
        self.broadcast_to_chat(chat, &event).await;
        Ok(())
    }

    async fn publish_chat_status_changed(
        &self,
        chat: &chat::Model,
        changed_by: &str,
    ) -> AppResult<()> {
        let event = ChatEvent::ChatStatusChanged {
            chat_id: chat.id.clone(),
            status: chat.status,
            changed_by: changed_by.to_string(),
        };
        self.broadcast_to_chat(chat, &event).await;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::notification::{NoOpNotificationSink, NotificationSink};
    use chrono::Utc;
    use haggle_db::entities::{chat::ChatStatus, chat_message::MessageType};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// Sink that forwards notifications to a channel.
    struct ChannelSink(mpsc::UnboundedSender<OfflineNotification>);

    #[async_trait]
    impl NotificationSink for ChannelSink {
        async fn notify(&self, notification: &OfflineNotification) -> AppResult<()> {
            let _ = self.0.send(notification.clone());
            Ok(())
        }
    }

    /// Sink that never finishes.
    struct HangingSink;

    #[async_trait]
    impl NotificationSink for HangingSink {
        async fn notify(&self, _notification: &OfflineNotification) -> AppResult<()> {
            std::future::pending::<AppResult<()>>().await
        }
    }

    fn config() -> ChatConfig {
        ChatConfig {
            typing_timeout_secs: 1,
            notify_timeout_secs: 1,
            ..ChatConfig::default()
        }
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

    fn message() -> MessageView {
        MessageView {
            id: "m1".to_string(),
            chat_id: "chat1".to_string(),
            sender_id: "buyer1".to_string(),
            message_type: MessageType::Text,
            content: Some("is this still available?".to_string()),
            offer_amount: None,
            offer_id: None,
            offer_expires_at: None,
            notes: None,
            reply_to_id: None,
            is_read: false,
            created_at: Utc::now().into(),
            edited_at: None,
            deleted_at: None,
            sender: None,
        }
    }

    async fn online(
        presence: &PresenceRegistry,
        user_id: &str,
    ) -> (ConnectionId, mpsc::Receiver<ChatEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let connection = presence.connect(tx).await;
        presence.bind_user(&connection, user_id).await.unwrap();
        (connection, rx)
    }

    #[tokio::test]
    async fn test_message_reaches_every_device_of_both_participants() {
        let presence = PresenceRegistry::new();
        let fanout = FanoutService::new(presence.clone(), Arc::new(NoOpNotificationSink), &config());

        let (_, mut buyer_rx) = online(&presence, "buyer1").await;
        let (_, mut vendor_phone) = online(&presence, "vendor1").await;
        let (_, mut vendor_laptop) = online(&presence, "vendor1").await;

        fanout
            .publish_message_created(&chat(), &message())
            .await
            .unwrap();

        for rx in [&mut buyer_rx, &mut vendor_phone, &mut vendor_laptop] {
            match rx.try_recv().unwrap() {
                ChatEvent::MessageCreated { recipient_id, .. } => {
                    assert_eq!(recipient_id, "vendor1");
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_offline_recipient_is_notified() {
        let presence = PresenceRegistry::new();
        let (tx, mut notifications) = mpsc::unbounded_channel();
        let fanout = FanoutService::new(presence, Arc::new(ChannelSink(tx)), &config());

        fanout
            .publish_message_created(&chat(), &message())
            .await
            .unwrap();

        let notification = tokio::time::timeout(Duration::from_secs(2), notifications.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notification.recipient_id, "vendor1");
        assert_eq!(notification.message_id, "m1");
    }

    #[tokio::test]
    async fn test_online_recipient_is_not_notified() {
        let presence = PresenceRegistry::new();
        let (tx, mut notifications) = mpsc::unbounded_channel();
        let fanout = FanoutService::new(presence.clone(), Arc::new(ChannelSink(tx)), &config());
        let (_, _vendor_rx) = online(&presence, "vendor1").await;

        fanout
            .publish_message_created(&chat(), &message())
            .await
            .unwrap();

        let received =
            tokio::time::timeout(Duration::from_millis(200), notifications.recv()).await;
        assert!(received.is_err());
    }

    #[tokio::test]
    async fn test_hanging_sink_does_not_block_publish() {
        let presence = PresenceRegistry::new();
        let fanout = FanoutService::new(presence, Arc::new(HangingSink), &config());

        let published = tokio::time::timeout(
            Duration::from_millis(200),
            fanout.publish_message_created(&chat(), &message()),
        )
        .await;

        assert!(matches!(published, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let presence = PresenceRegistry::new();
        let fanout = FanoutService::new(presence.clone(), Arc::new(NoOpNotificationSink), &config());

        let (tx, _rx) = mpsc::channel(1);
        let connection = presence.connect(tx).await;
        presence.bind_user(&connection, "vendor1").await.unwrap();

        let event = ChatEvent::MessagesRead {
            chat_id: "chat1".to_string(),
            reader_id: "buyer1".to_string(),
            message_ids: vec![],
        };
        assert_eq!(fanout.broadcast_to_chat(&chat(), &event).await, 1);
        assert_eq!(fanout.broadcast_to_chat(&chat(), &event).await, 0);
    }

    #[tokio::test]
    async fn test_typing_expires_after_timeout() {
        let presence = PresenceRegistry::new();
        let fanout = FanoutService::new(presence.clone(), Arc::new(NoOpNotificationSink), &config());

        let (buyer, _buyer_rx) = online(&presence, "buyer1").await;
        let (vendor, mut vendor_rx) = online(&presence, "vendor1").await;
        presence.subscribe(&buyer, "chat1").await.unwrap();
        presence.subscribe(&vendor, "chat1").await.unwrap();

        fanout.broadcast_typing("chat1", "buyer1", true).await;
        assert!(matches!(
            vendor_rx.recv().await,
            Some(ChatEvent::Typing { is_typing: true, .. })
        ));

        let stopped = tokio::time::timeout(Duration::from_secs(3), vendor_rx.recv())
            .await
            .unwrap();
        assert!(matches!(
            stopped,
            Some(ChatEvent::Typing { is_typing: false, .. })
        ));
        assert!(fanout.typing().typing_users("chat1").await.is_empty());
    }

    #[tokio::test]
    async fn test_typing_is_not_echoed_to_typist() {
        let presence = PresenceRegistry::new();
        let fanout = FanoutService::new(presence.clone(), Arc::new(NoOpNotificationSink), &config());

        let (buyer, mut buyer_rx) = online(&presence, "buyer1").await;
        presence.subscribe(&buyer, "chat1").await.unwrap();

        fanout.broadcast_typing("chat1", "buyer1", true).await;
        fanout.broadcast_typing("chat1", "buyer1", false).await;

        assert!(buyer_rx.try_recv().is_err());
    }
}
