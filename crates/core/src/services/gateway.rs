//! Session gateway for realtime connections.
//!
//! Binds the presence registry to the conversation store and dispatcher so
//! push-transport handlers get the same access rules as the HTTP API.

use haggle_common::{AppError, AppResult};

use crate::services::chat::{ChatDetails, ChatService};
use crate::services::directory::{UserDirectoryService, UserSummary};
use crate::services::event_publisher::ChatEvent;
use crate::services::fanout::FanoutService;
use crate::services::message::{MessageService, MessageView, SendMessageInput};
use crate::services::presence::{ConnectionId, EventSender, PresenceRegistry};

/// Session gateway.
#[derive(Clone)]
pub struct SessionGateway {
    chats: ChatService,
    messages: MessageService,
    users: UserDirectoryService,
    fanout: FanoutService,
}

impl SessionGateway {
    /// Create a new session gateway.
    #[must_use]
    pub const fn new(
        chats: ChatService,
        messages: MessageService,
        users: UserDirectoryService,
        fanout: FanoutService,
    ) -> Self {
        Self {
            chats,
            messages,
            users,
            fanout,
        }
    }

    /// The registry behind this gateway.
    #[must_use]
    pub const fn presence(&self) -> &PresenceRegistry {
        self.fanout.presence()
    }

    /// Register a new connection with its outbound queue.
    pub async fn open(&self, sender: EventSender) -> ConnectionId {
        self.presence().connect(sender).await
    }

    /// Authenticate a connection.
    ///
    /// A missing or unknown token leaves the connection anonymous.
    pub async fn authenticate(
        &self,
        connection_id: &str,
        token: Option<&str>,
    ) -> AppResult<Option<UserSummary>> {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Ok(None);
        };

        let Some(user) = self.users.authenticate(token).await? else {
            tracing::warn!(connection_id = %connection_id, "Invalid streaming token, continuing anonymously");
            return Ok(None);
        };

        self.presence().bind_user(connection_id, &user.id).await?;
        tracing::info!(connection_id = %connection_id, user_id = %user.id, "Streaming session authenticated");

        Ok(Some(user))
    }

    /// Subscribe a connection to a chat after checking access. Idempotent.
    pub async fn join(&self, connection_id: &str, chat_id: &str) -> AppResult<ChatDetails> {
        let user_id = self.require_user(connection_id).await?;
        let details = self.chats.get_chat(chat_id, &user_id).await?;

        let subscription = self.presence().subscribe(connection_id, chat_id).await?;
        if subscription.first_for_user {
            let event = ChatEvent::Presence {
                chat_id: chat_id.to_string(),
                user_id: user_id.clone(),
                online: true,
            };
            self.fanout
                .broadcast_to_subscribers(chat_id, &event, Some(&user_id))
                .await;
        }

        tracing::debug!(connection_id = %connection_id, chat_id = %chat_id, "Joined chat");
        Ok(details)
    }

    /// Drop a connection's subscription to a chat.
    pub async fn leave(&self, connection_id: &str, chat_id: &str) -> bool {
        let left = self.presence().unsubscribe(connection_id, chat_id).await;

        if left && let Some(user_id) = self.presence().user_of(connection_id).await {
            self.fanout
                .clear_typing(&[chat_id.to_string()], &user_id)
                .await;
        }

        left
    }

    /// Tear down a connection.
    ///
    /// When it was the user's last one, the chats it was subscribed to learn
    /// that the user went offline.
    pub async fn disconnect(&self, connection_id: &str) {
        let Some(departure) = self.presence().disconnect(connection_id).await else {
            return;
        };
        let Some(user_id) = departure.user_id else {
            return;
        };

        self.fanout.clear_typing(&departure.chats, &user_id).await;

        if departure.went_offline {
            for chat_id in &departure.chats {
                let event = ChatEvent::Presence {
                    chat_id: chat_id.clone(),
                    user_id: user_id.clone(),
                    online: false,
                };
                self.fanout
                    .broadcast_to_subscribers(chat_id, &event, None)
                    .await;
            }

            tracing::info!(user_id = %user_id, "User went offline");
        }
    }

    /// Start or stop a typing indicator in a joined chat.
    pub async fn typing(&self, connection_id: &str, chat_id: &str, is_typing: bool) -> AppResult<()> {
        let user_id = self.require_user(connection_id).await?;

        if !self.presence().is_subscribed(connection_id, chat_id).await {
            return Err(AppError::Forbidden("Join the chat first".to_string()));
        }

        self.fanout
            .broadcast_typing(chat_id, &user_id, is_typing)
            .await;
        Ok(())
    }

    /// Send a message on behalf of the connection's user.
    pub async fn send_message(
        &self,
        connection_id: &str,
        chat_id: &str,
        input: SendMessageInput,
    ) -> AppResult<MessageView> {
        let user_id = self.require_user(connection_id).await?;
        let message = self.messages.send(chat_id, &user_id, input).await?;

        self.fanout
            .clear_typing(&[chat_id.to_string()], &user_id)
            .await;

        Ok(message)
    }

    /// Acknowledge messages on behalf of the connection's user.
    pub async fn mark_read(
        &self,
        connection_id: &str,
        chat_id: &str,
        message_ids: Option<&[String]>,
    ) -> AppResult<u64> {
        let user_id = self.require_user(connection_id).await?;
        self.messages.mark_read(chat_id, &user_id, message_ids).await
    }

    /// Record inbound activity.
    pub async fn touch(&self, connection_id: &str) {
        self.presence().touch(connection_id).await;
    }

    async fn require_user(&self, connection_id: &str) -> AppResult<String> {
        self.presence()
            .user_of(connection_id)
            .await
            .ok_or(AppError::Unauthorized)
    }
}
