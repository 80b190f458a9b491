//! Presence registry.
//!
//! Tracks live realtime connections: which user each one belongs to and
//! which chats it is subscribed to. A connection moves through
//! `connecting -> authenticated -> subscribed(chat)* -> disconnected`.
//!
//! All three indexes live behind a single lock so they never disagree.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use haggle_common::{AppError, AppResult, IdGenerator};
use tokio::sync::{RwLock, mpsc};

use crate::services::event_publisher::ChatEvent;

/// Opaque handle of a live connection.
pub type ConnectionId = String;

/// Outbound queue of a connection.
pub type EventSender = mpsc::Sender<ChatEvent>;

#[derive(Debug)]
struct Connection {
    user_id: Option<String>,
    sender: EventSender,
    chats: HashSet<String>,
    last_activity: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PresenceState {
    connections: HashMap<ConnectionId, Connection>,
    /// user id -> live connection ids
    users: HashMap<String, HashSet<ConnectionId>>,
    /// chat id -> subscribed connection ids
    chats: HashMap<String, HashSet<ConnectionId>>,
}

impl PresenceState {
    fn unsubscribe(&mut self, connection_id: &str, chat_id: &str) {
        if let Some(subscribers) = self.chats.get_mut(chat_id) {
            subscribers.remove(connection_id);
            if subscribers.is_empty() {
                self.chats.remove(chat_id);
            }
        }
    }
}

/// Result of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    /// The connection was not subscribed before.
    pub newly_subscribed: bool,
    /// No other connection of the same user was subscribed to the chat.
    pub first_for_user: bool,
}

/// What a disconnect left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub user_id: Option<String>,
    /// Chats the connection was subscribed to.
    pub chats: Vec<String>,
    /// The user has no live connection left.
    pub went_offline: bool,
}

/// Presence registry.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    state: Arc<RwLock<PresenceState>>,
    id_gen: IdGenerator,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new, anonymous connection.
    pub async fn connect(&self, sender: EventSender) -> ConnectionId {
        let connection_id = self.id_gen.generate_connection_id();

        let mut state = self.state.write().await;
        state.connections.insert(
            connection_id.clone(),
            Connection {
                user_id: None,
                sender,
                chats: HashSet::new(),
                last_activity: Utc::now(),
            },
        );

        tracing::debug!(connection_id = %connection_id, "Connection registered");
        connection_id
    }

    /// Bind a connection to an authenticated user.
    ///
    /// Returns whether this is the user's first live connection.
    pub async fn bind_user(&self, connection_id: &str, user_id: &str) -> AppResult<bool> {
        let mut state = self.state.write().await;

        let connection = state
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| AppError::NotFound(format!("Connection not found: {connection_id}")))?;

        if let Some(bound) = connection.user_id.as_deref() {
            if bound == user_id {
                return Ok(false);
            }
            return Err(AppError::BadRequest(
                "Connection is already authenticated as another user".to_string(),
            ));
        }
        connection.user_id = Some(user_id.to_string());

        let connections = state.users.entry(user_id.to_string()).or_default();
        connections.insert(connection_id.to_string());
        let first = connections.len() == 1;

        tracing::debug!(connection_id = %connection_id, user_id = %user_id, "Connection authenticated");
        Ok(first)
    }

    /// User bound to a connection, if authenticated.
    pub async fn user_of(&self, connection_id: &str) -> Option<String> {
        let state = self.state.read().await;
        state
            .connections
            .get(connection_id)
            .and_then(|connection| connection.user_id.clone())
    }

    /// Subscribe an authenticated connection to a chat. Idempotent.
    ///
    /// Access to the chat must already have been checked.
    pub async fn subscribe(&self, connection_id: &str, chat_id: &str) -> AppResult<Subscription> {
        let mut state = self.state.write().await;

        let connection = state
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| AppError::NotFound(format!("Connection not found: {connection_id}")))?;
        let user_id = connection.user_id.clone().ok_or(AppError::Unauthorized)?;
        let newly_subscribed = connection.chats.insert(chat_id.to_string());

        let state = &mut *state;
        let siblings_subscribed = state.users.get(&user_id).is_some_and(|ids| {
            ids.iter().any(|id| {
                id != connection_id
                    && state
                        .connections
                        .get(id)
                        .is_some_and(|c| c.chats.contains(chat_id))
            })
        });

        state
            .chats
            .entry(chat_id.to_string())
            .or_default()
            .insert(connection_id.to_string());

        Ok(Subscription {
            newly_subscribed,
            first_for_user: newly_subscribed && !siblings_subscribed,
        })
    }

    /// Drop a connection's subscription to a chat.
    ///
    /// Returns whether the connection was subscribed.
    pub async fn unsubscribe(&self, connection_id: &str, chat_id: &str) -> bool {
        let mut state = self.state.write().await;

        let removed = state
            .connections
            .get_mut(connection_id)
            .is_some_and(|connection| connection.chats.remove(chat_id));

        if removed {
            state.unsubscribe(connection_id, chat_id);
        }

        removed
    }

    /// Whether the connection is subscribed to the chat.
    pub async fn is_subscribed(&self, connection_id: &str, chat_id: &str) -> bool {
        let state = self.state.read().await;
        state
            .connections
            .get(connection_id)
            .is_some_and(|connection| connection.chats.contains(chat_id))
    }

    /// Remove a connection and all of its subscriptions.
    pub async fn disconnect(&self, connection_id: &str) -> Option<Departure> {
        let mut state = self.state.write().await;

        let connection = state.connections.remove(connection_id)?;

        for chat_id in &connection.chats {
            state.unsubscribe(connection_id, chat_id);
        }

        let went_offline = match connection.user_id.as_deref() {
            Some(user_id) => match state.users.get_mut(user_id) {
                Some(connections) => {
                    connections.remove(connection_id);
                    if connections.is_empty() {
                        state.users.remove(user_id);
                        true
                    } else {
                        false
                    }
                }
                None => true,
            },
            None => false,
        };

        tracing::debug!(
            connection_id = %connection_id,
            user_id = ?connection.user_id,
            went_offline,
            "Connection removed"
        );

        Some(Departure {
            user_id: connection.user_id,
            chats: connection.chats.into_iter().collect(),
            went_offline,
        })
    }

    /// Record inbound activity on a connection.
    pub async fn touch(&self, connection_id: &str) {
        let mut state = self.state.write().await;
        if let Some(connection) = state.connections.get_mut(connection_id) {
            connection.last_activity = Utc::now();
        }
    }

    /// Whether the user holds at least one live connection.
    pub async fn is_online(&self, user_id: &str) -> bool {
        let state = self.state.read().await;
        state.users.get(user_id).is_some_and(|ids| !ids.is_empty())
    }

    /// Latest inbound activity across the user's connections.
    pub async fn last_activity(&self, user_id: &str) -> Option<DateTime<Utc>> {
        let state = self.state.read().await;
        state
            .users
            .get(user_id)?
            .iter()
            .filter_map(|id| state.connections.get(id))
            .map(|connection| connection.last_activity)
            .max()
    }

    /// Outbound queues of every live connection of the given users.
    pub async fn senders_for_users(&self, user_ids: &[&str]) -> Vec<(ConnectionId, EventSender)> {
        let state = self.state.read().await;
        user_ids
            .iter()
            .filter_map(|user_id| state.users.get(*user_id))
            .flatten()
            .filter_map(|id| {
                state
                    .connections
                    .get(id)
                    .map(|connection| (id.clone(), connection.sender.clone()))
            })
            .collect()
    }

    /// Outbound queues of the connections subscribed to a chat, optionally
    /// skipping one user's connections.
    pub async fn subscribers_of(
        &self,
        chat_id: &str,
        except_user: Option<&str>,
    ) -> Vec<(ConnectionId, EventSender)> {
        let state = self.state.read().await;
        let Some(subscribers) = state.chats.get(chat_id) else {
            return vec![];
        };

        subscribers
            .iter()
            .filter_map(|id| state.connections.get(id).map(|c| (id, c)))
            .filter(|(_, connection)| {
                except_user.is_none() || connection.user_id.as_deref() != except_user
            })
            .map(|(id, connection)| (id.clone(), connection.sender.clone()))
            .collect()
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// Number of users with at least one live connection.
    pub async fn online_user_count(&self) -> usize {
        self.state.read().await.users.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn channel() -> EventSender {
        mpsc::channel(8).0
    }

    #[tokio::test]
    async fn test_multi_device_collapses_to_one_user() {
        let registry = PresenceRegistry::new();
        let phone = registry.connect(channel()).await;
        let laptop = registry.connect(channel()).await;

        assert!(registry.bind_user(&phone, "buyer1").await.unwrap());
        assert!(!registry.bind_user(&laptop, "buyer1").await.unwrap());

        assert!(registry.is_online("buyer1").await);
        assert_eq!(registry.online_user_count().await, 1);
        assert_eq!(registry.connection_count().await, 2);
        assert_eq!(registry.senders_for_users(&["buyer1"]).await.len(), 2);
    }

    #[tokio::test]
    async fn test_offline_only_after_last_connection() {
        let registry = PresenceRegistry::new();
        let phone = registry.connect(channel()).await;
        let laptop = registry.connect(channel()).await;
        registry.bind_user(&phone, "buyer1").await.unwrap();
        registry.bind_user(&laptop, "buyer1").await.unwrap();
        registry.subscribe(&phone, "chat1").await.unwrap();

        let first = registry.disconnect(&phone).await.unwrap();
        assert!(!first.went_offline);
        assert_eq!(first.chats, vec!["chat1".to_string()]);
        assert!(registry.is_online("buyer1").await);

        let last = registry.disconnect(&laptop).await.unwrap();
        assert!(last.went_offline);
        assert!(!registry.is_online("buyer1").await);
        assert!(registry.subscribers_of("chat1", None).await.is_empty());
    }

    #[tokio::test]
    async fn test_anonymous_cannot_subscribe() {
        let registry = PresenceRegistry::new();
        let connection = registry.connect(channel()).await;

        let result = registry.subscribe(&connection, "chat1").await;
        assert!(matches!(result, Err(AppError::Unauthorized)));

        let departure = registry.disconnect(&connection).await.unwrap();
        assert!(departure.user_id.is_none());
        assert!(!departure.went_offline);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let registry = PresenceRegistry::new();
        let phone = registry.connect(channel()).await;
        let laptop = registry.connect(channel()).await;
        registry.bind_user(&phone, "vendor1").await.unwrap();
        registry.bind_user(&laptop, "vendor1").await.unwrap();

        let first = registry.subscribe(&phone, "chat1").await.unwrap();
        assert!(first.newly_subscribed && first.first_for_user);

        let again = registry.subscribe(&phone, "chat1").await.unwrap();
        assert!(!again.newly_subscribed);

        let sibling = registry.subscribe(&laptop, "chat1").await.unwrap();
        assert!(sibling.newly_subscribed && !sibling.first_for_user);

        assert_eq!(registry.subscribers_of("chat1", None).await.len(), 2);
        assert!(registry.subscribers_of("chat1", Some("vendor1")).await.is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let registry = PresenceRegistry::new();
        let connection = registry.connect(channel()).await;
        registry.bind_user(&connection, "buyer1").await.unwrap();
        registry.subscribe(&connection, "chat1").await.unwrap();

        assert!(registry.unsubscribe(&connection, "chat1").await);
        assert!(!registry.unsubscribe(&connection, "chat1").await);
        assert!(!registry.is_subscribed(&connection, "chat1").await);
    }

    #[tokio::test]
    async fn test_rebinding_to_another_user_is_rejected() {
        let registry = PresenceRegistry::new();
        let connection = registry.connect(channel()).await;
        registry.bind_user(&connection, "buyer1").await.unwrap();

        let result = registry.bind_user(&connection, "vendor1").await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_touch_updates_last_activity() {
        let registry = PresenceRegistry::new();
        let connection = registry.connect(channel()).await;
        registry.bind_user(&connection, "buyer1").await.unwrap();

        let before = registry.last_activity("buyer1").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        registry.touch(&connection).await;

        assert!(registry.last_activity("buyer1").await.unwrap() > before);
    }
}
