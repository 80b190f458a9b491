//! Typing indicators.
//!
//! Ephemeral per-chat state. Every start refreshes a generation counter;
//! an expiry only clears the entry if no newer start arrived meanwhile.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;

/// Outcome of a typing start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingTicket {
    /// Token to pass back to [`TypingTracker::expire`].
    pub generation: u64,
    /// The user was not already marked as typing.
    pub started: bool,
}

/// Tracks who is typing in which chat.
#[derive(Clone)]
pub struct TypingTracker {
    /// (chat id, user id) -> generation of the latest start
    typing: Arc<Mutex<HashMap<(String, String), u64>>>,
    generation: Arc<AtomicU64>,
    timeout: Duration,
}

impl TypingTracker {
    /// Create a tracker whose indicators clear after `timeout` of silence.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            typing: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
            timeout,
        }
    }

    /// Quiet period after which an indicator clears itself.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Mark `user_id` as typing in `chat_id`.
    pub async fn start(&self, chat_id: &str, user_id: &str) -> TypingTicket {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = self
            .typing
            .lock()
            .await
            .insert((chat_id.to_string(), user_id.to_string()), generation);

        TypingTicket {
            generation,
            started: previous.is_none(),
        }
    }

    /// Clear the indicator. Returns whether the user was typing.
    pub async fn stop(&self, chat_id: &str, user_id: &str) -> bool {
        self.typing
            .lock()
            .await
            .remove(&(chat_id.to_string(), user_id.to_string()))
            .is_some()
    }

    /// Clear the indicator if `generation` is still the latest start.
    pub async fn expire(&self, chat_id: &str, user_id: &str, generation: u64) -> bool {
        let mut typing = self.typing.lock().await;
        let key = (chat_id.to_string(), user_id.to_string());

        if typing.get(&key) == Some(&generation) {
            typing.remove(&key);
            true
        } else {
            false
        }
    }

    /// Users currently typing in a chat.
    pub async fn typing_users(&self, chat_id: &str) -> Vec<String> {
        let typing = self.typing.lock().await;
        let mut users: Vec<String> = typing
            .keys()
            .filter(|(chat, _)| chat == chat_id)
            .map(|(_, user)| user.clone())
            .collect();
        users.sort();
        users
    }
}
