//! Repositories for database access.

pub mod chat;
pub mod chat_message;
pub mod listing;
pub mod user;

pub use chat::ChatRepository;
pub use chat_message::{AppendedMessage, ChatMessageRepository};
pub use listing::ListingRepository;
pub use user::UserRepository;
