//! Database entities.

pub mod chat;
pub mod chat_message;
pub mod listing;
pub mod user;

pub use chat::Entity as Chat;
pub use chat_message::Entity as ChatMessage;
pub use listing::Entity as Listing;
pub use user::Entity as User;
