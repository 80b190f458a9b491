//! HTTP API layer for haggle.
//!
//! - **Endpoints**: chats, messages, offers and the listing archival hook
//! - **Extractors**: bearer-token authentication
//! - **Streaming**: WebSocket sessions backed by the session gateway
//!
//! Built on Axum 0.8 with Tower middleware stack.

pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod response;
pub mod streaming;

pub use endpoints::router;
pub use middleware::AppState;
pub use streaming::streaming_handler;
