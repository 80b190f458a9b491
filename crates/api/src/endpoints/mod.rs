//! API endpoints.

mod chats;
mod listings;
mod messages;
mod offers;

use axum::Router;

use crate::middleware::AppState;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest(
            "/chats",
            chats::router()
                .merge(messages::chat_router())
                .merge(offers::router()),
        )
        .nest("/messages", messages::router())
        .nest("/listings", listings::router())
}
