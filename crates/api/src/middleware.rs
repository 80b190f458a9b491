//! API middleware.

#![allow(missing_docs)]

use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};
use haggle_common::config::ChatConfig;
use haggle_core::{
    ChatEngine, ChatService, MessageService, NegotiationService, SessionGateway,
    TransactionTriggerService, UserDirectoryService,
};

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub chat_service: ChatService,
    pub message_service: MessageService,
    pub negotiation_service: NegotiationService,
    pub gateway: SessionGateway,
    pub users: UserDirectoryService,
    pub transaction_trigger: TransactionTriggerService,
    pub chat_config: ChatConfig,
}

impl AppState {
    /// Build the state from a wired engine.
    #[must_use]
    pub fn new(
        engine: ChatEngine,
        transaction_trigger: TransactionTriggerService,
        chat_config: ChatConfig,
    ) -> Self {
        Self {
            chat_service: engine.chat_service,
            message_service: engine.message_service,
            negotiation_service: engine.negotiation_service,
            gateway: engine.gateway,
            users: engine.users,
            transaction_trigger,
            chat_config,
        }
    }
}

/// Extract the token from an `Authorization: Bearer` header.
pub fn bearer_token(req: &Request<Body>) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Authentication middleware.
///
/// A valid token attaches the caller's [`haggle_core::UserSummary`] to the
/// request; anything else leaves the request anonymous.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(token) = bearer_token(&req).map(ToString::to_string) {
        match state.users.authenticate(&token).await {
            Ok(Some(user)) => {
                req.extensions_mut().insert(user);
            }
            Ok(None) => tracing::debug!("Unknown API token"),
            Err(e) => tracing::warn!(error = %e, "Token lookup failed"),
        }
    }

    next.run(req).await
}
