//! Service wiring.

use std::sync::Arc;

use haggle_common::config::ChatConfig;
use haggle_db::repositories::{
    ChatMessageRepository, ChatRepository, ListingRepository, UserRepository,
};
use sea_orm::DatabaseConnection;

use crate::services::{
    ChatService, DbDirectory, FanoutService, MessageService, NegotiationService,
    NotificationSinkService, PresenceRegistry, SessionGateway, UserDirectoryService,
};

/// The fully wired chat engine.
#[derive(Clone)]
pub struct ChatEngine {
    /// Conversation store.
    pub chat_service: ChatService,
    /// Message dispatcher.
    pub message_service: MessageService,
    /// Offer lifecycle.
    pub negotiation_service: NegotiationService,
    /// Realtime session handling.
    pub gateway: SessionGateway,
    /// Event delivery to live connections.
    pub fanout: FanoutService,
    /// User lookups and token authentication.
    pub users: UserDirectoryService,
}

impl ChatEngine {
    /// Build every service over `db`, delivering events through the fanout.
    #[must_use]
    pub fn new(
        db: Arc<DatabaseConnection>,
        notifier: NotificationSinkService,
        config: &ChatConfig,
    ) -> Self {
        let chat_repo = ChatRepository::new(Arc::clone(&db));
        let message_repo = ChatMessageRepository::new(Arc::clone(&db));
        let directory = Arc::new(DbDirectory::new(
            UserRepository::new(Arc::clone(&db)),
            ListingRepository::new(db),
        ));

        let fanout = FanoutService::new(PresenceRegistry::new(), notifier, config);
        let event_publisher = Arc::new(fanout.clone());

        let mut message_service = MessageService::new(
            chat_repo.clone(),
            message_repo.clone(),
            directory.clone(),
            config,
        );
        message_service.set_event_publisher(event_publisher.clone());

        let mut chat_service = ChatService::new(
            chat_repo,
            message_repo.clone(),
            directory.clone(),
            directory.clone(),
            message_service.clone(),
        );
        chat_service.set_event_publisher(event_publisher);

        let negotiation_service = NegotiationService::new(message_service.clone(), message_repo);

        let gateway = SessionGateway::new(
            chat_service.clone(),
            message_service.clone(),
            directory.clone(),
            fanout.clone(),
        );

        tracing::debug!("Chat engine wired");

        Self {
            chat_service,
            message_service,
            negotiation_service,
            gateway,
            fanout,
            users: directory,
        }
    }
}
