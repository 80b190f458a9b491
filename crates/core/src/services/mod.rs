//! Business logic services.

#![allow(missing_docs)]

pub mod chat;
pub mod directory;
pub mod event_publisher;
pub mod fanout;
pub mod gateway;
pub mod locks;
pub mod message;
pub mod negotiation;
pub mod notification;
pub mod presence;
pub mod transaction;
pub mod typing;

pub use chat::{ChatCreation, ChatDetails, ChatPage, ChatService, ChatSummary, ChatView, CreateChatInput};
pub use directory::{
    DbDirectory, ListingDirectory, ListingDirectoryService, ListingSummary, UserDirectory,
    UserDirectoryService, UserSummary,
};
pub use event_publisher::{ChatEvent, EventPublisher, EventPublisherService, NoOpEventPublisher};
pub use fanout::FanoutService;
pub use gateway::SessionGateway;
pub use locks::KeyedLocks;
pub use message::{MAX_CONTENT_CHARS, MessagePage, MessageService, MessageView, SendMessageInput};
pub use negotiation::{
    ActionRequired, MakeOfferInput, NegotiationService, OfferDecision, OfferResolution,
    OfferState, OfferView,
};
pub use notification::{
    LoggingNotificationSink, NoOpNotificationSink, NotificationKind, NotificationSink,
    NotificationSinkService, OfflineNotification,
};
pub use presence::{ConnectionId, Departure, EventSender, PresenceRegistry, Subscription};
pub use transaction::{
    AcceptedOffer, HttpTransactionTrigger, NoOpTransactionTrigger, TransactionTrigger,
    TransactionTriggerService,
};
pub use typing::{TypingTicket, TypingTracker};
