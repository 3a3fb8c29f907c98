pub mod aggregator;
pub mod model;
pub mod repository;

pub use aggregator::{AggregatorSettings, MediaGroupAggregator};
pub use model::{
    ChatMessage, ConsolidatedRecord, InboundContent, InboundSender, InboundUpdate, InlineButton,
    MediaGroup, MediaKind, NewMessageEvent, OutgoingMessage, SenderRole, UserProfile,
};
pub use repository::{
    BotFileApi, BotFileApiRef, BotMessenger, BotMessengerRef, DashboardNotifier,
    DashboardNotifierRef, MessageLog, MessageLogRef, MessageSink, MessageSinkRef, UserDirectory,
    UserDirectoryRef,
};
