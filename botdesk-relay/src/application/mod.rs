pub mod handlers;
pub mod service;

pub use handlers::{InboundUpdateHandler, OperatorCommandHandler};
pub use service::MessageRelayService;
