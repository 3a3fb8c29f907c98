pub mod operator_handler;
pub mod update_handler;

pub use operator_handler::{BroadcastReport, OperatorCommandHandler};
pub use update_handler::InboundUpdateHandler;
