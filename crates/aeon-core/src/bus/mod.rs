pub mod queue;
pub mod types;

pub use queue::MessageBus;
pub use types::{InboundMessage, MediaKind, OutboundMessage};
