pub mod inbound;
pub mod outbound;

pub use inbound::{InboundFrame, ParseOutcome};
pub use outbound::OutboundFrame;
