//! Line-delimited JSON protocol spoken with the agent child process.
//!
//! Every line on stdin/stdout is one JSON object carrying a `type`
//! discriminator. This module owns the translation between those lines and
//! the typed [`InboundMessage`] / [`OutboundCommand`] enums.

mod framing;
mod inbound;
mod outbound;
mod request_id;

pub(crate) use framing::LineBuffer;
pub(crate) use inbound::decode_line;
pub use inbound::{DecodeError, InboundMessage, ToolStatus};
pub use outbound::OutboundCommand;
pub(crate) use outbound::encode_line;
pub use request_id::RequestId;
