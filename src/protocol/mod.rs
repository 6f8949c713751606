//! Wire protocol for the classroom room socket.
//!
//! Text frames are JSON with an internal `"type"` tag:
//! [`ClientCommand`] outbound, [`ServerEvent`] inbound (decoded via
//! [`parse_event`]).  Binary frames on the same socket are always raw
//! little-endian 16-bit PCM audio for listener playback, never control data.

pub mod command;
pub mod event;

pub use command::ClientCommand;
pub use event::{parse_event, ProtocolError, ServerEvent};
