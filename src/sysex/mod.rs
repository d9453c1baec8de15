//! SysEx Command Engine
//!
//! The card's manufacturer exclusive protocol:
//!
//! - `matcher` - sorted template table selecting a command handler
//! - `codec` - type A / type B bulk-transfer frames
//! - `events` - event-list payload decoding
//! - `reply` - handshake, diagnostic and dump messages
//!
//! The handlers themselves live with the firmware state they mutate.

pub mod codec;
pub mod events;
pub mod matcher;
pub mod reply;

pub use codec::{checksum, decode, encode, frame, parse_frame, Encoding, TransferError};
pub use events::{parse_events, Event};
pub use matcher::{CommandId, Match, MatchTable, Walk};
pub use reply::{Diagnostic, Handshake};
