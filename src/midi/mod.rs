//! MIDI Protocol State Machine
//!
//! Table-driven byte-stream classifier. The card runs one instance per
//! source stream (MIDI IN and host); completed messages are routed through
//! the flow-path matrix.

pub mod parser;
pub mod routing;
pub mod states;

pub use parser::{Feed, MidiMessage, MidiParser};
pub use routing::{Destination, Destinations, FlowPaths, RouteMask, Source};
pub use states::{ParserState, Termination, STATE_COUNT};

/// Active sensing real-time byte.
pub const ACTIVE_SENSING: u8 = 0xFE;
/// Start of system exclusive.
pub const SYSEX_START: u8 = 0xF0;
/// End of system exclusive.
pub const SYSEX_END: u8 = 0xF7;
