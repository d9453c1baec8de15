//! Card firmware
//!
//! The externally observable behaviour of the card's program: boot,
//! configuration load, MIDI dispatch to instruments, the exclusive command
//! handlers and periodic housekeeping. Everything here is sequential; the
//! card layer decides which thread calls in and which lock is held.
//!
//! - `memory` - voice banks, configuration slots, memory protect
//! - `voice` - 64-byte voice records and their register image
//! - `instrument` - instrument run-time state and level / pitch maths
//! - `synth` - hardware channel allocation and note handling
//! - `engine` - the firmware state machine and MIDI dispatch
//! - `commands` - exclusive command handlers
//! - `housekeeping` - keep-alive, timeouts, transport diagnostics

pub mod commands;
pub mod engine;
pub mod housekeeping;
pub mod instrument;
pub mod memory;
pub mod synth;
pub mod voice;

use std::time::Duration;

use crate::ym2164::Ym2164;

pub use engine::Firmware;
pub use instrument::Instrument;
pub use memory::{CardMemory, Configuration, InstrumentConfig, StoreError, VoiceBank};
pub use synth::{Synth, YmChannel};
pub use voice::Voice;

/// Register-select plus data write into the FM chip.
pub trait SynthBus {
    /// Write `value` to chip register `reg`.
    fn write(&mut self, reg: u8, value: u8);
}

impl SynthBus for Ym2164 {
    fn write(&mut self, reg: u8, value: u8) {
        self.write_port(0, reg);
        self.write_port(1, value);
    }
}

/// Bytes produced while handling input, flushed by the caller once the
/// register lock is released.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outbox {
    /// Bytes for the MIDI OUT connector.
    pub midi_out: Vec<u8>,
    /// Bytes for the host.
    pub host: Vec<u8>,
}

impl Outbox {
    /// Nothing to send.
    pub fn is_empty(&self) -> bool {
        self.midi_out.is_empty() && self.host.is_empty()
    }

    /// Drop all pending bytes.
    pub fn clear(&mut self) {
        self.midi_out.clear();
        self.host.clear();
    }
}

/// Card operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CardMode {
    /// MIDI IN is parsed and dispatched.
    #[default]
    Normal,
    /// MIDI IN bytes go to the host untouched.
    Thru,
}

/// Firmware tunables taken from the card configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareSettings {
    /// Node number in exclusive messages.
    pub node: u8,
    /// Report transport errors to the host.
    pub error_reporting: bool,
    /// Longest gap allowed inside an exclusive message.
    pub sysex_timeout: Duration,
    /// Idle time on MIDI OUT before an active-sensing byte; zero disables.
    pub keep_alive: Duration,
    /// Silence after active sensing before MIDI IN is considered offline.
    pub offline_after: Duration,
}

impl Default for FirmwareSettings {
    fn default() -> Self {
        Self {
            node: 0,
            error_reporting: true,
            sysex_timeout: Duration::from_millis(2000),
            keep_alive: Duration::from_millis(250),
            offline_after: Duration::from_millis(300),
        }
    }
}
