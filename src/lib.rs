//! IBM Music Feature Card emulation core
//!
//! Emulates the card as seen from a host PC: the YM2164 FM chip, the 8253
//! interval timer, the two 8255 parallel interfaces forming the host bus,
//! the interrupt glue logic, and the externally observable behaviour of the
//! card firmware (MIDI parsing, instruments, the manufacturer exclusive
//! protocol).
//!
//! # Quick start
//! ## FM chip only
//! ```no_run
//! use music_feature_card::ym2164::Ym2164;
//! let mut chip = Ym2164::new();
//! chip.write_port(0, 0x08); // key on/off
//! chip.write_port(1, 0x78); // all operators of channel 0
//! let (left, right) = chip.advance_sample();
//! ```
//!
//! ## Whole card
//! ```no_run
//! use music_feature_card::card::{Card, CardConfig, HostLink};
//! use std::time::Duration;
//! let mut card = Card::start(CardConfig::default()).unwrap();
//! let link = HostLink::new(&card);
//! link.send(&[0x90, 60, 100], Duration::from_millis(100)).unwrap();
//! let mut audio = vec![0i16; 2 * 1024];
//! card.render(&mut audio);
//! card.shutdown();
//! ```

#![warn(missing_docs)]

pub mod card; // Card orchestration, port surface, threads
pub mod export; // WAV rendering
pub mod firmware; // Card firmware behaviour
pub mod irq; // Interrupt composition network
pub mod midi; // MIDI protocol state machine
pub mod pit; // 8253 interval timer
pub mod piu; // 8255 parallel interfaces
pub mod sysex; // Manufacturer exclusive protocol
pub mod transport; // Cyclic buffers and MIDI UART
pub mod ym2164; // FM synthesis engine

use sysex::TransferError;

/// Error types for card emulation operations
#[derive(thiserror::Error, Debug)]
pub enum MfcError {
    /// IO error from filesystem
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Configuration document could not be parsed
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Bulk transfer could not be decoded
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// A host-side transfer did not complete in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for MfcError {
    /// Converts a String into `MfcError::Other`.
    ///
    /// Prefer the specific variants where the failure has a category.
    fn from(msg: String) -> Self {
        MfcError::Other(msg)
    }
}

impl From<&str> for MfcError {
    /// Converts a string slice into `MfcError::Other`.
    fn from(msg: &str) -> Self {
        MfcError::Other(msg.to_string())
    }
}

/// Result type for card operations
pub type Result<T> = std::result::Result<T, MfcError>;

// Public API exports
pub use card::{Card, CardConfig, HostIrq, HostLink, MidiSink};
pub use firmware::Firmware;
pub use ym2164::Ym2164;
