//! Data Path Domain
//!
//! The four byte streams of the card (MIDI IN, MIDI OUT, host to card,
//! card to host) as self-locking cyclic buffers, plus the MIDI UART that
//! feeds and drains the MIDI pair.

pub mod cyclic;
pub mod uart;

pub use cyclic::{BufferFlags, CyclicBuffer};
pub use uart::{MidiInError, MidiUart, UartErrors};

/// The four data-path buffers.
#[derive(Debug)]
pub struct DataPaths {
    /// MIDI IN wire to firmware.
    pub midi_in: CyclicBuffer,
    /// Firmware to MIDI OUT wire.
    pub midi_out: CyclicBuffer,
    /// Host bus to firmware.
    pub host_in: CyclicBuffer,
    /// Firmware to host bus.
    pub host_out: CyclicBuffer,
}

impl DataPaths {
    /// Allocate all four buffers.
    pub fn new(capacities: &crate::card::config::BufferSizes) -> crate::Result<Self> {
        Ok(Self {
            midi_in: CyclicBuffer::new("midi-in", capacities.midi_in)?,
            midi_out: CyclicBuffer::new("midi-out", capacities.midi_out)?,
            host_in: CyclicBuffer::new("host-to-card", capacities.host_to_card)?,
            host_out: CyclicBuffer::new("card-to-host", capacities.card_to_host)?,
        })
    }

    /// Wake every blocked producer and consumer.
    pub fn wake_all(&self) {
        for buf in [&self.midi_in, &self.midi_out, &self.host_in, &self.host_out] {
            buf.wake_all();
        }
    }
}
