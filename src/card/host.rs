//! Host-side contracts: the interrupt line, the MIDI OUT wire, and a
//! driver-style helper that moves bytes through the host PIU.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::trace;
use parking_lot::Mutex;

use crate::piu::{inte_bit, status, PIU_CONTROL, PIU_PORT_A, PIU_PORT_B, PIU_PORT_C};
use crate::{MfcError, Result};

use super::Card;

/// Host interrupt controller input the card drives.
///
/// Called with the card register lock held; implementations must not call
/// back into the card.
pub trait HostIrq: Send + Sync {
    /// The card's interrupt line went high.
    fn raise(&self);
    /// The card's interrupt line went low.
    fn lower(&self);
}

/// A line level the host can poll.
impl HostIrq for AtomicBool {
    fn raise(&self) {
        self.store(true, Ordering::SeqCst);
    }

    fn lower(&self) {
        self.store(false, Ordering::SeqCst);
    }
}

/// Receiver of MIDI OUT bytes.
pub trait MidiSink: Send + Sync {
    /// One byte left the MIDI OUT connector.
    fn send(&self, byte: u8);
}

/// Collects everything sent.
impl MidiSink for Mutex<Vec<u8>> {
    fn send(&self, byte: u8) {
        self.lock().push(byte);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unconnected;

impl HostIrq for Unconnected {
    fn raise(&self) {}
    fn lower(&self) {}
}

impl MidiSink for Unconnected {
    fn send(&self, _byte: u8) {}
}

/// Host PIU mode: port A strobed output, port B strobed input.
pub const HOST_PIU_MODE: u8 = 0xA6;

const POLL_INTERVAL: Duration = Duration::from_micros(50);

/// Polled host driver over the card's port surface.
#[derive(Debug)]
pub struct HostLink<'a> {
    card: &'a Card,
    base: u16,
}

impl<'a> HostLink<'a> {
    /// Program the host PIU and return a link.
    ///
    /// INTE A (out) is set so port C reports INTR A once the card has read
    /// the previous byte, which is what [`send`](Self::send) paces on.
    pub fn new(card: &'a Card) -> Self {
        let base = card.config().base_port;
        card.io_write(base + PIU_CONTROL as u16, HOST_PIU_MODE);
        card.io_write(base + PIU_CONTROL as u16, (inte_bit::A_OUT << 1) | 1);
        Self { card, base }
    }

    fn status(&self) -> u8 {
        self.card.io_read(self.base + PIU_PORT_C as u16)
    }

    fn wait_for(&self, ready: impl Fn(u8) -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if ready(self.status()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Send bytes to the card, waiting up to `timeout` for each handshake.
    ///
    /// OBF A alone is not enough: it clears as soon as the card PIU latches
    /// the byte, before the card has read it. INTR A only rises once the
    /// card's read has completed the acknowledge cycle.
    pub fn send(&self, bytes: &[u8], timeout: Duration) -> Result<()> {
        for (i, &b) in bytes.iter().enumerate() {
            if !self.wait_for(|c| c & status::INTR_A != 0, timeout) {
                return Err(MfcError::Timeout(format!(
                    "card did not accept byte {i} of {}",
                    bytes.len()
                )));
            }
            trace!("host -> card {b:02X}");
            self.card.io_write(self.base + PIU_PORT_A as u16, b);
        }
        Ok(())
    }

    /// Receive one byte from the card.
    pub fn receive(&self, timeout: Duration) -> Result<u8> {
        if !self.wait_for(|c| c & status::BF_B != 0, timeout) {
            return Err(MfcError::Timeout("no byte from the card".into()));
        }
        let b = self.card.io_read(self.base + PIU_PORT_B as u16);
        trace!("card -> host {b:02X}");
        Ok(b)
    }

    /// Receive until the card stays silent for `idle`.
    pub fn receive_all(&self, idle: Duration) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(b) = self.receive(idle) {
            out.push(b);
        }
        out
    }

    /// Receive one complete exclusive message, skipping anything before it.
    pub fn receive_sysex(&self, timeout: Duration) -> Result<Vec<u8>> {
        let mut msg = Vec::new();
        loop {
            let b = self.receive(timeout)?;
            if b == 0xF0 {
                msg.clear();
            }
            if b == 0xF0 || !msg.is_empty() {
                msg.push(b);
            }
            if b == 0xF7 && !msg.is_empty() {
                return Ok(msg);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::CardConfig;

    const WAIT: Duration = Duration::from_secs(2);

    #[test]
    fn multi_byte_request_arrives_whole() {
        let card = Card::start(CardConfig {
            keep_alive_ms: 0,
            ..CardConfig::default()
        })
        .unwrap();
        let link = HostLink::new(&card);

        // identification dump request, eight bytes back to back
        link.send(&[0xF0, 0x43, 0x75, 0x00, 0x20, 0x03, 0x00, 0xF7], WAIT)
            .unwrap();
        let reply = link.receive_sysex(WAIT).unwrap();
        assert_eq!(reply[..7], [0xF0, 0x43, 0x75, 0x00, 0x21, 0x03, 0x00]);
        assert_eq!(reply.last(), Some(&0xF7));
    }
}
