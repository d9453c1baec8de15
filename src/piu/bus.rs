//! Cross-wiring of the host-side and card-side PIUs.
//!
//! Per port, each chip's REQ (output buffer full) drives the other chip's
//! STB input and each chip's input-buffer-full drives the other chip's ACK
//! input. Data pins are shared. Host port A normally sends to card port A,
//! card port B sends to host port B.

use super::{Piu, Port};

/// Upper bound on propagation rounds; the wiring settles in three.
const MAX_SETTLE_ROUNDS: usize = 8;

/// The two PIUs and their handshake wiring.
#[derive(Debug, Clone)]
pub struct HostBus {
    /// Host-facing PIU (I/O ports 0-3).
    pub host: Piu,
    /// Card-processor-facing PIU.
    pub card: Piu,
}

impl HostBus {
    /// Both chips in reset state.
    pub fn new() -> Self {
        Self {
            host: Piu::new("host piu"),
            card: Piu::new("card piu"),
        }
    }

    /// Reset both chips and settle the lines.
    pub fn reset(&mut self) {
        self.host.reset();
        self.card.reset();
        self.settle();
    }

    /// Host CPU write to PIU offset 0-3.
    pub fn host_write(&mut self, offset: u8, value: u8) {
        self.host.write(offset, value);
        self.settle();
    }

    /// Host CPU read of PIU offset 0-3.
    pub fn host_read(&mut self, offset: u8) -> u8 {
        let value = self.host.read(offset);
        self.settle();
        value
    }

    /// Card processor write to PIU offset 0-3.
    pub fn card_write(&mut self, offset: u8, value: u8) {
        self.card.write(offset, value);
        self.settle();
    }

    /// Card processor read of PIU offset 0-3.
    pub fn card_read(&mut self, offset: u8) -> u8 {
        let value = self.card.read(offset);
        self.settle();
        value
    }

    /// Propagate pin levels between the chips until nothing changes.
    pub fn settle(&mut self) {
        for _ in 0..MAX_SETTLE_ROUNDS {
            let mut changed = false;
            for port in [Port::A, Port::B] {
                changed |= wire(&mut self.host, &mut self.card, port);
                changed |= wire(&mut self.card, &mut self.host, port);
            }
            if !changed {
                return;
            }
        }
    }
}

impl Default for HostBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive `to`'s inputs from `from`'s outputs for one port and direction.
fn wire(from: &mut Piu, to: &mut Piu, port: Port) -> bool {
    let mut changed = to.drive_pins(port, from.driven_data(port));
    changed |= to.drive_strobe(port, from.request(port));
    changed |= from.drive_ack(port, to.acknowledge(port));
    changed
}

#[cfg(test)]
mod tests {
    use super::super::{inte_bit, HandshakePhase, PIU_CONTROL, PIU_PORT_A, PIU_PORT_B};
    use super::*;

    fn configured() -> HostBus {
        let mut bus = HostBus::new();
        // host: A mode 1 output, B mode 1 input
        bus.host_write(PIU_CONTROL, 0xA6);
        bus.host_write(PIU_CONTROL, (inte_bit::A_OUT << 1) | 1);
        // card: A mode 1 input, B mode 1 output
        bus.card_write(PIU_CONTROL, 0xB4);
        bus.card_write(PIU_CONTROL, (inte_bit::A_IN << 1) | 1);
        bus
    }

    #[test]
    fn four_phase_cycle_host_to_card() {
        let mut bus = configured();
        assert_eq!(bus.host.handshake_phase(Port::A), HandshakePhase::Ready);
        assert!(bus.host.intr_a(), "empty output with INTE signals ready");

        bus.host_write(PIU_PORT_A, 0x90);
        // card latched the byte and acknowledged; host REQ dropped
        assert_eq!(bus.host.handshake_phase(Port::A), HandshakePhase::Acknowledged);
        assert!(!bus.host.intr_a());
        assert!(bus.card.intr_a());

        assert_eq!(bus.card_read(PIU_PORT_A), 0x90);
        assert!(!bus.card.intr_a());
        assert_eq!(bus.host.handshake_phase(Port::A), HandshakePhase::AckCleared);
        assert!(bus.host.intr_a());

        bus.host_read(super::super::PIU_PORT_C);
        assert_eq!(bus.host.handshake_phase(Port::A), HandshakePhase::Ready);
    }

    #[test]
    fn card_to_host_transfer() {
        let mut bus = configured();
        bus.card_write(PIU_CONTROL, (inte_bit::B << 1) | 1);
        assert!(bus.card.intr_b());
        bus.card_write(PIU_PORT_B, 0xF8);
        assert!(!bus.card.intr_b());
        assert!(bus.host.input_full(Port::B));
        assert_eq!(bus.host_read(PIU_PORT_B), 0xF8);
        assert!(bus.card.intr_b());
    }

    #[test]
    fn sender_paced_by_ready_delivers_every_byte() {
        let mut bus = configured();
        let mut received = Vec::new();
        for byte in [0xF0, 0x43, 0x75, 0xF7] {
            assert!(bus.host.intr_a());
            bus.host_write(PIU_PORT_A, byte);
            received.push(bus.card_read(PIU_PORT_A));
        }
        assert_eq!(received, vec![0xF0, 0x43, 0x75, 0xF7]);
    }
}
