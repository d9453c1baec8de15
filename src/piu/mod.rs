//! Parallel Interface Unit Domain
//!
//! 8255-class parallel interface. The card carries two of them: one faces
//! the host bus, one faces the card processor. In strobed mode their
//! handshake pins are cross-wired (see [`bus::HostBus`]), so a byte written
//! by one side is latched by the other and acknowledged back through a
//! 4-phase REQ/ACK cycle.
//!
//! Port C status layout in strobed modes:
//!
//! | Bit | Group A input | Group A output | Group B |
//! |-----|---------------|----------------|---------|
//! | 0   |               |                | INTR_B  |
//! | 1   |               |                | IBF_B / /OBF_B |
//! | 2   |               |                | INTE_B  |
//! | 3   | INTR_A        | INTR_A         |         |
//! | 4   | INTE_A (in)   |                |         |
//! | 5   | IBF_A         |                |         |
//! | 6   |               | INTE_A (out)   |         |
//! | 7   |               | /OBF_A         |         |

pub mod bus;

use log::trace;

pub use bus::HostBus;

/// Register offsets.
pub const PIU_PORT_A: u8 = 0;
/// Port B data.
pub const PIU_PORT_B: u8 = 1;
/// Port C data / status.
pub const PIU_PORT_C: u8 = 2;
/// Control: mode word (bit 7 set) or port C bit set/reset.
pub const PIU_CONTROL: u8 = 3;

/// Mode word bits.
pub mod mode {
    /// Mode word marker.
    pub const SET: u8 = 0x80;
    /// Group A mode 1 (strobed).
    pub const A_STROBED: u8 = 0x20;
    /// Group A mode 2 (bidirectional).
    pub const A_BIDIRECTIONAL: u8 = 0x40;
    /// Port A input.
    pub const A_INPUT: u8 = 0x10;
    /// Port C upper input.
    pub const C_UPPER_INPUT: u8 = 0x08;
    /// Group B mode 1 (strobed).
    pub const B_STROBED: u8 = 0x04;
    /// Port B input.
    pub const B_INPUT: u8 = 0x02;
    /// Port C lower input.
    pub const C_LOWER_INPUT: u8 = 0x01;
}

/// Port C status bits.
pub mod status {
    /// Group B interrupt request.
    pub const INTR_B: u8 = 0x01;
    /// Group B input buffer full / output buffer full (active low).
    pub const BF_B: u8 = 0x02;
    /// Group B interrupt enable.
    pub const INTE_B: u8 = 0x04;
    /// Group A interrupt request.
    pub const INTR_A: u8 = 0x08;
    /// Group A input interrupt enable.
    pub const INTE_A_IN: u8 = 0x10;
    /// Group A input buffer full.
    pub const IBF_A: u8 = 0x20;
    /// Group A output interrupt enable.
    pub const INTE_A_OUT: u8 = 0x40;
    /// Group A output buffer full (active low).
    pub const OBF_A_N: u8 = 0x80;
}

/// Port C bit numbers of the interrupt-enable flip-flops.
pub mod inte_bit {
    /// INTE_B.
    pub const B: u8 = 2;
    /// INTE_A for input (and mode 2 input).
    pub const A_IN: u8 = 4;
    /// INTE_A for output (and mode 2 output).
    pub const A_OUT: u8 = 6;
}

/// Data port selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    /// Port A (group A)
    A,
    /// Port B (group B)
    B,
}

/// Operating mode of a data port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortMode {
    /// Mode 0: plain latched I/O.
    #[default]
    Basic,
    /// Mode 1: strobed, single direction.
    Strobed,
    /// Mode 2: strobed in both directions (port A only).
    Bidirectional,
}

/// Sender-side phase of the 4-phase handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// No transfer in flight.
    Ready,
    /// Data written, REQ raised, waiting for the peer to latch it.
    AwaitingAck,
    /// Peer raised ACK; REQ dropped.
    Acknowledged,
    /// Peer consumed the byte and dropped ACK.
    AckCleared,
}

#[derive(Debug, Clone, Default)]
struct PortState {
    mode: PortMode,
    input: bool,
    out_latch: u8,
    in_latch: u8,
    pins: u8,
    obf: bool,
    ibf: bool,
    inte_in: bool,
    inte_out: bool,
    strobe: bool,
    ack: bool,
    completed: bool,
}

impl PortState {
    fn receives(&self) -> bool {
        match self.mode {
            PortMode::Basic => false,
            PortMode::Strobed => self.input,
            PortMode::Bidirectional => true,
        }
    }

    fn sends(&self) -> bool {
        match self.mode {
            PortMode::Basic => false,
            PortMode::Strobed => !self.input,
            PortMode::Bidirectional => true,
        }
    }

    fn drives_pins(&self) -> bool {
        match self.mode {
            PortMode::Basic => !self.input,
            _ => self.sends(),
        }
    }

    fn intr(&self) -> bool {
        (self.receives() && self.inte_in && self.ibf && !self.strobe)
            || (self.sends() && self.inte_out && !self.obf && !self.ack)
    }

    fn phase(&self) -> HandshakePhase {
        if self.obf {
            HandshakePhase::AwaitingAck
        } else if self.ack {
            HandshakePhase::Acknowledged
        } else if self.completed {
            HandshakePhase::AckCleared
        } else {
            HandshakePhase::Ready
        }
    }
}

/// One 8255 parallel interface.
#[derive(Debug, Clone)]
pub struct Piu {
    name: &'static str,
    mode_word: u8,
    a: PortState,
    b: PortState,
    c_latch: u8,
}

impl Piu {
    /// Create a PIU in its reset state (all ports mode 0 input).
    pub fn new(name: &'static str) -> Self {
        let mut piu = Self {
            name,
            mode_word: 0,
            a: PortState::default(),
            b: PortState::default(),
            c_latch: 0,
        };
        piu.reset();
        piu
    }

    /// Hardware reset.
    pub fn reset(&mut self) {
        self.set_mode(0x9B);
    }

    /// Current mode word.
    pub fn mode_word(&self) -> u8 {
        self.mode_word
    }

    fn set_mode(&mut self, value: u8) {
        trace!("{} mode {value:02X}", self.name);
        self.mode_word = value;
        let a_mode = match (value >> 5) & 3 {
            0 => PortMode::Basic,
            1 => PortMode::Strobed,
            _ => PortMode::Bidirectional,
        };
        let b_mode = if value & mode::B_STROBED != 0 {
            PortMode::Strobed
        } else {
            PortMode::Basic
        };
        let (a_pins, b_pins) = (self.a.pins, self.b.pins);
        let (a_strobe, a_ack) = (self.a.strobe, self.a.ack);
        let (b_strobe, b_ack) = (self.b.strobe, self.b.ack);
        self.a = PortState {
            mode: a_mode,
            input: value & mode::A_INPUT != 0,
            pins: a_pins,
            strobe: a_strobe,
            ack: a_ack,
            ..Default::default()
        };
        self.b = PortState {
            mode: b_mode,
            input: value & mode::B_INPUT != 0,
            pins: b_pins,
            strobe: b_strobe,
            ack: b_ack,
            ..Default::default()
        };
        self.c_latch = 0;
    }

    fn port(&self, port: Port) -> &PortState {
        match port {
            Port::A => &self.a,
            Port::B => &self.b,
        }
    }

    fn port_mut(&mut self, port: Port) -> &mut PortState {
        match port {
            Port::A => &mut self.a,
            Port::B => &mut self.b,
        }
    }

    /// CPU write to a register offset (0-3).
    pub fn write(&mut self, offset: u8, value: u8) {
        match offset & 3 {
            PIU_PORT_A => self.write_data(Port::A, value),
            PIU_PORT_B => self.write_data(Port::B, value),
            PIU_PORT_C => self.c_latch = value,
            _ => {
                if value & mode::SET != 0 {
                    self.set_mode(value);
                } else {
                    self.bit_set_reset((value >> 1) & 7, value & 1 != 0);
                }
            }
        }
    }

    fn write_data(&mut self, port: Port, value: u8) {
        let p = self.port_mut(port);
        p.out_latch = value;
        if p.sends() {
            p.obf = true;
            p.completed = false;
        }
    }

    fn bit_set_reset(&mut self, bit: u8, set: bool) {
        if set {
            self.c_latch |= 1 << bit;
        } else {
            self.c_latch &= !(1 << bit);
        }
        match bit {
            inte_bit::A_IN if self.a.receives() => self.a.inte_in = set,
            inte_bit::A_OUT if self.a.sends() => self.a.inte_out = set,
            inte_bit::B if self.b.mode == PortMode::Strobed => {
                if self.b.input {
                    self.b.inte_in = set;
                } else {
                    self.b.inte_out = set;
                }
            }
            _ => {}
        }
    }

    /// CPU read of a register offset (0-3).
    pub fn read(&mut self, offset: u8) -> u8 {
        match offset & 3 {
            PIU_PORT_A => self.read_data(Port::A),
            PIU_PORT_B => self.read_data(Port::B),
            PIU_PORT_C => {
                let value = self.port_c();
                for p in [&mut self.a, &mut self.b] {
                    if p.sends() && p.completed && !p.obf && !p.ack {
                        p.completed = false;
                    }
                }
                value
            }
            _ => 0xFF,
        }
    }

    fn read_data(&mut self, port: Port) -> u8 {
        let p = self.port_mut(port);
        if p.receives() {
            p.ibf = false;
            p.in_latch
        } else if p.input {
            p.pins
        } else {
            p.out_latch
        }
    }

    /// Port C as seen by the CPU, status bits merged over the latch.
    pub fn port_c(&self) -> u8 {
        let mut c = self.c_latch;
        if self.a.mode != PortMode::Basic {
            c &= 0x07;
            if self.a.mode == PortMode::Strobed && !self.a.input {
                c |= self.c_latch & 0x30;
            }
            if self.a.mode == PortMode::Strobed && self.a.input {
                c |= self.c_latch & 0xC0;
            }
            if self.a.intr() {
                c |= status::INTR_A;
            }
            if self.a.receives() {
                if self.a.inte_in {
                    c |= status::INTE_A_IN;
                }
                if self.a.ibf {
                    c |= status::IBF_A;
                }
            }
            if self.a.sends() {
                if self.a.inte_out {
                    c |= status::INTE_A_OUT;
                }
                if !self.a.obf {
                    c |= status::OBF_A_N;
                }
            }
        }
        if self.b.mode == PortMode::Strobed {
            c &= 0xF8;
            if self.b.intr() {
                c |= status::INTR_B;
            }
            let full = if self.b.input { self.b.ibf } else { !self.b.obf };
            if full {
                c |= status::BF_B;
            }
            if self.b.inte_in || self.b.inte_out {
                c |= status::INTE_B;
            }
        }
        c
    }

    /// INTR output of group A.
    pub fn intr_a(&self) -> bool {
        self.a.intr()
    }

    /// INTR output of group B.
    pub fn intr_b(&self) -> bool {
        self.b.intr()
    }

    /// Input buffer full on a strobed input port.
    pub fn input_full(&self, port: Port) -> bool {
        let p = self.port(port);
        p.receives() && p.ibf
    }

    /// Output buffer full on a strobed output port.
    pub fn output_full(&self, port: Port) -> bool {
        let p = self.port(port);
        p.sends() && p.obf
    }

    /// Handshake phase of the sending side of `port`.
    pub fn handshake_phase(&self, port: Port) -> HandshakePhase {
        self.port(port).phase()
    }

    // ---- pin-level interface used by the bus wiring ----

    pub(crate) fn driven_data(&self, port: Port) -> u8 {
        let p = self.port(port);
        if p.drives_pins() {
            p.out_latch
        } else {
            0xFF
        }
    }

    pub(crate) fn request(&self, port: Port) -> bool {
        let p = self.port(port);
        p.sends() && p.obf
    }

    pub(crate) fn acknowledge(&self, port: Port) -> bool {
        let p = self.port(port);
        p.receives() && p.ibf
    }

    pub(crate) fn drive_pins(&mut self, port: Port, data: u8) -> bool {
        let p = self.port_mut(port);
        let changed = p.pins != data;
        p.pins = data;
        changed
    }

    /// Peer REQ into our STB input.
    pub(crate) fn drive_strobe(&mut self, port: Port, level: bool) -> bool {
        let p = self.port_mut(port);
        if p.strobe == level {
            return false;
        }
        p.strobe = level;
        if level && p.receives() {
            p.in_latch = p.pins;
            p.ibf = true;
        }
        true
    }

    /// Peer buffer-full into our ACK input.
    pub(crate) fn drive_ack(&mut self, port: Port, level: bool) -> bool {
        let p = self.port_mut(port);
        let mut changed = false;
        if p.ack != level {
            p.ack = level;
            changed = true;
            if !level && p.sends() {
                p.completed = true;
            }
        }
        if level && p.obf {
            p.obf = false;
            changed = true;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_word_configures_ports() {
        let mut piu = Piu::new("test");
        piu.write(PIU_CONTROL, 0xB4); // A mode 1 in, B mode 1 out
        assert_eq!(piu.mode_word(), 0xB4);
        assert!(piu.a.receives());
        assert!(piu.b.sends());
        assert!(!piu.a.sends());
    }

    #[test]
    fn bit_set_reset_controls_inte() {
        let mut piu = Piu::new("test");
        piu.write(PIU_CONTROL, 0xB4);
        piu.write(PIU_CONTROL, (inte_bit::B << 1) | 1);
        assert!(piu.intr_b(), "empty output buffer with INTE raises INTR");
        assert_eq!(piu.port_c() & status::INTE_B, status::INTE_B);
        piu.write(PIU_CONTROL, inte_bit::B << 1);
        assert!(!piu.intr_b());
    }

    #[test]
    fn strobe_latches_input() {
        let mut piu = Piu::new("test");
        piu.write(PIU_CONTROL, 0xB4);
        piu.write(PIU_CONTROL, (inte_bit::A_IN << 1) | 1);
        piu.drive_pins(Port::A, 0x5A);
        piu.drive_strobe(Port::A, true);
        assert!(piu.input_full(Port::A));
        assert!(!piu.intr_a(), "INTR waits for the strobe to end");
        piu.drive_strobe(Port::A, false);
        assert!(piu.intr_a());
        assert_eq!(piu.read(PIU_PORT_A), 0x5A);
        assert!(!piu.intr_a());
    }

    #[test]
    fn basic_mode_reads_pins_and_latches_outputs() {
        let mut piu = Piu::new("test");
        piu.write(PIU_CONTROL, 0x90); // A input, B output, mode 0
        piu.drive_pins(Port::A, 0x33);
        piu.write(PIU_PORT_B, 0x44);
        assert_eq!(piu.read(PIU_PORT_A), 0x33);
        assert_eq!(piu.read(PIU_PORT_B), 0x44);
        assert_eq!(piu.driven_data(Port::B), 0x44);
    }

    #[test]
    fn port_c_reports_output_buffer_active_low() {
        let mut piu = Piu::new("test");
        piu.write(PIU_CONTROL, 0xA0); // A mode 1 output
        assert_eq!(piu.port_c() & status::OBF_A_N, status::OBF_A_N);
        piu.write(PIU_PORT_A, 1);
        assert_eq!(piu.port_c() & status::OBF_A_N, 0);
        assert_eq!(piu.handshake_phase(Port::A), HandshakePhase::AwaitingAck);
    }
}
