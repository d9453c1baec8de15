//! MIDI UART of the card: one receive holding register, an immediately
//! draining transmitter and the receive error bits.

use bitflags::bitflags;

bitflags! {
    /// Receive errors latched by the UART until read.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UartErrors: u8 {
        /// Stop bit missing.
        const FRAMING = 0x01;
        /// A byte arrived while the holding register was still full.
        const OVERRUN = 0x02;
    }
}

/// Receive-side error reported by the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiInError {
    /// Stop bit missing.
    Framing,
    /// Byte lost to overrun.
    Overrun,
}

/// MIDI UART state, guarded by the card register lock.
#[derive(Debug, Clone, Default)]
pub struct MidiUart {
    rx: Option<u8>,
    errors: UartErrors,
    tx_irq: bool,
}

impl MidiUart {
    /// Idle UART, transmitter interrupt disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Power-on state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// A byte arrives on MIDI IN. Returns `false` if it overran the holding register.
    pub fn receive(&mut self, byte: u8) -> bool {
        if self.rx.is_some() {
            self.errors |= UartErrors::OVERRUN;
            return false;
        }
        self.rx = Some(byte);
        true
    }

    /// Wire-level error on MIDI IN.
    pub fn receive_error(&mut self, error: MidiInError) {
        self.errors |= match error {
            MidiInError::Framing => UartErrors::FRAMING,
            MidiInError::Overrun => UartErrors::OVERRUN,
        };
    }

    /// Receiver holds a byte.
    pub fn rx_ready(&self) -> bool {
        self.rx.is_some()
    }

    /// Holding register is free for the next wire byte.
    pub fn rx_free(&self) -> bool {
        self.rx.is_none()
    }

    /// Read the holding register.
    pub fn read_rx(&mut self) -> Option<u8> {
        self.rx.take()
    }

    /// Return and clear latched receive errors.
    pub fn take_errors(&mut self) -> UartErrors {
        std::mem::take(&mut self.errors)
    }

    /// Enable or disable the transmitter-ready interrupt.
    pub fn set_tx_irq(&mut self, enabled: bool) {
        self.tx_irq = enabled;
    }

    /// Transmitter-ready interrupt request.
    pub fn tx_ready(&self) -> bool {
        self.tx_irq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_byte_overruns() {
        let mut uart = MidiUart::new();
        assert!(uart.receive(0x90));
        assert!(!uart.receive(0x3C));
        assert_eq!(uart.read_rx(), Some(0x90));
        assert_eq!(uart.take_errors(), UartErrors::OVERRUN);
        assert!(uart.take_errors().is_empty());
        assert!(uart.rx_free());
    }

    #[test]
    fn tx_irq_follows_enable() {
        let mut uart = MidiUart::new();
        assert!(!uart.tx_ready());
        uart.set_tx_irq(true);
        assert!(uart.tx_ready());
        uart.receive_error(MidiInError::Framing);
        assert_eq!(uart.take_errors(), UartErrors::FRAMING);
    }
}
