//! Register-level state of the card behind the single register lock, and
//! the host port dispatch.

use log::trace;

use crate::irq::{FirmwareSources, InterruptNetwork, Transitions};
use crate::pit::Pit;
use crate::piu::HostBus;
use crate::transport::MidiUart;
use crate::ym2164::Ym2164;

use super::config::CardConfig;

/// Card register window offsets.
pub mod port {
    /// Host PIU, offsets 0-3.
    pub const PIU_END: u8 = 0x03;
    /// Total control (write) / total status (read).
    pub const TOTAL: u8 = 0x04;
    /// Counter 0.
    pub const COUNTER_0: u8 = 0x08;
    /// Counter 2.
    pub const COUNTER_2: u8 = 0x0A;
    /// Timer command.
    pub const TIMER_COMMAND: u8 = 0x0B;
    /// Start of the mirrored register window.
    pub const MIRROR: u8 = 0x0C;
}

/// Chip, timer, bus, UART and glue logic of one card.
#[derive(Debug)]
pub struct CardHardware {
    /// FM chip.
    pub ym: Ym2164,
    /// Interval timer.
    pub pit: Pit,
    /// Host and card PIUs.
    pub bus: HostBus,
    /// MIDI UART.
    pub uart: MidiUart,
    /// Interrupt composition network.
    pub net: InterruptNetwork,
    /// FM timer A overflows serviced so far.
    pub ticks: u64,
    sample_rate: u32,
    pending: Transitions,
}

fn merge(into: &mut Transitions, t: Transitions) {
    if t.host.is_some() {
        into.host = t.host;
    }
    if t.firmware.is_some() {
        into.firmware = t.firmware;
    }
}

impl CardHardware {
    /// Power-on state for `config`.
    pub fn new(config: &CardConfig) -> Self {
        let mut hw = Self {
            ym: Ym2164::with_clocks(config.master_clock, config.sample_rate),
            pit: Pit::new(config.pit_clock),
            bus: HostBus::new(),
            uart: MidiUart::new(),
            net: InterruptNetwork::new(),
            ticks: 0,
            sample_rate: config.sample_rate,
            pending: Transitions::default(),
        };
        hw.reset();
        hw
    }

    /// Cold reset of every component.
    pub fn reset(&mut self) {
        self.ym.reset();
        self.pit.reset();
        self.bus.reset();
        self.uart.reset();
        self.ticks = 0;
        let t = self.net.reset();
        merge(&mut self.pending, t);
        self.refresh();
    }

    /// Current inputs of the firmware interrupt OR gate.
    pub fn sources(&self) -> FirmwareSources {
        FirmwareSources {
            piu_intr_a: self.bus.card.intr_a(),
            piu_intr_b: self.bus.card.intr_b(),
            uart_rx: self.uart.rx_ready(),
            uart_tx: self.uart.tx_ready(),
            ym_irq: self.ym.irq(),
        }
    }

    /// Re-evaluate the network after a mutation.
    pub fn refresh(&mut self) {
        let t = self.net.set_sources(self.sources());
        merge(&mut self.pending, t);
    }

    /// Line changes since the last call.
    pub fn take_transitions(&mut self) -> Transitions {
        std::mem::take(&mut self.pending)
    }

    /// Host read of window offset `offset` (0x0-0xF).
    pub fn io_read(&mut self, offset: u8) -> u8 {
        let offset = offset & 0x0F;
        let offset = if offset >= port::MIRROR { offset - 8 } else { offset };
        let value = match offset {
            0..=port::PIU_END => self.bus.host_read(offset),
            port::TOTAL => self.net.status().bits(),
            port::COUNTER_0..=port::COUNTER_2 => {
                self.pit.read_counter((offset - port::COUNTER_0) as usize)
            }
            _ => 0xFF,
        };
        self.refresh();
        value
    }

    /// Host write to window offset `offset` (0x0-0xF).
    pub fn io_write(&mut self, offset: u8, value: u8) {
        let offset = offset & 0x0F;
        let offset = if offset >= port::MIRROR { offset - 8 } else { offset };
        match offset {
            0..=port::PIU_END => self.bus.host_write(offset, value),
            port::TOTAL => {
                let t = self.net.write_control(value);
                merge(&mut self.pending, t);
            }
            port::COUNTER_0..=port::COUNTER_2 => {
                self.pit.write_counter((offset - port::COUNTER_0) as usize, value)
            }
            port::TIMER_COMMAND => self.pit.write_command(value),
            _ => trace!("write {value:02X} to unused offset {offset:X}"),
        }
        self.refresh();
    }

    /// Render one stereo frame, stepping the timer first.
    pub fn render_frame(&mut self) -> (i16, i16) {
        let [out0, out1, _] = self.pit.tick(self.sample_rate);
        if out0 || out1 {
            let t = self.net.clock_timers(out0, out1);
            merge(&mut self.pending, t);
        }
        let frame = self.ym.advance_sample();
        self.refresh();
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irq::TimerStatus;

    fn hw() -> CardHardware {
        CardHardware::new(&CardConfig::default())
    }

    #[test]
    fn unused_offsets_read_ff() {
        let mut hw = hw();
        for off in [5, 6, 7, 0x0B, 0x0D, 0x0E, 0x0F] {
            assert_eq!(hw.io_read(off), 0xFF, "offset {off:X}");
        }
    }

    #[test]
    fn mirror_window_reaches_total_registers() {
        let mut hw = hw();
        hw.io_write(0x0C, 0x31); // TAE | TMSK | EXT
        assert_eq!(hw.net.control().bits(), 0x31);
        assert_eq!(hw.io_read(0x04), hw.io_read(0x0C));
    }

    #[test]
    fn counter_zero_raises_host_line() {
        let mut hw = hw();
        hw.io_write(0x04, 0x31);
        hw.io_write(0x0B, 0x34); // counter 0, lo/hi, rate generator
        hw.io_write(0x08, 100);
        hw.io_write(0x08, 0);
        hw.take_transitions();

        let mut raised = false;
        for _ in 0..64 {
            hw.render_frame();
            raised |= hw.take_transitions().host == Some(true);
        }
        assert!(raised);
        assert!(TimerStatus::from_bits_truncate(hw.io_read(0x04)).contains(TimerStatus::TAS));
    }

    #[test]
    fn host_byte_raises_firmware_line() {
        let mut hw = hw();
        hw.bus.card_write(crate::piu::PIU_CONTROL, 0xB4);
        hw.bus
            .card_write(crate::piu::PIU_CONTROL, (crate::piu::inte_bit::A_IN << 1) | 1);
        hw.io_write(0x03, 0xA6);
        hw.refresh();
        hw.take_transitions();
        hw.io_write(0x00, 0x90);
        assert_eq!(hw.take_transitions().firmware, Some(true));
        assert!(hw.sources().piu_intr_a);
    }
}
