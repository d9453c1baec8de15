//! Interrupt Composition Network
//!
//! The card's small glue-logic graph, evaluated as a whole after every
//! upstream change:
//!
//! ```text
//!  PIT OUT0 ─┐clk              TAC ─▷o─┐
//!  TAE ──────┤D  FF_A  Q (TAS) ────────┼──┐
//!            └─────────CLR̅ ◁──────────┘  │
//!  PIT OUT1 ─┐clk              TBC ─▷o─┐  ├─ OR ─ TCS ─┐
//!  TBE ──────┤D  FF_B  Q (TBS) ────────┼──┘            ├─ AND ─▷ tri-state ── host IRQ
//!            └─────────CLR̅ ◁──────────┘      TMSK ────┘          │
//!                                                       EXT ─────┘ (enable)
//!
//!  card PIU INTR_A ─┐
//!  card PIU INTR_B ─┤
//!  UART RxRDY ──────┼─ OR ── firmware IRQ
//!  UART TxRDY ──────┤
//!  YM2164 IRQ ──────┘
//! ```
//!
//! A floating (high-Z) host line reads as low.

use bitflags::bitflags;

bitflags! {
    /// Total control register (write side of the card register window).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TimerControl: u8 {
        /// Timer A status enable (FF_A data input).
        const TAE = 0x01;
        /// Timer B status enable (FF_B data input).
        const TBE = 0x02;
        /// Hold timer A status cleared.
        const TAC = 0x04;
        /// Hold timer B status cleared.
        const TBC = 0x08;
        /// Pass the composite status to the host line.
        const TMSK = 0x10;
        /// Enable the host line driver.
        const EXT = 0x20;
    }
}

bitflags! {
    /// Total status register (read side of the card register window).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TimerStatus: u8 {
        /// Timer A status.
        const TAS = 0x01;
        /// Timer B status.
        const TBS = 0x02;
        /// Composite card status.
        const TCS = 0x80;
    }
}

/// Inputs of the firmware interrupt OR gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FirmwareSources {
    /// Card PIU group A interrupt (host byte waiting).
    pub piu_intr_a: bool,
    /// Card PIU group B interrupt (host side ready for the next byte).
    pub piu_intr_b: bool,
    /// MIDI UART receiver ready.
    pub uart_rx: bool,
    /// MIDI UART transmitter ready and enabled.
    pub uart_tx: bool,
    /// FM chip timer interrupt.
    pub ym_irq: bool,
}

impl FirmwareSources {
    fn any(&self) -> bool {
        self.piu_intr_a || self.piu_intr_b || self.uart_rx || self.uart_tx || self.ym_irq
    }
}

/// Level changes produced by one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transitions {
    /// New host line level, if it changed.
    pub host: Option<bool>,
    /// New firmware line level, if it changed.
    pub firmware: Option<bool>,
}

/// Internal node levels of the last evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Signals {
    /// Inverted TAC, FF_A clear input (active low).
    pub clear_a_n: bool,
    /// Inverted TBC, FF_B clear input (active low).
    pub clear_b_n: bool,
    /// FF_A output.
    pub tas: bool,
    /// FF_B output.
    pub tbs: bool,
    /// OR of both timer statuses.
    pub tcs: bool,
    /// Composite status gated by TMSK.
    pub gated: bool,
    /// Tri-state buffer output; `None` is high impedance.
    pub host_drive: Option<bool>,
    /// Resolved host line.
    pub host_line: bool,
    /// Firmware line.
    pub firmware_line: bool,
}

/// The composition network state.
#[derive(Debug, Clone, Default)]
pub struct InterruptNetwork {
    tcr: TimerControl,
    ff_a: bool,
    ff_b: bool,
    sources: FirmwareSources,
    signals: Signals,
}

fn inverter(x: bool) -> bool {
    !x
}

fn tri_state(enable: bool, x: bool) -> Option<bool> {
    enable.then_some(x)
}

impl InterruptNetwork {
    /// Power-on network with all inputs and registers clear.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear flip-flops and control register.
    pub fn reset(&mut self) -> Transitions {
        self.tcr = TimerControl::empty();
        self.ff_a = false;
        self.ff_b = false;
        self.sources = FirmwareSources::default();
        self.evaluate()
    }

    /// Write the total control register.
    pub fn write_control(&mut self, value: u8) -> Transitions {
        self.tcr = TimerControl::from_bits_truncate(value);
        self.evaluate()
    }

    /// Current control register.
    pub fn control(&self) -> TimerControl {
        self.tcr
    }

    /// Read the total status register.
    pub fn status(&self) -> TimerStatus {
        let mut s = TimerStatus::empty();
        s.set(TimerStatus::TAS, self.signals.tas);
        s.set(TimerStatus::TBS, self.signals.tbs);
        s.set(TimerStatus::TCS, self.signals.tcs);
        s
    }

    /// Rising edges on the PIT outputs clock the timer flip-flops.
    pub fn clock_timers(&mut self, out0_rising: bool, out1_rising: bool) -> Transitions {
        if !out0_rising && !out1_rising {
            return Transitions::default();
        }
        if out0_rising {
            self.ff_a = self.tcr.contains(TimerControl::TAE);
        }
        if out1_rising {
            self.ff_b = self.tcr.contains(TimerControl::TBE);
        }
        self.evaluate()
    }

    /// Update the firmware OR gate inputs.
    pub fn set_sources(&mut self, sources: FirmwareSources) -> Transitions {
        if sources == self.sources {
            return Transitions::default();
        }
        self.sources = sources;
        self.evaluate()
    }

    /// Node levels of the last evaluation.
    pub fn signals(&self) -> Signals {
        self.signals
    }

    /// Host interrupt line level.
    pub fn host_line(&self) -> bool {
        self.signals.host_line
    }

    /// Firmware interrupt line level.
    pub fn firmware_line(&self) -> bool {
        self.signals.firmware_line
    }

    /// Recompute every node from the current inputs.
    fn evaluate(&mut self) -> Transitions {
        let before = self.signals;

        let clear_a_n = inverter(self.tcr.contains(TimerControl::TAC));
        let clear_b_n = inverter(self.tcr.contains(TimerControl::TBC));
        if !clear_a_n {
            self.ff_a = false;
        }
        if !clear_b_n {
            self.ff_b = false;
        }
        let tas = self.ff_a;
        let tbs = self.ff_b;
        let tcs = tas || tbs;
        let gated = tcs && self.tcr.contains(TimerControl::TMSK);
        let host_drive = tri_state(self.tcr.contains(TimerControl::EXT), gated);
        let host_line = host_drive.unwrap_or(false);
        let firmware_line = self.sources.any();

        self.signals = Signals {
            clear_a_n,
            clear_b_n,
            tas,
            tbs,
            tcs,
            gated,
            host_drive,
            host_line,
            firmware_line,
        };

        Transitions {
            host: (before.host_line != host_line).then_some(host_line),
            firmware: (before.firmware_line != firmware_line).then_some(firmware_line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENABLED: u8 = 0x01 | 0x10 | 0x20; // TAE | TMSK | EXT

    #[test]
    fn timer_edge_raises_host_line() {
        let mut net = InterruptNetwork::new();
        net.write_control(ENABLED);
        let t = net.clock_timers(true, false);
        assert_eq!(t.host, Some(true));
        assert!(net.status().contains(TimerStatus::TAS | TimerStatus::TCS));
    }

    #[test]
    fn clear_bit_holds_status_low() {
        let mut net = InterruptNetwork::new();
        net.write_control(ENABLED);
        net.clock_timers(true, false);
        let t = net.write_control(ENABLED | TimerControl::TAC.bits());
        assert_eq!(t.host, Some(false));
        assert!(net.status().is_empty());
        net.clock_timers(true, false);
        assert!(!net.host_line());
    }

    #[test]
    fn disabled_driver_floats_low() {
        let mut net = InterruptNetwork::new();
        net.write_control(0x01 | 0x10);
        net.clock_timers(true, false);
        assert!(net.status().contains(TimerStatus::TCS));
        assert_eq!(net.signals().host_drive, None);
        assert!(!net.host_line());
        let t = net.write_control(ENABLED);
        assert_eq!(t.host, Some(true));
    }

    #[test]
    fn mask_gates_composite_status() {
        let mut net = InterruptNetwork::new();
        net.write_control(0x02 | 0x20); // TBE | EXT, no TMSK
        net.clock_timers(false, true);
        assert!(net.status().contains(TimerStatus::TBS));
        assert_eq!(net.signals().host_drive, Some(false));
    }

    #[test]
    fn firmware_line_is_or_of_sources() {
        let mut net = InterruptNetwork::new();
        let t = net.set_sources(FirmwareSources {
            uart_rx: true,
            ..Default::default()
        });
        assert_eq!(t.firmware, Some(true));
        let t = net.set_sources(FirmwareSources {
            uart_rx: true,
            ym_irq: true,
            ..Default::default()
        });
        assert_eq!(t.firmware, None);
        let t = net.set_sources(FirmwareSources::default());
        assert_eq!(t.firmware, Some(false));
    }
}
