//! One 8253 counter: load/latch byte sequencing and the output pin.

/// Counting mode from bits 3-1 of the control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterMode {
    /// Mode 0: output low after load, high at terminal count.
    InterruptOnTerminalCount,
    /// Mode 1: gate-triggered one-shot. The card ties the gates high, so it never fires.
    HardwareOneShot,
    /// Mode 2: output pulses low for one clock every period.
    RateGenerator,
    /// Mode 3: output toggles every half period.
    SquareWave,
    /// Mode 4: one low pulse at terminal count.
    SoftwareStrobe,
    /// Mode 5: gate-triggered strobe, inert like mode 1.
    HardwareStrobe,
}

impl CounterMode {
    pub(crate) fn from_bits(bits: u8) -> Self {
        match bits & 7 {
            0 => CounterMode::InterruptOnTerminalCount,
            1 => CounterMode::HardwareOneShot,
            2 | 6 => CounterMode::RateGenerator,
            3 | 7 => CounterMode::SquareWave,
            4 => CounterMode::SoftwareStrobe,
            _ => CounterMode::HardwareStrobe,
        }
    }
}

/// Read/write access sequence from bits 5-4 of the control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Low byte only.
    Low,
    /// High byte only.
    High,
    /// Low byte then high byte.
    LowHigh,
}

/// 16-bit down counter with a reload shadow.
#[derive(Debug, Clone)]
pub struct Counter {
    mode: CounterMode,
    access: AccessMode,
    reload: u16,
    /// Running count; 0x10000 stands for a loaded zero.
    count: u32,
    out: bool,
    armed: bool,
    strobe_low: bool,
    pending_low: Option<u8>,
    latched: Option<u16>,
    read_high_next: bool,
}

impl Counter {
    pub(crate) fn new() -> Self {
        Self {
            mode: CounterMode::InterruptOnTerminalCount,
            access: AccessMode::LowHigh,
            reload: 0,
            count: 0,
            out: true,
            armed: false,
            strobe_low: false,
            pending_low: None,
            latched: None,
            read_high_next: false,
        }
    }

    /// Current level of the OUT pin.
    pub fn output(&self) -> bool {
        self.out
    }

    /// Programmed counting mode.
    pub fn mode(&self) -> CounterMode {
        self.mode
    }

    /// Last fully loaded count value.
    pub fn reload(&self) -> u16 {
        self.reload
    }

    /// Control word addressed to this counter (latch or mode set).
    pub(crate) fn command(&mut self, value: u8) {
        let access = (value >> 4) & 3;
        if access == 0 {
            if self.latched.is_none() {
                self.latched = Some(self.live_count());
                self.read_high_next = false;
            }
            return;
        }
        self.access = match access {
            1 => AccessMode::Low,
            2 => AccessMode::High,
            _ => AccessMode::LowHigh,
        };
        self.mode = CounterMode::from_bits(value >> 1);
        self.pending_low = None;
        self.latched = None;
        self.read_high_next = false;
        self.armed = false;
        self.strobe_low = false;
        self.out = self.mode != CounterMode::InterruptOnTerminalCount;
    }

    pub(crate) fn write(&mut self, value: u8) {
        let loaded = match self.access {
            AccessMode::Low => Some(value as u16),
            AccessMode::High => Some((value as u16) << 8),
            AccessMode::LowHigh => match self.pending_low.take() {
                None => {
                    self.pending_low = Some(value);
                    None
                }
                Some(low) => Some(u16::from_le_bytes([low, value])),
            },
        };
        if let Some(reload) = loaded {
            self.load(reload);
        }
    }

    fn load(&mut self, reload: u16) {
        self.reload = reload;
        self.count = self.period();
        if self.mode == CounterMode::SquareWave {
            self.count = self.half_period();
        }
        self.armed = !matches!(
            self.mode,
            CounterMode::HardwareOneShot | CounterMode::HardwareStrobe
        );
        self.strobe_low = false;
        self.out = self.mode != CounterMode::InterruptOnTerminalCount;
    }

    fn period(&self) -> u32 {
        match self.reload {
            0 => 0x10000,
            v => v as u32,
        }
    }

    fn half_period(&self) -> u32 {
        (self.period() / 2).max(1)
    }

    fn live_count(&self) -> u16 {
        (self.count & 0xFFFF) as u16
    }

    pub(crate) fn read(&mut self) -> u8 {
        let value = self.latched.unwrap_or_else(|| self.live_count());
        match self.access {
            AccessMode::Low => {
                self.latched = None;
                value as u8
            }
            AccessMode::High => {
                self.latched = None;
                (value >> 8) as u8
            }
            AccessMode::LowHigh => {
                if self.read_high_next {
                    self.read_high_next = false;
                    self.latched = None;
                    (value >> 8) as u8
                } else {
                    self.read_high_next = true;
                    value as u8
                }
            }
        }
    }

    /// One input clock. Returns `true` on a rising edge of OUT.
    pub(crate) fn clock(&mut self) -> bool {
        if !self.armed {
            return false;
        }
        let was = self.out;
        match self.mode {
            CounterMode::InterruptOnTerminalCount => {
                self.count -= 1;
                if self.count == 0 {
                    self.out = true;
                    self.count = 0x10000;
                }
            }
            CounterMode::RateGenerator => {
                self.count -= 1;
                if self.count == 1 {
                    self.out = false;
                } else if self.count == 0 {
                    self.out = true;
                    self.count = self.period();
                }
            }
            CounterMode::SquareWave => {
                self.count -= 1;
                if self.count == 0 {
                    self.out = !self.out;
                    self.count = self.half_period();
                }
            }
            CounterMode::SoftwareStrobe => {
                if self.strobe_low {
                    self.strobe_low = false;
                    self.out = true;
                    self.armed = false;
                } else {
                    self.count -= 1;
                    if self.count == 0 {
                        self.out = false;
                        self.strobe_low = true;
                    }
                }
            }
            CounterMode::HardwareOneShot | CounterMode::HardwareStrobe => {}
        }
        !was && self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn programmed(mode: u8, reload: u16) -> Counter {
        let mut c = Counter::new();
        c.command(0x30 | (mode << 1));
        let [lo, hi] = reload.to_le_bytes();
        c.write(lo);
        c.write(hi);
        c
    }

    #[test]
    fn low_then_high_load() {
        let mut c = Counter::new();
        c.command(0x34);
        c.write(0x34);
        assert_eq!(c.reload(), 0);
        c.write(0x12);
        assert_eq!(c.reload(), 0x1234);
        assert_eq!(c.mode(), CounterMode::RateGenerator);
    }

    #[test]
    fn latch_freezes_count_until_both_bytes_read() {
        let mut c = programmed(2, 0x0100);
        for _ in 0..0x10 {
            c.clock();
        }
        c.command(0x00);
        for _ in 0..5 {
            c.clock();
        }
        assert_eq!(c.read(), 0xF0);
        assert_eq!(c.read(), 0x00);
        // latch released: live count is now visible
        assert_eq!(c.read(), 0xEB);
    }

    #[test]
    fn terminal_count_raises_output_once() {
        let mut c = programmed(0, 3);
        assert!(!c.output());
        assert!(!c.clock());
        assert!(!c.clock());
        assert!(c.clock());
        assert!(c.output());
        assert!(!c.clock());
    }

    #[test]
    fn rate_generator_pulses_every_period() {
        let mut c = programmed(2, 4);
        let rises: usize = (0..40).filter(|_| c.clock()).count();
        assert_eq!(rises, 10);
    }

    #[test]
    fn square_wave_toggles_each_half_period() {
        let mut c = programmed(3, 10);
        assert!(c.output());
        for _ in 0..5 {
            c.clock();
        }
        assert!(!c.output());
        let mut rose = false;
        for _ in 0..5 {
            rose |= c.clock();
        }
        assert!(rose);
        assert!(c.output());
    }

    #[test]
    fn hardware_modes_stay_idle() {
        let mut c = programmed(1, 2);
        assert!((0..10).all(|_| !c.clock()));
    }
}
