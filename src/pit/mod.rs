//! Interval Timer Domain
//!
//! 8253 programmable interval timer of the card. Three identical counters,
//! clocked from the card's 2 MHz timer clock. Counter 0 drives timer A and
//! counter 1 timer B of the interrupt network; counter 2 runs free.
//!
//! The PIT has no clock source of its own in the emulation: the audio pull
//! advances it by `input_clock / sample_rate` input clocks per rendered
//! frame through an accumulator, the same way an MFP timer is stepped from
//! the replay rate.

pub mod counter;

pub use counter::{AccessMode, Counter, CounterMode};

/// Input clock of the card's 8253.
pub const DEFAULT_PIT_CLOCK: u32 = 2_000_000;

/// Control word: counter select bits.
const SELECT_SHIFT: u8 = 6;

/// Three-counter 8253.
#[derive(Debug, Clone)]
pub struct Pit {
    counters: [Counter; 3],
    input_clock: u32,
    inner_clock: u64,
}

impl Pit {
    /// Create a PIT clocked at `input_clock` Hz.
    pub fn new(input_clock: u32) -> Self {
        Self {
            counters: [Counter::new(), Counter::new(), Counter::new()],
            input_clock,
            inner_clock: 0,
        }
    }

    /// Return every counter to its power-on state.
    pub fn reset(&mut self) {
        self.counters = [Counter::new(), Counter::new(), Counter::new()];
        self.inner_clock = 0;
    }

    /// Write the control word port.
    pub fn write_command(&mut self, value: u8) {
        let select = (value >> SELECT_SHIFT) as usize;
        // select 3 is the 8254 read-back command, absent on the 8253
        if let Some(counter) = self.counters.get_mut(select) {
            counter.command(value);
        }
    }

    /// Write a counter data port.
    pub fn write_counter(&mut self, index: usize, value: u8) {
        if let Some(counter) = self.counters.get_mut(index) {
            counter.write(value);
        }
    }

    /// Read a counter data port.
    pub fn read_counter(&mut self, index: usize) -> u8 {
        self.counters
            .get_mut(index)
            .map(Counter::read)
            .unwrap_or(0xFF)
    }

    /// OUT pin level of counter `index`.
    pub fn output(&self, index: usize) -> bool {
        self.counters.get(index).is_some_and(Counter::output)
    }

    /// Direct access to a counter, for inspection.
    pub fn counter(&self, index: usize) -> &Counter {
        &self.counters[index.min(2)]
    }

    /// Advance by one host sample at `host_rate`.
    ///
    /// Returns, per counter, whether OUT saw a rising edge during the step.
    pub fn tick(&mut self, host_rate: u32) -> [bool; 3] {
        let mut rising = [false; 3];
        let host_rate = host_rate.max(1) as u64;
        self.inner_clock += self.input_clock as u64;
        while self.inner_clock >= host_rate {
            for (edge, counter) in rising.iter_mut().zip(self.counters.iter_mut()) {
                *edge |= counter.clock();
            }
            self.inner_clock -= host_rate;
        }
        rising
    }
}

impl Default for Pit {
    fn default() -> Self {
        Self::new(DEFAULT_PIT_CLOCK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_runs_input_clocks_per_host_sample() {
        // 1 kHz input, 100 Hz host: ten clocks per tick
        let mut pit = Pit::new(1_000);
        pit.write_command(0x34); // counter 0, lo/hi, mode 2
        pit.write_counter(0, 10);
        pit.write_counter(0, 0);
        let edges = pit.tick(100);
        assert!(edges[0]);
        assert!(!edges[1]);
    }

    #[test]
    fn counters_are_independent() {
        let mut pit = Pit::new(1_000);
        pit.write_command(0x36); // counter 0, mode 3
        pit.write_counter(0, 4);
        pit.write_counter(0, 0);
        pit.write_command(0x74); // counter 1, mode 2
        pit.write_counter(1, 0xE8);
        pit.write_counter(1, 0x03);
        assert_eq!(pit.counter(1).reload(), 1000);
        assert_eq!(pit.counter(0).mode(), CounterMode::SquareWave);
        assert_eq!(pit.counter(2).reload(), 0);
    }

    #[test]
    fn latched_read_through_ports() {
        let mut pit = Pit::default();
        pit.write_command(0xB4); // counter 2, mode 2
        pit.write_counter(2, 0x00);
        pit.write_counter(2, 0x10);
        pit.write_command(0x80); // latch counter 2
        assert_eq!(pit.read_counter(2), 0x00);
        assert_eq!(pit.read_counter(2), 0x10);
    }

    #[test]
    fn read_back_select_is_ignored() {
        let mut pit = Pit::default();
        pit.write_command(0xC0);
        assert_eq!(pit.read_counter(3), 0xFF);
    }
}
