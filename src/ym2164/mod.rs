//! YM2164 FM Synthesis Domain
//!
//! Yamaha OPP emulation as fitted to the Music Feature Card: eight 4-operator
//! channels, LFO, noise and the two timers the card firmware uses as its tick.
//!
//! Implementation:
//! - `chip` - register interface, channel algorithms and sample generation
//! - `operator` - per-slot envelope state machine and derived rates
//! - `registers` - register map and key code helpers
//! - `tables` - sine/exponential/rate lookup tables

pub mod chip;
pub mod operator;
pub mod registers;
pub mod tables;

pub use chip::{Ym2164, DEFAULT_MASTER_CLOCK, STATUS_TIMER_A, STATUS_TIMER_B};
pub use operator::EnvelopeState;
pub use registers::key_code;
