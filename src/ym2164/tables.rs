//! Lookup tables for the OPM/OPP operator pipeline.
//!
//! Table shapes follow the long-established YM2151 reference emulation:
//! a log-sine ROM, an exponential (total level) table split into 13
//! octaves of 256 steps, and the envelope rate selector/shift tables.

use std::sync::OnceLock;

/// Fixed-point bits of the phase accumulator.
pub const FREQ_SH: u32 = 16;
/// Fixed-point bits of the envelope timer.
pub const EG_SH: u32 = 16;
/// Fixed-point bits of the LFO timer.
pub const LFO_SH: u32 = 10;
/// Fixed-point bits of the chip timers.
pub const TIMER_SH: u32 = 16;
/// Fractional part of the phase accumulator.
pub const FREQ_MASK: u32 = (1 << FREQ_SH) - 1;

/// Envelope attenuation resolution in bits.
pub const ENV_BITS: u32 = 10;
/// Number of attenuation steps.
pub const ENV_LEN: u32 = 1 << ENV_BITS;
/// Full attenuation (silence).
pub const MAX_ATT_INDEX: i32 = (ENV_LEN - 1) as i32;
/// No attenuation.
pub const MIN_ATT_INDEX: i32 = 0;

/// Sine table index bits.
pub const SIN_BITS: u32 = 10;
/// Entries in the log-sine table.
pub const SIN_LEN: usize = 1 << SIN_BITS;
/// Wraps a phase to a sine table index.
pub const SIN_MASK: i32 = (SIN_LEN - 1) as i32;

/// Exponential table steps per octave.
pub const TL_RES_LEN: usize = 256;
/// 13 octaves, each with a positive and a negative half.
pub const TL_TAB_LEN: usize = 13 * 2 * TL_RES_LEN;
/// Attenuation above which an operator contributes nothing.
pub const ENV_QUIET: u32 = (TL_TAB_LEN >> 3) as u32;

/// Envelope increments per rate row.
pub const RATE_STEPS: usize = 8;

/// Envelope increments, one row of 8 cycles per rate selector.
pub const EG_INC: [u8; 19 * RATE_STEPS] = [
    0, 1, 0, 1, 0, 1, 0, 1, // rates 00..11 0
    0, 1, 0, 1, 1, 1, 0, 1, // rates 00..11 1
    0, 1, 1, 1, 0, 1, 1, 1, // rates 00..11 2
    0, 1, 1, 1, 1, 1, 1, 1, // rates 00..11 3
    1, 1, 1, 1, 1, 1, 1, 1, // rate 12 0
    1, 1, 1, 2, 1, 1, 1, 2, // rate 12 1
    1, 2, 1, 2, 1, 2, 1, 2, // rate 12 2
    1, 2, 2, 2, 1, 2, 2, 2, // rate 12 3
    2, 2, 2, 2, 2, 2, 2, 2, // rate 13 0
    2, 2, 2, 4, 2, 2, 2, 4, // rate 13 1
    2, 4, 2, 4, 2, 4, 2, 4, // rate 13 2
    2, 4, 4, 4, 2, 4, 4, 4, // rate 13 3
    4, 4, 4, 4, 4, 4, 4, 4, // rate 14 0
    4, 4, 4, 8, 4, 4, 4, 8, // rate 14 1
    4, 8, 4, 8, 4, 8, 4, 8, // rate 14 2
    4, 8, 8, 8, 4, 8, 8, 8, // rate 14 3
    8, 8, 8, 8, 8, 8, 8, 8, // rate 15
    16, 16, 16, 16, 16, 16, 16, 16, // rate 15 attack
    0, 0, 0, 0, 0, 0, 0, 0, // infinite
];

/// Row offset used for attack rates that saturate immediately.
pub const EG_SEL_INSTANT_ATTACK: usize = 17 * RATE_STEPS;

const fn build_rate_select() -> [usize; 128] {
    let mut out = [0usize; 128];
    let mut i = 0;
    while i < 128 {
        let row = if i < 32 {
            18
        } else if i < 80 {
            (i - 32) % 4
        } else if i < 96 {
            4 + (i - 80)
        } else {
            16
        };
        out[i] = row * RATE_STEPS;
        i += 1;
    }
    // rate 15 uses row 16 for all four steps
    out[92] = 16 * RATE_STEPS;
    out[93] = 16 * RATE_STEPS;
    out[94] = 16 * RATE_STEPS;
    out[95] = 16 * RATE_STEPS;
    out
}

const fn build_rate_shift() -> [u32; 128] {
    let mut out = [0u32; 128];
    let mut i = 32;
    while i < 80 {
        out[i] = 11 - ((i - 32) / 4) as u32;
        i += 1;
    }
    out
}

/// Envelope rate (32 + 2*rate + key scale) to [`EG_INC`] row offset.
pub const EG_RATE_SELECT: [usize; 128] = build_rate_select();
/// Envelope rate to counter shift.
pub const EG_RATE_SHIFT: [u32; 128] = build_rate_shift();

/// DT1 detune in 1/2^20 of the chip clock, per DT1 value and key code.
pub const DT1_TAB: [u8; 4 * 32] = [
    // DT1 = 0
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, //
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, //
    // DT1 = 1
    0, 0, 0, 0, 1, 1, 1, 1, 1, 1, 1, 1, 2, 2, 2, 2, //
    2, 3, 3, 3, 4, 4, 4, 5, 5, 6, 6, 7, 8, 8, 8, 8, //
    // DT1 = 2
    1, 1, 1, 1, 2, 2, 2, 2, 2, 3, 3, 3, 4, 4, 4, 5, //
    5, 6, 6, 7, 8, 8, 9, 10, 11, 12, 13, 14, 16, 16, 16, 16, //
    // DT1 = 3
    2, 2, 2, 2, 2, 3, 3, 3, 4, 4, 4, 5, 5, 6, 6, 7, //
    8, 8, 9, 10, 11, 12, 13, 14, 16, 17, 19, 20, 22, 22, 22, 22,
];

/// DT2 coarse detune in 1/64 semitone steps of the frequency table.
pub const DT2_TAB: [u32; 4] = [0, 384, 500, 608];

/// Sustain level (D1L) to attenuation; D1L = 15 maps to the 93 dB floor.
pub const fn d1l(value: u8) -> u32 {
    let v = (value & 0x0F) as u32;
    (if v != 15 { v } else { v + 16 }) * 32
}

/// Phase increment of the reference octave, one entry per 1/64 semitone.
///
/// Exponential approximation of the on-chip ROM (`1299 * 2^(i/768)`),
/// which stays within one LSB of the published dumps.
pub fn phaseinc_rom(i: usize) -> u32 {
    (1299.0 * f64::powf(2.0, i as f64 / 768.0)).round() as u32
}

/// Clock-independent tables shared by every chip instance.
pub struct Tables {
    /// Exponential table: attenuation (8 fractional bits) to linear amplitude.
    pub tl_tab: Vec<i32>,
    /// Log-sine table with the sign in bit 0.
    pub sin_tab: [u32; SIN_LEN],
    /// Random waveform of the LFO.
    pub lfo_noise: [u8; 256],
}

impl Tables {
    fn build() -> Self {
        let env_step = 128.0 / ENV_LEN as f64;
        let mut tl_tab = vec![0i32; TL_TAB_LEN];
        for x in 0..TL_RES_LEN {
            let m = ((1u32 << 16) as f64 / f64::powf(2.0, (x + 1) as f64 * (env_step / 4.0) / 8.0))
                .floor();
            let mut n = m as i32;
            n >>= 4;
            n = if n & 1 != 0 { (n >> 1) + 1 } else { n >> 1 };
            n <<= 2;
            tl_tab[x * 2] = n;
            tl_tab[x * 2 + 1] = -n;
            for i in 1..13 {
                let v = n >> i;
                tl_tab[x * 2 + i * 2 * TL_RES_LEN] = v;
                tl_tab[x * 2 + 1 + i * 2 * TL_RES_LEN] = -v;
            }
        }

        let mut sin_tab = [0u32; SIN_LEN];
        for (i, slot) in sin_tab.iter_mut().enumerate() {
            let m = f64::sin(((i * 2) + 1) as f64 * std::f64::consts::PI / SIN_LEN as f64);
            let o = if m > 0.0 {
                8.0 * (1.0 / m).log2()
            } else {
                8.0 * (-1.0 / m).log2()
            } / (env_step / 4.0);
            let mut n = (2.0 * o) as i32;
            n = if n & 1 != 0 { (n >> 1) + 1 } else { n >> 1 };
            *slot = (n * 2) as u32 + if m >= 0.0 { 0 } else { 1 };
        }

        // 8-bit maximal LFSR, sampled once per LFO step.
        let mut lfo_noise = [0u8; 256];
        let mut rng: u8 = 0xA5;
        for slot in lfo_noise.iter_mut() {
            let bit = (rng ^ (rng >> 2) ^ (rng >> 3) ^ (rng >> 4)) & 1;
            rng = (rng >> 1) | (bit << 7);
            *slot = rng;
        }

        Self {
            tl_tab,
            sin_tab,
            lfo_noise,
        }
    }
}

/// Shared table instance, built on first use.
pub fn tables() -> &'static Tables {
    static TABLES: OnceLock<Tables> = OnceLock::new();
    TABLES.get_or_init(Tables::build)
}
