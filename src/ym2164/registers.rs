//! YM2164 register map
//!
//! System registers live below 0x20. Channel registers repeat every 8
//! bytes from 0x20, operator registers every 32 bytes from 0x40 with the
//! slots laid out M1, M2, C1, C2 at an 8-channel stride.

/// Test register; bit 1 holds the LFO in reset.
pub const REG_TEST: u8 = 0x01;
/// Key on/off: bits 3-6 operator mask, bits 0-2 channel.
pub const REG_KEY_ON: u8 = 0x08;
/// Noise enable (bit 7) and period (bits 0-4).
pub const REG_NOISE: u8 = 0x0F;
/// Timer A period, high 8 bits.
pub const REG_TIMER_A_LO: u8 = 0x10;
/// Timer A period, low 2 bits.
pub const REG_TIMER_A_HI: u8 = 0x11;
/// Timer B period.
pub const REG_TIMER_B: u8 = 0x12;
/// CSM, flag reset, IRQ enable and timer start.
pub const REG_TIMER_CTRL: u8 = 0x14;
/// LFO frequency.
pub const REG_LFO_FREQ: u8 = 0x18;
/// LFO depth; bit 7 selects PMD (set) or AMD (clear).
pub const REG_LFO_PMD_AMD: u8 = 0x19;
/// LFO waveform.
pub const REG_LFO_WAVE: u8 = 0x1B;

/// Channel: right/left enable, feedback, algorithm.
pub const REG_CH_RL_FB_CON: u8 = 0x20;
/// Channel: key code (octave, note).
pub const REG_CH_KC: u8 = 0x28;
/// Channel: key fraction in the upper 6 bits.
pub const REG_CH_KF: u8 = 0x30;
/// Channel: PMS and AMS.
pub const REG_CH_PMS_AMS: u8 = 0x38;

/// Operator: DT1 and MUL.
pub const REG_OP_DT1_MUL: u8 = 0x40;
/// Operator: total level.
pub const REG_OP_TL: u8 = 0x60;
/// Operator: key scale and attack rate.
pub const REG_OP_KS_AR: u8 = 0x80;
/// Operator: AM enable and first decay rate.
pub const REG_OP_AME_D1R: u8 = 0xA0;
/// Operator: DT2 and second decay rate.
pub const REG_OP_DT2_D2R: u8 = 0xC0;
/// Operator: sustain level and release rate.
pub const REG_OP_D1L_RR: u8 = 0xE0;

/// Timer control bits.
pub mod timer_ctrl {
    /// Load and start timer A.
    pub const LOAD_A: u8 = 0x01;
    /// Load and start timer B.
    pub const LOAD_B: u8 = 0x02;
    /// Timer A sets the status flag / IRQ.
    pub const IRQ_A: u8 = 0x04;
    /// Timer B sets the status flag / IRQ.
    pub const IRQ_B: u8 = 0x08;
    /// Clear timer A flag.
    pub const RESET_A: u8 = 0x10;
    /// Clear timer B flag.
    pub const RESET_B: u8 = 0x20;
    /// Key on every operator on timer A overflow.
    pub const CSM: u8 = 0x80;
}

/// Register offset of operator slot `slot` (0 M1, 1 M2, 2 C1, 3 C2) on `channel`.
pub const fn operator_offset(channel: u8, slot: u8) -> u8 {
    (slot << 3) | (channel & 7)
}

/// Index into the 32-entry operator array (channel * 4 + slot) for an
/// operator register address.
pub const fn operator_index(reg: u8) -> usize {
    ((reg & 0x07) as usize) * 4 + (((reg & 0x18) >> 3) as usize)
}

/// Key code and key fraction for a pitch in 1/64 semitone units, where
/// MIDI note `n` is `n * 64`.
///
/// The OPP key code skips every fourth note value, so the note nibble is
/// `semitone + semitone / 3`. Pitches outside octaves 0-7 clamp.
pub fn key_code(pitch64: i32) -> (u8, u8) {
    // MIDI note 13 (C#0) is key code 0x00
    let t = (pitch64 - 13 * 64).clamp(0, 8 * 768 - 1);
    let octave = (t / 768) as u8;
    let semitone = ((t % 768) / 64) as u8;
    let code = semitone + semitone / 3;
    let fraction = ((t % 64) as u8) << 2;
    ((octave << 4) | code, fraction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_slots_use_chip_ordering() {
        assert_eq!(operator_index(REG_OP_TL), 0);
        assert_eq!(operator_index(REG_OP_TL | 0x08), 1);
        assert_eq!(operator_index(REG_OP_TL | 0x10), 2);
        assert_eq!(operator_index(REG_OP_TL | 0x1F), 31);
        assert_eq!(operator_offset(3, 2), 0x13);
    }

    #[test]
    fn a440_maps_to_key_code_4a() {
        assert_eq!(key_code(69 * 64), (0x4A, 0));
        // middle C sits at the top of octave 3
        assert_eq!(key_code(60 * 64), (0x3E, 0));
        assert_eq!(key_code(61 * 64), (0x40, 0));
        assert_eq!(key_code(69 * 64 + 32), (0x4A, 0x80));
    }

    #[test]
    fn out_of_range_pitch_clamps() {
        assert_eq!(key_code(0), (0x00, 0));
        assert_eq!(key_code(200 * 64).0 >> 4, 7);
    }
}
