//! Voice definitions: the 64-byte tone record shared with real hardware
//! dumps, and its translation into chip register writes.
//!
//! | Offset | Content |
//! |---|---|
//! | `00-06` | name |
//! | `08` | LFO speed |
//! | `09` | bit 7 LFO load enable, bits 0-6 AMD |
//! | `0A` | bit 7 LFO sync, bits 0-6 PMD |
//! | `0B` | operator enable, key-on register layout (bit 3 M1, 4 C1, 5 M2, 6 C2) |
//! | `0C` | bits 3-5 feedback, bits 0-2 algorithm |
//! | `0D` | bits 4-6 PMS, bits 0-1 AMS |
//! | `0E` | bits 5-6 LFO waveform |
//! | `0F` | transpose (signed) |
//! | `10-2F` | operator records M1, M2, C1, C2 |

use crate::ym2164::registers::{
    operator_offset, REG_CH_PMS_AMS, REG_LFO_FREQ, REG_LFO_PMD_AMD, REG_LFO_WAVE, REG_OP_AME_D1R,
    REG_OP_D1L_RR, REG_OP_DT1_MUL, REG_OP_DT2_D2R, REG_OP_KS_AR,
};

use super::SynthBus;

/// Size of a voice record.
pub const VOICE_SIZE: usize = 64;
/// Characters in a voice name.
pub const NAME_LEN: usize = 7;

const LFO_SPEED: usize = 0x08;
const AMD: usize = 0x09;
const PMD: usize = 0x0A;
const OP_ENABLE: usize = 0x0B;
const FB_ALG: usize = 0x0C;
const PMS_AMS: usize = 0x0D;
const LFO_WAVE: usize = 0x0E;
const TRANSPOSE: usize = 0x0F;
const OPERATORS: usize = 0x10;
const OPERATOR_SIZE: usize = 8;

/// Decoded operator record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OperatorParams {
    /// Total level, 0 loudest.
    pub tl: u8,
    /// Velocity sensitivity 0-7.
    pub velocity: u8,
    /// Detune 1.
    pub dt1: u8,
    /// Frequency multiple.
    pub mul: u8,
    /// Key scaling.
    pub ks: u8,
    /// Attack rate.
    pub ar: u8,
    /// Amplitude modulation enable.
    pub am: bool,
    /// First decay rate.
    pub d1r: u8,
    /// Detune 2.
    pub dt2: u8,
    /// Second decay rate.
    pub d2r: u8,
    /// Sustain level.
    pub d1l: u8,
    /// Release rate.
    pub rr: u8,
}

impl OperatorParams {
    fn encode(&self) -> [u8; OPERATOR_SIZE] {
        [
            self.tl & 0x7F,
            (self.velocity & 7) << 4,
            0,
            ((self.dt1 & 7) << 4) | (self.mul & 0x0F),
            ((self.ks & 3) << 6) | (self.ar & 0x1F),
            ((self.am as u8) << 7) | (self.d1r & 0x1F),
            ((self.dt2 & 3) << 6) | (self.d2r & 0x1F),
            ((self.d1l & 0x0F) << 4) | (self.rr & 0x0F),
        ]
    }

    fn decode(b: &[u8]) -> Self {
        Self {
            tl: b[0] & 0x7F,
            velocity: (b[1] >> 4) & 7,
            dt1: (b[3] >> 4) & 7,
            mul: b[3] & 0x0F,
            ks: b[4] >> 6,
            ar: b[4] & 0x1F,
            am: b[5] & 0x80 != 0,
            d1r: b[5] & 0x1F,
            dt2: b[6] >> 6,
            d2r: b[6] & 0x1F,
            d1l: b[7] >> 4,
            rr: b[7] & 0x0F,
        }
    }
}

/// Slots whose output reaches the mixer, as a mask over slot indices
/// (bit 0 M1, 1 M2, 2 C1, 3 C2).
pub fn carrier_mask(algorithm: u8) -> u8 {
    match algorithm & 7 {
        0..=3 => 0b1000,
        4 => 0b1100,
        5 | 6 => 0b1110,
        _ => 0b1111,
    }
}

/// One voice record.
#[derive(Clone, PartialEq, Eq)]
pub struct Voice {
    bytes: [u8; VOICE_SIZE],
}

impl std::fmt::Debug for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Voice")
            .field("name", &self.name())
            .field("algorithm", &self.algorithm())
            .finish()
    }
}

impl Default for Voice {
    /// A plain sine on C2 with every other operator muted.
    fn default() -> Self {
        let mut v = Self {
            bytes: [0; VOICE_SIZE],
        };
        v.set_name("INIT");
        v.bytes[OP_ENABLE] = 0x78;
        v.bytes[FB_ALG] = 0x07;
        for slot in 0..4 {
            v.set_operator(
                slot,
                OperatorParams {
                    tl: if slot == 3 { 0 } else { 0x7F },
                    mul: 1,
                    ar: 31,
                    d1l: 0,
                    rr: 7,
                    ..Default::default()
                },
            );
        }
        v
    }
}

impl Voice {
    /// Copy a voice from a 64-byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; VOICE_SIZE] = bytes.try_into().ok()?;
        Some(Self { bytes })
    }

    /// Raw record.
    pub fn as_bytes(&self) -> &[u8; VOICE_SIZE] {
        &self.bytes
    }

    /// Overwrite one byte of the record.
    pub fn set_byte(&mut self, offset: usize, value: u8) -> bool {
        match self.bytes.get_mut(offset) {
            Some(b) => {
                *b = value;
                true
            }
            None => false,
        }
    }

    /// Name with trailing blanks removed.
    pub fn name(&self) -> String {
        self.bytes[..NAME_LEN]
            .iter()
            .map(|b| if b.is_ascii_graphic() || *b == b' ' { *b as char } else { ' ' })
            .collect::<String>()
            .trim_end()
            .to_string()
    }

    /// Set the name, padded or cut to seven characters.
    pub fn set_name(&mut self, name: &str) {
        let mut field = [b' '; NAME_LEN];
        for (dst, src) in field.iter_mut().zip(name.bytes()) {
            *dst = src;
        }
        self.bytes[..NAME_LEN].copy_from_slice(&field);
    }

    /// LFO speed.
    pub fn lfo_speed(&self) -> u8 {
        self.bytes[LFO_SPEED]
    }

    /// The voice carries its own LFO settings.
    pub fn lfo_load(&self) -> bool {
        self.bytes[AMD] & 0x80 != 0
    }

    /// Amplitude modulation depth.
    pub fn amd(&self) -> u8 {
        self.bytes[AMD] & 0x7F
    }

    /// Pitch modulation depth.
    pub fn pmd(&self) -> u8 {
        self.bytes[PMD] & 0x7F
    }

    /// Operator enable bits in key-on register layout.
    pub fn operator_enable(&self) -> u8 {
        self.bytes[OP_ENABLE] & 0x78
    }

    /// Feedback level.
    pub fn feedback(&self) -> u8 {
        (self.bytes[FB_ALG] >> 3) & 7
    }

    /// Algorithm number.
    pub fn algorithm(&self) -> u8 {
        self.bytes[FB_ALG] & 7
    }

    /// Pitch modulation sensitivity.
    pub fn pms(&self) -> u8 {
        (self.bytes[PMS_AMS] >> 4) & 7
    }

    /// Amplitude modulation sensitivity.
    pub fn ams(&self) -> u8 {
        self.bytes[PMS_AMS] & 3
    }

    /// LFO waveform.
    pub fn lfo_wave(&self) -> u8 {
        (self.bytes[LFO_WAVE] >> 5) & 3
    }

    /// Transpose in semitones.
    pub fn transpose(&self) -> i8 {
        self.bytes[TRANSPOSE] as i8
    }

    /// Decoded operator record for `slot` (0 M1, 1 M2, 2 C1, 3 C2).
    pub fn operator(&self, slot: usize) -> OperatorParams {
        let at = OPERATORS + (slot & 3) * OPERATOR_SIZE;
        OperatorParams::decode(&self.bytes[at..at + OPERATOR_SIZE])
    }

    /// Replace an operator record.
    pub fn set_operator(&mut self, slot: usize, op: OperatorParams) {
        let at = OPERATORS + (slot & 3) * OPERATOR_SIZE;
        self.bytes[at..at + OPERATOR_SIZE].copy_from_slice(&op.encode());
    }

    pub(crate) fn set_header(&mut self, fb_alg: u8, pms_ams: u8, transpose: i8) {
        self.bytes[FB_ALG] = fb_alg & 0x3F;
        self.bytes[PMS_AMS] = pms_ams & 0x73;
        self.bytes[TRANSPOSE] = transpose as u8;
    }

    pub(crate) fn set_lfo(&mut self, speed: u8, amd: u8, pmd: u8, wave: u8, load: bool) {
        self.bytes[LFO_SPEED] = speed;
        self.bytes[AMD] = ((load as u8) << 7) | (amd & 0x7F);
        self.bytes[PMD] = pmd & 0x7F;
        self.bytes[LFO_WAVE] = (wave & 3) << 5;
    }

    /// Write the level-independent operator and channel registers for
    /// hardware channel `ch`. Total levels and pan are written by the
    /// instrument, which owns level, velocity and pan.
    pub fn program_channel(&self, ch: u8, bus: &mut dyn SynthBus) {
        for slot in 0..4u8 {
            let op = self.operator(slot as usize);
            let off = operator_offset(ch, slot);
            bus.write(REG_OP_DT1_MUL | off, (op.dt1 << 4) | op.mul);
            bus.write(REG_OP_KS_AR | off, (op.ks << 6) | op.ar);
            bus.write(REG_OP_AME_D1R | off, ((op.am as u8) << 7) | op.d1r);
            bus.write(REG_OP_DT2_D2R | off, (op.dt2 << 6) | op.d2r);
            bus.write(REG_OP_D1L_RR | off, (op.d1l << 4) | op.rr);
        }
        bus.write(REG_CH_PMS_AMS | (ch & 7), (self.pms() << 4) | self.ams());
    }

    /// Load the voice's LFO into the chip if the voice carries one.
    pub fn program_lfo(&self, bus: &mut dyn SynthBus) {
        if !self.lfo_load() {
            return;
        }
        bus.write(REG_LFO_FREQ, self.lfo_speed());
        bus.write(REG_LFO_PMD_AMD, self.amd());
        bus.write(REG_LFO_PMD_AMD, 0x80 | self.pmd());
        bus.write(REG_LFO_WAVE, self.lfo_wave());
    }
}

/// Operator shapes the preset banks are generated from:
/// (algorithm, feedback, [(mul, tl, ar, d1r, d1l, d2r, rr); 4]).
type Archetype = (u8, u8, [(u8, u8, u8, u8, u8, u8, u8); 4]);

const ARCHETYPES: [(&str, Archetype); 8] = [
    ("Piano", (4, 3, [(1, 30, 31, 12, 4, 3, 6), (1, 0, 31, 8, 3, 2, 6), (3, 38, 31, 14, 6, 4, 7), (1, 0, 31, 7, 3, 2, 6)])),
    ("Organ", (7, 0, [(1, 8, 31, 0, 0, 0, 9), (2, 10, 31, 0, 0, 0, 9), (4, 14, 31, 0, 0, 0, 9), (8, 18, 31, 0, 0, 0, 9)])),
    ("Brass", (3, 5, [(1, 28, 16, 6, 2, 0, 7), (1, 30, 18, 8, 3, 0, 7), (1, 26, 20, 6, 2, 0, 7), (1, 0, 17, 4, 1, 0, 7)])),
    ("String", (2, 2, [(1, 34, 14, 4, 2, 0, 6), (2, 40, 12, 4, 2, 0, 6), (1, 30, 13, 3, 1, 0, 6), (1, 0, 12, 2, 1, 0, 5)])),
    ("Bass", (0, 6, [(0, 24, 31, 10, 5, 4, 9), (1, 30, 31, 12, 6, 4, 9), (1, 26, 31, 9, 4, 3, 9), (1, 0, 31, 6, 2, 2, 8)])),
    ("Bell", (5, 1, [(7, 24, 31, 6, 8, 3, 4), (3, 0, 31, 9, 9, 4, 4), (5, 6, 31, 8, 9, 4, 4), (1, 4, 31, 7, 9, 4, 4)])),
    ("Pluck", (1, 4, [(2, 32, 31, 16, 8, 6, 8), (1, 36, 31, 18, 9, 6, 8), (1, 30, 31, 14, 7, 5, 8), (1, 0, 31, 11, 6, 4, 7)])),
    ("Pad", (6, 2, [(1, 20, 10, 2, 1, 0, 4), (2, 6, 9, 2, 1, 0, 4), (1, 8, 8, 2, 1, 0, 4), (1, 6, 9, 2, 1, 0, 4)])),
];

/// Deterministically generated read-only voice `index` of preset bank `bank`.
pub fn preset_voice(bank: u8, index: u8) -> Voice {
    let (base, (alg, fb, ops)) = ARCHETYPES[(index as usize) % ARCHETYPES.len()];
    let variant = index as usize / ARCHETYPES.len() + bank as usize * 6;

    let mut v = Voice::default();
    v.set_name(&format!("{:.4}{:03}", base, (bank as usize) * 48 + index as usize));
    v.set_header((fb << 3) | alg, ((variant % 4) as u8) << 4, 0);
    v.set_lfo(0xB0 + (variant % 16) as u8, 0, (variant % 3) as u8 * 8, 2, variant % 5 == 0);
    for (slot, (mul, tl, ar, d1r, d1l, d2r, rr)) in ops.iter().copied().enumerate() {
        let carrier = carrier_mask(alg) & (1 << slot) != 0;
        let shade = (variant % 7) as u8;
        v.set_operator(
            slot,
            OperatorParams {
                tl: if carrier { tl } else { (tl + shade * 2).min(0x7F) },
                velocity: if carrier { 3 } else { 1 },
                dt1: (variant + slot) as u8 % 4,
                mul: if carrier { mul } else { (mul + shade / 3) & 0x0F },
                ks: (slot as u8) & 1,
                ar,
                am: false,
                d1r: (d1r + shade).min(31),
                dt2: 0,
                d2r,
                d1l,
                rr,
            },
        );
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Vec<(u8, u8)>);

    impl SynthBus for Recorder {
        fn write(&mut self, reg: u8, value: u8) {
            self.0.push((reg, value));
        }
    }

    #[test]
    fn operator_records_round_trip_through_bytes() {
        let mut v = Voice::default();
        let op = OperatorParams {
            tl: 0x21,
            velocity: 5,
            dt1: 3,
            mul: 9,
            ks: 2,
            ar: 25,
            am: true,
            d1r: 11,
            dt2: 1,
            d2r: 4,
            d1l: 7,
            rr: 12,
        };
        v.set_operator(2, op);
        assert_eq!(v.operator(2), op);
        assert_eq!(v.as_bytes()[0x10 + 2 * 8], 0x21);
        assert_eq!(v.as_bytes()[0x10 + 2 * 8 + 3], 0x39);
    }

    #[test]
    fn names_are_space_padded() {
        let mut v = Voice::default();
        v.set_name("Epiano-long");
        assert_eq!(&v.as_bytes()[..7], b"Epiano-");
        v.set_name("Bs");
        assert_eq!(v.name(), "Bs");
    }

    #[test]
    fn carriers_follow_algorithm() {
        assert_eq!(carrier_mask(0), 0b1000);
        assert_eq!(carrier_mask(4), 0b1100);
        assert_eq!(carrier_mask(6), 0b1110);
        assert_eq!(carrier_mask(7), 0b1111);
    }

    #[test]
    fn programming_touches_every_operator() {
        let mut bus = Recorder::default();
        preset_voice(2, 0).program_channel(5, &mut bus);
        assert_eq!(bus.0.len(), 21);
        assert!(bus.0.iter().any(|(r, _)| *r == REG_OP_DT1_MUL | 0x1D));
        assert!(bus.0.iter().any(|(r, _)| *r == REG_CH_PMS_AMS | 5));
    }

    #[test]
    fn presets_are_deterministic() {
        assert_eq!(preset_voice(3, 17), preset_voice(3, 17));
        assert_ne!(preset_voice(3, 17), preset_voice(4, 17));
        assert_eq!(preset_voice(2, 0).name(), "Pian096");
    }
}
