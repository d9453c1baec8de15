//! Operator (slot) state: register image, derived rates and envelope.

use super::tables::{
    d1l, DT2_TAB, EG_INC, EG_RATE_SELECT, EG_RATE_SHIFT, EG_SEL_INSTANT_ATTACK, MAX_ATT_INDEX,
    MIN_ATT_INDEX,
};

/// Key-on source: register 0x08.
pub const KEY_SOURCE_REGISTER: u8 = 1;
/// Key-on source: CSM (timer A overflow).
pub const KEY_SOURCE_CSM: u8 = 2;

/// Envelope generator phase. Ordering matters: key-off only demotes
/// states above [`EnvelopeState::Release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum EnvelopeState {
    /// Silent, envelope parked at maximum attenuation
    #[default]
    Off,
    /// Key released
    Release,
    /// Second decay (sustain) phase
    Sustain,
    /// First decay phase
    Decay,
    /// Attack phase
    Attack,
}

/// Clock-dependent frequency tables of one chip instance.
#[derive(Debug, Clone)]
pub struct FrequencyTables {
    /// Phase increment per (octave, 1/64 semitone), 11 octaves of 768 steps.
    pub freq: Vec<u32>,
    /// DT1 phase offsets, entries 128..256 are the negated detunes.
    pub dt1_freq: [i32; 256],
}

/// Fields recomputed from the register image whenever an input changes.
///
/// Names follow the chip datasheet; `eg_sh_*` / `eg_sel_*` are the envelope
/// shift and rate-table row for each phase.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DerivedRates {
    pub kc: u32,
    pub kc_i: u32,
    pub dt1_i: u32,
    pub dt1: i32,
    pub mul: u32,
    pub dt2: u32,
    pub freq: u32,
    pub tl: u32,
    pub d1l: u32,
    pub am_mask: u32,
    pub ks: u32,
    pub ar: u32,
    pub d1r: u32,
    pub d2r: u32,
    pub rr: u32,
    pub eg_sh_ar: u32,
    pub eg_sel_ar: usize,
    pub eg_sh_d1r: u32,
    pub eg_sel_d1r: usize,
    pub eg_sh_d2r: u32,
    pub eg_sel_d2r: usize,
    pub eg_sh_rr: u32,
    pub eg_sel_rr: usize,
}

/// One of the 32 operators.
#[derive(Debug, Clone, Default)]
pub struct Operator {
    pub(crate) dt1_mul: u8,
    pub(crate) tl_reg: u8,
    pub(crate) ks_ar: u8,
    pub(crate) ame_d1r: u8,
    pub(crate) dt2_d2r: u8,
    pub(crate) d1l_rr: u8,

    pub(crate) rates: DerivedRates,

    pub(crate) phase: u32,
    pub(crate) volume: i32,
    pub(crate) state: EnvelopeState,
    pub(crate) key: u8,
}

impl Operator {
    pub(crate) fn new() -> Self {
        let mut op = Self {
            volume: MAX_ATT_INDEX,
            ..Default::default()
        };
        op.rates.mul = 1;
        op
    }

    /// Recompute every derived field from the register image and the
    /// owning channel's key code / key fraction.
    pub(crate) fn refresh(&mut self, kc: u8, kf: u8, tables: &FrequencyTables) {
        let r = &mut self.rates;

        r.kc = kc as u32;
        let note = (kc & 0x0F) as u32;
        r.kc_i = 768 + ((kc >> 4) as u32 * 768) + (note - (note >> 2)) * 64 + (kf >> 2) as u32;

        r.dt1_i = ((self.dt1_mul & 0x70) as u32) << 1;
        r.mul = if self.dt1_mul & 0x0F != 0 {
            ((self.dt1_mul & 0x0F) as u32) << 1
        } else {
            1
        };
        r.dt1 = tables.dt1_freq[(r.dt1_i + (r.kc >> 2)) as usize];
        r.dt2 = DT2_TAB[(self.dt2_d2r >> 6) as usize];
        r.freq = phase_step(tables, r.kc_i, r.dt2, r.dt1, r.mul);

        r.tl = ((self.tl_reg & 0x7F) as u32) << 3;
        r.d1l = d1l(self.d1l_rr >> 4);
        r.am_mask = if self.ame_d1r & 0x80 != 0 { !0 } else { 0 };

        r.ks = 5 - (self.ks_ar >> 6) as u32;
        r.ar = rate(self.ks_ar & 0x1F);
        r.d1r = rate(self.ame_d1r & 0x1F);
        r.d2r = rate(self.dt2_d2r & 0x1F);
        r.rr = 34 + (((self.d1l_rr & 0x0F) as u32) << 2);

        let v = r.kc >> r.ks;
        if r.ar + v < 32 + 62 {
            r.eg_sh_ar = EG_RATE_SHIFT[(r.ar + v) as usize];
            r.eg_sel_ar = EG_RATE_SELECT[(r.ar + v) as usize];
        } else {
            r.eg_sh_ar = 0;
            r.eg_sel_ar = EG_SEL_INSTANT_ATTACK;
        }
        r.eg_sh_d1r = EG_RATE_SHIFT[(r.d1r + v) as usize];
        r.eg_sel_d1r = EG_RATE_SELECT[(r.d1r + v) as usize];
        r.eg_sh_d2r = EG_RATE_SHIFT[(r.d2r + v) as usize];
        r.eg_sel_d2r = EG_RATE_SELECT[(r.d2r + v) as usize];
        r.eg_sh_rr = EG_RATE_SHIFT[(r.rr + v) as usize];
        r.eg_sel_rr = EG_RATE_SELECT[(r.rr + v) as usize];
    }

    pub(crate) fn key_on(&mut self, source: u8, eg_cnt: u32) {
        if self.key == 0 {
            self.phase = 0;
            self.state = EnvelopeState::Attack;
            let inc = eg_inc(self.rates.eg_sel_ar, eg_cnt, self.rates.eg_sh_ar);
            self.volume += (!self.volume * inc) >> 4;
            if self.volume <= MIN_ATT_INDEX {
                self.volume = MIN_ATT_INDEX;
                self.state = EnvelopeState::Decay;
            }
        }
        self.key |= source;
    }

    pub(crate) fn key_off(&mut self, source: u8) {
        if self.key != 0 {
            self.key &= !source;
            if self.key == 0 && self.state > EnvelopeState::Release {
                self.state = EnvelopeState::Release;
            }
        }
    }

    /// One envelope generator step at counter value `eg_cnt`.
    pub(crate) fn advance_envelope(&mut self, eg_cnt: u32) {
        let r = &self.rates;
        match self.state {
            EnvelopeState::Attack => {
                if eg_cnt & ((1 << r.eg_sh_ar) - 1) == 0 {
                    let inc = eg_inc(r.eg_sel_ar, eg_cnt, r.eg_sh_ar);
                    self.volume += (!self.volume * inc) >> 4;
                    if self.volume <= MIN_ATT_INDEX {
                        self.volume = MIN_ATT_INDEX;
                        self.state = EnvelopeState::Decay;
                    }
                }
            }
            EnvelopeState::Decay => {
                if eg_cnt & ((1 << r.eg_sh_d1r) - 1) == 0 {
                    self.volume += eg_inc(r.eg_sel_d1r, eg_cnt, r.eg_sh_d1r);
                    if self.volume >= r.d1l as i32 {
                        self.state = EnvelopeState::Sustain;
                    }
                }
            }
            EnvelopeState::Sustain => {
                if eg_cnt & ((1 << r.eg_sh_d2r) - 1) == 0 {
                    self.volume += eg_inc(r.eg_sel_d2r, eg_cnt, r.eg_sh_d2r);
                    if self.volume >= MAX_ATT_INDEX {
                        self.volume = MAX_ATT_INDEX;
                        self.state = EnvelopeState::Off;
                    }
                }
            }
            EnvelopeState::Release => {
                if eg_cnt & ((1 << r.eg_sh_rr) - 1) == 0 {
                    self.volume += eg_inc(r.eg_sel_rr, eg_cnt, r.eg_sh_rr);
                    if self.volume >= MAX_ATT_INDEX {
                        self.volume = MAX_ATT_INDEX;
                        self.state = EnvelopeState::Off;
                    }
                }
            }
            EnvelopeState::Off => {}
        }
    }

    /// Attenuation fed into the sine lookup.
    #[inline]
    pub(crate) fn attenuation(&self, am: u32) -> u32 {
        self.rates.tl + self.volume as u32 + (am & self.rates.am_mask)
    }
}

/// Phase increment for a key index offset by DT2/DT1 and scaled by MUL.
#[inline]
pub(crate) fn phase_step(tables: &FrequencyTables, kc_i: u32, dt2: u32, dt1: i32, mul: u32) -> u32 {
    let idx = ((kc_i + dt2) as usize).min(tables.freq.len() - 1);
    ((tables.freq[idx] as i32).wrapping_add(dt1) as u32).wrapping_mul(mul) >> 1
}

fn rate(v: u8) -> u32 {
    if v != 0 {
        32 + ((v as u32) << 1)
    } else {
        0
    }
}

#[inline]
fn eg_inc(sel: usize, eg_cnt: u32, shift: u32) -> i32 {
    EG_INC[sel + ((eg_cnt >> shift) & 7) as usize] as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_tables() -> FrequencyTables {
        FrequencyTables {
            freq: (0..11 * 768).map(|i| i as u32 * 64).collect(),
            dt1_freq: [0; 256],
        }
    }

    #[test]
    fn instant_attack_reaches_decay() {
        let t = flat_tables();
        let mut op = Operator::new();
        op.ks_ar = 0xDF; // KS=3, AR=31
        op.refresh(0x7E, 0, &t);
        assert_eq!(op.rates.eg_sel_ar, EG_SEL_INSTANT_ATTACK);
        op.key_on(KEY_SOURCE_REGISTER, 0);
        assert_eq!(op.state, EnvelopeState::Decay);
        assert_eq!(op.volume, MIN_ATT_INDEX);
    }

    #[test]
    fn key_off_needs_every_source_cleared() {
        let t = flat_tables();
        let mut op = Operator::new();
        op.ks_ar = 0x0A;
        op.refresh(0x40, 0, &t);
        op.key_on(KEY_SOURCE_REGISTER, 0);
        op.key_on(KEY_SOURCE_CSM, 0);
        assert_eq!(op.state, EnvelopeState::Attack);
        op.key_off(KEY_SOURCE_CSM);
        assert_eq!(op.state, EnvelopeState::Attack);
        op.key_off(KEY_SOURCE_REGISTER);
        assert_eq!(op.state, EnvelopeState::Release);
    }

    #[test]
    fn release_ends_in_off() {
        let t = flat_tables();
        let mut op = Operator::new();
        op.ks_ar = 0x1F;
        op.d1l_rr = 0x0F;
        op.refresh(0x40, 0, &t);
        op.key_on(KEY_SOURCE_REGISTER, 0);
        op.key_off(KEY_SOURCE_REGISTER);
        for cnt in 1..10_000 {
            op.advance_envelope(cnt);
            if op.state == EnvelopeState::Off {
                break;
            }
        }
        assert_eq!(op.state, EnvelopeState::Off);
        assert_eq!(op.volume, MAX_ATT_INDEX);
    }

    #[test]
    fn decay_stops_at_sustain_level() {
        let t = flat_tables();
        let mut op = Operator::new();
        op.ks_ar = 0x1F;
        op.ame_d1r = 0x1F;
        op.d1l_rr = 0x40; // D1L = 4
        op.refresh(0x40, 0, &t);
        op.key_on(KEY_SOURCE_REGISTER, 0);
        for cnt in 1..10_000 {
            op.advance_envelope(cnt);
            if op.state == EnvelopeState::Sustain {
                break;
            }
        }
        assert_eq!(op.state, EnvelopeState::Sustain);
        assert!(op.volume >= 128);
    }
}
