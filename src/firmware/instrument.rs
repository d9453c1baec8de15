//! Instrument run-time state and the level / pitch arithmetic applied to
//! its hardware channels.

use super::memory::{InstrumentConfig, OCTAVE_NONE};
use super::voice::Voice;

/// Centre position of a 14-bit pitchbend value.
pub const PITCHBEND_CENTRE: u16 = 0x2000;

/// One of the eight instruments of the active configuration.
#[derive(Debug, Clone)]
pub struct Instrument {
    /// Position in the configuration (0-7).
    pub index: usize,
    /// Record from the configuration.
    pub config: InstrumentConfig,
    /// Voice currently loaded.
    pub voice: Voice,
    /// Last pitchbend value.
    pub pitchbend: u16,
    /// Hardware channels owned, one bit per channel.
    pub channels: u8,
    /// Channel volume (controller 7).
    pub volume: u8,
    /// Modulation wheel (controller 1).
    pub modulation: u8,
    /// Hold pedal (controller 64).
    pub hold: bool,
    /// Sostenuto pedal (controller 66).
    pub sostenuto: bool,
    /// Portamento switch (controller 65).
    pub portamento: bool,
    /// Next channel the poly rotation looks at.
    pub rotation: u8,
    /// Last key sounded, the glide origin for the next note.
    pub last_key: Option<u8>,
}

impl Instrument {
    /// Instrument at power-on state for `config`.
    pub fn new(index: usize, config: InstrumentConfig, voice: Voice) -> Self {
        Self {
            index,
            config,
            voice,
            pitchbend: PITCHBEND_CENTRE,
            channels: 0,
            volume: 0x7F,
            modulation: 0,
            hold: false,
            sostenuto: false,
            portamento: config.portamento != 0,
            rotation: 0,
            last_key: None,
        }
    }

    /// Reset controllers to their power-on values.
    pub fn reset_controllers(&mut self) {
        self.pitchbend = PITCHBEND_CENTRE;
        self.volume = 0x7F;
        self.modulation = 0;
        self.hold = false;
        self.sostenuto = false;
        self.portamento = self.config.portamento != 0;
    }

    /// Owned hardware channels in ascending order.
    pub fn channel_list(&self) -> impl Iterator<Item = u8> + '_ {
        (0..8u8).filter(move |c| self.channels & (1 << c) != 0)
    }

    /// Pitch offset from pitchbend in 1/64 semitones.
    pub fn bend_offset(&self) -> i32 {
        let v = self.pitchbend as i32 - PITCHBEND_CENTRE as i32;
        v * self.config.pitchbend_range as i32 * 64 / PITCHBEND_CENTRE as i32
    }

    /// Total pitch offset: transpose, octave, detune and bend.
    pub fn pitch_offset(&self) -> i32 {
        let semis = self.voice.transpose() as i32
            + (self.config.octave as i32 - OCTAVE_NONE as i32) * 12;
        semis * 64 + self.config.detune as i32 + self.bend_offset()
    }

    /// Output level after channel volume.
    pub fn effective_level(&self) -> u8 {
        ((self.config.level as u16 * self.volume as u16) / 0x7F) as u8
    }

    /// Total level of a carrier operator.
    ///
    /// The intermediate keeps its sign: a loud velocity on a sensitive
    /// operator can pull the level below zero before the clamp.
    pub fn carrier_tl(&self, tl: u8, sensitivity: u8, velocity: u8) -> u8 {
        let vel_adj = (sensitivity as i16 * (velocity as i16 - 64)) / 8;
        let level = 127 - self.effective_level() as i16;
        (tl as i16 + level - vel_adj).clamp(0, 127) as u8
    }

    /// Right/left enable bits of the channel register.
    pub fn pan_bits(&self) -> u8 {
        match self.config.pan {
            p if p < 0x20 => 0x40,
            p if p > 0x60 => 0x80,
            _ => 0xC0,
        }
    }

    /// Portamento glide per firmware tick in 1/64 semitones, 0 if off.
    pub fn glide_step(&self) -> i32 {
        if !self.portamento || self.config.portamento == 0 {
            return 0;
        }
        ((128 - self.config.portamento as i32) * 2).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst() -> Instrument {
        Instrument::new(0, InstrumentConfig::default(), Voice::default())
    }

    #[test]
    fn pitchbend_scales_with_range() {
        let mut i = inst();
        i.config.pitchbend_range = 2;
        i.pitchbend = 0x3FFF;
        assert_eq!(i.bend_offset(), 127);
        i.pitchbend = 0;
        assert_eq!(i.bend_offset(), -128);
        i.pitchbend = PITCHBEND_CENTRE;
        assert_eq!(i.bend_offset(), 0);
    }

    #[test]
    fn octave_and_detune_shift_pitch() {
        let mut i = inst();
        i.config.octave = 3;
        i.config.detune = -5;
        assert_eq!(i.pitch_offset(), 12 * 64 - 5);
    }

    #[test]
    fn carrier_level_clamps() {
        let mut i = inst();
        assert_eq!(i.carrier_tl(10, 0, 100), 10);
        i.config.level = 0;
        assert_eq!(i.carrier_tl(10, 0, 100), 127);
        i.config.level = 0x7F;
        assert_eq!(i.carrier_tl(2, 7, 127), 0);
        assert_eq!(i.carrier_tl(120, 7, 0), 127);
    }

    #[test]
    fn pan_thresholds() {
        let mut i = inst();
        i.config.pan = 0x10;
        assert_eq!(i.pan_bits(), 0x40);
        i.config.pan = 0x40;
        assert_eq!(i.pan_bits(), 0xC0);
        i.config.pan = 0x70;
        assert_eq!(i.pan_bits(), 0x80);
    }
}
