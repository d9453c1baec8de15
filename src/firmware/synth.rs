//! Hardware channel bookkeeping: allocation of the eight FM channels to
//! instruments, note on/off with rotation and stealing, portamento.

use log::{debug, trace};

use crate::ym2164::key_code;
use crate::ym2164::registers::{
    operator_offset, REG_CH_KC, REG_CH_KF, REG_CH_RL_FB_CON, REG_KEY_ON, REG_OP_TL,
};

use super::instrument::Instrument;
use super::voice::carrier_mask;
use super::SynthBus;

/// Hardware channels on the chip.
pub const HW_CHANNELS: usize = 8;

/// Run-time link from a hardware channel to its owning instrument.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct YmChannel {
    /// Owning instrument.
    pub owner: Option<usize>,
    /// Sounding note.
    pub note: u8,
    /// Note fraction in 1/64 semitones.
    pub fraction: u8,
    /// Note-on velocity.
    pub velocity: u8,
    /// Current glide position in 1/64 semitones (note pitch without offsets).
    pub glide: i32,
    /// Glide target.
    pub target: i32,
    /// Key is down (or held by a pedal).
    pub active: bool,
    /// Released while the hold pedal was down.
    pub sustained: bool,
    /// Captured by the sostenuto pedal.
    pub sostenuto: bool,
    /// Gliding towards `target`.
    pub portamento: bool,
    /// Allocation order, for stealing the oldest note.
    pub age: u32,
}

/// The eight channel records.
#[derive(Debug, Clone, Default)]
pub struct Synth {
    channels: [YmChannel; HW_CHANNELS],
    clock: u32,
}

impl Synth {
    /// All channels unowned.
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel record.
    pub fn channel(&self, ch: usize) -> &YmChannel {
        &self.channels[ch % HW_CHANNELS]
    }

    /// Hand out hardware channels by each instrument's note count, in
    /// instrument order, then program every owned channel.
    pub fn allocate(&mut self, instruments: &mut [Instrument], bus: &mut dyn SynthBus) {
        for ch in 0..HW_CHANNELS as u8 {
            bus.write(REG_KEY_ON, ch);
        }
        self.channels = [YmChannel::default(); HW_CHANNELS];

        let mut next = 0usize;
        for inst in instruments.iter_mut() {
            inst.channels = 0;
            inst.rotation = 0;
            inst.last_key = None;
            for _ in 0..inst.config.notes {
                if next >= HW_CHANNELS {
                    break;
                }
                inst.channels |= 1 << next;
                self.channels[next].owner = Some(inst.index);
                next += 1;
            }
            debug!(
                "instrument {} owns channels {:08b}",
                inst.index, inst.channels
            );
        }
        debug_assert!(masks_disjoint(instruments));
        for inst in instruments.iter() {
            self.program(inst, bus);
        }
    }

    /// Write voice, pan and level registers of every channel `inst` owns.
    pub fn program(&self, inst: &Instrument, bus: &mut dyn SynthBus) {
        for ch in inst.channel_list() {
            inst.voice.program_channel(ch, bus);
            self.write_levels(inst, ch, bus);
        }
    }

    fn write_levels(&self, inst: &Instrument, ch: u8, bus: &mut dyn SynthBus) {
        let voice = &inst.voice;
        let data = &self.channels[ch as usize];
        let carriers = carrier_mask(voice.algorithm());
        for slot in 0..4u8 {
            let op = voice.operator(slot as usize);
            let tl = if carriers & (1 << slot) != 0 {
                inst.carrier_tl(op.tl, op.velocity, data.velocity)
            } else {
                op.tl
            };
            bus.write(REG_OP_TL | operator_offset(ch, slot), tl);
        }
        bus.write(
            REG_CH_RL_FB_CON | ch,
            inst.pan_bits() | (voice.feedback() << 3) | voice.algorithm(),
        );
    }

    /// Rewrite levels and pan of every owned channel.
    pub fn refresh_levels(&self, inst: &Instrument, bus: &mut dyn SynthBus) {
        for ch in inst.channel_list() {
            self.write_levels(inst, ch, bus);
        }
    }

    /// Rewrite key codes of every owned channel.
    pub fn refresh_pitch(&self, inst: &Instrument, bus: &mut dyn SynthBus) {
        for ch in inst.channel_list() {
            self.write_pitch(inst, ch, bus);
        }
    }

    fn write_pitch(&self, inst: &Instrument, ch: u8, bus: &mut dyn SynthBus) {
        let data = &self.channels[ch as usize];
        let (kc, kf) = key_code(data.glide + inst.pitch_offset());
        bus.write(REG_CH_KC | ch, kc);
        bus.write(REG_CH_KF | ch, kf);
    }

    fn key(&self, inst: &Instrument, ch: u8, on: bool, bus: &mut dyn SynthBus) {
        let mask = if on { inst.voice.operator_enable() } else { 0 };
        bus.write(REG_KEY_ON, mask | ch);
    }

    fn pick_channel(&self, inst: &mut Instrument) -> Option<u8> {
        let owned: Vec<u8> = inst.channel_list().collect();
        if owned.is_empty() {
            return None;
        }
        if inst.config.mono {
            return Some(owned[0]);
        }
        let start = owned
            .iter()
            .position(|c| *c >= inst.rotation)
            .unwrap_or(0);
        let mut rotated = owned[start..].iter().chain(owned[..start].iter());
        let free = rotated
            .find(|c| !self.channels[**c as usize].active)
            .copied();
        let pick = free.or_else(|| {
            owned
                .iter()
                .min_by_key(|c| self.channels[**c as usize].age)
                .copied()
        })?;
        inst.rotation = pick + 1;
        Some(pick)
    }

    /// Start `note` on one of the instrument's channels.
    pub fn note_on(
        &mut self,
        inst: &mut Instrument,
        note: u8,
        fraction: u8,
        velocity: u8,
        bus: &mut dyn SynthBus,
    ) {
        if velocity == 0 {
            self.note_off(inst, note, bus);
            return;
        }
        if !inst.config.accepts(note) {
            return;
        }
        let Some(ch) = self.pick_channel(inst) else {
            return;
        };
        let pitch = note as i32 * 64 + (fraction & 0x3F) as i32;
        let step = inst.glide_step();
        let legato = inst.config.mono && self.channels[ch as usize].active;

        self.clock = self.clock.wrapping_add(1);
        let origin = inst.last_key.map(|k| k as i32 * 64);
        let data = &mut self.channels[ch as usize];
        let was_active = data.active;
        data.note = note;
        data.fraction = fraction;
        data.velocity = velocity;
        data.target = pitch;
        data.glide = match origin {
            Some(from) if step != 0 => from,
            _ => pitch,
        };
        data.portamento = data.glide != data.target;
        data.active = true;
        data.sustained = false;
        data.sostenuto = false;
        data.age = self.clock;
        inst.last_key = Some(note);

        trace!("inst {} note {note} on ch {ch} (legato {legato})", inst.index);
        if was_active && !legato {
            self.key(inst, ch, false, bus);
        }
        self.write_levels(inst, ch, bus);
        self.write_pitch(inst, ch, bus);
        if !legato {
            self.key(inst, ch, true, bus);
        }
    }

    /// Release `note`, respecting hold and sostenuto.
    pub fn note_off(&mut self, inst: &mut Instrument, note: u8, bus: &mut dyn SynthBus) {
        let owned: Vec<u8> = inst.channel_list().collect();
        for ch in owned {
            let data = &mut self.channels[ch as usize];
            if !data.active || data.note != note || data.sustained {
                continue;
            }
            if inst.hold || data.sostenuto {
                data.sustained = true;
                continue;
            }
            data.active = false;
            data.portamento = false;
            self.key(inst, ch, false, bus);
        }
    }

    /// Release notes kept only by the hold pedal.
    pub fn release_held(&mut self, inst: &mut Instrument, bus: &mut dyn SynthBus) {
        let owned: Vec<u8> = inst.channel_list().collect();
        for ch in owned {
            let data = &mut self.channels[ch as usize];
            if data.active && data.sustained && !data.sostenuto && !inst.hold {
                data.active = false;
                data.sustained = false;
                self.key(inst, ch, false, bus);
            }
        }
    }

    /// Capture (or release) the currently sounding notes for sostenuto.
    pub fn set_sostenuto(&mut self, inst: &mut Instrument, on: bool, bus: &mut dyn SynthBus) {
        inst.sostenuto = on;
        for ch in inst.channel_list() {
            let data = &mut self.channels[ch as usize];
            if on {
                data.sostenuto = data.active && !data.sustained;
            } else {
                data.sostenuto = false;
            }
        }
        if !on {
            self.release_held(inst, bus);
        }
    }

    /// Silence every channel of `inst`.
    pub fn all_off(&mut self, inst: &mut Instrument, bus: &mut dyn SynthBus) {
        let owned: Vec<u8> = inst.channel_list().collect();
        for ch in owned {
            let data = &mut self.channels[ch as usize];
            data.active = false;
            data.sustained = false;
            data.sostenuto = false;
            data.portamento = false;
            self.key(inst, ch, false, bus);
        }
        inst.last_key = None;
    }

    /// Advance portamento by one firmware tick.
    pub fn tick(&mut self, instruments: &[Instrument], bus: &mut dyn SynthBus) {
        for ch in 0..HW_CHANNELS {
            let Some(owner) = self.channels[ch].owner else {
                continue;
            };
            let Some(inst) = instruments.get(owner) else {
                continue;
            };
            let data = &mut self.channels[ch];
            if !data.portamento {
                continue;
            }
            let step = inst.glide_step().max(1);
            let diff = data.target - data.glide;
            data.glide += diff.clamp(-step, step);
            data.portamento = data.glide != data.target;
            self.write_pitch(inst, ch as u8, bus);
        }
    }
}

fn masks_disjoint(instruments: &[Instrument]) -> bool {
    let mut seen = 0u8;
    for inst in instruments {
        if seen & inst.channels != 0 {
            return false;
        }
        seen |= inst.channels;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::memory::InstrumentConfig;
    use crate::firmware::voice::Voice;

    #[derive(Default)]
    struct Recorder(Vec<(u8, u8)>);

    impl SynthBus for Recorder {
        fn write(&mut self, reg: u8, value: u8) {
            self.0.push((reg, value));
        }
    }

    fn instruments(notes: [u8; 8]) -> Vec<Instrument> {
        notes
            .iter()
            .enumerate()
            .map(|(i, n)| {
                Instrument::new(
                    i,
                    InstrumentConfig {
                        notes: *n,
                        midi_channel: i as u8,
                        ..Default::default()
                    },
                    Voice::default(),
                )
            })
            .collect()
    }

    #[test]
    fn allocation_is_disjoint_and_capped() {
        let mut synth = Synth::new();
        let mut insts = instruments([3, 0, 4, 5, 0, 0, 0, 0]);
        synth.allocate(&mut insts, &mut Recorder::default());
        assert_eq!(insts[0].channels, 0b0000_0111);
        assert_eq!(insts[2].channels, 0b0111_1000);
        assert_eq!(insts[3].channels, 0b1000_0000);
        assert!(masks_disjoint(&insts));
        assert_eq!(synth.channel(7).owner, Some(3));
    }

    #[test]
    fn poly_prefers_idle_then_steals_oldest() {
        let mut synth = Synth::new();
        let mut insts = instruments([2, 0, 0, 0, 0, 0, 0, 0]);
        let mut bus = Recorder::default();
        synth.allocate(&mut insts, &mut bus);
        let inst = &mut insts[0];
        synth.note_on(inst, 60, 0, 100, &mut bus);
        synth.note_on(inst, 64, 0, 100, &mut bus);
        assert_eq!(synth.channel(0).note, 60);
        assert_eq!(synth.channel(1).note, 64);
        synth.note_on(inst, 67, 0, 100, &mut bus);
        assert_eq!(synth.channel(0).note, 67);
        synth.note_off(inst, 64, &mut bus);
        synth.note_on(inst, 72, 0, 100, &mut bus);
        assert_eq!(synth.channel(1).note, 72);
    }

    #[test]
    fn mono_legato_skips_retrigger() {
        let mut synth = Synth::new();
        let mut insts = instruments([1, 0, 0, 0, 0, 0, 0, 0]);
        insts[0].config.mono = true;
        let mut bus = Recorder::default();
        synth.allocate(&mut insts, &mut bus);
        synth.note_on(&mut insts[0], 60, 0, 100, &mut bus);
        bus.0.clear();
        synth.note_on(&mut insts[0], 62, 0, 100, &mut bus);
        assert!(!bus.0.iter().any(|(r, _)| *r == REG_KEY_ON));
        assert_eq!(synth.channel(0).note, 62);
    }

    #[test]
    fn hold_pedal_defers_release() {
        let mut synth = Synth::new();
        let mut insts = instruments([1, 0, 0, 0, 0, 0, 0, 0]);
        let mut bus = Recorder::default();
        synth.allocate(&mut insts, &mut bus);
        let inst = &mut insts[0];
        synth.note_on(inst, 60, 0, 100, &mut bus);
        inst.hold = true;
        synth.note_off(inst, 60, &mut bus);
        assert!(synth.channel(0).active);
        inst.hold = false;
        synth.release_held(inst, &mut bus);
        assert!(!synth.channel(0).active);
        assert_eq!(bus.0.last(), Some(&(REG_KEY_ON, 0)));
    }

    #[test]
    fn portamento_glides_to_target() {
        let mut synth = Synth::new();
        let mut insts = instruments([1, 0, 0, 0, 0, 0, 0, 0]);
        insts[0].config.portamento = 64;
        insts[0].portamento = true;
        let mut bus = Recorder::default();
        synth.allocate(&mut insts, &mut bus);
        synth.note_on(&mut insts[0], 60, 0, 100, &mut bus);
        synth.note_on(&mut insts[0], 64, 0, 100, &mut bus);
        assert!(synth.channel(0).portamento);
        assert_eq!(synth.channel(0).glide, 60 * 64);
        synth.tick(&insts, &mut bus);
        assert_eq!(synth.channel(0).glide, 60 * 64 + 128);
        assert!(synth.channel(0).portamento);
        synth.tick(&insts, &mut bus);
        assert!(!synth.channel(0).portamento);
        assert_eq!(synth.channel(0).glide, 64 * 64);
    }
}
