//! The firmware state machine: boot, configuration load and dispatch of
//! completed MIDI messages to instruments.

use std::time::Instant;

use log::{debug, info, trace};

use crate::midi::{Destinations, FlowPaths, MidiMessage, MidiParser, Source, ACTIVE_SENSING};
use crate::sysex::MatchTable;
use crate::ym2164::registers::{
    timer_ctrl, REG_LFO_FREQ, REG_LFO_PMD_AMD, REG_LFO_WAVE, REG_TIMER_A_HI, REG_TIMER_A_LO,
    REG_TIMER_CTRL,
};

use super::instrument::Instrument;
use super::memory::{CardMemory, Configuration, INSTRUMENTS};
use super::synth::Synth;
use super::{CardMode, FirmwareSettings, Outbox, SynthBus};

/// Timer A period of the firmware tick (about 2 ms at the nominal clock).
pub const TICK_PERIOD: u16 = 912;

/// Control changes the instruments respond to.
pub mod cc {
    /// Modulation wheel.
    pub const MODULATION: u8 = 1;
    /// Breath controller.
    pub const BREATH: u8 = 2;
    /// Foot controller.
    pub const FOOT: u8 = 4;
    /// Channel volume.
    pub const VOLUME: u8 = 7;
    /// Pan.
    pub const PAN: u8 = 10;
    /// Hold pedal.
    pub const HOLD: u8 = 64;
    /// Portamento switch.
    pub const PORTAMENTO: u8 = 65;
    /// Sostenuto pedal.
    pub const SOSTENUTO: u8 = 66;
    /// All sound off.
    pub const ALL_SOUND_OFF: u8 = 120;
    /// Reset all controllers.
    pub const RESET_CONTROLLERS: u8 = 121;
    /// All notes off.
    pub const ALL_NOTES_OFF: u8 = 123;
    /// Mono mode on.
    pub const MONO: u8 = 126;
    /// Poly mode on.
    pub const POLY: u8 = 127;
}

/// Firmware state of one card.
#[derive(Debug)]
pub struct Firmware {
    pub(super) settings: FirmwareSettings,
    pub(super) memory: CardMemory,
    pub(super) config: Configuration,
    pub(super) config_slot: u8,
    pub(super) instruments: Vec<Instrument>,
    pub(super) synth: Synth,
    pub(super) table: MatchTable,
    pub(super) parsers: [MidiParser; 2],
    pub(super) sysex_since: [Option<Instant>; 2],
    pub(super) flow: FlowPaths,
    pub(super) mode: CardMode,
    pub(super) last_midi_out: Option<Instant>,
    pub(super) last_sensing: Option<Instant>,
    pub(super) offline: bool,
    pub(super) ticks: u64,
}

impl Firmware {
    /// Firmware with factory memory. Nothing touches the chip until [`boot`](Self::boot).
    pub fn new(settings: FirmwareSettings) -> Self {
        let memory = CardMemory::new();
        let config = memory.config(0).cloned().unwrap_or_else(|| Configuration::new("Config00"));
        Self {
            settings,
            memory,
            config,
            config_slot: 0,
            instruments: Vec::new(),
            synth: Synth::new(),
            table: MatchTable::default(),
            parsers: [MidiParser::new("midi-in"), MidiParser::new("host")],
            sysex_since: [None; 2],
            flow: FlowPaths::default(),
            mode: CardMode::Normal,
            last_midi_out: None,
            last_sensing: None,
            offline: false,
            ticks: 0,
        }
    }

    /// Cold boot: start the tick timer and load configuration slot 0.
    pub fn boot(&mut self, bus: &mut dyn SynthBus) {
        info!("firmware boot, node {}", self.settings.node);
        for p in &mut self.parsers {
            p.reset();
        }
        self.sysex_since = [None; 2];
        self.mode = CardMode::Normal;
        self.flow = FlowPaths::default();

        bus.write(REG_TIMER_A_LO, (TICK_PERIOD >> 2) as u8);
        bus.write(REG_TIMER_A_HI, (TICK_PERIOD & 3) as u8);
        bus.write(
            REG_TIMER_CTRL,
            timer_ctrl::LOAD_A | timer_ctrl::IRQ_A | timer_ctrl::RESET_A,
        );
        self.load_configuration(0, bus);
    }

    /// Load configuration `slot` (0-19), reallocate channels and rebuild
    /// the exclusive table. Out-of-range slots are ignored.
    pub fn load_configuration(&mut self, slot: u8, bus: &mut dyn SynthBus) {
        let Some(config) = self.memory.config(slot as usize).cloned() else {
            debug!("configuration {slot} does not exist");
            return;
        };
        info!("loading configuration {slot} \"{}\"", config.name());
        self.config_slot = slot;
        self.config = config;
        self.instruments = (0..INSTRUMENTS)
            .map(|i| {
                let c = self.config.instrument(i);
                Instrument::new(i, c, self.memory.voice(c.bank as usize, c.voice as usize))
            })
            .collect();

        self.program_lfo(bus);
        self.synth.allocate(&mut self.instruments, bus);
        for inst in &self.instruments {
            if inst.config.lfo && inst.channels != 0 {
                inst.voice.program_lfo(bus);
            }
        }
        self.rebuild_table();
    }

    pub(super) fn program_lfo(&self, bus: &mut dyn SynthBus) {
        bus.write(REG_LFO_FREQ, self.config.lfo_speed());
        bus.write(REG_LFO_PMD_AMD, self.config.amd());
        bus.write(REG_LFO_PMD_AMD, 0x80 | self.config.pmd());
        bus.write(REG_LFO_WAVE, self.config.lfo_wave());
    }

    /// Rebuild the exclusive table after a node or MIDI channel change.
    pub(super) fn rebuild_table(&mut self) {
        let channels: Vec<u8> = self
            .instruments
            .iter()
            .filter(|i| i.config.notes > 0)
            .map(|i| i.config.midi_channel)
            .collect();
        self.table = MatchTable::build(self.settings.node, &channels);
    }

    /// Feed one byte from `source`.
    pub fn receive(
        &mut self,
        source: Source,
        byte: u8,
        now: Instant,
        bus: &mut dyn SynthBus,
        out: &mut Outbox,
    ) {
        let sent_before = out.midi_out.len();
        if source == Source::MidiIn {
            if byte == ACTIVE_SENSING {
                self.last_sensing = Some(now);
                self.offline = false;
            } else if self.last_sensing.is_some() {
                self.last_sensing = Some(now);
            }
            if self.mode == CardMode::Thru {
                out.host.push(byte);
                return;
            }
        }

        let idx = source as usize;
        let feed = self.parsers[idx].feed(byte);
        self.sysex_since[idx] = self.parsers[idx].in_sysex().then_some(now);

        if let Some(partial) = feed.aborted {
            self.sysex_aborted(source, &partial, out);
        }
        if let Some(msg) = feed.message {
            self.route(source, msg, bus, out);
        }
        if out.midi_out.len() != sent_before {
            self.last_midi_out = Some(now);
        }
    }

    fn route(
        &mut self,
        source: Source,
        msg: MidiMessage,
        bus: &mut dyn SynthBus,
        out: &mut Outbox,
    ) {
        let dests = self.flow.destinations(source, msg.route);
        trace!("{source:?} {:02X?} -> {dests:?}", msg.bytes);
        if dests.contains(Destinations::MIDI_OUT) {
            out.midi_out.extend_from_slice(&msg.bytes);
        }
        if dests.contains(Destinations::HOST) {
            out.host.extend_from_slice(&msg.bytes);
        }
        if dests.contains(Destinations::SYNTH) {
            self.dispatch(source, &msg, bus, out);
        }
    }

    fn dispatch(&mut self, source: Source, msg: &MidiMessage, bus: &mut dyn SynthBus, out: &mut Outbox) {
        let b = &msg.bytes;
        let status = msg.status();
        if status >= 0xF0 {
            if msg.is_sysex() {
                self.sysex(source, b, bus, out);
            }
            return;
        }
        let channel = status & 0x0F;
        let data1 = b.get(1).copied().unwrap_or(0);
        let data2 = b.get(2).copied().unwrap_or(0);
        for i in self.listening(channel) {
            match status & 0xF0 {
                0x80 => self.note_off(i, data1, bus),
                0x90 => self.note_on(i, data1, 0, data2, bus),
                0xB0 => self.control(i, data1, data2, bus),
                0xC0 => self.program(i, data1, bus),
                0xD0 => self.after_touch(i, data1, bus),
                0xE0 => self.pitch_bend(i, data1 as u16 | ((data2 as u16) << 7), bus),
                _ => trace!("poly pressure ignored"),
            }
        }
    }

    /// Instruments with channels listening on `channel`.
    pub(super) fn listening(&self, channel: u8) -> Vec<usize> {
        self.instruments
            .iter()
            .filter(|i| i.config.midi_channel == channel && i.channels != 0)
            .map(|i| i.index)
            .collect()
    }

    pub(super) fn note_on(&mut self, i: usize, key: u8, fraction: u8, velocity: u8, bus: &mut dyn SynthBus) {
        if let Some(inst) = self.instruments.get_mut(i) {
            self.synth.note_on(inst, key, fraction, velocity, bus);
        }
    }

    pub(super) fn note_off(&mut self, i: usize, key: u8, bus: &mut dyn SynthBus) {
        if let Some(inst) = self.instruments.get_mut(i) {
            self.synth.note_off(inst, key, bus);
        }
    }

    pub(super) fn control(&mut self, i: usize, controller: u8, value: u8, bus: &mut dyn SynthBus) {
        let Some(inst) = self.instruments.get_mut(i) else {
            return;
        };
        let on = value >= 0x40;
        match controller {
            cc::MODULATION | cc::BREATH | cc::FOOT => {
                inst.modulation = value;
                let source = match controller {
                    cc::MODULATION => 1,
                    cc::BREATH => 2,
                    _ => 3,
                };
                if inst.config.pmd_controller == source {
                    bus.write(REG_LFO_PMD_AMD, 0x80 | value);
                }
            }
            cc::VOLUME => {
                inst.volume = value;
                self.synth.refresh_levels(inst, bus);
            }
            cc::PAN => {
                inst.config.pan = value;
                self.synth.refresh_levels(inst, bus);
            }
            cc::HOLD => {
                inst.hold = on;
                if !on {
                    self.synth.release_held(inst, bus);
                }
            }
            cc::PORTAMENTO => inst.portamento = on,
            cc::SOSTENUTO => self.synth.set_sostenuto(inst, on, bus),
            cc::ALL_SOUND_OFF | cc::ALL_NOTES_OFF => self.synth.all_off(inst, bus),
            cc::RESET_CONTROLLERS => {
                inst.reset_controllers();
                self.synth.release_held(inst, bus);
                self.synth.refresh_levels(inst, bus);
                self.synth.refresh_pitch(inst, bus);
            }
            cc::MONO | cc::POLY => {
                self.synth.all_off(inst, bus);
                inst.config.mono = controller == cc::MONO;
            }
            _ => trace!("controller {controller} ignored"),
        }
    }

    pub(super) fn program(&mut self, i: usize, program: u8, bus: &mut dyn SynthBus) {
        let Some(inst) = self.instruments.get_mut(i) else {
            return;
        };
        if program as usize >= super::memory::VOICES_PER_BANK {
            return;
        }
        inst.config.voice = program;
        inst.voice = self.memory.voice(inst.config.bank as usize, program as usize);
        debug!("instrument {i} voice {program} \"{}\"", inst.voice.name());
        self.synth.program(inst, bus);
        if inst.config.lfo {
            inst.voice.program_lfo(bus);
        }
    }

    pub(super) fn after_touch(&mut self, i: usize, value: u8, bus: &mut dyn SynthBus) {
        if let Some(inst) = self.instruments.get(i) {
            if inst.config.pmd_controller == 4 {
                bus.write(REG_LFO_PMD_AMD, 0x80 | value);
            }
        }
    }

    pub(super) fn pitch_bend(&mut self, i: usize, value: u16, bus: &mut dyn SynthBus) {
        if let Some(inst) = self.instruments.get_mut(i) {
            inst.pitchbend = value & 0x3FFF;
            self.synth.refresh_pitch(inst, bus);
        }
    }

    /// Advance one firmware tick (FM timer A overflow).
    pub fn tick(&mut self, bus: &mut dyn SynthBus) {
        self.ticks += 1;
        self.synth.tick(&self.instruments, bus);
    }

    /// Replies go back over the transport the command came from.
    pub(super) fn reply(&self, source: Source, bytes: Vec<u8>, out: &mut Outbox) {
        match source {
            Source::Host => out.host.extend(bytes),
            Source::MidiIn => out.midi_out.extend(bytes),
        }
    }

    /// Current operating mode.
    pub fn mode(&self) -> CardMode {
        self.mode
    }

    /// Node number.
    pub fn node(&self) -> u8 {
        self.settings.node
    }

    /// Card memory.
    pub fn memory(&self) -> &CardMemory {
        &self.memory
    }

    /// Instruments of the active configuration.
    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    /// Active configuration image.
    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// Selected configuration slot.
    pub fn config_slot(&self) -> u8 {
        self.config_slot
    }

    /// Flow-path matrix.
    pub fn flow_paths(&self) -> &FlowPaths {
        &self.flow
    }

    /// Hardware channel records.
    pub fn synth(&self) -> &Synth {
        &self.synth
    }

    /// Exclusive match table.
    pub fn table(&self) -> &MatchTable {
        &self.table
    }

    /// Firmware ticks seen.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Error reporting state.
    pub fn error_reporting(&self) -> bool {
        self.settings.error_reporting
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ym2164::registers::{REG_CH_KC, REG_KEY_ON};

    #[derive(Default)]
    struct Recorder(Vec<(u8, u8)>);

    impl SynthBus for Recorder {
        fn write(&mut self, reg: u8, value: u8) {
            self.0.push((reg, value));
        }
    }

    fn booted() -> (Firmware, Recorder) {
        let mut fw = Firmware::new(FirmwareSettings::default());
        let mut bus = Recorder::default();
        fw.boot(&mut bus);
        bus.0.clear();
        (fw, bus)
    }

    fn send(fw: &mut Firmware, source: Source, bytes: &[u8], bus: &mut Recorder) -> Outbox {
        let mut out = Outbox::default();
        let now = Instant::now();
        for b in bytes {
            fw.receive(source, *b, now, bus, &mut out);
        }
        out
    }

    #[test]
    fn boot_loads_slot_zero() {
        let (fw, _) = booted();
        assert_eq!(fw.config_slot(), 0);
        assert_eq!(fw.instruments()[0].channels, 0xFF);
        assert_eq!(fw.instruments().len(), 8);
    }

    #[test]
    fn note_on_keys_a_channel() {
        let (mut fw, mut bus) = booted();
        let out = send(&mut fw, Source::MidiIn, &[0x90, 69, 100], &mut bus);
        assert!(out.is_empty());
        assert!(bus.0.contains(&(REG_CH_KC, 0x4A)));
        assert!(bus.0.iter().any(|(r, v)| *r == REG_KEY_ON && *v & 0x78 != 0));
        assert!(fw.synth().channel(0).active);
    }

    #[test]
    fn other_channels_are_ignored() {
        let (mut fw, mut bus) = booted();
        send(&mut fw, Source::MidiIn, &[0x93, 60, 100], &mut bus);
        assert!(bus.0.is_empty());
    }

    #[test]
    fn flow_path_echoes_to_midi_out() {
        let (mut fw, mut bus) = booted();
        fw.flow.set_indexed(1, 0x01);
        let out = send(&mut fw, Source::MidiIn, &[0x90, 60, 1, 0xFE], &mut bus);
        assert_eq!(out.midi_out, vec![0x90, 60, 1]);
        assert!(fw.last_sensing.is_some());
    }

    #[test]
    fn controllers_update_instrument_state() {
        let (mut fw, mut bus) = booted();
        send(&mut fw, Source::Host, &[0xB0, 7, 0x20, 0xB0, 64, 0x7F, 0xE0, 0x00, 0x60], &mut bus);
        let inst = &fw.instruments()[0];
        assert_eq!(inst.volume, 0x20);
        assert!(inst.hold);
        assert_eq!(inst.pitchbend, 0x3000);
    }

    #[test]
    fn program_change_loads_bank_voice() {
        let (mut fw, mut bus) = booted();
        send(&mut fw, Source::Host, &[0xC0, 5], &mut bus);
        let inst = &fw.instruments()[0];
        assert_eq!(inst.config.voice, 5);
        assert_eq!(inst.voice, fw.memory().voice(inst.config.bank as usize, 5));
    }
}
