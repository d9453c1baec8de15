//! Exclusive command handlers.

use log::{debug, info, trace, warn};

use crate::midi::Source;
use crate::sysex::codec::{frame, parse_frame_exact, Encoding};
use crate::sysex::events::{parse_events, Event};
use crate::sysex::matcher::{CommandId, Match, Walk};
use crate::sysex::reply::{self, Handshake};
use crate::ym2164::registers::{REG_LFO_FREQ, REG_LFO_PMD_AMD, REG_LFO_WAVE};

use super::engine::Firmware;
use super::memory::{StoreError, BANK_SIZE, CONFIG_SIZE, INSTRUMENTS};
use super::voice::{Voice, VOICE_SIZE};
use super::{CardMode, Outbox, SynthBus};

/// Dump kinds of the dump request command.
pub mod dump_kind {
    /// Active configuration.
    pub const CONFIGURATION: u8 = 0;
    /// All sixteen RAM configuration slots.
    pub const ALL_CONFIGURATIONS: u8 = 1;
    /// One voice bank.
    pub const VOICE_BANK: u8 = 2;
    /// Identification string.
    pub const IDENTIFICATION: u8 = 3;
    /// Voice of one instrument.
    pub const INSTRUMENT_VOICE: u8 = 4;
}

/// Identification reply payload.
pub const IDENTIFICATION: &[u8] = b"IBM MUSIC FEATURE CARD 1.00";

/// System parameter numbers.
pub mod system_param {
    /// Node number.
    pub const NODE: u8 = 0x00;
    /// Memory protect.
    pub const MEMORY_PROTECT: u8 = 0x01;
    /// Configuration select.
    pub const CONFIG_SELECT: u8 = 0x02;
    /// Error reporting.
    pub const ERROR_REPORTING: u8 = 0x03;
    /// LFO speed.
    pub const LFO_SPEED: u8 = 0x08;
    /// Amplitude modulation depth.
    pub const AMD: u8 = 0x09;
    /// Pitch modulation depth.
    pub const PMD: u8 = 0x0A;
    /// LFO waveform.
    pub const LFO_WAVE: u8 = 0x0B;
}

fn nibbles(lo: u8, hi: u8) -> u8 {
    (lo & 0x0F) | ((hi & 0x0F) << 4)
}

impl Firmware {
    /// Run a complete exclusive message.
    pub(super) fn sysex(&mut self, source: Source, bytes: &[u8], bus: &mut dyn SynthBus, out: &mut Outbox) {
        if bytes.len() < 2 {
            return;
        }
        let body = &bytes[1..bytes.len() - 1];
        match self.table.walk(body) {
            Walk::Matched(m) => {
                debug!("{source:?} sysex {:?}", m.command);
                self.run_command(source, m, &body[m.args..], bus, out);
            }
            Walk::Rejected => trace!("{source:?} sysex not for this card"),
            Walk::Incomplete => trace!("{source:?} sysex too short"),
        }
    }

    /// An exclusive message was cut off. A store in progress is refused.
    pub(super) fn sysex_aborted(&mut self, source: Source, partial: &[u8], out: &mut Outbox) {
        if partial.len() < 2 {
            return;
        }
        if let Walk::Matched(m) = self.table.walk(&partial[1..]) {
            if m.command.is_store() {
                warn!("{source:?} {:?} interrupted after {} bytes", m.command, partial.len());
                self.handshake(source, Handshake::Nak, out);
            }
        }
    }

    fn handshake(&self, source: Source, code: Handshake, out: &mut Outbox) {
        self.reply(source, reply::handshake(self.settings.node, code), out);
    }

    fn store_result(&self, source: Source, what: &str, result: Result<(), StoreError>, out: &mut Outbox) {
        let code = match &result {
            Ok(()) => {
                info!("{what} stored");
                Handshake::Ack
            }
            Err(StoreError::Protected) | Err(StoreError::ReadOnly) => {
                warn!("{what} refused: {result:?}");
                Handshake::Cancel
            }
            Err(e) => {
                warn!("{what} rejected: {e:?}");
                Handshake::Nak
            }
        };
        self.handshake(source, code, out);
    }

    fn run_command(
        &mut self,
        source: Source,
        m: Match,
        args: &[u8],
        bus: &mut dyn SynthBus,
        out: &mut Outbox,
    ) {
        match m.command {
            CommandId::ChannelParam | CommandId::ChannelParamSplit => {
                let value = match (m.command, args) {
                    (CommandId::ChannelParam, [_, v, ..]) => *v,
                    (CommandId::ChannelParamSplit, [_, lo, hi, ..]) => nibbles(*lo, *hi),
                    _ => return,
                };
                let channel = m.channel.unwrap_or(0);
                for i in self.listening_all(channel) {
                    self.instrument_param(i, args[0], value, bus);
                }
            }
            CommandId::SystemParam => {
                if let [p, v, ..] = args {
                    self.system_param(*p, *v, bus);
                }
            }
            CommandId::InstrumentParam => {
                let i = m.instrument.unwrap_or(0) as usize;
                match args {
                    [p, v] => self.instrument_param(i, *p, *v, bus),
                    [p, lo, hi, ..] => self.instrument_param(i, *p, nibbles(*lo, *hi), bus),
                    _ => {}
                }
            }
            CommandId::DumpRequest => {
                let kind = args.first().copied().unwrap_or(dump_kind::CONFIGURATION);
                let arg = args.get(1).copied().unwrap_or(0);
                self.dump(source, kind, arg, out);
            }
            CommandId::StoreInstrumentVoice => {
                let i = m.instrument.unwrap_or(0) as usize;
                let result = parse_frame_exact(args, Encoding::TypeA, VOICE_SIZE)
                    .ok()
                    .and_then(|data| Voice::from_bytes(&data))
                    .ok_or(StoreError::Length);
                if let (Ok(voice), Some(inst)) = (&result, self.instruments.get_mut(i)) {
                    inst.voice = voice.clone();
                    self.synth.program(inst, bus);
                }
                self.store_result(source, "instrument voice", result.map(|_| ()), out);
            }
            CommandId::StoreBank => {
                let Some((&bank, frame)) = args.split_first() else {
                    return self.handshake(source, Handshake::Nak, out);
                };
                let result = self.memory.bank_writable(bank as usize).and_then(|()| {
                    let data = parse_frame_exact(frame, Encoding::TypeA, BANK_SIZE)
                        .map_err(|_| StoreError::Length)?;
                    self.memory.store_bank(bank as usize, &data)
                });
                self.store_result(source, "voice bank", result, out);
            }
            CommandId::StoreConfig => {
                let Some((&slot, frame)) = args.split_first() else {
                    return self.handshake(source, Handshake::Nak, out);
                };
                let result = self.memory.config_writable(slot as usize).and_then(|()| {
                    let data = parse_frame_exact(frame, Encoding::TypeA, CONFIG_SIZE)
                        .map_err(|_| StoreError::Length)?;
                    self.memory.store_config(slot as usize, &data)
                });
                self.store_result(source, "configuration", result, out);
            }
            CommandId::StoreVoice => {
                let [bank, voice, frame @ ..] = args else {
                    return self.handshake(source, Handshake::Nak, out);
                };
                let (bank, voice) = (*bank as usize, *voice as usize);
                let result = self.memory.bank_writable(bank).and_then(|()| {
                    let data = parse_frame_exact(frame, Encoding::TypeA, VOICE_SIZE)
                        .map_err(|_| StoreError::Length)?;
                    self.memory.store_voice(bank, voice, &data)
                });
                self.store_result(source, "voice", result, out);
            }
            CommandId::SelectMode => match args.first() {
                Some(0) => self.set_mode(source, CardMode::Normal, out),
                Some(1) => self.set_mode(source, CardMode::Thru, out),
                _ => trace!("card mode {args:02X?} ignored"),
            },
            CommandId::FlowPath => {
                if let [p, mask, ..] = args {
                    if self.flow.set_indexed(*p, *mask) {
                        debug!("flow path {p} = {mask:02X}");
                    }
                }
            }
            CommandId::Reboot => {
                info!("reboot requested");
                self.flow = Default::default();
                self.mode = CardMode::Normal;
                self.load_configuration(self.config_slot, bus);
            }
            CommandId::Handshake => {
                debug!("{source:?} handshake {:02X?}", args.first());
            }
            CommandId::EventList => match parse_events(args) {
                Some(events) => {
                    for e in events {
                        self.apply_event(e, bus);
                    }
                }
                None => {
                    warn!("{source:?} malformed event list");
                    self.handshake(source, Handshake::Nak, out);
                }
            },
        }
    }

    fn set_mode(&mut self, source: Source, mode: CardMode, out: &mut Outbox) {
        info!("card mode {mode:?}");
        self.mode = mode;
        self.handshake(source, Handshake::Ack, out);
    }

    /// Instruments on `channel`, whether or not they own hardware channels.
    fn listening_all(&self, channel: u8) -> Vec<usize> {
        self.instruments
            .iter()
            .filter(|i| i.config.midi_channel == channel && i.config.notes > 0)
            .map(|i| i.index)
            .collect()
    }

    fn dump(&mut self, source: Source, kind: u8, arg: u8, out: &mut Outbox) {
        let payload: Option<(Vec<u8>, Encoding)> = match kind {
            dump_kind::CONFIGURATION => Some((self.config.as_bytes().to_vec(), Encoding::TypeA)),
            dump_kind::ALL_CONFIGURATIONS => Some((self.memory.all_configs(), Encoding::TypeA)),
            dump_kind::VOICE_BANK => self
                .memory
                .bank(arg as usize)
                .map(|b| (b.as_bytes().to_vec(), Encoding::TypeA)),
            dump_kind::IDENTIFICATION => Some((IDENTIFICATION.to_vec(), Encoding::TypeB)),
            dump_kind::INSTRUMENT_VOICE => self
                .instruments
                .get(arg as usize)
                .map(|i| (i.voice.as_bytes().to_vec(), Encoding::TypeA)),
            _ => None,
        };
        let framed = payload.and_then(|(data, enc)| frame(&data, enc).ok());
        match framed {
            Some(f) => {
                debug!("{source:?} dump {kind}/{arg}: {} bytes", f.len());
                self.reply(source, reply::dump(self.settings.node, kind, arg, &f), out);
            }
            None => {
                warn!("{source:?} dump {kind}/{arg} not available");
                self.handshake(source, Handshake::Nak, out);
            }
        }
    }

    /// System parameter change. Out-of-range values are ignored.
    pub(super) fn system_param(&mut self, param: u8, value: u8, bus: &mut dyn SynthBus) {
        use system_param::*;
        match param {
            NODE if value <= 0x0F => {
                info!("node number {value}");
                self.settings.node = value;
                self.rebuild_table();
            }
            MEMORY_PROTECT if value <= 1 => self.memory.set_protected(value == 1),
            CONFIG_SELECT if value <= 19 => self.load_configuration(value, bus),
            ERROR_REPORTING if value <= 1 => self.settings.error_reporting = value == 1,
            LFO_SPEED => {
                self.config.set_header(0x08, value);
                bus.write(REG_LFO_FREQ, value);
            }
            AMD => {
                self.config.set_header(0x09, value);
                bus.write(REG_LFO_PMD_AMD, value & 0x7F);
            }
            PMD => {
                self.config.set_header(0x0A, value);
                bus.write(REG_LFO_PMD_AMD, 0x80 | value);
            }
            LFO_WAVE if value <= 3 => {
                self.config.set_header(0x0B, value);
                bus.write(REG_LFO_WAVE, value);
            }
            _ => trace!("system parameter {param:02X}={value:02X} ignored"),
        }
    }

    /// Instrument parameter change: record fields 0x00-0x0E, voice bytes
    /// 0x40-0x7F. Out-of-range values are ignored.
    pub(super) fn instrument_param(&mut self, i: usize, param: u8, value: u8, bus: &mut dyn SynthBus) {
        if i >= INSTRUMENTS || i >= self.instruments.len() {
            return;
        }
        if param >= 0x40 {
            let inst = &mut self.instruments[i];
            if inst.voice.set_byte((param - 0x40) as usize, value) {
                self.synth.program(inst, bus);
            }
            return;
        }

        let mut config = self.instruments[i].config;
        if !config.set_param(param, value) {
            trace!("instrument {i} parameter {param:02X}={value:02X} ignored");
            return;
        }
        self.config.set_instrument(i, &config);
        let inst = &mut self.instruments[i];
        inst.config = config;

        match param {
            0x00 => {
                self.synth.allocate(&mut self.instruments, bus);
                self.rebuild_table();
            }
            0x01 => {
                self.synth.all_off(inst, bus);
                self.rebuild_table();
            }
            0x04 | 0x05 => {
                inst.voice = self.memory.voice(config.bank as usize, config.voice as usize);
                self.synth.program(inst, bus);
            }
            0x06 | 0x07 | 0x0C => self.synth.refresh_pitch(inst, bus),
            0x08 | 0x09 => self.synth.refresh_levels(inst, bus),
            0x0A => {
                if config.lfo {
                    inst.voice.program_lfo(bus);
                }
            }
            0x0B => inst.portamento = config.portamento != 0,
            0x0D => self.synth.all_off(inst, bus),
            _ => {}
        }
    }

    fn apply_event(&mut self, event: Event, bus: &mut dyn SynthBus) {
        match event {
            Event::NoteOff { instrument, key } => self.note_off(instrument as usize, key, bus),
            Event::NoteOn {
                instrument,
                key,
                fraction,
                velocity,
            } => self.note_on(instrument as usize, key, fraction >> 1, velocity, bus),
            Event::Control {
                instrument,
                controller,
                value,
            } => self.control(instrument as usize, controller, value, bus),
            Event::Program {
                instrument,
                program,
            } => self.program(instrument as usize, program, bus),
            Event::AfterTouch { instrument, value } => {
                self.after_touch(instrument as usize, value, bus)
            }
            Event::PitchBend { instrument, value } => {
                self.pitch_bend(instrument as usize, value, bus)
            }
            Event::Param {
                instrument,
                param,
                value,
            } => self.instrument_param(instrument as usize, param, value, bus),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::FirmwareSettings;
    use crate::sysex::codec::parse_frame;
    use crate::ym2164::registers::REG_KEY_ON;
    use std::time::Instant;

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

    fn host(fw: &mut Firmware, bus: &mut Recorder, bytes: &[u8]) -> Outbox {
        let mut out = Outbox::default();
        let now = Instant::now();
        for b in bytes {
            fw.receive(Source::Host, *b, now, bus, &mut out);
        }
        out
    }

    fn node_cmd(body: &[u8]) -> Vec<u8> {
        let mut v = vec![0xF0, 0x43, 0x75, 0x00];
        v.extend_from_slice(body);
        v.push(0xF7);
        v
    }

    const ACK: [u8; 7] = [0xF0, 0x43, 0x75, 0x00, 0x60, 0x00, 0xF7];
    const NAK: [u8; 7] = [0xF0, 0x43, 0x75, 0x00, 0x60, 0x01, 0xF7];
    const CANCEL: [u8; 7] = [0xF0, 0x43, 0x75, 0x00, 0x60, 0x02, 0xF7];

    #[test]
    fn thru_mode_is_acked() {
        let (mut fw, mut bus) = booted();
        let out = host(&mut fw, &mut bus, &node_cmd(&[0x40, 0x01]));
        assert_eq!(out.host, ACK);
        assert_eq!(fw.mode(), CardMode::Thru);
    }

    #[test]
    fn store_bank_round_trips_through_dump() {
        let (mut fw, mut bus) = booted();
        let mut image = fw.memory().bank(0).unwrap().as_bytes().to_vec();
        image[0x20 + 3] = b'Z';
        let mut cmd = vec![0x30, 0x01];
        cmd.extend(frame(&image, Encoding::TypeA).unwrap());
        let out = host(&mut fw, &mut bus, &node_cmd(&cmd));
        assert_eq!(out.host, ACK);
        assert_eq!(fw.memory().bank(1).unwrap().as_bytes(), &image[..]);

        let out = host(&mut fw, &mut bus, &node_cmd(&[0x20, 0x02, 0x01]));
        assert_eq!(out.host[..7], [0xF0, 0x43, 0x75, 0x00, 0x21, 0x02, 0x01]);
        let (data, rest) = parse_frame(&out.host[7..], Encoding::TypeA).unwrap();
        assert_eq!(data, image);
        assert_eq!(rest, [0xF7]);
    }

    #[test]
    fn protected_store_is_cancelled() {
        let (mut fw, mut bus) = booted();
        host(&mut fw, &mut bus, &node_cmd(&[0x10, 0x01, 0x01]));
        let before = fw.memory().bank(0).unwrap().clone();
        let mut cmd = vec![0x32, 0x00, 0x05];
        cmd.extend(frame(&[0x11; 64], Encoding::TypeA).unwrap());
        let out = host(&mut fw, &mut bus, &node_cmd(&cmd));
        assert_eq!(out.host, CANCEL);
        assert_eq!(fw.memory().bank(0).unwrap(), &before);
    }

    #[test]
    fn bad_checksum_is_nakked() {
        let (mut fw, mut bus) = booted();
        let mut cmd = vec![0x31, 0x03];
        let mut f = frame(&[0u8; CONFIG_SIZE], Encoding::TypeA).unwrap();
        let last = f.len() - 1;
        f[last] = (f[last] + 1) & 0x7F;
        cmd.extend(f);
        let out = host(&mut fw, &mut bus, &node_cmd(&cmd));
        assert_eq!(out.host, NAK);
    }

    #[test]
    fn interrupted_store_is_nakked() {
        let (mut fw, mut bus) = booted();
        let mut bytes = vec![0xF0, 0x43, 0x75, 0x00, 0x30, 0x00, 0x00, 0x10];
        bytes.extend_from_slice(&[0x90, 0x3C, 0x40]);
        let out = host(&mut fw, &mut bus, &bytes);
        assert_eq!(out.host, NAK);
        assert!(fw.synth().channel(0).active);
    }

    #[test]
    fn oversized_store_is_nakked() {
        let (mut fw, mut bus) = booted();
        let mut bytes = vec![0xF0, 0x43, 0x75, 0x00, 0x30, 0x00];
        bytes.extend(std::iter::repeat(0x01).take(9000));
        bytes.push(0xF7);
        let out = host(&mut fw, &mut bus, &bytes);
        assert_eq!(out.host, NAK);
    }

    #[test]
    fn instrument_params_reallocate_and_retable() {
        let (mut fw, mut bus) = booted();
        host(&mut fw, &mut bus, &node_cmd(&[0x18, 0x00, 0x04]));
        host(&mut fw, &mut bus, &node_cmd(&[0x19, 0x00, 0x04]));
        host(&mut fw, &mut bus, &node_cmd(&[0x19, 0x01, 0x05]));
        assert_eq!(fw.instruments()[0].channels, 0x0F);
        assert_eq!(fw.instruments()[1].channels, 0xF0);
        assert_eq!(fw.configuration().instrument(1).midi_channel, 5);

        // channel 5 now addresses instrument 1
        host(&mut fw, &mut bus, &[0xF0, 0x43, 0x15, 0x0C, 0x08, 0x10, 0xF7]);
        assert_eq!(fw.instruments()[1].config.level, 0x10);
        host(&mut fw, &mut bus, &[0xF0, 0x43, 0x15, 0x15, 0x09, 0x01, 0x02, 0xF7]);
        assert_eq!(fw.instruments()[1].config.pan, 0x21);
    }

    #[test]
    fn system_params_select_configuration_and_node() {
        let (mut fw, mut bus) = booted();
        host(&mut fw, &mut bus, &node_cmd(&[0x10, 0x02, 17]));
        assert_eq!(fw.config_slot(), 17);
        assert_eq!(fw.instruments()[7].channels, 0x80);
        host(&mut fw, &mut bus, &node_cmd(&[0x10, 0x02, 40]));
        assert_eq!(fw.config_slot(), 17);

        host(&mut fw, &mut bus, &node_cmd(&[0x10, 0x00, 0x05]));
        assert_eq!(fw.node(), 5);
        let out = host(&mut fw, &mut bus, &node_cmd(&[0x40, 0x01]));
        assert!(out.is_empty());
    }

    #[test]
    fn event_list_plays_instruments() {
        let (mut fw, mut bus) = booted();
        host(&mut fw, &mut bus, &node_cmd(&[0x70, 0x10, 0x3C, 0x40, 0x60, 0x00, 0x50]));
        assert!(fw.synth().channel(0).active);
        assert_eq!(fw.instruments()[0].pitchbend, 0x2800);
        bus.0.clear();
        host(&mut fw, &mut bus, &node_cmd(&[0x70, 0x00, 0x3C]));
        assert!(bus.0.contains(&(REG_KEY_ON, 0)));
        assert!(!fw.synth().channel(0).active);
        let out = host(&mut fw, &mut bus, &node_cmd(&[0x70, 0x10, 0x3C]));
        assert_eq!(out.host, NAK);
    }

    #[test]
    fn identification_uses_type_b() {
        let (mut fw, mut bus) = booted();
        let out = host(&mut fw, &mut bus, &node_cmd(&[0x20, 0x03, 0x00]));
        let (data, _) = parse_frame(&out.host[7..], Encoding::TypeB).unwrap();
        assert_eq!(data, IDENTIFICATION);
    }
}
