//! Card memory: voice banks, configuration slots and memory protect.
//!
//! Banks 0 and 1 and the 16 configuration slots are RAM; banks 2-6 and the
//! configurations selected as 16-19 are read-only and generated at
//! construction.

use super::voice::{preset_voice, Voice, VOICE_SIZE};

/// Voice bank image size.
pub const BANK_SIZE: usize = 0xC20;
/// Bank header size.
pub const BANK_HEADER: usize = 0x20;
/// Voices per bank.
pub const VOICES_PER_BANK: usize = 48;
/// Number of banks.
pub const BANK_COUNT: usize = 7;
/// Writable banks (0 and 1).
pub const CUSTOM_BANKS: usize = 2;
/// Configuration image size.
pub const CONFIG_SIZE: usize = 0xA0;
/// Configuration header size.
pub const CONFIG_HEADER: usize = 0x20;
/// Instrument record size.
pub const INSTRUMENT_RECORD: usize = 16;
/// Instruments per configuration.
pub const INSTRUMENTS: usize = 8;
/// RAM configuration slots.
pub const CONFIG_SLOTS: usize = 16;
/// Read-only preset configurations, selected as 16-19.
pub const PRESET_CONFIGS: usize = 4;

/// Why a store was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Memory protect is on.
    Protected,
    /// The target is a read-only preset.
    ReadOnly,
    /// No such target.
    OutOfRange,
    /// The payload does not have the target's size.
    Length,
}

/// Octave shift value meaning "none".
pub const OCTAVE_NONE: u8 = 2;

/// Decoded instrument record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentConfig {
    /// Hardware channels requested (0-8).
    pub notes: u8,
    /// MIDI receive channel.
    pub midi_channel: u8,
    /// Highest key played.
    pub key_high: u8,
    /// Lowest key played.
    pub key_low: u8,
    /// Voice bank.
    pub bank: u8,
    /// Voice number in the bank.
    pub voice: u8,
    /// Detune in 1/64 semitones.
    pub detune: i8,
    /// Octave shift, 2 = none.
    pub octave: u8,
    /// Output level.
    pub level: u8,
    /// Pan position, 0 left, 0x40 centre, 0x7F right.
    pub pan: u8,
    /// LFO enable.
    pub lfo: bool,
    /// Portamento time, 0 = off.
    pub portamento: u8,
    /// Pitchbend range in semitones.
    pub pitchbend_range: u8,
    /// Mono (true) or poly.
    pub mono: bool,
    /// Controller driving PMD (0 none, 1 modulation wheel, 2 breath,
    /// 3 foot, 4 after-touch).
    pub pmd_controller: u8,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            notes: 0,
            midi_channel: 0,
            key_high: 0x7F,
            key_low: 0,
            bank: 2,
            voice: 0,
            detune: 0,
            octave: OCTAVE_NONE,
            level: 0x7F,
            pan: 0x40,
            lfo: true,
            portamento: 0,
            pitchbend_range: 2,
            mono: false,
            pmd_controller: 1,
        }
    }
}

impl InstrumentConfig {
    /// Decode a 16-byte record.
    pub fn from_record(r: &[u8]) -> Self {
        Self {
            notes: r[0].min(8),
            midi_channel: r[1] & 0x0F,
            key_high: r[2] & 0x7F,
            key_low: r[3] & 0x7F,
            bank: r[4].min(BANK_COUNT as u8 - 1),
            voice: r[5].min(VOICES_PER_BANK as u8 - 1),
            detune: seven_bit_signed(r[6]),
            octave: r[7].min(4),
            level: r[8] & 0x7F,
            pan: r[9] & 0x7F,
            lfo: r[10] != 0,
            portamento: r[11] & 0x7F,
            pitchbend_range: r[12].min(12),
            mono: r[13] != 0,
            pmd_controller: r[14].min(4),
        }
    }

    /// Encode as a 16-byte record.
    pub fn to_record(&self) -> [u8; INSTRUMENT_RECORD] {
        [
            self.notes,
            self.midi_channel,
            self.key_high,
            self.key_low,
            self.bank,
            self.voice,
            (self.detune as u8) & 0x7F,
            self.octave,
            self.level,
            self.pan,
            self.lfo as u8,
            self.portamento,
            self.pitchbend_range,
            self.mono as u8,
            self.pmd_controller,
            0,
        ]
    }

    /// Apply instrument parameter `param` (0x00-0x0E).
    ///
    /// Out-of-range parameters or values leave the record unchanged and
    /// return `false`.
    pub fn set_param(&mut self, param: u8, value: u8) -> bool {
        let in_range = |max: u8| value <= max;
        match param {
            0x00 if in_range(8) => self.notes = value,
            0x01 if in_range(15) => self.midi_channel = value,
            0x02 if in_range(127) => self.key_high = value,
            0x03 if in_range(127) => self.key_low = value,
            0x04 if in_range(BANK_COUNT as u8 - 1) => self.bank = value,
            0x05 if in_range(VOICES_PER_BANK as u8 - 1) => self.voice = value,
            0x06 if in_range(127) => self.detune = seven_bit_signed(value),
            0x07 if in_range(4) => self.octave = value,
            0x08 if in_range(127) => self.level = value,
            0x09 if in_range(127) => self.pan = value,
            0x0A if in_range(1) => self.lfo = value != 0,
            0x0B if in_range(127) => self.portamento = value,
            0x0C if in_range(12) => self.pitchbend_range = value,
            0x0D if in_range(1) => self.mono = value != 0,
            0x0E if in_range(4) => self.pmd_controller = value,
            _ => return false,
        }
        true
    }

    /// True if `key` lies in the instrument's key range.
    pub fn accepts(&self, key: u8) -> bool {
        (self.key_low..=self.key_high).contains(&key)
    }
}

fn seven_bit_signed(v: u8) -> i8 {
    (((v & 0x7F) << 1) as i8) >> 1
}

/// A configuration image: header plus eight instrument records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    bytes: Vec<u8>,
}

impl Configuration {
    /// Configuration with every instrument silent.
    pub fn new(name: &str) -> Self {
        let mut c = Self {
            bytes: vec![0; CONFIG_SIZE],
        };
        c.set_name(name);
        c.bytes[0x08] = 0xC0;
        c.bytes[0x0B] = 2;
        for i in 0..INSTRUMENTS {
            c.set_instrument(
                i,
                &InstrumentConfig {
                    midi_channel: i as u8,
                    ..Default::default()
                },
            );
        }
        c
    }

    /// Copy from a raw image.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        (bytes.len() == CONFIG_SIZE).then(|| Self {
            bytes: bytes.to_vec(),
        })
    }

    /// Raw image.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Name with trailing blanks removed.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.bytes[..8]).trim_end().to_string()
    }

    /// Set the 8-character name.
    pub fn set_name(&mut self, name: &str) {
        let mut field = [b' '; 8];
        for (d, s) in field.iter_mut().zip(name.bytes()) {
            *d = s;
        }
        self.bytes[..8].copy_from_slice(&field);
    }

    /// LFO speed.
    pub fn lfo_speed(&self) -> u8 {
        self.bytes[0x08]
    }

    /// Amplitude modulation depth.
    pub fn amd(&self) -> u8 {
        self.bytes[0x09] & 0x7F
    }

    /// Pitch modulation depth.
    pub fn pmd(&self) -> u8 {
        self.bytes[0x0A] & 0x7F
    }

    /// LFO waveform.
    pub fn lfo_wave(&self) -> u8 {
        self.bytes[0x0B] & 3
    }

    /// Set a header byte (LFO speed 0x08 through waveform 0x0B).
    pub fn set_header(&mut self, offset: usize, value: u8) {
        if (0x08..=0x0B).contains(&offset) {
            self.bytes[offset] = value;
        }
    }

    /// Decoded instrument record.
    pub fn instrument(&self, i: usize) -> InstrumentConfig {
        let at = CONFIG_HEADER + (i % INSTRUMENTS) * INSTRUMENT_RECORD;
        InstrumentConfig::from_record(&self.bytes[at..at + INSTRUMENT_RECORD])
    }

    /// Replace an instrument record.
    pub fn set_instrument(&mut self, i: usize, config: &InstrumentConfig) {
        let at = CONFIG_HEADER + (i % INSTRUMENTS) * INSTRUMENT_RECORD;
        self.bytes[at..at + INSTRUMENT_RECORD].copy_from_slice(&config.to_record());
    }
}

/// A voice bank image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceBank {
    bytes: Vec<u8>,
}

impl VoiceBank {
    /// Bank of 48 copies of the initial voice.
    pub fn new(name: &str) -> Self {
        let mut b = Self {
            bytes: vec![0; BANK_SIZE],
        };
        b.set_name(name);
        let init = Voice::default();
        for i in 0..VOICES_PER_BANK {
            b.set_voice(i, &init);
        }
        b
    }

    /// Copy from a raw image.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        (bytes.len() == BANK_SIZE).then(|| Self {
            bytes: bytes.to_vec(),
        })
    }

    /// Raw image.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Bank name.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.bytes[..8]).trim_end().to_string()
    }

    fn set_name(&mut self, name: &str) {
        let mut field = [b' '; 8];
        for (d, s) in field.iter_mut().zip(name.bytes()) {
            *d = s;
        }
        self.bytes[..8].copy_from_slice(&field);
    }

    /// Voice `i` (0-47).
    pub fn voice(&self, i: usize) -> Voice {
        let at = BANK_HEADER + (i % VOICES_PER_BANK) * VOICE_SIZE;
        Voice::from_bytes(&self.bytes[at..at + VOICE_SIZE]).unwrap_or_default()
    }

    /// Replace voice `i`.
    pub fn set_voice(&mut self, i: usize, voice: &Voice) {
        let at = BANK_HEADER + (i % VOICES_PER_BANK) * VOICE_SIZE;
        self.bytes[at..at + VOICE_SIZE].copy_from_slice(voice.as_bytes());
    }
}

/// Every voice bank and configuration slot of the card.
#[derive(Debug, Clone)]
pub struct CardMemory {
    banks: Vec<VoiceBank>,
    configs: Vec<Configuration>,
    presets: Vec<Configuration>,
    protect: bool,
}

impl Default for CardMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl CardMemory {
    /// Factory contents: two blank custom banks, generated preset banks,
    /// RAM slots initialised from the first preset configuration.
    pub fn new() -> Self {
        let mut banks: Vec<VoiceBank> = (0..CUSTOM_BANKS)
            .map(|b| VoiceBank::new(&format!("Custom {b}")))
            .collect();
        for b in CUSTOM_BANKS..BANK_COUNT {
            let mut bank = VoiceBank::new(&format!("Preset {b}"));
            for v in 0..VOICES_PER_BANK {
                bank.set_voice(v, &preset_voice(b as u8, v as u8));
            }
            banks.push(bank);
        }

        let presets = preset_configurations();
        let configs = (0..CONFIG_SLOTS)
            .map(|s| {
                let mut c = presets[0].clone();
                c.set_name(&format!("Config{s:02}"));
                c
            })
            .collect();

        Self {
            banks,
            configs,
            presets,
            protect: false,
        }
    }

    /// Memory protect state.
    pub fn protected(&self) -> bool {
        self.protect
    }

    /// Set memory protect.
    pub fn set_protected(&mut self, on: bool) {
        self.protect = on;
    }

    /// Bank `b` (0-6).
    pub fn bank(&self, b: usize) -> Option<&VoiceBank> {
        self.banks.get(b)
    }

    /// Voice `v` of bank `b`, falling back to the initial voice.
    pub fn voice(&self, b: usize, v: usize) -> Voice {
        self.banks.get(b).map(|bank| bank.voice(v)).unwrap_or_default()
    }

    /// Configuration `slot` (0-15 RAM, 16-19 presets).
    pub fn config(&self, slot: usize) -> Option<&Configuration> {
        if slot < CONFIG_SLOTS {
            self.configs.get(slot)
        } else {
            self.presets.get(slot - CONFIG_SLOTS)
        }
    }

    /// All RAM configuration slots back to back.
    pub fn all_configs(&self) -> Vec<u8> {
        self.configs.iter().flat_map(|c| c.as_bytes().to_vec()).collect()
    }

    fn check_bank(&self, b: usize) -> Result<(), StoreError> {
        if b >= BANK_COUNT {
            return Err(StoreError::OutOfRange);
        }
        if b >= CUSTOM_BANKS {
            return Err(StoreError::ReadOnly);
        }
        if self.protect {
            return Err(StoreError::Protected);
        }
        Ok(())
    }

    /// Check whether bank `b` accepts a store, without storing.
    pub fn bank_writable(&self, b: usize) -> Result<(), StoreError> {
        self.check_bank(b)
    }

    /// Check whether configuration slot `s` accepts a store.
    pub fn config_writable(&self, s: usize) -> Result<(), StoreError> {
        if s >= CONFIG_SLOTS + PRESET_CONFIGS {
            return Err(StoreError::OutOfRange);
        }
        if s >= CONFIG_SLOTS {
            return Err(StoreError::ReadOnly);
        }
        if self.protect {
            return Err(StoreError::Protected);
        }
        Ok(())
    }

    /// Replace a whole custom bank.
    pub fn store_bank(&mut self, b: usize, bytes: &[u8]) -> Result<(), StoreError> {
        self.check_bank(b)?;
        let bank = VoiceBank::from_bytes(bytes).ok_or(StoreError::Length)?;
        self.banks[b] = bank;
        Ok(())
    }

    /// Replace one voice of a custom bank.
    pub fn store_voice(&mut self, b: usize, v: usize, bytes: &[u8]) -> Result<(), StoreError> {
        self.check_bank(b)?;
        if v >= VOICES_PER_BANK {
            return Err(StoreError::OutOfRange);
        }
        let voice = Voice::from_bytes(bytes).ok_or(StoreError::Length)?;
        self.banks[b].set_voice(v, &voice);
        Ok(())
    }

    /// Replace a RAM configuration slot.
    pub fn store_config(&mut self, s: usize, bytes: &[u8]) -> Result<(), StoreError> {
        self.config_writable(s)?;
        let config = Configuration::from_bytes(bytes).ok_or(StoreError::Length)?;
        self.configs[s] = config;
        Ok(())
    }
}

fn preset_configurations() -> Vec<Configuration> {
    // (name, notes per instrument)
    let layouts: [(&str, [u8; INSTRUMENTS]); PRESET_CONFIGS] = [
        ("Poly 8", [8, 0, 0, 0, 0, 0, 0, 0]),
        ("Multi 8", [1, 1, 1, 1, 1, 1, 1, 1]),
        ("Quad", [2, 2, 2, 2, 0, 0, 0, 0]),
        ("Split", [4, 4, 0, 0, 0, 0, 0, 0]),
    ];
    layouts
        .iter()
        .enumerate()
        .map(|(p, (name, notes))| {
            let mut c = Configuration::new(name);
            for (i, n) in notes.iter().enumerate() {
                let mut inst = c.instrument(i);
                inst.notes = *n;
                inst.bank = (2 + (p + i) % 5) as u8;
                inst.voice = (i * 6) as u8;
                if p == 3 {
                    inst.midi_channel = 0;
                    if i == 0 {
                        inst.key_low = 60;
                    } else {
                        inst.key_high = 59;
                    }
                }
                c.set_instrument(i, &inst);
            }
            c
        })
        .collect()
}
