//! Card configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::firmware::FirmwareSettings;
use crate::pit::DEFAULT_PIT_CLOCK;
use crate::transport::cyclic::MIN_CAPACITY;
use crate::ym2164::chip::DEFAULT_MASTER_CLOCK;
use crate::{MfcError, Result};

/// Capacities of the four data-path buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSizes {
    /// MIDI IN wire to firmware.
    pub midi_in: usize,
    /// Firmware to MIDI OUT wire.
    pub midi_out: usize,
    /// Host bus to firmware.
    pub host_to_card: usize,
    /// Firmware to host bus.
    pub card_to_host: usize,
}

impl Default for BufferSizes {
    fn default() -> Self {
        Self {
            midi_in: 0x100,
            midi_out: 0x100,
            host_to_card: 0x2000,
            card_to_host: 0x2000,
        }
    }
}

/// Everything needed to build a card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardConfig {
    /// First I/O port of the card.
    pub base_port: u16,
    /// Host interrupt line.
    pub irq: u8,
    /// FM chip master clock in Hz.
    pub master_clock: u32,
    /// 8253 input clock in Hz.
    pub pit_clock: u32,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Node number answered in exclusive messages.
    pub node: u8,
    /// Data-path buffer capacities.
    pub buffers: BufferSizes,
    /// How long a push into a full output buffer may block.
    pub output_timeout_ms: u64,
    /// Longest gap inside an exclusive message.
    pub sysex_timeout_ms: u64,
    /// Idle time before an active-sensing byte on MIDI OUT; 0 disables.
    pub keep_alive_ms: u64,
    /// Silence on MIDI IN after active sensing before it counts as offline.
    pub offline_ms: u64,
    /// Longest idle wait for host input at the end of each firmware loop
    /// iteration.
    pub firmware_sleep_us: u64,
    /// Report transport errors to the host at boot.
    pub error_reporting: bool,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            base_port: 0x2A20,
            irq: 3,
            master_clock: DEFAULT_MASTER_CLOCK,
            pit_clock: DEFAULT_PIT_CLOCK,
            sample_rate: 44_100,
            node: 0,
            buffers: BufferSizes::default(),
            output_timeout_ms: 1000,
            sysex_timeout_ms: 2000,
            keep_alive_ms: 250,
            offline_ms: 300,
            firmware_sleep_us: 500,
            error_reporting: true,
        }
    }
}

impl CardConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: CardConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the card cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(MfcError::ConfigError("sample rate must be non-zero".into()));
        }
        if self.master_clock == 0 || self.pit_clock == 0 {
            return Err(MfcError::ConfigError("clocks must be non-zero".into()));
        }
        if self.node > 0x0F {
            return Err(MfcError::ConfigError(format!(
                "node number {} is above 15",
                self.node
            )));
        }
        if self.irq > 15 {
            return Err(MfcError::ConfigError(format!("IRQ {} is above 15", self.irq)));
        }
        let b = &self.buffers;
        for (name, cap) in [
            ("midi-in", b.midi_in),
            ("midi-out", b.midi_out),
            ("host-to-card", b.host_to_card),
            ("card-to-host", b.card_to_host),
        ] {
            if cap < MIN_CAPACITY {
                return Err(MfcError::ConfigError(format!(
                    "{name} buffer capacity {cap} is below {MIN_CAPACITY}"
                )));
            }
        }
        if self.output_timeout_ms == 0 {
            return Err(MfcError::ConfigError("output timeout must be non-zero".into()));
        }
        Ok(())
    }

    /// Port offset of `port` inside the card's window, if it belongs to the card.
    pub fn port_offset(&self, port: u16) -> Option<u8> {
        port.checked_sub(self.base_port)
            .filter(|off| *off < 0x10)
            .map(|off| off as u8)
    }

    /// Output buffer push timeout.
    pub fn output_timeout(&self) -> Duration {
        Duration::from_millis(self.output_timeout_ms)
    }

    /// Firmware loop idle wait.
    pub fn firmware_sleep(&self) -> Duration {
        Duration::from_micros(self.firmware_sleep_us)
    }

    /// Firmware tunables derived from this configuration.
    pub fn firmware_settings(&self) -> FirmwareSettings {
        FirmwareSettings {
            node: self.node,
            error_reporting: self.error_reporting,
            sysex_timeout: Duration::from_millis(self.sysex_timeout_ms),
            keep_alive: Duration::from_millis(self.keep_alive_ms),
            offline_after: Duration::from_millis(self.offline_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let c = CardConfig::default();
        c.validate().unwrap();
        assert_eq!(c.buffers.host_to_card, 0x2000);
        assert_eq!(c.port_offset(0x2A24), Some(4));
        assert_eq!(c.port_offset(0x2A30), None);
        assert_eq!(c.port_offset(0x0220), None);
    }

    #[test]
    fn json_fills_missing_fields() {
        let c = CardConfig::from_json(r#"{ "node": 3, "buffers": { "midi_in": 64 } }"#).unwrap();
        assert_eq!(c.node, 3);
        assert_eq!(c.buffers.midi_in, 64);
        assert_eq!(c.buffers.midi_out, 0x100);
        assert_eq!(c.sample_rate, 44_100);
    }

    #[test]
    fn rejects_impossible_values() {
        assert!(matches!(
            CardConfig::from_json(r#"{ "node": 16 }"#),
            Err(MfcError::ConfigError(_))
        ));
        assert!(matches!(
            CardConfig::from_json(r#"{ "buffers": { "card_to_host": 1 } }"#),
            Err(MfcError::ConfigError(_))
        ));
        assert!(matches!(
            CardConfig::from_json("{ not json"),
            Err(MfcError::ConfigParse(_))
        ));
    }
}
