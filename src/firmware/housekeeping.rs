//! Periodic chores run from the firmware loop between input bytes.

use std::time::Instant;

use log::{debug, warn};

use crate::midi::{Source, ACTIVE_SENSING};
use crate::sysex::reply::{self, Diagnostic};

use super::engine::Firmware;
use super::Outbox;

/// What a housekeeping pass noticed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Chores {
    /// MIDI IN stopped after active sensing had been seen.
    pub went_offline: bool,
    /// Exclusive messages abandoned for silence, per source.
    pub timed_out: [bool; 2],
    /// An active-sensing byte was queued for MIDI OUT.
    pub keep_alive: bool,
}

impl Firmware {
    /// Exclusive timeouts, MIDI OUT keep-alive and MIDI IN offline detection.
    pub fn housekeeping(&mut self, now: Instant, out: &mut Outbox) -> Chores {
        let mut chores = Chores::default();

        for source in [Source::MidiIn, Source::Host] {
            let idx = source as usize;
            let Some(since) = self.sysex_since[idx] else {
                continue;
            };
            if now.saturating_duration_since(since) < self.settings.sysex_timeout {
                continue;
            }
            self.sysex_since[idx] = None;
            if let Some(partial) = self.parsers[idx].abort_sysex() {
                warn!("{source:?} exclusive timed out after {} bytes", partial.len());
                self.sysex_aborted(source, &partial, out);
                self.transport_error(Diagnostic::SysexTimeout, out);
                chores.timed_out[idx] = true;
            }
        }

        let keep_alive = self.settings.keep_alive;
        if !keep_alive.is_zero() {
            match self.last_midi_out {
                Some(t) if now.saturating_duration_since(t) < keep_alive => {}
                Some(_) => {
                    out.midi_out.push(ACTIVE_SENSING);
                    self.last_midi_out = Some(now);
                    chores.keep_alive = true;
                }
                None => self.last_midi_out = Some(now),
            }
        }

        if let Some(t) = self.last_sensing {
            if !self.offline && now.saturating_duration_since(t) > self.settings.offline_after {
                warn!("MIDI IN offline");
                self.offline = true;
                self.transport_error(Diagnostic::Offline, out);
                chores.went_offline = true;
            }
        }
        chores
    }

    /// Report a transport error to the host when error reporting is on.
    pub fn transport_error(&self, code: Diagnostic, out: &mut Outbox) {
        if !self.settings.error_reporting {
            debug!("{code:?} not reported");
            return;
        }
        out.host.extend(reply::diagnostic(self.settings.node, code));
    }

    /// MIDI IN is silent after active sensing.
    pub fn is_offline(&self) -> bool {
        self.offline
    }
}
