//! Byte-stream parser driving one [`ParserState`] machine.

use log::{trace, warn};

use super::routing::RouteMask;
use super::states::{data_state, status_state, ParserState};

/// A completed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiMessage {
    /// Message bytes, status first.
    pub bytes: Vec<u8>,
    /// Terminal state (or classification for a stray EOX).
    pub state: ParserState,
    /// Category for flow-path routing.
    pub route: RouteMask,
}

impl MidiMessage {
    /// Status byte.
    pub fn status(&self) -> u8 {
        self.bytes.first().copied().unwrap_or(0)
    }

    /// True for a complete system exclusive message.
    pub fn is_sysex(&self) -> bool {
        self.state == ParserState::SysexDone
    }
}

/// Leading bytes of an overflowing exclusive message that are kept, enough
/// for the command table to still identify it when the abort is reported.
const KEPT_HEADER: usize = 8;

/// Outcome of feeding one byte.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Feed {
    /// Partial exclusive message cut off by a status byte or an overflow.
    pub aborted: Option<Vec<u8>>,
    /// Message completed by this byte.
    pub message: Option<MidiMessage>,
}

impl Feed {
    fn is_empty(&self) -> bool {
        self.aborted.is_none() && self.message.is_none()
    }
}

/// One MIDI data packet: accumulated bytes plus parser state.
#[derive(Debug, Clone)]
pub struct MidiParser {
    name: &'static str,
    state: ParserState,
    /// State to resume after an interleaved real-time byte.
    resume: Option<ParserState>,
    running_status: u8,
    group: Option<u8>,
    buf: Vec<u8>,
    overflowed: bool,
}

impl MidiParser {
    /// Idle parser. `name` appears in log output.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: ParserState::Idle,
            resume: None,
            running_status: 0,
            group: None,
            buf: Vec::with_capacity(64),
            overflowed: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// An exclusive message is open, even if a real-time byte interleaved.
    pub fn in_sysex(&self) -> bool {
        self.resume.unwrap_or(self.state).in_sysex()
    }

    /// Bytes of the message being accumulated.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    /// Drop any partial message and return to idle.
    pub fn reset(&mut self) {
        self.state = ParserState::Idle;
        self.resume = None;
        self.running_status = 0;
        self.group = None;
        self.buf.clear();
        self.overflowed = false;
    }

    /// Abandon an open exclusive message, returning its bytes.
    pub fn abort_sysex(&mut self) -> Option<Vec<u8>> {
        let open = self.resume.unwrap_or(self.state);
        if !open.in_sysex() {
            return None;
        }
        let partial = std::mem::take(&mut self.buf);
        self.reset();
        Some(partial)
    }

    /// Feed one byte.
    pub fn feed(&mut self, byte: u8) -> Feed {
        let feed = if byte & 0x80 != 0 {
            self.feed_status(byte)
        } else {
            self.feed_data(byte)
        };
        if !feed.is_empty() {
            trace!("{}: {:02X} -> {:?}", self.name, byte, self.state);
        }
        feed
    }

    fn feed_status(&mut self, byte: u8) -> Feed {
        let next = status_state(byte);
        let mut feed = Feed::default();

        if next.is_realtime() {
            // Real-time bytes interleave without disturbing an open message.
            if !self.state.is_realtime() {
                self.resume = Some(self.state);
            }
            self.state = next;
            feed.message = Some(MidiMessage {
                bytes: vec![byte],
                state: next,
                route: RouteMask::REALTIME,
            });
            return feed;
        }

        let open = self.resume.take().unwrap_or(self.state);
        self.state = next;
        self.group = None;

        if next == ParserState::SysexDone {
            if open.in_sysex() {
                if self.overflowed {
                    warn!("{}: exclusive message exceeded its framing capacity", self.name);
                    feed.aborted = Some(std::mem::take(&mut self.buf));
                } else {
                    let mut bytes = std::mem::take(&mut self.buf);
                    bytes.push(byte);
                    feed.message = Some(MidiMessage {
                        bytes,
                        state: next,
                        route: RouteMask::SYSEX,
                    });
                }
            } else {
                self.buf.clear();
                feed.message = Some(MidiMessage {
                    bytes: vec![byte],
                    state: ParserState::StrayEox,
                    route: RouteMask::empty(),
                });
            }
            self.overflowed = false;
            self.running_status = 0;
            return feed;
        }

        if open.in_sysex() {
            let partial = std::mem::take(&mut self.buf);
            trace!("{}: exclusive message aborted after {} bytes", self.name, partial.len());
            feed.aborted = Some(partial);
        }
        self.overflowed = false;
        self.buf.clear();
        self.buf.push(byte);

        if byte < 0xF0 {
            self.running_status = byte;
        } else {
            self.running_status = 0;
        }
        feed.message = self.complete();
        feed
    }

    fn feed_data(&mut self, byte: u8) -> Feed {
        if let Some(resume) = self.resume.take() {
            self.state = resume;
        }
        let prev = self.state;
        let next = data_state(prev, byte, self.group);

        if prev.in_sysex() {
            if next == ParserState::ParamGroup {
                self.group = Some(byte);
            }
            if self.overflowed || self.buf.len() >= next.sysex_capacity() {
                if !self.overflowed {
                    warn!(
                        "{}: exclusive message longer than {} bytes dropped",
                        self.name,
                        next.sysex_capacity()
                    );
                }
                self.overflowed = true;
                self.buf.truncate(KEPT_HEADER);
                self.state = ParserState::SysexOverflow;
                return Feed::default();
            }
            self.buf.push(byte);
            self.state = next;
            return Feed::default();
        }

        self.state = next;
        match (prev.termination(), next) {
            (_, ParserState::Idle) | (_, ParserState::Undefined) => {
                self.buf.clear();
                Feed::default()
            }
            (Some(_), _) => {
                // Running status: start a new message from the saved status.
                self.buf.clear();
                self.buf.push(self.running_status);
                self.buf.push(byte);
                Feed {
                    aborted: None,
                    message: self.complete(),
                }
            }
            (None, _) => {
                self.buf.push(byte);
                Feed {
                    aborted: None,
                    message: self.complete(),
                }
            }
        }
    }

    fn complete(&mut self) -> Option<MidiMessage> {
        let term = self.state.termination()?;
        debug_assert!(term.length == 0 || term.length == self.buf.len());
        Some(MidiMessage {
            bytes: std::mem::take(&mut self.buf),
            state: self.state,
            route: term.route,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(p: &mut MidiParser, bytes: &[u8]) -> Vec<Feed> {
        bytes
            .iter()
            .map(|b| p.feed(*b))
            .filter(|f| !f.is_empty())
            .collect()
    }

    fn messages(p: &mut MidiParser, bytes: &[u8]) -> Vec<Vec<u8>> {
        feed_all(p, bytes)
            .into_iter()
            .filter_map(|f| f.message.map(|m| m.bytes))
            .collect()
    }

    #[test]
    fn note_on_is_one_three_byte_message() {
        let mut p = MidiParser::new("t");
        let out = feed_all(&mut p, &[0x90, 0x3C, 0x40]);
        assert_eq!(out.len(), 1);
        let msg = out[0].message.as_ref().unwrap();
        assert_eq!(msg.bytes, vec![0x90, 0x3C, 0x40]);
        assert_eq!(msg.state, ParserState::NoteOnDone);
        assert_eq!(msg.route, RouteMask::CHANNEL);
    }

    #[test]
    fn running_status_repeats_messages() {
        let mut p = MidiParser::new("t");
        let out = messages(&mut p, &[0x91, 0x40, 0x7F, 0x41, 0x7F, 0xC2, 0x05, 0x06]);
        assert_eq!(
            out,
            vec![
                vec![0x91, 0x40, 0x7F],
                vec![0x91, 0x41, 0x7F],
                vec![0xC2, 0x05],
                vec![0xC2, 0x06],
            ]
        );
    }

    #[test]
    fn status_byte_state_ignores_history() {
        let prefixes: [&[u8]; 5] = [
            &[],
            &[0x90, 0x3C],
            &[0xF0, 0x43, 0x75, 0x00, 0x30],
            &[0xF2, 0x01],
            &[0xF0, 0x43, 0x12, 0x15, 0x01, 0x02],
        ];
        for status in 0x80..=0xFFu8 {
            let mut expected = None;
            for prefix in prefixes {
                let mut p = MidiParser::new("t");
                feed_all(&mut p, prefix);
                p.feed(status);
                let s = p.state();
                assert_eq!(s, status_state(status), "status {status:02X}");
                if let Some(e) = expected {
                    assert_eq!(s, e);
                }
                expected = Some(s);
            }
        }
    }

    #[test]
    fn realtime_does_not_break_a_message() {
        let mut p = MidiParser::new("t");
        let out = messages(&mut p, &[0x90, 0x3C, 0xF8, 0x40]);
        assert_eq!(out, vec![vec![0xF8], vec![0x90, 0x3C, 0x40]]);

        let mut p = MidiParser::new("t");
        let out = messages(&mut p, &[0xF0, 0x43, 0xFE, 0x75, 0x00, 0x42, 0xF7]);
        assert_eq!(out, vec![vec![0xFE], vec![0xF0, 0x43, 0x75, 0x00, 0x42, 0xF7]]);
    }

    #[test]
    fn sysex_framing_is_classified() {
        let mut p = MidiParser::new("t");
        for b in [0xF0, 0x43, 0x75, 0x01] {
            p.feed(b);
        }
        assert_eq!(p.state(), ParserState::Node);
        p.feed(0x40);
        assert_eq!(p.state(), ParserState::NodeControl);
        p.feed(0x01);
        assert_eq!(p.state(), ParserState::NodeControlBody);
        let f = p.feed(0xF7);
        let m = f.message.unwrap();
        assert!(m.is_sysex());
        assert_eq!(m.bytes, vec![0xF0, 0x43, 0x75, 0x01, 0x40, 0x01, 0xF7]);

        let mut p = MidiParser::new("t");
        for b in [0xF0, 0x43, 0x10, 0x15, 0x20, 0x03] {
            p.feed(b);
        }
        assert_eq!(p.state(), ParserState::ParamValueLo);
        p.feed(0x04);
        assert_eq!(p.state(), ParserState::ParamValue);
    }

    #[test]
    fn status_mid_sysex_aborts() {
        let mut p = MidiParser::new("t");
        let out = feed_all(&mut p, &[0xF0, 0x43, 0x75, 0x00, 0x30, 0x00, 0x90, 0x3C, 0x40]);
        assert_eq!(out.len(), 2);
        assert_eq!(
            out[0].aborted.as_deref(),
            Some(&[0xF0, 0x43, 0x75, 0x00, 0x30, 0x00][..])
        );
        assert!(out[0].message.is_none());
        assert_eq!(out[1].message.as_ref().unwrap().bytes, vec![0x90, 0x3C, 0x40]);
    }

    #[test]
    fn stray_eox_is_unrouted() {
        let mut p = MidiParser::new("t");
        let f = p.feed(0xF7);
        let m = f.message.unwrap();
        assert_eq!(m.state, ParserState::StrayEox);
        assert!(m.route.is_empty());
        assert_eq!(p.state(), ParserState::SysexDone);
    }

    #[test]
    fn oversized_sysex_aborts_at_eox() {
        let mut p = MidiParser::new("t");
        p.feed(0xF0);
        p.feed(0x43);
        p.feed(0x10);
        for _ in 0..40 {
            p.feed(0x01);
        }
        assert_eq!(p.state(), ParserState::SysexOverflow);
        let f = p.feed(0xF7);
        assert!(f.message.is_none());
        assert_eq!(f.aborted.unwrap(), [0xF0, 0x43, 0x10, 0x01, 0x01, 0x01, 0x01, 0x01]);
        assert_eq!(messages(&mut p, &[0x80, 0x3C, 0x00]), vec![vec![0x80, 0x3C, 0x00]]);
    }

    #[test]
    fn data_after_system_common_is_ignored() {
        let mut p = MidiParser::new("t");
        let out = messages(&mut p, &[0xF3, 0x02, 0x03, 0x04]);
        assert_eq!(out, vec![vec![0xF3, 0x02]]);
        assert_eq!(p.state(), ParserState::Idle);
    }
}
