//! Event-list payloads: packed note and controller events addressed by
//! instrument number rather than MIDI channel.
//!
//! Each entry starts with `0x tt ii` where `tt` is the event type (bits 4-6)
//! and `ii` the instrument (bits 0-2):
//!
//! | Type | Bytes | Event |
//! |---|---|---|
//! | 0 | `0i kk` | note off |
//! | 1 | `1i kk vv` | note on |
//! | 2 | `2i kk ff vv` | note on with fraction |
//! | 3 | `3i cc vv` | control change |
//! | 4 | `4i pp` | program change |
//! | 5 | `5i vv` | after-touch |
//! | 6 | `6i ll hh` | pitch bend |
//! | 7 | `7i pp dd` | parameter change |

use nom::branch::alt;
use nom::combinator::{all_consuming, map, verify};
use nom::multi::many0;
use nom::number::complete::u8 as byte;
use nom::sequence::tuple;
use nom::IResult;

/// One decoded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Release a key.
    NoteOff {
        /// Instrument number.
        instrument: u8,
        /// Key.
        key: u8,
    },
    /// Start a key, with a pitch fraction in 1/128 semitones (0 for plain notes).
    NoteOn {
        /// Instrument number.
        instrument: u8,
        /// Key.
        key: u8,
        /// Fraction.
        fraction: u8,
        /// Velocity.
        velocity: u8,
    },
    /// Controller change.
    Control {
        /// Instrument number.
        instrument: u8,
        /// Controller number.
        controller: u8,
        /// Value.
        value: u8,
    },
    /// Program change.
    Program {
        /// Instrument number.
        instrument: u8,
        /// Voice number.
        program: u8,
    },
    /// Channel after-touch.
    AfterTouch {
        /// Instrument number.
        instrument: u8,
        /// Pressure.
        value: u8,
    },
    /// Pitch bend, 14-bit.
    PitchBend {
        /// Instrument number.
        instrument: u8,
        /// Bend value, 0x2000 centre.
        value: u16,
    },
    /// Instrument parameter change.
    Param {
        /// Instrument number.
        instrument: u8,
        /// Parameter number.
        param: u8,
        /// Value.
        value: u8,
    },
}

fn data(input: &[u8]) -> IResult<&[u8], u8> {
    verify(byte, |b: &u8| *b < 0x80)(input)
}

fn head(kind: u8) -> impl Fn(&[u8]) -> IResult<&[u8], u8> {
    move |input: &[u8]| map(verify(byte, move |b: &u8| *b >> 4 == kind), |b| b & 7)(input)
}

fn event(input: &[u8]) -> IResult<&[u8], Event> {
    alt((
        map(tuple((head(0), data)), |(instrument, key)| Event::NoteOff { instrument, key }),
        map(tuple((head(1), data, data)), |(instrument, key, velocity)| Event::NoteOn {
            instrument,
            key,
            fraction: 0,
            velocity,
        }),
        map(
            tuple((head(2), data, data, data)),
            |(instrument, key, fraction, velocity)| Event::NoteOn {
                instrument,
                key,
                fraction,
                velocity,
            },
        ),
        map(tuple((head(3), data, data)), |(instrument, controller, value)| Event::Control {
            instrument,
            controller,
            value,
        }),
        map(tuple((head(4), data)), |(instrument, program)| Event::Program {
            instrument,
            program,
        }),
        map(tuple((head(5), data)), |(instrument, value)| Event::AfterTouch {
            instrument,
            value,
        }),
        map(tuple((head(6), data, data)), |(instrument, lo, hi)| Event::PitchBend {
            instrument,
            value: lo as u16 | ((hi as u16) << 7),
        }),
        map(tuple((head(7), data, data)), |(instrument, param, value)| Event::Param {
            instrument,
            param,
            value,
        }),
    ))(input)
}

/// Decode a whole event list. A truncated trailing entry rejects the list.
pub fn parse_events(payload: &[u8]) -> Option<Vec<Event>> {
    all_consuming(many0(event))(payload).ok().map(|(_, events)| events)
}

/// Decode as many leading events as are well formed.
pub fn parse_events_lenient(payload: &[u8]) -> Vec<Event> {
    let list: IResult<&[u8], Vec<Event>> = many0(event)(payload);
    list.map(|(_, events)| events).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_every_event_kind() {
        let list = [
            0x01, 0x3C, // off
            0x12, 0x40, 0x7F, // on
            0x23, 0x41, 0x20, 0x50, // on + fraction
            0x34, 0x07, 0x64, // cc
            0x45, 0x03, // program
            0x56, 0x11, // after-touch
            0x67, 0x00, 0x40, // bend centre
            0x70, 0x09, 0x10, // param
        ];
        let events = parse_events(&list).unwrap();
        assert_eq!(events.len(), 8);
        assert_eq!(events[0], Event::NoteOff { instrument: 1, key: 0x3C });
        assert_eq!(
            events[2],
            Event::NoteOn { instrument: 3, key: 0x41, fraction: 0x20, velocity: 0x50 }
        );
        assert_eq!(events[6], Event::PitchBend { instrument: 7, value: 0x2000 });
        assert_eq!(events[7], Event::Param { instrument: 0, param: 9, value: 0x10 });
    }

    #[test]
    fn truncated_list_is_rejected() {
        assert!(parse_events(&[0x10, 0x3C]).is_none());
        assert_eq!(parse_events_lenient(&[0x01, 0x3C, 0x10, 0x3C]).len(), 1);
        assert_eq!(parse_events(&[]), Some(vec![]));
    }
}
