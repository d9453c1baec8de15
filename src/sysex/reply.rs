//! Messages the card sends back: handshakes, diagnostics and dumps.

use crate::midi::states::{NODE_SUB_STATUS, YAMAHA_ID};
use crate::midi::{SYSEX_END, SYSEX_START};

/// Command byte of a handshake.
pub const CMD_HANDSHAKE: u8 = 0x60;
/// Command byte of a dump reply.
pub const CMD_DUMP: u8 = 0x21;
/// Command byte of a diagnostic report.
pub const CMD_DIAGNOSTIC: u8 = 0x7E;

/// Handshake codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// Command accepted.
    Ack = 0,
    /// Command malformed; resend.
    Nak = 1,
    /// Command refused.
    Cancel = 2,
}

/// Numbered diagnostics reported when error reporting is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    /// MIDI IN framing error.
    Framing = 0x01,
    /// MIDI IN overrun.
    Overrun = 0x02,
    /// MIDI IN active sensing stopped.
    Offline = 0x03,
    /// MIDI OUT buffer overflow.
    MidiOutOverflow = 0x04,
    /// Card-to-host buffer overflow.
    HostOverflow = 0x05,
    /// MIDI IN buffer overflow.
    MidiInOverflow = 0x06,
    /// Exclusive message not terminated in time.
    SysexTimeout = 0x07,
}

fn node_message(node: u8, cmd: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 6);
    out.extend_from_slice(&[SYSEX_START, YAMAHA_ID, NODE_SUB_STATUS, node & 0x0F, cmd]);
    out.extend_from_slice(body);
    out.push(SYSEX_END);
    out
}

/// `F0 43 75 0n 60 cc F7`
pub fn handshake(node: u8, code: Handshake) -> Vec<u8> {
    node_message(node, CMD_HANDSHAKE, &[code as u8])
}

/// `F0 43 75 0n 7E ee F7`
pub fn diagnostic(node: u8, code: Diagnostic) -> Vec<u8> {
    node_message(node, CMD_DIAGNOSTIC, &[code as u8])
}

/// `F0 43 75 0n 21 kk aa <frame> F7`
pub fn dump(node: u8, kind: u8, arg: u8, frame: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(frame.len() + 2);
    body.push(kind & 0x7F);
    body.push(arg & 0x7F);
    body.extend_from_slice(frame);
    node_message(node, CMD_DUMP, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_bytes() {
        assert_eq!(
            handshake(3, Handshake::Cancel),
            vec![0xF0, 0x43, 0x75, 0x03, 0x60, 0x02, 0xF7]
        );
        assert_eq!(
            diagnostic(0, Diagnostic::SysexTimeout),
            vec![0xF0, 0x43, 0x75, 0x00, 0x7E, 0x07, 0xF7]
        );
    }

    #[test]
    fn dump_wraps_frame() {
        let d = dump(1, 2, 5, &[0x00, 0x01, 0x33, 0x4D]);
        assert_eq!(d[..7], [0xF0, 0x43, 0x75, 0x01, 0x21, 0x02, 0x05]);
        assert_eq!(d.last(), Some(&0xF7));
        assert_eq!(d.len(), 12);
    }
}
