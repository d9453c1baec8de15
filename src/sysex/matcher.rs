//! SysEx match table: sorted 7-byte records walked one input byte at a time.
//!
//! A record holds the expected bytes after `F0` followed by a terminal
//! marker `0x80 | command`. Two byte classes are wildcards during the walk:
//! the node-number nibble and the instrument-number bits. Both expected and
//! actual bytes are masked before comparing; once the marker is reached the
//! node byte must still equal the card's node exactly.

use log::trace;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::midi::states::{NODE_SUB_STATUS, PARAM_GROUP_SINGLE, PARAM_GROUP_SPLIT, YAMAHA_ID};

/// Bytes per record.
pub const RECORD_LEN: usize = 7;
/// Marker bit terminating a record's pattern.
pub const TERMINAL: u8 = 0x80;

/// Command handlers selected by a terminal marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u8)]
pub enum CommandId {
    /// `43 1c 0C pp dd`
    ChannelParam = 1,
    /// `43 1c 15 pp lo hi`
    ChannelParamSplit = 2,
    /// `43 75 0n 10 pp dd`
    SystemParam = 3,
    /// `43 75 0n 18+i pp dd` or `pp lo hi`
    InstrumentParam = 4,
    /// `43 75 0n 20 kk aa`
    DumpRequest = 5,
    /// `43 75 0n 28+i <frame>`
    StoreInstrumentVoice = 6,
    /// `43 75 0n 30 bb <frame>`
    StoreBank = 7,
    /// `43 75 0n 31 ss <frame>`
    StoreConfig = 8,
    /// `43 75 0n 32 bb vv <frame>`
    StoreVoice = 9,
    /// `43 75 0n 40 mm`
    SelectMode = 10,
    /// `43 75 0n 41 pp mm`
    FlowPath = 11,
    /// `43 75 0n 42`
    Reboot = 12,
    /// `43 75 0n 60 cc`
    Handshake = 13,
    /// `43 75 0n 70 <events>`
    EventList = 14,
}

impl CommandId {
    /// True for commands that write card memory from a frame.
    pub fn is_store(self) -> bool {
        matches!(
            self,
            CommandId::StoreInstrumentVoice
                | CommandId::StoreBank
                | CommandId::StoreConfig
                | CommandId::StoreVoice
        )
    }
}

/// Node-number class: the low nibble is a wildcard.
const NODE_WILDCARD: u8 = 0x0F;
/// Instrument class: the low three bits are a wildcard.
const INSTRUMENT_WILDCARD: u8 = 0x07;

/// One 7-byte match record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchRecord {
    /// Expected bytes then `TERMINAL | command`, padded with the marker.
    pub pattern: [u8; RECORD_LEN],
    /// Bit i set: byte i carries the node number.
    pub node_class: u8,
    /// Bit i set: byte i carries an instrument number.
    pub instrument_class: u8,
}

impl MatchRecord {
    fn new(bytes: &[u8], command: CommandId, node_class: u8, instrument_class: u8) -> Self {
        debug_assert!(bytes.len() < RECORD_LEN);
        let mut pattern = [TERMINAL | command as u8; RECORD_LEN];
        pattern[..bytes.len()].copy_from_slice(bytes);
        Self {
            pattern,
            node_class,
            instrument_class,
        }
    }

    fn wildcard(&self, pos: usize) -> u8 {
        let mut w = 0;
        if self.node_class & (1 << pos) != 0 {
            w |= NODE_WILDCARD;
        }
        if self.instrument_class & (1 << pos) != 0 {
            w |= INSTRUMENT_WILDCARD;
        }
        w
    }

    /// Expected byte at `pos` with its class bits masked out.
    fn masked(&self, pos: usize) -> u8 {
        let e = self.pattern[pos];
        if e & TERMINAL != 0 {
            e
        } else {
            e & !self.wildcard(pos)
        }
    }

    fn sort_key(&self) -> [u8; RECORD_LEN] {
        let mut key = [0; RECORD_LEN];
        for (i, k) in key.iter_mut().enumerate() {
            *k = self.masked(i);
        }
        key
    }

    fn command(&self, pos: usize) -> Option<CommandId> {
        CommandId::from_u8(self.pattern[pos] & !TERMINAL)
    }
}

/// A recognised command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    /// Handler to run.
    pub command: CommandId,
    /// Index of the first argument byte in the walked body.
    pub args: usize,
    /// Instrument number from an instrument-class byte.
    pub instrument: Option<u8>,
    /// MIDI channel of a channel-addressed command.
    pub channel: Option<u8>,
}

/// Result of walking a (possibly partial) body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    /// A terminal marker was reached.
    Matched(Match),
    /// No record can match.
    Rejected,
    /// Input ended before a marker.
    Incomplete,
}

/// The sorted table.
#[derive(Debug, Clone, Default)]
pub struct MatchTable {
    records: Vec<MatchRecord>,
    node: u8,
}

impl MatchTable {
    /// Build the table for `node` and the MIDI channels instruments listen on.
    pub fn build(node: u8, channels: &[u8]) -> Self {
        let node = node & 0x0F;
        let mut records = Vec::new();

        let mut chans: Vec<u8> = channels.iter().map(|c| c & 0x0F).collect();
        chans.sort_unstable();
        chans.dedup();
        for c in chans {
            let status = 0x10 | c;
            records.push(MatchRecord::new(
                &[YAMAHA_ID, status, PARAM_GROUP_SINGLE],
                CommandId::ChannelParam,
                0,
                0,
            ));
            records.push(MatchRecord::new(
                &[YAMAHA_ID, status, PARAM_GROUP_SPLIT],
                CommandId::ChannelParamSplit,
                0,
                0,
            ));
        }

        let node_cmds: [(u8, CommandId, bool); 12] = [
            (0x10, CommandId::SystemParam, false),
            (0x18, CommandId::InstrumentParam, true),
            (0x20, CommandId::DumpRequest, false),
            (0x28, CommandId::StoreInstrumentVoice, true),
            (0x30, CommandId::StoreBank, false),
            (0x31, CommandId::StoreConfig, false),
            (0x32, CommandId::StoreVoice, false),
            (0x40, CommandId::SelectMode, false),
            (0x41, CommandId::FlowPath, false),
            (0x42, CommandId::Reboot, false),
            (0x60, CommandId::Handshake, false),
            (0x70, CommandId::EventList, false),
        ];
        for (cmd, id, per_instrument) in node_cmds {
            records.push(MatchRecord::new(
                &[YAMAHA_ID, NODE_SUB_STATUS, node, cmd],
                id,
                1 << 2,
                if per_instrument { 1 << 3 } else { 0 },
            ));
        }

        records.sort_by_key(MatchRecord::sort_key);
        trace!("sysex table rebuilt: node {node}, {} records", records.len());
        Self { records, node }
    }

    /// Node number embedded in the table.
    pub fn node(&self) -> u8 {
        self.node
    }

    /// Records in walk order.
    pub fn records(&self) -> &[MatchRecord] {
        &self.records
    }

    /// Walk the bytes following `F0`.
    pub fn walk(&self, body: &[u8]) -> Walk {
        let mut record = 0;
        let mut pos = 0;

        loop {
            let Some(rec) = self.records.get(record) else {
                return Walk::Rejected;
            };
            if rec.pattern[pos] & TERMINAL != 0 {
                return self.finish(rec, pos, body);
            }
            let Some(&actual) = body.get(pos) else {
                return Walk::Incomplete;
            };
            let wild = rec.wildcard(pos);
            let a = actual & !wild;
            let e = rec.masked(pos);
            if a < e {
                return Walk::Rejected;
            }
            if a > e {
                record += 1;
                // The next record must share the prefix already consumed.
                match self.records.get(record) {
                    Some(next) if (0..pos).all(|i| next.masked(i) == rec.masked(i)) => continue,
                    _ => return Walk::Rejected,
                }
            }
            pos += 1;
        }
    }

    fn finish(&self, rec: &MatchRecord, pos: usize, body: &[u8]) -> Walk {
        let Some(command) = rec.command(pos) else {
            return Walk::Rejected;
        };
        for i in 0..pos {
            if rec.node_class & (1 << i) != 0 && body[i] != rec.pattern[i] {
                trace!("sysex for node {} ignored", body[i] & 0x0F);
                return Walk::Rejected;
            }
        }
        let instrument = (0..pos)
            .find(|i| rec.instrument_class & (1 << i) != 0)
            .map(|i| body[i] & INSTRUMENT_WILDCARD);
        let channel = matches!(
            command,
            CommandId::ChannelParam | CommandId::ChannelParamSplit
        )
        .then(|| body[1] & 0x0F);
        Walk::Matched(Match {
            command,
            args: pos,
            instrument,
            channel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matched(w: Walk) -> Match {
        match w {
            Walk::Matched(m) => m,
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[test]
    fn table_is_sorted_by_masked_value() {
        let t = MatchTable::build(3, &[0, 1, 1, 9]);
        let keys: Vec<_> = t.records().iter().map(MatchRecord::sort_key).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(t.records().len(), 6 + 12);
    }

    #[test]
    fn node_commands_resolve() {
        let t = MatchTable::build(0, &[0]);
        let m = matched(t.walk(&[0x43, 0x75, 0x00, 0x40, 0x01]));
        assert_eq!(m.command, CommandId::SelectMode);
        assert_eq!(m.args, 4);

        let m = matched(t.walk(&[0x43, 0x75, 0x00, 0x1D, 0x02, 0x40]));
        assert_eq!(m.command, CommandId::InstrumentParam);
        assert_eq!(m.instrument, Some(5));

        let m = matched(t.walk(&[0x43, 0x75, 0x00, 0x31, 0x02]));
        assert_eq!(m.command, CommandId::StoreConfig);
        let m = matched(t.walk(&[0x43, 0x75, 0x00, 0x70]));
        assert_eq!(m.command, CommandId::EventList);
    }

    #[test]
    fn other_nodes_and_unknown_commands_reject() {
        let t = MatchTable::build(2, &[0]);
        assert_eq!(t.walk(&[0x43, 0x75, 0x05, 0x40, 0x01]), Walk::Rejected);
        assert!(matches!(t.walk(&[0x43, 0x75, 0x02, 0x40, 0x01]), Walk::Matched(_)));
        assert_eq!(t.walk(&[0x43, 0x75, 0x02, 0x50]), Walk::Rejected);
        assert_eq!(t.walk(&[0x41, 0x10]), Walk::Rejected);
        assert_eq!(t.walk(&[0x7E, 0x00]), Walk::Rejected);
        assert_eq!(t.walk(&[0x43, 0x75]), Walk::Incomplete);
    }

    #[test]
    fn channel_commands_need_a_listening_instrument() {
        let t = MatchTable::build(0, &[4]);
        let m = matched(t.walk(&[0x43, 0x14, 0x15, 0x20, 0x01, 0x02]));
        assert_eq!(m.command, CommandId::ChannelParamSplit);
        assert_eq!(m.channel, Some(4));
        assert_eq!(t.walk(&[0x43, 0x13, 0x0C, 0x20, 0x01]), Walk::Rejected);
        assert_eq!(t.walk(&[0x43, 0x15, 0x0C, 0x20, 0x01]), Walk::Rejected);
    }

    #[test]
    fn command_ids_round_trip() {
        for id in 1..=14u8 {
            assert_eq!(CommandId::from_u8(id).map(|c| c as u8), Some(id));
        }
        assert!(CommandId::from_u8(0).is_none());
        assert!(CommandId::StoreBank.is_store());
        assert!(!CommandId::DumpRequest.is_store());
    }
}
