//! Parser states and the fixed transition / termination tables.

use num_derive::FromPrimitive;

use super::routing::RouteMask;

/// Number of parser states.
pub const STATE_COUNT: usize = 65;

/// State of a MIDI byte-stream parser.
///
/// `*Done` states and the real-time states are terminal: reaching one
/// completes a message described by [`TERMINATION`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u8)]
pub enum ParserState {
    /// Waiting for a status byte.
    Idle = 0,

    /// 8n received.
    NoteOff = 1,
    /// 8n kk received.
    NoteOffKey = 2,
    /// 8n kk vv complete.
    NoteOffDone = 3,
    /// 9n received.
    NoteOn = 4,
    /// 9n kk received.
    NoteOnKey = 5,
    /// 9n kk vv complete.
    NoteOnDone = 6,
    /// An received.
    PolyPressure = 7,
    /// An kk received.
    PolyPressureKey = 8,
    /// An kk vv complete.
    PolyPressureDone = 9,
    /// Bn received.
    ControlChange = 10,
    /// Bn cc received.
    ControlNumber = 11,
    /// Bn cc vv complete.
    ControlChangeDone = 12,
    /// Cn received.
    ProgramChange = 13,
    /// Cn pp complete.
    ProgramChangeDone = 14,
    /// Dn received.
    ChannelPressure = 15,
    /// Dn vv complete.
    ChannelPressureDone = 16,
    /// En received.
    PitchBend = 17,
    /// En ll received.
    PitchBendLsb = 18,
    /// En ll mm complete.
    PitchBendDone = 19,

    /// F1 received.
    QuarterFrame = 20,
    /// F1 dd complete.
    QuarterFrameDone = 21,
    /// F2 received.
    SongPosition = 22,
    /// F2 ll received.
    SongPositionLsb = 23,
    /// F2 ll mm complete.
    SongPositionDone = 24,
    /// F3 received.
    SongSelect = 25,
    /// F3 ss complete.
    SongSelectDone = 26,
    /// F4, F5, F9 or FD: undefined status, data ignored.
    Undefined = 27,
    /// F6 complete.
    TuneRequestDone = 28,

    /// F8.
    TimingClock = 29,
    /// FA.
    Start = 30,
    /// FB.
    Continue = 31,
    /// FC.
    Stop = 32,
    /// FE.
    ActiveSensing = 33,
    /// FF.
    SystemReset = 34,

    /// F7 outside any exclusive message (message classification only).
    StrayEox = 35,

    /// F0 received.
    SysexStart = 36,
    /// Exclusive of another manufacturer, accumulated as is.
    SysexForeign = 37,
    /// F0 43 received.
    SysexYamaha = 38,
    /// F0 43 0n: bulk dump.
    Bulk = 39,
    /// Bulk format byte received.
    BulkFormat = 40,
    /// Bulk byte count MSB received.
    BulkCountMsb = 41,
    /// Bulk byte count LSB received.
    BulkCountLsb = 42,
    /// Bulk payload.
    BulkData = 43,
    /// F0 43 1n: channel parameter change.
    Param = 44,
    /// Parameter group byte received.
    ParamGroup = 45,
    /// Parameter number received.
    ParamNumber = 46,
    /// Parameter value complete.
    ParamValue = 47,
    /// Low nibble of a split value received.
    ParamValueLo = 48,
    /// F0 43 2n: dump request.
    Request = 49,
    /// Dump request format received.
    RequestFormat = 50,
    /// F0 43 75: node-addressed system exclusive.
    Model = 51,
    /// Node number received.
    Node = 52,
    /// Parameter command (0x00-0x1F).
    NodeParam = 53,
    /// Parameter command arguments.
    NodeParamBody = 54,
    /// Transfer command (0x20-0x3F).
    NodeTransfer = 55,
    /// Transfer command payload.
    NodeTransferBody = 56,
    /// Control command (0x40-0x7F).
    NodeControl = 57,
    /// Control command payload.
    NodeControlBody = 58,
    /// F0 7E / F0 7F.
    Universal = 59,
    /// Universal exclusive payload.
    UniversalBody = 60,
    /// Framing capacity exceeded; bytes dropped until the next status.
    SysexOverflow = 61,
    /// F7 complete.
    SysexDone = 62,
    /// Bytes past a complete parameter change.
    ParamExtra = 63,
    /// Bytes past a dump request format.
    RequestBody = 64,
}

impl ParserState {
    /// True for every state of an open exclusive framing.
    pub fn in_sysex(self) -> bool {
        let s = self as u8;
        (ParserState::SysexStart as u8..=ParserState::SysexOverflow as u8).contains(&s)
            || matches!(self, ParserState::ParamExtra | ParserState::RequestBody)
    }

    /// True for real-time states, which never disturb an open message.
    pub fn is_realtime(self) -> bool {
        let s = self as u8;
        (ParserState::TimingClock as u8..=ParserState::SystemReset as u8).contains(&s)
    }

    /// Termination entry, if this state completes a message.
    pub fn termination(self) -> Option<Termination> {
        TERMINATION[self as usize]
    }

    /// Accumulation limit of the exclusive framing this state belongs to.
    pub fn sysex_capacity(self) -> usize {
        use ParserState::*;
        match self {
            SysexStart | SysexYamaha | Model | Node => 16,
            Param | ParamGroup | ParamNumber | ParamValue | ParamValueLo | ParamExtra => 16,
            Request | RequestFormat | RequestBody => 16,
            NodeParam | NodeParamBody => 16,
            NodeTransfer | NodeTransferBody => 8192,
            NodeControl | NodeControlBody => 2048,
            Bulk | BulkFormat | BulkCountMsb | BulkCountLsb | BulkData => 8192,
            Universal | UniversalBody => 256,
            _ => 1024,
        }
    }
}

/// Route class and length of a completed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    /// Category used against the flow-path matrix.
    pub route: RouteMask,
    /// Message length in bytes; 0 for variable length.
    pub length: usize,
}

const fn term(route: RouteMask, length: usize) -> Option<Termination> {
    Some(Termination { route, length })
}

/// Terminal state to (route, length), indexed by state.
pub const TERMINATION: [Option<Termination>; STATE_COUNT] = {
    let mut t: [Option<Termination>; STATE_COUNT] = [None; STATE_COUNT];
    t[ParserState::NoteOffDone as usize] = term(RouteMask::CHANNEL, 3);
    t[ParserState::NoteOnDone as usize] = term(RouteMask::CHANNEL, 3);
    t[ParserState::PolyPressureDone as usize] = term(RouteMask::CHANNEL, 3);
    t[ParserState::ControlChangeDone as usize] = term(RouteMask::CHANNEL, 3);
    t[ParserState::ProgramChangeDone as usize] = term(RouteMask::CHANNEL, 2);
    t[ParserState::ChannelPressureDone as usize] = term(RouteMask::CHANNEL, 2);
    t[ParserState::PitchBendDone as usize] = term(RouteMask::CHANNEL, 3);
    t[ParserState::QuarterFrameDone as usize] = term(RouteMask::SYSTEM_COMMON, 2);
    t[ParserState::SongPositionDone as usize] = term(RouteMask::SYSTEM_COMMON, 3);
    t[ParserState::SongSelectDone as usize] = term(RouteMask::SYSTEM_COMMON, 2);
    t[ParserState::TuneRequestDone as usize] = term(RouteMask::SYSTEM_COMMON, 1);
    t[ParserState::TimingClock as usize] = term(RouteMask::REALTIME, 1);
    t[ParserState::Start as usize] = term(RouteMask::REALTIME, 1);
    t[ParserState::Continue as usize] = term(RouteMask::REALTIME, 1);
    t[ParserState::Stop as usize] = term(RouteMask::REALTIME, 1);
    t[ParserState::ActiveSensing as usize] = term(RouteMask::REALTIME, 1);
    t[ParserState::SystemReset as usize] = term(RouteMask::REALTIME, 1);
    t[ParserState::StrayEox as usize] = term(RouteMask::empty(), 1);
    t[ParserState::SysexDone as usize] = term(RouteMask::SYSEX, 0);
    t
};

/// Channel status (high nibble 8-E) to the state it enters. Entry F
/// defers to [`SYSTEM_STATUS`]; entries 0-7 are data bytes.
pub const CHANNEL_STATUS: [ParserState; 16] = {
    use ParserState::*;
    [
        Idle,
        Idle,
        Idle,
        Idle,
        Idle,
        Idle,
        Idle,
        Idle,
        NoteOff,
        NoteOn,
        PolyPressure,
        ControlChange,
        ProgramChange,
        ChannelPressure,
        PitchBend,
        Idle,
    ]
};

/// System status (low nibble of Fx) to the state it enters.
pub const SYSTEM_STATUS: [ParserState; 16] = {
    use ParserState::*;
    [
        SysexStart,
        QuarterFrame,
        SongPosition,
        SongSelect,
        Undefined,
        Undefined,
        TuneRequestDone,
        SysexDone,
        TimingClock,
        Undefined,
        Start,
        Continue,
        Stop,
        Undefined,
        ActiveSensing,
        SystemReset,
    ]
};

/// State entered by a status byte, independent of the prior state.
pub fn status_state(byte: u8) -> ParserState {
    match byte >> 4 {
        0xF => SYSTEM_STATUS[(byte & 0x0F) as usize],
        nibble => CHANNEL_STATUS[nibble as usize],
    }
}

/// How a data byte moves the parser out of a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataRule {
    /// Unconditional transition.
    Next(ParserState),
    /// After F0: 43 Yamaha, 7E/7F universal, anything else foreign.
    Manufacturer,
    /// After F0 43: branch on the sub-status nibble (0x75 node, 0n bulk,
    /// 1n parameter, 2n request).
    Yamaha,
    /// After F0 43 75: a node number (0n) or foreign.
    NodeNumber,
    /// After the node number: bits 0x60 of the command select
    /// parameter (00), transfer (20) or control (40/60).
    NodeCommand,
    /// After F0 43 1n: 0C single value, 15 split value, otherwise extra.
    ParamGroup,
    /// Parameter number received: value shape depends on the group.
    ParamValue,
}

/// Data-byte rule per state, indexed by state.
pub const DATA_TABLE: [DataRule; STATE_COUNT] = {
    use DataRule::*;
    use ParserState::*;
    [
        Next(Idle), // Idle
        Next(NoteOffKey),
        Next(NoteOffDone),
        Next(NoteOffKey), // NoteOffDone: running status
        Next(NoteOnKey),
        Next(NoteOnDone),
        Next(NoteOnKey),
        Next(PolyPressureKey),
        Next(PolyPressureDone),
        Next(PolyPressureKey),
        Next(ControlNumber),
        Next(ControlChangeDone),
        Next(ControlNumber),
        Next(ProgramChangeDone),
        Next(ProgramChangeDone),
        Next(ChannelPressureDone),
        Next(ChannelPressureDone),
        Next(PitchBendLsb),
        Next(PitchBendDone),
        Next(PitchBendLsb),
        Next(QuarterFrameDone), // QuarterFrame
        Next(Idle),
        Next(SongPositionLsb),
        Next(SongPositionDone),
        Next(Idle),
        Next(SongSelectDone),
        Next(Idle),
        Next(Undefined),
        Next(Idle),
        Next(Idle), // TimingClock (resumes the interrupted state instead)
        Next(Idle),
        Next(Idle),
        Next(Idle),
        Next(Idle),
        Next(Idle),
        Next(Idle), // StrayEox
        Manufacturer, // SysexStart
        Next(SysexForeign),
        Yamaha,
        Next(BulkFormat), // Bulk
        Next(BulkCountMsb),
        Next(BulkCountLsb),
        Next(BulkData),
        Next(BulkData),
        DataRule::ParamGroup, // Param
        Next(ParamNumber),
        DataRule::ParamValue,
        Next(ParamExtra), // ParamValue
        Next(ParserState::ParamValue), // ParamValueLo
        Next(RequestFormat), // Request
        Next(RequestBody),
        NodeNumber, // Model
        NodeCommand, // Node
        Next(NodeParamBody),
        Next(NodeParamBody),
        Next(NodeTransferBody),
        Next(NodeTransferBody),
        Next(NodeControlBody),
        Next(NodeControlBody),
        Next(UniversalBody),
        Next(UniversalBody),
        Next(SysexOverflow),
        Next(Idle), // SysexDone
        Next(ParamExtra),
        Next(RequestBody),
    ]
};

/// Yamaha manufacturer ID.
pub const YAMAHA_ID: u8 = 0x43;
/// Sub-status of node-addressed messages.
pub const NODE_SUB_STATUS: u8 = 0x75;
/// Parameter group: single 7-bit value.
pub const PARAM_GROUP_SINGLE: u8 = 0x0C;
/// Parameter group: value split in two nibbles.
pub const PARAM_GROUP_SPLIT: u8 = 0x15;

/// Resolve the data-byte transition of `state`.
///
/// `group` is the parameter group byte of the message, when known.
pub fn data_state(state: ParserState, byte: u8, group: Option<u8>) -> ParserState {
    use ParserState::*;
    match DATA_TABLE[state as usize] {
        DataRule::Next(next) => next,
        DataRule::Manufacturer => match byte {
            YAMAHA_ID => SysexYamaha,
            0x7E | 0x7F => Universal,
            _ => SysexForeign,
        },
        DataRule::Yamaha => match byte {
            NODE_SUB_STATUS => Model,
            b if b & 0x70 == 0x00 => Bulk,
            b if b & 0x70 == 0x10 => Param,
            b if b & 0x70 == 0x20 => Request,
            _ => SysexForeign,
        },
        DataRule::NodeNumber => {
            if byte & 0x70 == 0 {
                Node
            } else {
                SysexForeign
            }
        }
        DataRule::NodeCommand => match byte & 0x60 {
            0x00 => NodeParam,
            0x20 => NodeTransfer,
            _ => NodeControl,
        },
        DataRule::ParamGroup => match byte {
            PARAM_GROUP_SINGLE | PARAM_GROUP_SPLIT => ParamGroup,
            _ => ParamExtra,
        },
        DataRule::ParamValue => match group {
            Some(PARAM_GROUP_SPLIT) => ParamValueLo,
            _ => ParamValue,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn every_discriminant_round_trips() {
        for i in 0..STATE_COUNT as u8 {
            let s = ParserState::from_u8(i).expect("state");
            assert_eq!(s as u8, i);
        }
        assert!(ParserState::from_u8(STATE_COUNT as u8).is_none());
    }

    #[test]
    fn terminal_channel_states_carry_lengths() {
        let t = ParserState::NoteOnDone.termination().unwrap();
        assert_eq!(t.route, RouteMask::CHANNEL);
        assert_eq!(t.length, 3);
        let t = ParserState::ProgramChangeDone.termination().unwrap();
        assert_eq!(t.length, 2);
        assert_eq!(ParserState::SysexDone.termination().unwrap().length, 0);
        assert!(ParserState::NoteOnKey.termination().is_none());
    }

    #[test]
    fn status_tables() {
        assert_eq!(status_state(0x93), ParserState::NoteOn);
        assert_eq!(status_state(0xE0), ParserState::PitchBend);
        assert_eq!(status_state(0xF0), ParserState::SysexStart);
        assert_eq!(status_state(0xF7), ParserState::SysexDone);
        assert_eq!(status_state(0xFE), ParserState::ActiveSensing);
        assert_eq!(status_state(0xFD), ParserState::Undefined);
    }

    #[test]
    fn node_command_branches_on_bits() {
        use ParserState::*;
        assert_eq!(data_state(Node, 0x10, None), NodeParam);
        assert_eq!(data_state(Node, 0x1A, None), NodeParam);
        assert_eq!(data_state(Node, 0x20, None), NodeTransfer);
        assert_eq!(data_state(Node, 0x31, None), NodeTransfer);
        assert_eq!(data_state(Node, 0x40, None), NodeControl);
        assert_eq!(data_state(Node, 0x70, None), NodeControl);
        assert_eq!(data_state(SysexYamaha, 0x75, None), Model);
        assert_eq!(data_state(SysexYamaha, 0x13, None), Param);
        assert_eq!(data_state(SysexYamaha, 0x20, None), Request);
        assert_eq!(data_state(SysexYamaha, 0x00, None), Bulk);
        assert_eq!(data_state(Model, 0x31, None), SysexForeign);
    }

    #[test]
    fn sysex_framing_classification() {
        assert!(ParserState::SysexStart.in_sysex());
        assert!(ParserState::SysexOverflow.in_sysex());
        assert!(ParserState::RequestBody.in_sysex());
        assert!(!ParserState::SysexDone.in_sysex());
        assert!(!ParserState::NoteOn.in_sysex());
        assert!(ParserState::Stop.is_realtime());
    }
}
