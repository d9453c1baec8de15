//! Message categories and the flow-path matrix.

use bitflags::bitflags;

bitflags! {
    /// Message category of a completed message, matched against flow paths.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RouteMask: u8 {
        /// Channel voice messages.
        const CHANNEL = 0x01;
        /// System common messages.
        const SYSTEM_COMMON = 0x02;
        /// System exclusive messages.
        const SYSEX = 0x04;
        /// System real-time messages.
        const REALTIME = 0x08;
    }
}

bitflags! {
    /// Set of destinations a message is delivered to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Destinations: u8 {
        /// The card's own synthesis firmware.
        const SYNTH = 0x01;
        /// The MIDI OUT connector.
        const MIDI_OUT = 0x02;
        /// The host computer.
        const HOST = 0x04;
    }
}

/// Byte stream a message was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// MIDI IN connector.
    MidiIn = 0,
    /// Host bus.
    Host = 1,
}

/// Flow-path destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Synthesis firmware.
    Synth = 0,
    /// MIDI OUT connector.
    MidiOut = 1,
    /// Host computer.
    Host = 2,
}

impl Destination {
    /// All destinations in matrix order.
    pub const ALL: [Destination; 3] = [Destination::Synth, Destination::MidiOut, Destination::Host];

    fn flag(self) -> Destinations {
        match self {
            Destination::Synth => Destinations::SYNTH,
            Destination::MidiOut => Destinations::MIDI_OUT,
            Destination::Host => Destinations::HOST,
        }
    }
}

/// Per (source, destination) category masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowPaths {
    paths: [[RouteMask; 3]; 2],
}

impl Default for FlowPaths {
    /// Both sources play the synthesizer; nothing is echoed.
    fn default() -> Self {
        let all = RouteMask::all();
        Self {
            paths: [
                [all, RouteMask::empty(), RouteMask::empty()],
                [all, RouteMask::empty(), RouteMask::empty()],
            ],
        }
    }
}

impl FlowPaths {
    /// Category mask of one path.
    pub fn get(&self, source: Source, dest: Destination) -> RouteMask {
        self.paths[source as usize][dest as usize]
    }

    /// Replace the category mask of one path.
    pub fn set(&mut self, source: Source, dest: Destination, mask: RouteMask) {
        self.paths[source as usize][dest as usize] = mask;
    }

    /// Set a path by its wire index (`source * 3 + destination`).
    ///
    /// Returns `false` and changes nothing if the index is out of range.
    pub fn set_indexed(&mut self, index: u8, mask: u8) -> bool {
        let (s, d) = (index / 3, index % 3);
        if s > 1 {
            return false;
        }
        self.paths[s as usize][d as usize] = RouteMask::from_bits_truncate(mask);
        true
    }

    /// Destinations a message of category `route` from `source` goes to.
    pub fn destinations(&self, source: Source, route: RouteMask) -> Destinations {
        Destination::ALL
            .iter()
            .filter(|d| self.get(source, **d).intersects(route))
            .fold(Destinations::empty(), |acc, d| acc | d.flag())
    }
}
