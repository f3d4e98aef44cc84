//! common functions for all parsers

use crate::probe::ProbeL4;
use crate::tree::FieldSink;
use crate::Variant;

/// Direction of one packet relative to the connection initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToServer,
    ToClient,
}

/// Per-packet call context handed down by the host.
///
/// One message buffer is always complete (transport reassembly happens
/// before us); the metadata tells dissectors where the packet sits in the
/// capture so cross-packet state can be kept consistent.
#[derive(Debug, Clone, Copy)]
pub struct PacketMeta {
    /// Capture frame number, strictly increasing within one capture file.
    pub frame: u32,
    pub direction: Direction,
    /// False when the host re-dissects an already-visited packet
    /// (re-display of a capture). All cross-packet cache mutation must be
    /// gated on this.
    pub first_pass: bool,
}

impl PacketMeta {
    pub fn new(frame: u32, direction: Direction) -> PacketMeta {
        PacketMeta {
            frame,
            direction,
            first_pass: true,
        }
    }

    pub fn revisit(mut self) -> PacketMeta {
        self.first_pass = false;
        self
    }
}

/// Outcome of one parse call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseResult {
    /// Message decoded, possibly with warnings flagged on the sink.
    Ok,
    /// The buffer is not a message of this protocol at all.
    Fail,
}

/// Interface of all dissectors.
///
/// An object implementing the RParser trait is an instance of a parser,
/// holding all state for one logical connection. The host creates one per
/// conversation (via [`RBuilder`]) and feeds it every message of that
/// conversation in capture order.
pub trait RParser {
    /// Dissect one complete message.
    ///
    /// Emits every decoded field to `sink` and updates connection state.
    /// Malformed input yields partial output plus warnings, never a panic:
    /// the decoded prefix stays emitted and the remainder is flagged.
    fn parse_l4(&mut self, meta: &PacketMeta, data: &[u8], sink: &mut dyn FieldSink)
        -> ParseResult;

    /// Request data from key
    fn get(&self, _key: &str) -> Option<Variant<'_>> {
        None
    }

    /// Returns the available keys for the `get` function
    fn keys(&self) -> ::std::slice::Iter<'_, &str> {
        [].iter()
    }
}

/// Interface of a parser builder
pub trait RBuilder {
    fn build(&self) -> Box<dyn RParser>;

    fn get_l4_probe(&self) -> Option<ProbeL4> {
        None
    }
}
