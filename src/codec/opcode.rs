//! Opcode space of remotely invocable methods and their argument shapes.

use std::fmt;

/// Type of one positional argument.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ArgKind {
    Bool,
    Int,
    Long,
    Bytes,
}

/// Remotely invocable method identifiers. The discriminant is the leading
/// tag byte on the wire.
#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Opcode {
    Receive = 0,
    Start = 1,
    SetOob = 2,
    SetSync = 3,
    SetNumMsgs = 4,
    SetNumThreads = 5,
    SetMsgSize = 6,
    SetAnycastCount = 7,
    Get = 8,
    Put = 9,
}

/// Number of defined opcodes; tags are dense in `0..NUM_OPCODES`.
pub const NUM_OPCODES: usize = 10;

const SIG_NONE: &[ArgKind] = &[];
const SIG_BOOL: &[ArgKind] = &[ArgKind::Bool];
const SIG_INT: &[ArgKind] = &[ArgKind::Int];
const SIG_LONG: &[ArgKind] = &[ArgKind::Long];
const SIG_LONG_BYTES: &[ArgKind] = &[ArgKind::Long, ArgKind::Bytes];

impl Opcode {
    /// All opcodes in tag order.
    pub const ALL: [Opcode; NUM_OPCODES] = [
        Opcode::Receive,
        Opcode::Start,
        Opcode::SetOob,
        Opcode::SetSync,
        Opcode::SetNumMsgs,
        Opcode::SetNumThreads,
        Opcode::SetMsgSize,
        Opcode::SetAnycastCount,
        Opcode::Get,
        Opcode::Put,
    ];

    /// Wire tag byte of this opcode.
    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Maps a wire tag byte back to an opcode, or `None` if the tag is not
    /// defined.
    #[inline]
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    /// Accepted argument signatures, tried in the given order when decoding.
    /// Every opcode has exactly one signature except GET, which may carry an
    /// optional key.
    pub fn signatures(self) -> &'static [&'static [ArgKind]] {
        match self {
            Opcode::Receive => &[SIG_INT],
            Opcode::Start => &[SIG_LONG_BYTES],
            Opcode::SetOob | Opcode::SetSync => &[SIG_BOOL],
            Opcode::SetNumMsgs
            | Opcode::SetNumThreads
            | Opcode::SetMsgSize
            | Opcode::SetAnycastCount => &[SIG_INT],
            Opcode::Get => &[SIG_NONE, SIG_LONG],
            Opcode::Put => &[SIG_INT],
        }
    }

    /// Human-readable method name.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Receive => "receive",
            Opcode::Start => "start",
            Opcode::SetOob => "set_oob",
            Opcode::SetSync => "set_sync",
            Opcode::SetNumMsgs => "set_num_msgs",
            Opcode::SetNumThreads => "set_num_threads",
            Opcode::SetMsgSize => "set_msg_size",
            Opcode::SetAnycastCount => "set_anycast_count",
            Opcode::Get => "get",
            Opcode::Put => "put",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.tag())
    }
}
