//! Opcode-tagged wire codec for remote method invocations.

use std::error;
use std::fmt;

mod call;
mod marshal;
mod opcode;

pub use call::{Arg, MethodCall};
pub use marshal::{decode, encode, encoded_len};
pub use opcode::{ArgKind, Opcode, NUM_OPCODES};

/// Codec failure taxonomy.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum CodecError {
    /// A call could not be encoded (arguments do not match its signature).
    Encode(String),

    /// A byte sequence could not be decoded into a call.
    Decode(String),

    /// Leading tag byte, or a dispatched opcode, has no entry.
    UnknownOpcode(u8),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CodecError::Encode(msg) => {
                write!(f, "protocol encode error: {}", msg)
            }
            CodecError::Decode(msg) => {
                write!(f, "protocol decode error: {}", msg)
            }
            CodecError::UnknownOpcode(tag) => {
                write!(f, "unknown opcode {}", tag)
            }
        }
    }
}

impl error::Error for CodecError {}
