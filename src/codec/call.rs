//! Method call representation: an opcode plus positional arguments.

use std::fmt;

use bytes::Bytes;

use crate::codec::{ArgKind, CodecError, Opcode};

/// One positional argument value.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Arg {
    Bool(bool),
    Int(i32),
    Long(i64),
    Bytes(Bytes),
}

impl Arg {
    /// Type tag of this argument.
    pub fn kind(&self) -> ArgKind {
        match self {
            Arg::Bool(_) => ArgKind::Bool,
            Arg::Int(_) => ArgKind::Int,
            Arg::Long(_) => ArgKind::Long,
            Arg::Bytes(_) => ArgKind::Bytes,
        }
    }
}

/// A remote method invocation. Immutable once constructed; whether the
/// arguments match the opcode's signature is only checked at encoding (and
/// dispatching) time.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct MethodCall {
    opcode: Opcode,
    args: Vec<Arg>,
}

impl MethodCall {
    /// Creates a method call from raw parts.
    pub fn new(opcode: Opcode, args: Vec<Arg>) -> Self {
        MethodCall { opcode, args }
    }

    pub fn receive(value: i32) -> Self {
        Self::new(Opcode::Receive, vec![Arg::Int(value)])
    }

    pub fn start(run_id: i64, label: impl Into<Bytes>) -> Self {
        Self::new(
            Opcode::Start,
            vec![Arg::Long(run_id), Arg::Bytes(label.into())],
        )
    }

    pub fn set_oob(oob: bool) -> Self {
        Self::new(Opcode::SetOob, vec![Arg::Bool(oob)])
    }

    pub fn set_sync(sync: bool) -> Self {
        Self::new(Opcode::SetSync, vec![Arg::Bool(sync)])
    }

    pub fn set_num_msgs(num: i32) -> Self {
        Self::new(Opcode::SetNumMsgs, vec![Arg::Int(num)])
    }

    pub fn set_num_threads(num: i32) -> Self {
        Self::new(Opcode::SetNumThreads, vec![Arg::Int(num)])
    }

    pub fn set_msg_size(num: i32) -> Self {
        Self::new(Opcode::SetMsgSize, vec![Arg::Int(num)])
    }

    pub fn set_anycast_count(num: i32) -> Self {
        Self::new(Opcode::SetAnycastCount, vec![Arg::Int(num)])
    }

    /// Keyless GET, as issued by the benchmark's read path.
    pub fn get() -> Self {
        Self::new(Opcode::Get, vec![])
    }

    pub fn get_key(key: i64) -> Self {
        Self::new(Opcode::Get, vec![Arg::Long(key)])
    }

    pub fn put(index: i32) -> Self {
        Self::new(Opcode::Put, vec![Arg::Int(index)])
    }

    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    #[inline]
    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    /// Returns the index of the opcode signature the arguments conform to,
    /// or `None` if they match none of them.
    pub fn matched_signature(&self) -> Option<usize> {
        self.opcode.signatures().iter().position(|sig| {
            sig.len() == self.args.len()
                && sig.iter().zip(&self.args).all(|(k, a)| *k == a.kind())
        })
    }

    /// Checks the arguments against the opcode's declared signatures.
    pub fn check_signature(&self) -> Result<(), CodecError> {
        match self.matched_signature() {
            Some(_) => Ok(()),
            None => Err(CodecError::Encode(format!(
                "arguments {:?} do not match signature of {}",
                self.args.iter().map(Arg::kind).collect::<Vec<_>>(),
                self.opcode
            ))),
        }
    }

    pub fn arg_bool(&self, idx: usize) -> Result<bool, CodecError> {
        match self.args.get(idx) {
            Some(Arg::Bool(v)) => Ok(*v),
            other => Err(self.arg_mismatch(idx, ArgKind::Bool, other)),
        }
    }

    pub fn arg_int(&self, idx: usize) -> Result<i32, CodecError> {
        match self.args.get(idx) {
            Some(Arg::Int(v)) => Ok(*v),
            other => Err(self.arg_mismatch(idx, ArgKind::Int, other)),
        }
    }

    pub fn arg_long(&self, idx: usize) -> Result<i64, CodecError> {
        match self.args.get(idx) {
            Some(Arg::Long(v)) => Ok(*v),
            other => Err(self.arg_mismatch(idx, ArgKind::Long, other)),
        }
    }

    pub fn arg_bytes(&self, idx: usize) -> Result<&Bytes, CodecError> {
        match self.args.get(idx) {
            Some(Arg::Bytes(v)) => Ok(v),
            other => Err(self.arg_mismatch(idx, ArgKind::Bytes, other)),
        }
    }

    fn arg_mismatch(
        &self,
        idx: usize,
        expected: ArgKind,
        got: Option<&Arg>,
    ) -> CodecError {
        CodecError::Decode(format!(
            "{} arg #{}: expected {:?}, got {:?}",
            self.opcode,
            idx,
            expected,
            got.map(Arg::kind)
        ))
    }
}

impl fmt::Display for MethodCall {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}(", self.opcode.name())?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match arg {
                Arg::Bool(v) => write!(f, "{}", v)?,
                Arg::Int(v) => write!(f, "{}", v)?,
                Arg::Long(v) => write!(f, "{}", v)?,
                Arg::Bytes(v) => write!(f, "<{} bytes>", v.len())?,
            }
        }
        write!(f, ")")
    }
}
