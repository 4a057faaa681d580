//! Reflection-free binary encoding of method calls.
//!
//! Layout: one tag byte identifying the opcode, followed by the arguments in
//! declaration order. Integers are big-endian; booleans take one byte (1 or
//! 0); byte arrays are a 4-byte signed length followed by the raw bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{Arg, ArgKind, CodecError, MethodCall, Opcode};

/// Size in bytes of one encoded argument.
#[inline]
fn arg_len(arg: &Arg) -> usize {
    match arg {
        Arg::Bool(_) => 1,
        Arg::Int(_) => 4,
        Arg::Long(_) => 8,
        Arg::Bytes(b) => 4 + b.len(),
    }
}

/// Total encoded size of a call, tag byte included.
pub fn encoded_len(call: &MethodCall) -> usize {
    1 + call.args().iter().map(arg_len).sum::<usize>()
}

/// Encodes a method call into a freshly allocated buffer of exactly the
/// encoded size. Fails if the arguments do not match the opcode's
/// signature.
pub fn encode(call: &MethodCall) -> Result<Bytes, CodecError> {
    call.check_signature()?;

    let mut buf = BytesMut::with_capacity(encoded_len(call));
    buf.put_u8(call.opcode().tag());
    for arg in call.args() {
        match arg {
            Arg::Bool(v) => buf.put_u8(u8::from(*v)),
            Arg::Int(v) => buf.put_i32(*v),
            Arg::Long(v) => buf.put_i64(*v),
            Arg::Bytes(b) => {
                let len = i32::try_from(b.len()).map_err(|_| {
                    CodecError::Encode(format!(
                        "byte array of {} bytes too long",
                        b.len()
                    ))
                })?;
                buf.put_i32(len);
                buf.put_slice(b);
            }
        }
    }

    debug_assert_eq!(buf.len(), encoded_len(call));
    Ok(buf.freeze())
}

/// Decodes a method call. Fails on an undefined tag, on truncated or
/// malformed fields, and on trailing bytes; never returns a partially built
/// call.
pub fn decode(mut buf: &[u8]) -> Result<MethodCall, CodecError> {
    if buf.is_empty() {
        return Err(CodecError::Decode("empty buffer".into()));
    }
    let tag = buf.get_u8();
    let opcode = Opcode::from_tag(tag).ok_or(CodecError::UnknownOpcode(tag))?;

    // GET is the only opcode with more than one signature; picking the one
    // that consumes the whole buffer disambiguates
    let mut last_err = None;
    for sig in opcode.signatures() {
        match decode_args(opcode, sig, buf) {
            Ok(args) => return Ok(MethodCall::new(opcode, args)),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        CodecError::Decode(format!("{} has no signature", opcode))
    }))
}

/// Decodes arguments of the given signature, requiring the buffer to be
/// consumed exactly.
fn decode_args(
    opcode: Opcode,
    sig: &[ArgKind],
    mut buf: &[u8],
) -> Result<Vec<Arg>, CodecError> {
    let mut args = Vec::with_capacity(sig.len());
    for (idx, kind) in sig.iter().enumerate() {
        let arg = match kind {
            ArgKind::Bool => {
                ensure_remaining(opcode, idx, buf.remaining(), 1)?;
                match buf.get_u8() {
                    0 => Arg::Bool(false),
                    1 => Arg::Bool(true),
                    b => {
                        return Err(CodecError::Decode(format!(
                            "{} arg #{}: invalid boolean byte {}",
                            opcode, idx, b
                        )))
                    }
                }
            }
            ArgKind::Int => {
                ensure_remaining(opcode, idx, buf.remaining(), 4)?;
                Arg::Int(buf.get_i32())
            }
            ArgKind::Long => {
                ensure_remaining(opcode, idx, buf.remaining(), 8)?;
                Arg::Long(buf.get_i64())
            }
            ArgKind::Bytes => {
                ensure_remaining(opcode, idx, buf.remaining(), 4)?;
                let len = buf.get_i32();
                let len = usize::try_from(len).map_err(|_| {
                    CodecError::Decode(format!(
                        "{} arg #{}: negative length {}",
                        opcode, idx, len
                    ))
                })?;
                ensure_remaining(opcode, idx, buf.remaining(), len)?;
                Arg::Bytes(buf.copy_to_bytes(len))
            }
        };
        args.push(arg);
    }

    if buf.has_remaining() {
        return Err(CodecError::Decode(format!(
            "{}: {} trailing bytes",
            opcode,
            buf.remaining()
        )));
    }
    Ok(args)
}

#[inline]
fn ensure_remaining(
    opcode: Opcode,
    idx: usize,
    left: usize,
    need: usize,
) -> Result<(), CodecError> {
    if left < need {
        Err(CodecError::Decode(format!(
            "{} arg #{}: need {} bytes, {} left",
            opcode,
            idx,
            need,
            left
        )))
    } else {
        Ok(())
    }
}
