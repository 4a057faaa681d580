//! Customized unified error type.

use std::error;
use std::fmt;
use std::io;
use std::net;
use std::num;

use crate::codec::CodecError;

/// Customized error type for rpcdist.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RpcDistError(pub(crate) String);

impl RpcDistError {
    pub fn msg(msg: impl ToString) -> Self {
        RpcDistError(msg.to_string())
    }
}

impl fmt::Display for RpcDistError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0) // do not display literal quotes
    }
}

impl error::Error for RpcDistError {}

// Helper macro for saving boiler-plate `impl From<X>`s for transparent
// conversion from various common error types to `RpcDistError`.
macro_rules! impl_from_error {
    ($error:ty) => {
        impl From<$error> for RpcDistError {
            fn from(e: $error) -> Self {
                // just store the source error's string representation
                RpcDistError(e.to_string())
            }
        }
    };
}

// Helper macro for saving boiler-plate `impl From<X<T>>`s for transparent
// conversion from various common generic error types to `RpcDistError`.
macro_rules! impl_from_error_generic {
    ($error:ty) => {
        impl<T> From<$error> for RpcDistError {
            fn from(e: $error) -> RpcDistError {
                RpcDistError::msg(e.to_string())
            }
        }
    };
}

impl_from_error!(io::Error);
impl_from_error!(num::ParseIntError);
impl_from_error!(net::AddrParseError);
impl_from_error!(toml::de::Error);
impl_from_error!(rmp_serde::encode::Error);
impl_from_error!(rmp_serde::decode::Error);
impl_from_error!(tokio::task::JoinError);
impl_from_error!(tokio::sync::oneshot::error::RecvError);
impl_from_error!(ctrlc::Error);
impl_from_error!(CodecError);

impl_from_error_generic!(tokio::sync::mpsc::error::SendError<T>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = RpcDistError("what the heck?".into());
        assert_eq!(format!("{}", e), String::from("what the heck?"));
    }

    #[test]
    fn from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "oh no!");
        let e = RpcDistError::from(io_error);
        assert!(e.0.contains("oh no!"));
    }

    #[test]
    fn from_codec_error() {
        let e = RpcDistError::from(CodecError::UnknownOpcode(42));
        assert!(e.0.contains("42"));
    }
}
