//! Crate-wide error type and conversions into it.

use std::error;
use std::fmt;
use std::io;

use crate::transport::CallError;

/// Crate-wide error type: a message, already logged where it was raised.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ViewmasterError(String);

impl ViewmasterError {
    /// Wraps a message.
    pub fn msg(msg: impl ToString) -> Self {
        ViewmasterError(msg.to_string())
    }
}

impl fmt::Display for ViewmasterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl error::Error for ViewmasterError {}

/// Conversions that keep only the source error's message.
macro_rules! impl_from_error {
    ($($error:ty),+ $(,)?) => {
        $(impl From<$error> for ViewmasterError {
            fn from(e: $error) -> Self {
                ViewmasterError(e.to_string())
            }
        })+
    };
}

impl_from_error!(
    io::Error,
    toml::de::Error,
    ctrlc::Error,
    tokio::task::JoinError,
    CallError,
);

// a send into a closed channel; the undelivered value is dropped
impl<T> From<tokio::sync::watch::error::SendError<T>> for ViewmasterError {
    fn from(_: tokio::sync::watch::error::SendError<T>) -> Self {
        ViewmasterError::msg("watch channel closed")
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ViewmasterError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ViewmasterError::msg("mpsc channel closed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = ViewmasterError("what the heck?".into());
        assert_eq!(format!("{}", e), String::from("what the heck?"));
    }

    #[test]
    fn from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "oh no!");
        let e = ViewmasterError::from(io_error);
        assert!(e.0.contains("oh no!"));
    }

    #[test]
    fn from_call_error() {
        let e = ViewmasterError::from(CallError::Timeout);
        assert!(e.0.contains("timed out"));
    }
}
