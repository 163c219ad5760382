//! Outcome taxonomy of remote calls made through the external transport.
//!
//! The transport itself (dialing, encoding, listeners) lives outside this
//! crate. Callers only see either a reply or a `CallError` naming why the
//! call did not complete. Every reason is handled by the same retry policy;
//! the reason only feeds logging.

use std::fmt;
use std::future::Future;

use tokio::time::{self, Duration};

/// Reason a remote call did not produce a usable reply.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum CallError {
    /// The remote end could not be reached, or has been shut down.
    Unreachable,

    /// No reply arrived within the configured call timeout.
    Timeout,

    /// The remote end answered but refused the request.
    Rejected,

    /// The reply did not match the request kind.
    Protocol(String),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CallError::Unreachable => write!(f, "remote unreachable"),
            CallError::Timeout => write!(f, "call timed out"),
            CallError::Rejected => write!(f, "request rejected by remote"),
            CallError::Protocol(detail) => {
                write!(f, "protocol violation: {}", detail)
            }
        }
    }
}

impl std::error::Error for CallError {}

/// Awaits a call future, bounding it by `timeout` if one is given. A zero or
/// absent timeout waits for as long as the transport does.
pub(crate) async fn call_within<T, F>(
    timeout: Option<Duration>,
    call: F,
) -> Result<T, CallError>
where
    F: Future<Output = Result<T, CallError>>,
{
    match timeout {
        Some(dur) if !dur.is_zero() => {
            time::timeout(dur, call).await.map_err(|_| CallError::Timeout)?
        }
        _ => call.await,
    }
}

#[cfg(test)]
mod transport_tests {
    use super::*;

    #[test]
    fn display_reasons() {
        assert_eq!(CallError::Unreachable.to_string(), "remote unreachable");
        assert_eq!(
            CallError::Protocol("wrong reply".into()).to_string(),
            "protocol violation: wrong reply"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn call_without_timeout() {
        let res = call_within(None, async { Ok::<u64, CallError>(7) }).await;
        assert_eq!(res, Ok(7));
        let res = call_within(Some(Duration::ZERO), async {
            Err::<u64, CallError>(CallError::Rejected)
        })
        .await;
        assert_eq!(res, Err(CallError::Rejected));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn call_hits_timeout() {
        let res = call_within(Some(Duration::from_millis(20)), async {
            time::sleep(Duration::from_secs(5)).await;
            Ok::<u64, CallError>(7)
        })
        .await;
        assert_eq!(res, Err(CallError::Timeout));
    }
}
