use std::time::Duration;
use thiserror::Error;

/// Result type alias used throughout the governor core.
pub type Result<T> = std::result::Result<T, GovernorError>;

/// Errors produced by the device governor's public operations.
///
/// `acquire` never fails for any reason besides the three variants here:
/// the breaker refusing admission, or the caller's context being cancelled
/// or exceeding its deadline while waiting on a suspension point.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GovernorError {
    /// The device's circuit breaker is open; admission was refused without
    /// touching either semaphore.
    #[error("circuit open for {address}, retry after {retry_after:?}")]
    CircuitOpen {
        address: String,
        retry_after: Duration,
    },

    /// The caller's context was cancelled while `acquire` was suspended.
    #[error("request cancelled")]
    Cancelled,

    /// The caller's context deadline elapsed while `acquire` was suspended.
    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

/// Classify an arbitrary caller-reported error as a connectivity failure.
///
/// This only inspects the error's rendered message for well-known
/// connectivity phrases (refused, unreachable, no route, timed out, dial
/// failures). It is a convenience for callers that want to avoid recording
/// `record_failure` for application-level errors (bad auth, malformed
/// response) that have nothing to do with the device's reachability.
/// `record_failure` itself never performs this classification — a caller
/// that calls it directly always has its failure recorded.
pub fn is_connectivity_failure(err: &dyn std::error::Error) -> bool {
    let message = err.to_string().to_ascii_lowercase();
    const MARKERS: &[&str] = &[
        "refused",
        "unreachable",
        "no route",
        "timed out",
        "timeout",
        "no such host",
        "dial",
        "connection failed",
        "broken pipe",
        "reset by peer",
    ];
    MARKERS.iter().any(|marker| message.contains(marker))
}
