//! Failure classification for breaker-wrapped operations.

use serde::{Deserialize, Serialize};

/// The closed set of failure kinds a breaker can be configured to count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The dependency did not answer in time
    Timeout,
    /// The dependency could not be reached
    Connection,
    /// The dependency answered that it is unavailable or overloaded
    Unavailable,
    /// The dependency failed while handling the call
    Internal,
    /// The dependency refused the call itself (bad input, auth); it is healthy
    Rejected,
}

impl FailureKind {
    /// Every kind except `Rejected`.
    pub fn default_trip_set() -> Vec<FailureKind> {
        vec![
            FailureKind::Timeout,
            FailureKind::Connection,
            FailureKind::Unavailable,
            FailureKind::Internal,
        ]
    }
}

/// Errors passed through a breaker report which kind of failure they are.
pub trait Classify {
    fn failure_kind(&self) -> FailureKind;
}

impl Classify for std::io::Error {
    fn failure_kind(&self) -> FailureKind {
        use std::io::ErrorKind;

        match self.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => FailureKind::Timeout,
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::AddrNotAvailable => FailureKind::Connection,
            ErrorKind::InvalidInput | ErrorKind::InvalidData | ErrorKind::PermissionDenied => {
                FailureKind::Rejected
            }
            _ => FailureKind::Internal,
        }
    }
}

impl Classify for tokio::time::error::Elapsed {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::Timeout
    }
}
