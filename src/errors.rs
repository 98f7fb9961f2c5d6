use std::io;
use thiserror::Error;
use crate::destination::DestinationKey;

/// Why `execute` failed. Reuse-ineligibility is never one of these; see [`NotPooled`].
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("failed to resolve {host}: {source}")]
    Resolution {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {destination}: {source}")]
    Handshake {
        destination: DestinationKey,
        #[source]
        source: io::Error,
    },

    #[error("failed to write request: {0}")]
    Write(#[source] io::Error),

    #[error("failed to read response: {0}")]
    Read(#[source] io::Error),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("peer closed the connection after {received} of {declared} body bytes")]
    PrematureSeverance {
        declared: usize,
        received: usize,
    },

    #[error("request was cancelled")]
    Cancelled,

    #[error("request timed out")]
    TimedOut,
}

impl ExecuteError {
    pub fn is_premature_severance(&self) -> bool {
        matches!(self, ExecuteError::PrematureSeverance { .. })
    }
}

/// Why a connection was closed instead of parked. A normal outcome, not a failure.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum NotPooled {
    #[error("client requested connection close")]
    ClientRequestedClose,

    #[error("server requested connection close")]
    ServerRequestedClose,

    #[error("response body was not fully read")]
    UndrainedBody,

    #[error("body is delimited by connection close")]
    CloseDelimitedBody,

    #[error("transport error during exchange")]
    TransportError,

    #[error("exchange was cancelled")]
    Cancelled,

    #[error("connection pool is shut down")]
    PoolShutDown,
}
