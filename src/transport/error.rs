//! Transport layer error types.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Transport layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// TCP connect failed.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        /// Address dialed.
        addr: SocketAddr,
        /// Socket error.
        #[source]
        source: io::Error,
    },

    /// TCP connect did not complete in time.
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Address dialed.
        addr: SocketAddr,
        /// Timeout applied.
        timeout: Duration,
    },

    /// I/O error on the established stream.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A receive deadline elapsed before any bytes arrived.
    #[error("receive timed out")]
    Timeout,

    /// The peer closed its end of the stream.
    #[error("connection closed by peer")]
    PeerClosed,

    /// The connection was already closed locally.
    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Check if this error is fatal to the connection.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Timeout)
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
