//! Error types for the heat pump protocol client.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::transport::{FrameError, TransportError};

/// Errors in the crypto layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (invalid tag or corrupted).
    #[error("AEAD decryption failed (invalid tag or corrupted)")]
    DecryptionFailed,

    /// Sealed payload shorter than counter plus tag.
    #[error("sealed payload too short: {0} bytes")]
    TruncatedPayload(usize),

    /// Frame counter did not advance.
    #[error("replay detected: counter {counter} not above {highest}")]
    ReplayDetected {
        /// Counter carried by the frame.
        counter: u64,
        /// Highest counter accepted so far.
        highest: u64,
    },

    /// Nonce counter exhausted - session must terminate.
    #[error("nonce counter exhausted - session must terminate")]
    CounterExhaustion,

    /// Key derivation failed.
    #[error("key derivation failed")]
    KeyDerivationFailed,
}

/// Errors from the binding handshake.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BindError {
    /// No binding reply arrived within the attempt deadline.
    #[error("binding attempt timed out")]
    Timeout,

    /// The appliance's reply failed verification.
    #[error("binding reply rejected: {0}")]
    Rejected(String),

    /// The reply answers an earlier attempt's request.
    #[error("binding reply answers an earlier request")]
    Stale,

    /// Crypto failure while sealing the request or opening the reply.
    #[error("binding crypto failure: {0}")]
    Crypto(#[from] CryptoError),

    /// Every attempt failed.
    #[error("binding failed after {attempts} attempts (last error: {last})")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last: Box<BindError>,
    },
}

/// Errors decoding or encoding a packet body.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Payload shorter than the packet kind requires.
    #[error("{kind} payload too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Packet kind being decoded.
        kind: &'static str,
        /// Minimum payload size.
        expected: usize,
        /// Actual payload size.
        actual: usize,
    },

    /// A field holds a value the appliance cannot represent.
    #[error("{field} out of range: {value}")]
    OutOfRange {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: u32,
    },

    /// A variable-length field exceeds its limit.
    #[error("{field} too long: {actual} bytes (max {max})")]
    TooLong {
        /// Field name.
        field: &'static str,
        /// Maximum length.
        max: usize,
        /// Actual length.
        actual: usize,
    },

    /// Command code does not belong to this packet kind.
    #[error("unexpected command 0x{0:02x}")]
    UnexpectedCommand(u8),

    /// Structurally invalid payload.
    #[error("invalid payload: {0}")]
    Invalid(String),
}

/// Invalid client configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid {field}: {reason}")]
pub struct ConfigError {
    /// Offending field.
    pub field: &'static str,
    /// What is wrong with it.
    pub reason: String,
}

impl ConfigError {
    pub(crate) fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Why a session reached its terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CloseReason {
    /// The caller disconnected, or every client handle was dropped.
    Disconnected,
    /// A network configuration update was applied; the appliance is
    /// expected to drop off this network.
    NetworkReconfigured,
    /// The appliance closed the connection.
    PeerClosed,
    /// The transport failed.
    Transport(String),
    /// The binding handshake failed.
    BindFailed(String),
    /// A request went unanswered through every retry.
    Timeout,
    /// Too many consecutive corrupt frames.
    CorruptStream {
        /// Consecutive corrupt frames seen.
        frames: u32,
    },
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Disconnected => f.write_str("disconnected"),
            CloseReason::NetworkReconfigured => f.write_str("network reconfigured"),
            CloseReason::PeerClosed => f.write_str("closed by appliance"),
            CloseReason::Transport(msg) => write!(f, "transport failure: {msg}"),
            CloseReason::BindFailed(msg) => write!(f, "binding failed: {msg}"),
            CloseReason::Timeout => f.write_str("request timed out"),
            CloseReason::CorruptStream { frames } => {
                write!(f, "{frames} consecutive corrupt frames")
            }
        }
    }
}

/// Top-level client errors.
#[derive(Debug, Error)]
pub enum HeatPumpError {
    /// Could not reach the appliance.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Address dialed.
        addr: SocketAddr,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },

    /// I/O error on an established connection.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Framing or checksum failure.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Binding failed.
    #[error("binding error: {0}")]
    Bind(#[from] BindError),

    /// A sealed payload failed to open.
    #[error("decrypt error: {0}")]
    Decrypt(#[from] CryptoError),

    /// A packet body could not be decoded or encoded.
    #[error("malformed packet: {0}")]
    MalformedPacket(#[from] PacketError),

    /// No response after the initial send and every retry.
    #[error("no response after {attempts} attempts")]
    Timeout {
        /// Sends made, including the first.
        attempts: u32,
    },

    /// Another request is already awaiting its response.
    #[error("another request is in flight")]
    Busy,

    /// The session has not been bound yet.
    #[error("session is not bound")]
    NotBound,

    /// The request was cancelled before a response arrived.
    #[error("request cancelled")]
    Cancelled,

    /// The session is closed.
    #[error("session closed: {0}")]
    Closed(CloseReason),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl HeatPumpError {
    /// Whether the session is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HeatPumpError::Connect { .. }
                | HeatPumpError::Io(_)
                | HeatPumpError::Bind(_)
                | HeatPumpError::Timeout { .. }
                | HeatPumpError::Closed(_)
        )
    }

    /// Whether the same request may simply be issued again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HeatPumpError::Busy | HeatPumpError::Cancelled | HeatPumpError::MalformedPacket(_)
        )
    }
}

impl From<TransportError> for HeatPumpError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Io(e) => HeatPumpError::Io(e),
            TransportError::Timeout => HeatPumpError::Timeout { attempts: 1 },
            TransportError::PeerClosed => HeatPumpError::Closed(CloseReason::PeerClosed),
            TransportError::Closed => HeatPumpError::Closed(CloseReason::Disconnected),
            TransportError::ConnectTimeout { .. } | TransportError::Connect { .. } => {
                HeatPumpError::Io(io::Error::other(err.to_string()))
            }
        }
    }
}

/// Result type for client operations.
pub type HeatPumpResult<T> = Result<T, HeatPumpError>;
