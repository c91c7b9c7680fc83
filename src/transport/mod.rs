//! Transport layer: TCP connection and wire framing.
//!
//! - **Framing**: [`Frame`], [`encode_frame`] and the incremental
//!   [`FrameDecoder`] that reassembles frames from an arbitrary byte stream
//! - **Checksums**: the pluggable [`Checksum`] trait and the appliance's
//!   [`Sum8`] algorithm
//! - **Connection**: [`Connection`], a reliable byte stream to one appliance
//!   with deadline-bounded receives and idempotent close
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Session Layer                │
//! ├─────────────────────────────────────────┤
//! │         Packet / Crypto Layers          │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   framing, checksum, stream I/O         │
//! ├─────────────────────────────────────────┤
//! │              TCP                        │
//! └─────────────────────────────────────────┘
//! ```

mod connection;
mod error;
mod frame;

pub use connection::*;
pub use error::*;
pub use frame::*;
