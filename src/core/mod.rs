//! Core constants and error types shared by every layer.
//!
//! This module has no I/O and no protocol state; it only defines the
//! vocabulary the transport, crypto, packet and session layers speak.

mod constants;
mod error;

pub use constants::*;
pub use error::*;
