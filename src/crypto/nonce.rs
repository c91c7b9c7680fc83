//! Nonce construction for XChaCha20-Poly1305.
//!
//! Sealed payload nonces are 24 bytes:
//! - Direction (1 byte): 0x00 = client→appliance, 0x01 = appliance→client
//! - Zeros (15 bytes)
//! - Counter (8 bytes, LE64)

use rand::{rngs::OsRng, RngCore};

use crate::core::{AEAD_NONCE_SIZE, NONCE_DIR_CLIENT, NONCE_DIR_DEVICE};

/// Direction of a sealed payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Client → appliance (0x00)
    ClientToDevice,
    /// Appliance → client (0x01)
    DeviceToClient,
}

impl Direction {
    /// Get the byte representation.
    pub fn as_byte(self) -> u8 {
        match self {
            Direction::ClientToDevice => NONCE_DIR_CLIENT,
            Direction::DeviceToClient => NONCE_DIR_DEVICE,
        }
    }

    /// Get the opposite direction.
    pub fn opposite(self) -> Self {
        match self {
            Direction::ClientToDevice => Direction::DeviceToClient,
            Direction::DeviceToClient => Direction::ClientToDevice,
        }
    }
}

/// Construct a 24-byte nonce for a sealed payload.
///
/// Layout:
/// ```text
/// [ direction (1) | zeros (15) | counter (8) ]
/// ```
pub fn construct_nonce(direction: Direction, counter: u64) -> [u8; AEAD_NONCE_SIZE] {
    let mut nonce = [0u8; AEAD_NONCE_SIZE];
    nonce[0] = direction.as_byte();
    nonce[16..24].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// A random nonce, for one-off messages sealed under a long-term key.
pub(crate) fn random_nonce() -> [u8; AEAD_NONCE_SIZE] {
    let mut nonce = [0u8; AEAD_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}
