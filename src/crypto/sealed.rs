//! Sealed payload cipher used after keyed binding.
//!
//! Wire layout of a sealed payload:
//!
//! ```text
//! [ counter (8, LE64) | ciphertext | tag (16) ]
//! ```
//!
//! Each direction has its own key and its own counter. Receivers require the
//! counter to strictly increase; TCP delivers in order, so any regression is
//! a replay.

use super::aead::{construct_aad, decrypt, encrypt};
use super::keys::SessionKey;
use super::nonce::{construct_nonce, Direction};
use super::PayloadCipher;
use crate::core::{CryptoError, DEVICE_TOKEN_SIZE, SEALED_OVERHEAD, SEAL_COUNTER_SIZE};

/// Which end of the session a cipher belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// The controlling client.
    Client,
    /// The appliance.
    Device,
}

impl Role {
    fn send_direction(self) -> Direction {
        match self {
            Role::Client => Direction::ClientToDevice,
            Role::Device => Direction::DeviceToClient,
        }
    }
}

/// XChaCha20-Poly1305 payload cipher with per-direction counters.
#[derive(Debug)]
pub struct SealedCipher {
    send_key: SessionKey,
    recv_key: SessionKey,
    send_direction: Direction,
    token: [u8; DEVICE_TOKEN_SIZE],
    send_counter: u64,
    highest_recv: Option<u64>,
}

impl SealedCipher {
    /// Create a cipher from the client→appliance and appliance→client keys.
    pub fn new(
        client_key: SessionKey,
        device_key: SessionKey,
        role: Role,
        token: [u8; DEVICE_TOKEN_SIZE],
    ) -> Self {
        let (send_key, recv_key) = match role {
            Role::Client => (client_key, device_key),
            Role::Device => (device_key, client_key),
        };
        Self {
            send_key,
            recv_key,
            send_direction: role.send_direction(),
            token,
            send_counter: 0,
            highest_recv: None,
        }
    }

    /// Counter the next sealed payload will carry.
    pub fn send_counter(&self) -> u64 {
        self.send_counter
    }
}

impl PayloadCipher for SealedCipher {
    fn overhead(&self) -> usize {
        SEALED_OVERHEAD
    }

    fn seal(&mut self, command: u8, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let counter = self.send_counter;
        self.send_counter = counter
            .checked_add(1)
            .ok_or(CryptoError::CounterExhaustion)?;

        let nonce = construct_nonce(self.send_direction, counter);
        let aad = construct_aad(command, &self.token);
        let ciphertext = encrypt(&self.send_key, &nonce, &aad, plaintext)?;

        let mut out = Vec::with_capacity(SEAL_COUNTER_SIZE + ciphertext.len());
        out.extend_from_slice(&counter.to_le_bytes());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open(&mut self, command: u8, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if payload.len() < SEALED_OVERHEAD {
            return Err(CryptoError::TruncatedPayload(payload.len()));
        }
        let (counter_bytes, ciphertext) = payload.split_at(SEAL_COUNTER_SIZE);
        let mut raw = [0u8; SEAL_COUNTER_SIZE];
        raw.copy_from_slice(counter_bytes);
        let counter = u64::from_le_bytes(raw);

        // Replay check happens before AEAD verification.
        if let Some(highest) = self.highest_recv {
            if counter <= highest {
                return Err(CryptoError::ReplayDetected { counter, highest });
            }
        }

        let nonce = construct_nonce(self.send_direction.opposite(), counter);
        let aad = construct_aad(command, &self.token);
        let plaintext = decrypt(&self.recv_key, &nonce, &aad, ciphertext)?;

        self.highest_recv = Some(counter);
        Ok(plaintext)
    }
}
