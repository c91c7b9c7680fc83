//! XChaCha20-Poly1305 AEAD encryption.
//!
//! Sealed frame payloads authenticate the command byte and the device token
//! as associated data, so a payload cannot be replayed under another command
//! or toward another appliance.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};

use super::keys::SessionKey;
use crate::core::{CryptoError, AEAD_NONCE_SIZE, AEAD_TAG_SIZE, DEVICE_TOKEN_SIZE};

/// Size of AAD for sealed frames (command + device token).
pub const AAD_SIZE: usize = 1 + DEVICE_TOKEN_SIZE;

/// Construct AAD for a sealed frame.
///
/// Layout (exactly 9 bytes):
/// ```text
/// [ command (1) | device_token (8) ]
/// ```
pub fn construct_aad(command: u8, token: &[u8; DEVICE_TOKEN_SIZE]) -> [u8; AAD_SIZE] {
    let mut aad = [0u8; AAD_SIZE];
    aad[0] = command;
    aad[1..].copy_from_slice(token);
    aad
}

/// Encrypt plaintext, returning ciphertext with the 16-byte tag appended.
pub fn encrypt(
    key: &SessionKey,
    nonce: &[u8; AEAD_NONCE_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let xnonce = XNonce::from_slice(nonce);

    cipher
        .encrypt(xnonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Decrypt ciphertext with its appended tag.
pub fn decrypt(
    key: &SessionKey,
    nonce: &[u8; AEAD_NONCE_SIZE],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < AEAD_TAG_SIZE {
        return Err(CryptoError::TruncatedPayload(ciphertext.len()));
    }

    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let xnonce = XNonce::from_slice(nonce);

    cipher
        .decrypt(xnonce, Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SESSION_KEY_SIZE;

    #[test]
    fn test_aad_construction() {
        let aad = construct_aad(0x31, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(aad[0], 0x31);
        assert_eq!(&aad[1..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = SessionKey::from_bytes([0x42; SESSION_KEY_SIZE]);
        let nonce = [0x01; AEAD_NONCE_SIZE];
        let aad = construct_aad(0x01, &[0; DEVICE_TOKEN_SIZE]);

        let ciphertext = encrypt(&key, &nonce, &aad, b"set mode heat").unwrap();
        assert_eq!(ciphertext.len(), 13 + AEAD_TAG_SIZE);
        assert_eq!(decrypt(&key, &nonce, &aad, &ciphertext).unwrap(), b"set mode heat");
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = SessionKey::from_bytes([0x42; SESSION_KEY_SIZE]);
        let nonce = [0x01; AEAD_NONCE_SIZE];
        let token = [9; DEVICE_TOKEN_SIZE];

        let ciphertext = encrypt(&key, &nonce, &construct_aad(0x01, &token), b"x").unwrap();
        let result = decrypt(&key, &nonce, &construct_aad(0x02, &token), &ciphertext);
        assert_eq!(result, Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_short_ciphertext_rejected() {
        let key = SessionKey::from_bytes([0x42; SESSION_KEY_SIZE]);
        let result = decrypt(&key, &[0; AEAD_NONCE_SIZE], &[], &[0; 4]);
        assert_eq!(result, Err(CryptoError::TruncatedPayload(4)));
    }
}
