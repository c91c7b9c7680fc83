//! Symmetric key material.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::core::SESSION_KEY_SIZE;

/// A 32-byte symmetric key.
///
/// Used both for the long-term provisioning key shared with an appliance and
/// for the per-session keys derived from it. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_SIZE]);

impl SessionKey {
    /// Create a key from bytes.
    pub fn from_bytes(key: [u8; SESSION_KEY_SIZE]) -> Self {
        Self(key)
    }

    /// Generate a random key.
    #[cfg(feature = "sealed")]
    pub fn generate() -> Self {
        use rand::{rngs::OsRng, RngCore};

        let mut key = [0u8; SESSION_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Get the raw key bytes.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_key() {
        let key = SessionKey::from_bytes([0x42; SESSION_KEY_SIZE]);
        let printed = format!("{key:?}");
        assert!(!printed.contains("42"));
        assert!(printed.contains("REDACTED"));
    }

    #[cfg(feature = "sealed")]
    #[test]
    fn test_generated_keys_differ() {
        assert_ne!(
            SessionKey::generate().as_bytes(),
            SessionKey::generate().as_bytes()
        );
    }
}
