//! Security layer: session binding and payload protection.
//!
//! Binding is the handshake that turns a raw connection into a session the
//! appliance will accept commands on. Two seams keep it pluggable:
//!
//! - [`BindingScheme`]: drives the handshake and yields the negotiated
//!   [`PayloadCipher`] plus the appliance's [`DeviceIdentity`]
//! - [`PayloadCipher`]: transforms every frame payload after binding
//!
//! [`OpenBinding`] with [`Cleartext`] matches the stock appliance, which binds
//! implicitly on connect and sends payloads in the clear. With the `sealed`
//! feature, [`KeyedBinding`] derives a per-session key from a provisioning
//! key and protects payloads with XChaCha20-Poly1305.

use std::fmt;
use std::net::SocketAddr;

use crate::core::{BindError, CryptoError, DEVICE_TOKEN_SIZE};

mod keys;
pub use keys::SessionKey;

#[cfg(feature = "sealed")]
mod aead;
#[cfg(feature = "sealed")]
mod binding;
#[cfg(feature = "sealed")]
mod nonce;
#[cfg(feature = "sealed")]
mod sealed;

#[cfg(feature = "sealed")]
#[cfg_attr(docsrs, doc(cfg(feature = "sealed")))]
pub use binding::{KeyedBinding, KeyedResponder};
#[cfg(feature = "sealed")]
#[cfg_attr(docsrs, doc(cfg(feature = "sealed")))]
pub use nonce::{construct_nonce, Direction};
#[cfg(feature = "sealed")]
#[cfg_attr(docsrs, doc(cfg(feature = "sealed")))]
pub use sealed::{Role, SealedCipher};

/// Identity of the bound appliance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceIdentity {
    /// Token issued by the appliance during keyed binding.
    pub token: Option<[u8; DEVICE_TOKEN_SIZE]>,
    /// Address the session is connected to.
    pub peer: Option<SocketAddr>,
}

impl DeviceIdentity {
    /// Attach the peer address.
    pub fn with_peer(mut self, peer: Option<SocketAddr>) -> Self {
        self.peer = peer;
        self
    }
}

/// Transforms frame payloads after binding.
pub trait PayloadCipher: Send + fmt::Debug {
    /// Bytes added to every sealed payload.
    fn overhead(&self) -> usize;

    /// Protect an outbound payload.
    fn seal(&mut self, command: u8, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Verify and unwrap an inbound payload.
    fn open(&mut self, command: u8, payload: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Identity transform: payloads travel in the clear.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cleartext;

impl PayloadCipher for Cleartext {
    fn overhead(&self) -> usize {
        0
    }

    fn seal(&mut self, _command: u8, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(plaintext.to_vec())
    }

    fn open(&mut self, _command: u8, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(payload.to_vec())
    }
}

/// Result of a completed binding.
#[derive(Debug)]
pub struct BindOutcome {
    /// Cipher for all subsequent payloads.
    pub cipher: Box<dyn PayloadCipher>,
    /// Identity of the bound appliance.
    pub identity: DeviceIdentity,
}

/// Next step of a binding attempt.
#[derive(Debug)]
pub enum BindStep {
    /// Binding finished without an exchange.
    Complete(BindOutcome),
    /// Send this payload as a binding request and pass the reply to
    /// [`BindingScheme::finish`].
    Send(Vec<u8>),
}

/// Drives the binding handshake.
///
/// The session calls [`start`](Self::start) once per attempt, so every
/// attempt may use fresh randomness.
pub trait BindingScheme: Send + fmt::Debug {
    /// Begin an attempt.
    fn start(&mut self) -> Result<BindStep, BindError>;

    /// Complete the attempt with the appliance's reply payload.
    ///
    /// A reply to an earlier attempt returns [`BindError::Stale`]; the
    /// current attempt keeps waiting for its own reply.
    fn finish(&mut self, reply: &[u8]) -> Result<BindOutcome, BindError>;

    /// Largest reply payload this scheme expects.
    fn max_reply_len(&self) -> usize {
        0
    }
}

/// Implicit binding: the connection itself is the session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenBinding;

impl BindingScheme for OpenBinding {
    fn start(&mut self) -> Result<BindStep, BindError> {
        Ok(BindStep::Complete(BindOutcome {
            cipher: Box::new(Cleartext),
            identity: DeviceIdentity::default(),
        }))
    }

    fn finish(&mut self, _reply: &[u8]) -> Result<BindOutcome, BindError> {
        Err(BindError::Rejected("open binding expects no reply".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleartext_is_identity() {
        let mut cipher = Cleartext;
        let sealed = cipher.seal(0x01, b"payload").unwrap();
        assert_eq!(sealed, b"payload");
        assert_eq!(cipher.open(0x31, &sealed).unwrap(), b"payload");
        assert_eq!(cipher.overhead(), 0);
    }

    #[test]
    fn test_open_binding_completes_immediately() {
        let mut scheme = OpenBinding;
        match scheme.start().unwrap() {
            BindStep::Complete(outcome) => {
                assert_eq!(outcome.identity, DeviceIdentity::default());
                assert_eq!(outcome.cipher.overhead(), 0);
            }
            BindStep::Send(_) => panic!("open binding should not send a request"),
        }
        assert!(scheme.finish(&[]).is_err());
    }
}
