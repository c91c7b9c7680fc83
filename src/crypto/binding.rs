//! Keyed binding handshake.
//!
//! Client and appliance share a 32-byte provisioning key. One round trip
//! establishes a session:
//!
//! ```text
//! client                                          appliance
//!   | -- seal_pk("bind request", client_nonce) -------> |
//!   | <-- seal_pk("bind reply", token | device_nonce    |
//!   |                           | client_nonce) ------- |
//! ```
//!
//! Each message is `[ random nonce (24) | ciphertext | tag (16) ]` under the
//! provisioning key. Both sides then derive directional session keys with
//! HKDF-SHA256 over `client_nonce | device_nonce`.

use hkdf::Hkdf;
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroize;

use super::aead::{decrypt, encrypt};
use super::keys::SessionKey;
use super::nonce::random_nonce;
use super::sealed::{Role, SealedCipher};
use super::{BindOutcome, BindStep, BindingScheme, DeviceIdentity};
use crate::core::{
    BindError, CryptoError, AEAD_NONCE_SIZE, AEAD_TAG_SIZE, BIND_NONCE_SIZE, DEVICE_TOKEN_SIZE,
    SESSION_KEY_SIZE,
};

const REQUEST_LABEL: &[u8] = b"heatpump bind request";
const REPLY_LABEL: &[u8] = b"heatpump bind reply";
const SESSION_INFO: &[u8] = b"heatpump-protocol session v1";

const REPLY_PLAINTEXT_SIZE: usize = DEVICE_TOKEN_SIZE + 2 * BIND_NONCE_SIZE;

/// Client side of keyed binding.
#[derive(Debug)]
pub struct KeyedBinding {
    provisioning: SessionKey,
    client_nonce: Option<[u8; BIND_NONCE_SIZE]>,
}

impl KeyedBinding {
    /// Create a binding scheme for an appliance provisioned with `key`.
    pub fn new(provisioning_key: SessionKey) -> Self {
        Self {
            provisioning: provisioning_key,
            client_nonce: None,
        }
    }
}

impl BindingScheme for KeyedBinding {
    fn start(&mut self) -> Result<BindStep, BindError> {
        let nonce = random_bind_nonce();
        let request = seal_message(&self.provisioning, REQUEST_LABEL, &nonce)?;
        self.client_nonce = Some(nonce);
        Ok(BindStep::Send(request))
    }

    fn finish(&mut self, reply: &[u8]) -> Result<BindOutcome, BindError> {
        let client_nonce = self
            .client_nonce
            .ok_or_else(|| BindError::Rejected("no binding request outstanding".into()))?;

        let mut plaintext = open_message(&self.provisioning, REPLY_LABEL, reply)?;
        if plaintext.len() != REPLY_PLAINTEXT_SIZE {
            let len = plaintext.len();
            plaintext.zeroize();
            return Err(BindError::Rejected(format!("reply body is {len} bytes")));
        }

        let mut token = [0u8; DEVICE_TOKEN_SIZE];
        let mut device_nonce = [0u8; BIND_NONCE_SIZE];
        token.copy_from_slice(&plaintext[..DEVICE_TOKEN_SIZE]);
        device_nonce
            .copy_from_slice(&plaintext[DEVICE_TOKEN_SIZE..DEVICE_TOKEN_SIZE + BIND_NONCE_SIZE]);
        let echoed = &plaintext[DEVICE_TOKEN_SIZE + BIND_NONCE_SIZE..];
        if echoed != client_nonce.as_slice() {
            plaintext.zeroize();
            return Err(BindError::Stale);
        }
        plaintext.zeroize();

        let (client_key, device_key) =
            derive_session_keys(&self.provisioning, &client_nonce, &device_nonce)?;
        self.client_nonce = None;
        debug!(token = ?token, "keyed binding complete");

        Ok(BindOutcome {
            cipher: Box::new(SealedCipher::new(client_key, device_key, Role::Client, token)),
            identity: DeviceIdentity {
                token: Some(token),
                peer: None,
            },
        })
    }

    fn max_reply_len(&self) -> usize {
        AEAD_NONCE_SIZE + REPLY_PLAINTEXT_SIZE + AEAD_TAG_SIZE
    }
}

/// Appliance side of keyed binding.
///
/// Used by appliance emulators and bridges that accept sessions from
/// clients configured with [`KeyedBinding`].
#[derive(Debug)]
pub struct KeyedResponder {
    provisioning: SessionKey,
    token: [u8; DEVICE_TOKEN_SIZE],
}

impl KeyedResponder {
    /// Create a responder issuing `token` to bound clients.
    pub fn new(provisioning_key: SessionKey, token: [u8; DEVICE_TOKEN_SIZE]) -> Self {
        Self {
            provisioning: provisioning_key,
            token,
        }
    }

    /// Answer a binding request, returning the reply payload and the
    /// appliance's session cipher.
    pub fn respond(&self, request: &[u8]) -> Result<(Vec<u8>, SealedCipher), BindError> {
        let plaintext = open_message(&self.provisioning, REQUEST_LABEL, request)?;
        let client_nonce: [u8; BIND_NONCE_SIZE] = plaintext
            .as_slice()
            .try_into()
            .map_err(|_| {
                BindError::Rejected(format!("request body is {} bytes", plaintext.len()))
            })?;

        let device_nonce = random_bind_nonce();
        let mut body = Vec::with_capacity(REPLY_PLAINTEXT_SIZE);
        body.extend_from_slice(&self.token);
        body.extend_from_slice(&device_nonce);
        body.extend_from_slice(&client_nonce);
        let reply = seal_message(&self.provisioning, REPLY_LABEL, &body)?;

        let (client_key, device_key) =
            derive_session_keys(&self.provisioning, &client_nonce, &device_nonce)?;
        Ok((
            reply,
            SealedCipher::new(client_key, device_key, Role::Device, self.token),
        ))
    }
}

/// Derive the client→appliance and appliance→client session keys.
///
/// ```text
/// okm = HKDF-SHA256(salt = client_nonce | device_nonce,
///                   ikm = provisioning_key,
///                   info = "heatpump-protocol session v1", L = 64)
/// ```
fn derive_session_keys(
    provisioning: &SessionKey,
    client_nonce: &[u8; BIND_NONCE_SIZE],
    device_nonce: &[u8; BIND_NONCE_SIZE],
) -> Result<(SessionKey, SessionKey), CryptoError> {
    let mut salt = [0u8; 2 * BIND_NONCE_SIZE];
    salt[..BIND_NONCE_SIZE].copy_from_slice(client_nonce);
    salt[BIND_NONCE_SIZE..].copy_from_slice(device_nonce);

    let hk = Hkdf::<Sha256>::new(Some(&salt), provisioning.as_bytes());
    let mut key_material = [0u8; 2 * SESSION_KEY_SIZE];
    hk.expand(SESSION_INFO, &mut key_material)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;

    let mut client_key = [0u8; SESSION_KEY_SIZE];
    let mut device_key = [0u8; SESSION_KEY_SIZE];
    client_key.copy_from_slice(&key_material[..SESSION_KEY_SIZE]);
    device_key.copy_from_slice(&key_material[SESSION_KEY_SIZE..]);
    key_material.zeroize();

    Ok((
        SessionKey::from_bytes(client_key),
        SessionKey::from_bytes(device_key),
    ))
}

fn random_bind_nonce() -> [u8; BIND_NONCE_SIZE] {
    let mut nonce = [0u8; BIND_NONCE_SIZE];
    nonce.copy_from_slice(&random_nonce()[..BIND_NONCE_SIZE]);
    nonce
}

fn seal_message(key: &SessionKey, label: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce = random_nonce();
    let ciphertext = encrypt(key, &nonce, label, plaintext)?;

    let mut out = Vec::with_capacity(AEAD_NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open_message(key: &SessionKey, label: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if message.len() < AEAD_NONCE_SIZE + AEAD_TAG_SIZE {
        return Err(CryptoError::TruncatedPayload(message.len()));
    }
    let (nonce_bytes, ciphertext) = message.split_at(AEAD_NONCE_SIZE);
    let mut nonce = [0u8; AEAD_NONCE_SIZE];
    nonce.copy_from_slice(nonce_bytes);
    decrypt(key, &nonce, label, ciphertext)
}
