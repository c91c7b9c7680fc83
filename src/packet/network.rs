//! Network configuration packet: WiFi role and credentials.
//!
//! ```text
//! +---------+----------+------+----------+------------+
//! | mode u8 | ssid_len | ssid | pass_len | passphrase |
//! +---------+----------+------+----------+------------+
//! ```
//!
//! Applying it moves the appliance to another network, so the session that
//! sent it ends.

use std::fmt;

use zeroize::Zeroize;

use super::{CommandCodes, WirePacket};
use crate::core::{PacketError, MAX_PASSPHRASE_LEN, MAX_SSID_LEN};

/// WiFi role of the appliance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WifiMode {
    /// The appliance hosts its own network.
    AccessPoint,
    /// The appliance joins an existing network.
    Station,
}

impl WifiMode {
    fn raw(self) -> u8 {
        match self {
            WifiMode::AccessPoint => 0,
            WifiMode::Station => 1,
        }
    }

    fn from_raw(raw: u8) -> Result<Self, PacketError> {
        match raw {
            0 => Ok(WifiMode::AccessPoint),
            1 => Ok(WifiMode::Station),
            other => Err(PacketError::OutOfRange {
                field: "wifi mode",
                value: other as u32,
            }),
        }
    }
}

/// WiFi settings to push to the appliance. The passphrase is wiped on drop.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NetworkConfig {
    /// Role to switch to.
    pub mode: WifiMode,
    /// Network name, 1..=32 bytes.
    pub ssid: String,
    /// WPA passphrase, up to 63 bytes. Empty for an open network.
    pub passphrase: String,
}

impl NetworkConfig {
    /// Join an existing network.
    pub fn station(ssid: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            mode: WifiMode::Station,
            ssid: ssid.into(),
            passphrase: passphrase.into(),
        }
    }

    /// Host a network.
    pub fn access_point(ssid: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            mode: WifiMode::AccessPoint,
            ssid: ssid.into(),
            passphrase: passphrase.into(),
        }
    }

    /// Check lengths.
    pub fn validate(&self) -> Result<(), PacketError> {
        if self.ssid.is_empty() {
            return Err(PacketError::Invalid("ssid is empty".into()));
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(PacketError::TooLong {
                field: "ssid",
                max: MAX_SSID_LEN,
                actual: self.ssid.len(),
            });
        }
        if self.passphrase.len() > MAX_PASSPHRASE_LEN {
            return Err(PacketError::TooLong {
                field: "passphrase",
                max: MAX_PASSPHRASE_LEN,
                actual: self.passphrase.len(),
            });
        }
        Ok(())
    }
}

impl Drop for NetworkConfig {
    fn drop(&mut self) {
        self.passphrase.zeroize();
    }
}

impl fmt::Debug for NetworkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkConfig")
            .field("mode", &self.mode)
            .field("ssid", &self.ssid)
            .field("passphrase", &"[REDACTED]")
            .finish()
    }
}

impl WirePacket for NetworkConfig {
    const KIND: &'static str = "network configuration";

    fn command(&self, codes: &CommandCodes) -> u8 {
        codes.network
    }

    fn encode_payload(&self) -> Result<Vec<u8>, PacketError> {
        self.validate()?;
        let mut out = Vec::with_capacity(3 + self.ssid.len() + self.passphrase.len());
        out.push(self.mode.raw());
        out.push(self.ssid.len() as u8);
        out.extend_from_slice(self.ssid.as_bytes());
        out.push(self.passphrase.len() as u8);
        out.extend_from_slice(self.passphrase.as_bytes());
        Ok(out)
    }

    fn decode_payload(_command: u8, payload: &[u8]) -> Result<Self, PacketError> {
        let mut cursor = payload;
        let mode = WifiMode::from_raw(take(&mut cursor, 1)?[0])?;
        let ssid_len = take(&mut cursor, 1)?[0] as usize;
        let ssid = take_str(&mut cursor, ssid_len, "ssid")?;
        let pass_len = take(&mut cursor, 1)?[0] as usize;
        let passphrase = take_str(&mut cursor, pass_len, "passphrase")?;
        if !cursor.is_empty() {
            return Err(PacketError::Invalid(format!(
                "{} trailing bytes after passphrase",
                cursor.len()
            )));
        }

        let config = Self {
            mode,
            ssid,
            passphrase,
        };
        config.validate()?;
        Ok(config)
    }
}

fn take<'a>(cursor: &mut &'a [u8], n: usize) -> Result<&'a [u8], PacketError> {
    if cursor.len() < n {
        return Err(PacketError::Invalid("network configuration truncated".into()));
    }
    let (head, rest) = cursor.split_at(n);
    *cursor = rest;
    Ok(head)
}

fn take_str(cursor: &mut &[u8], n: usize, field: &'static str) -> Result<String, PacketError> {
    let bytes = take(cursor, n)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| PacketError::Invalid(format!("{field} is not UTF-8")))
}
