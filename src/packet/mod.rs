//! Packet codec.
//!
//! Typed packets on top of the plaintext payloads produced by the crypto
//! layer:
//!
//! - [`StatusQuery`] / [`StatusSnapshot`]: poll the full appliance state.
//! - [`UnifiedConfig`]: full-state overwrite of the primary controls, built
//!   from a snapshot plus [`PrimaryChanges`].
//! - [`ExtendedUpdate`]: secondary parameters, acknowledged on their own.
//! - [`NetworkConfig`]: WiFi role and credentials; ends the session.
//!
//! Command bytes are looked up in a [`CommandCodes`] table rather than
//! hard-coded, so a packet kind can be re-mapped without touching the
//! session engine.

mod extended;
mod fields;
mod network;
mod status;
mod unified;

pub use extended::ExtendedUpdate;
pub use fields::{
    FanControl, FanSetting, HorizontalAir, Humidify, Mode, NoiseControl, RegionalSwing, Schedule,
    Setpoint, SleepCurve, SleepProfile, TempDisplay, TempUnits, Timers, ValveState, VerticalAir,
};
pub use network::{NetworkConfig, WifiMode};
pub use status::{OpaqueFields, StatusSnapshot};
pub use unified::{PrimaryChanges, UnifiedConfig};

#[cfg(test)]
pub(crate) use status::tests::idle_payload;

use crate::core::{
    ConfigError, PacketError, CMD_BIND_REPLY, CMD_BIND_REQUEST, CMD_CONFIG, CMD_NETWORK, CMD_QUERY,
    CMD_STATUS, CMD_STATUS_ALT,
};

/// Command byte for every packet kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CommandCodes {
    /// Unified configuration (and the remote-temperature update).
    pub config: u8,
    /// Status query.
    pub query: u8,
    /// Status response.
    pub status: u8,
    /// Alternate status response code some firmware uses.
    pub status_alt: u8,
    /// Network configuration.
    pub network: u8,
    /// Binding request.
    pub bind_request: u8,
    /// Binding reply.
    pub bind_reply: u8,
}

impl Default for CommandCodes {
    fn default() -> Self {
        Self {
            config: CMD_CONFIG,
            query: CMD_QUERY,
            status: CMD_STATUS,
            status_alt: CMD_STATUS_ALT,
            network: CMD_NETWORK,
            bind_request: CMD_BIND_REQUEST,
            bind_reply: CMD_BIND_REPLY,
        }
    }
}

impl CommandCodes {
    /// Whether `command` carries a status snapshot.
    pub fn is_status(&self, command: u8) -> bool {
        command == self.status || command == self.status_alt
    }

    /// Reject tables where inbound kinds cannot be told apart.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.is_status(self.bind_reply) {
            return Err(ConfigError::new(
                "command codes",
                format!("bind reply 0x{:02x} collides with a status code", self.bind_reply),
            ));
        }
        if self.config == self.query {
            return Err(ConfigError::new(
                "command codes",
                format!("config and query share 0x{:02x}", self.config),
            ));
        }
        Ok(())
    }
}

/// A packet kind with a plaintext payload codec.
pub trait WirePacket: Sized {
    /// Human-readable kind, for errors and logs.
    const KIND: &'static str;

    /// Command byte this packet is sent with.
    fn command(&self, codes: &CommandCodes) -> u8;

    /// Encode the plaintext payload.
    fn encode_payload(&self) -> Result<Vec<u8>, PacketError>;

    /// Decode a plaintext payload received with `command`.
    fn decode_payload(command: u8, payload: &[u8]) -> Result<Self, PacketError>;
}

/// Status poll. Carries no body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusQuery;

impl WirePacket for StatusQuery {
    const KIND: &'static str = "status query";

    fn command(&self, codes: &CommandCodes) -> u8 {
        codes.query
    }

    fn encode_payload(&self) -> Result<Vec<u8>, PacketError> {
        Ok(Vec::new())
    }

    fn decode_payload(_command: u8, payload: &[u8]) -> Result<Self, PacketError> {
        if !payload.is_empty() {
            return Err(PacketError::Invalid(format!(
                "status query carries {} bytes",
                payload.len()
            )));
        }
        Ok(StatusQuery)
    }
}

/// Outbound request kinds, dispatched by the session engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// Poll the status.
    Query(StatusQuery),
    /// Overwrite the primary controls.
    Unified(UnifiedConfig),
    /// Secondary-parameter update.
    Extended(ExtendedUpdate),
    /// WiFi reconfiguration.
    Network(NetworkConfig),
}

impl Request {
    /// Packet kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Query(_) => StatusQuery::KIND,
            Request::Unified(_) => UnifiedConfig::KIND,
            Request::Extended(_) => ExtendedUpdate::KIND,
            Request::Network(_) => NetworkConfig::KIND,
        }
    }

    /// Command byte and plaintext payload.
    pub fn encode(&self, codes: &CommandCodes) -> Result<(u8, Vec<u8>), PacketError> {
        fn pack<P: WirePacket>(packet: &P, codes: &CommandCodes) -> Result<(u8, Vec<u8>), PacketError> {
            Ok((packet.command(codes), packet.encode_payload()?))
        }
        match self {
            Request::Query(p) => pack(p, codes),
            Request::Unified(p) => pack(p, codes),
            Request::Extended(p) => pack(p, codes),
            Request::Network(p) => pack(p, codes),
        }
    }

    /// Whether the request changes appliance state.
    pub fn is_update(&self) -> bool {
        !matches!(self, Request::Query(_))
    }
}

/// Classified inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A status snapshot.
    Status(StatusSnapshot),
    /// A binding reply payload.
    BindReply(Vec<u8>),
    /// Any other command, kept for logging.
    Unknown {
        /// Command byte.
        command: u8,
        /// Plaintext payload.
        payload: Vec<u8>,
    },
}

impl Inbound {
    /// Decode a plaintext payload by its command byte.
    pub fn decode(codes: &CommandCodes, command: u8, payload: &[u8]) -> Result<Self, PacketError> {
        if codes.is_status(command) {
            return StatusSnapshot::decode(command, payload).map(Inbound::Status);
        }
        if command == codes.bind_reply {
            return Ok(Inbound::BindReply(payload.to_vec()));
        }
        Ok(Inbound::Unknown {
            command,
            payload: payload.to_vec(),
        })
    }
}

#[inline]
pub(crate) fn bit(byte: u8, pos: u8) -> bool {
    byte & (1 << pos) != 0
}

#[inline]
pub(crate) fn bits(byte: u8, lsb: u8, width: u8) -> u8 {
    (byte >> lsb) & (((1u16 << width) - 1) as u8)
}

#[inline]
pub(crate) fn flag(value: bool, pos: u8) -> u8 {
    (value as u8) << pos
}
