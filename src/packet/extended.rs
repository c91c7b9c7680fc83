//! Extended updates: secondary parameters sent outside the unified packet.
//!
//! Each update is acknowledged on its own and never merged with a pending
//! unified configuration.

use super::{CommandCodes, WirePacket};
use crate::core::{PacketError, CONFIG_PAYLOAD_SIZE};

const REMOTE_SENSOR_ENABLE: u8 = 0x40;
const REMOTE_TEMP_OFFSET: usize = 21;

/// A secondary-parameter update.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExtendedUpdate {
    /// Report the remote sensor's reading to the indoor unit.
    RemoteTemperature {
        /// Keep using the remote sensor.
        enabled: bool,
        /// Reading in whole degrees Celsius.
        celsius: u8,
    },
    /// Caller-built packet for a parameter whose layout the caller knows.
    Raw {
        /// Command byte.
        command: u8,
        /// Plaintext payload.
        body: Vec<u8>,
    },
}

impl ExtendedUpdate {
    /// Remote sensor reading update.
    pub fn remote_temperature(celsius: u8) -> Self {
        ExtendedUpdate::RemoteTemperature {
            enabled: true,
            celsius,
        }
    }
}

impl WirePacket for ExtendedUpdate {
    const KIND: &'static str = "extended update";

    fn command(&self, codes: &CommandCodes) -> u8 {
        match self {
            ExtendedUpdate::RemoteTemperature { .. } => codes.config,
            ExtendedUpdate::Raw { command, .. } => *command,
        }
    }

    fn encode_payload(&self) -> Result<Vec<u8>, PacketError> {
        match self {
            ExtendedUpdate::RemoteTemperature { enabled, celsius } => {
                let mut q = vec![0u8; CONFIG_PAYLOAD_SIZE];
                if *enabled {
                    q[0] = REMOTE_SENSOR_ENABLE;
                }
                q[REMOTE_TEMP_OFFSET] = *celsius;
                Ok(q)
            }
            ExtendedUpdate::Raw { body, .. } => Ok(body.clone()),
        }
    }

    /// Recognizes the remote-temperature layout; everything else stays raw.
    fn decode_payload(command: u8, payload: &[u8]) -> Result<Self, PacketError> {
        let remote_layout = payload.len() == CONFIG_PAYLOAD_SIZE
            && payload[0] & !REMOTE_SENSOR_ENABLE == 0
            && payload
                .iter()
                .enumerate()
                .all(|(pos, &byte)| pos == 0 || pos == REMOTE_TEMP_OFFSET || byte == 0);

        if remote_layout {
            Ok(ExtendedUpdate::RemoteTemperature {
                enabled: payload[0] & REMOTE_SENSOR_ENABLE != 0,
                celsius: payload[REMOTE_TEMP_OFFSET],
            })
        } else {
            Ok(ExtendedUpdate::Raw {
                command,
                body: payload.to_vec(),
            })
        }
    }
}
