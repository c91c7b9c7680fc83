//! Client configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{
    ConfigError, BIND_BACKOFF, BIND_INITIAL_BACKOFF, BIND_MAX_ATTEMPTS, BIND_TIMEOUT,
    CONNECT_TIMEOUT, DEFAULT_MAX_FRAME_BODY, MAX_CORRUPT_FRAMES,
    MAX_ENCODABLE_FRAME_BODY, MAX_RETRIES, MIN_FRAME_BODY, RESPONSE_TIMEOUT, STATUS_PAYLOAD_SIZE,
    UNSOLICITED_CAPACITY,
};
use crate::packet::CommandCodes;
use crate::transport::{Checksum, Sum8};

/// What counts as the acknowledgement of an update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AckPolicy {
    /// Follow the update with a status query; the fresh status is the ack.
    #[default]
    ConfirmWithQuery,
    /// Wait for the status frame the appliance sends after applying.
    AwaitStatus,
    /// Ack as soon as the frame is written.
    WriteOnly,
}

/// Client configuration.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClientConfig {
    /// Appliance address.
    pub device_addr: SocketAddr,

    /// TCP connect timeout.
    pub connect_timeout: Duration,

    /// Deadline for each response.
    pub response_timeout: Duration,

    /// Re-sends after the first send before giving up.
    pub max_retries: u32,

    /// Binding attempts before the session closes.
    pub bind_attempts: u32,

    /// Deadline for each binding reply.
    pub bind_timeout: Duration,

    /// Pause after the first failed binding attempt.
    pub bind_backoff: Duration,

    /// Growth factor of the binding pause.
    pub bind_backoff_factor: u32,

    /// Consecutive corrupt frames tolerated before the session closes.
    pub max_corrupt_frames: u32,

    /// Largest accepted frame length byte (before cipher overhead).
    pub max_frame_body: usize,

    /// How updates are acknowledged.
    pub ack_policy: AckPolicy,

    /// Buffered unsolicited snapshots per subscriber.
    pub unsolicited_capacity: usize,

    /// Command byte table.
    pub codes: CommandCodes,

    /// Frame checksum.
    #[cfg_attr(feature = "serde", serde(skip, default = "default_checksum"))]
    pub checksum: Arc<dyn Checksum>,
}

fn default_checksum() -> Arc<dyn Checksum> {
    Arc::new(Sum8)
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            device_addr: SocketAddr::from(([192, 168, 0, 1], 6000)),
            connect_timeout: CONNECT_TIMEOUT,
            response_timeout: RESPONSE_TIMEOUT,
            max_retries: MAX_RETRIES,
            bind_attempts: BIND_MAX_ATTEMPTS,
            bind_timeout: BIND_TIMEOUT,
            bind_backoff: BIND_INITIAL_BACKOFF,
            bind_backoff_factor: BIND_BACKOFF,
            max_corrupt_frames: MAX_CORRUPT_FRAMES,
            max_frame_body: DEFAULT_MAX_FRAME_BODY,
            ack_policy: AckPolicy::default(),
            unsolicited_capacity: UNSOLICITED_CAPACITY,
            codes: CommandCodes::default(),
            checksum: default_checksum(),
        }
    }
}

impl ClientConfig {
    /// Start from the defaults.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Reject settings the session engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("connect_timeout", self.connect_timeout),
            ("response_timeout", self.response_timeout),
            ("bind_timeout", self.bind_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::new(field, "must be non-zero"));
            }
        }
        if self.bind_attempts == 0 {
            return Err(ConfigError::new("bind_attempts", "must be at least 1"));
        }
        if self.bind_backoff_factor == 0 {
            return Err(ConfigError::new("bind_backoff_factor", "must be at least 1"));
        }
        if self.max_corrupt_frames == 0 {
            return Err(ConfigError::new("max_corrupt_frames", "must be at least 1"));
        }
        if self.unsolicited_capacity == 0 {
            return Err(ConfigError::new("unsolicited_capacity", "must be at least 1"));
        }
        let min_body = STATUS_PAYLOAD_SIZE + MIN_FRAME_BODY;
        if !(min_body..=MAX_ENCODABLE_FRAME_BODY).contains(&self.max_frame_body) {
            return Err(ConfigError::new(
                "max_frame_body",
                format!(
                    "{} outside {min_body}..={MAX_ENCODABLE_FRAME_BODY}",
                    self.max_frame_body
                ),
            ));
        }
        self.codes.validate()
    }

    /// Pause before binding attempt `attempt + 1`, counting from 1.
    pub(crate) fn bind_backoff_after(&self, attempt: u32) -> Duration {
        let factor = self
            .bind_backoff_factor
            .saturating_pow(attempt.saturating_sub(1));
        self.bind_backoff.saturating_mul(factor)
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the appliance address.
    pub fn device_addr(mut self, addr: SocketAddr) -> Self {
        self.config.device_addr = addr;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the per-response deadline.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout = timeout;
        self
    }

    /// Set the retry count.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Set binding attempts, per-attempt deadline and initial backoff.
    pub fn binding(mut self, attempts: u32, timeout: Duration, backoff: Duration) -> Self {
        self.config.bind_attempts = attempts;
        self.config.bind_timeout = timeout;
        self.config.bind_backoff = backoff;
        self
    }

    /// Set the binding backoff growth factor.
    pub fn bind_backoff_factor(mut self, factor: u32) -> Self {
        self.config.bind_backoff_factor = factor;
        self
    }

    /// Set the corrupt frame threshold.
    pub fn max_corrupt_frames(mut self, frames: u32) -> Self {
        self.config.max_corrupt_frames = frames;
        self
    }

    /// Set the largest accepted frame length.
    pub fn max_frame_body(mut self, len: usize) -> Self {
        self.config.max_frame_body = len;
        self
    }

    /// Set the acknowledgement policy.
    pub fn ack_policy(mut self, policy: AckPolicy) -> Self {
        self.config.ack_policy = policy;
        self
    }

    /// Set the unsolicited buffer size.
    pub fn unsolicited_capacity(mut self, capacity: usize) -> Self {
        self.config.unsolicited_capacity = capacity;
        self
    }

    /// Replace the command table.
    pub fn command_codes(mut self, codes: CommandCodes) -> Self {
        self.config.codes = codes;
        self
    }

    /// Replace the frame checksum.
    pub fn checksum(mut self, checksum: Arc<dyn Checksum>) -> Self {
        self.config.checksum = checksum;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DEFAULT_DEVICE_ADDR;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.device_addr.to_string(), DEFAULT_DEVICE_ADDR);
        assert_eq!(config.ack_policy, AckPolicy::ConfirmWithQuery);
    }

    #[test]
    fn test_builder() {
        let addr: SocketAddr = "10.0.0.7:7000".parse().unwrap();
        let config = ClientConfig::builder()
            .device_addr(addr)
            .max_retries(1)
            .ack_policy(AckPolicy::WriteOnly)
            .build()
            .unwrap();
        assert_eq!(config.device_addr, addr);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.ack_policy, AckPolicy::WriteOnly);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let err = ClientConfig::builder()
            .response_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert_eq!(err.field, "response_timeout");

        let err = ClientConfig::builder().max_frame_body(40).build().unwrap_err();
        assert_eq!(err.field, "max_frame_body");

        let err = ClientConfig::builder()
            .binding(0, BIND_TIMEOUT, BIND_INITIAL_BACKOFF)
            .build()
            .unwrap_err();
        assert_eq!(err.field, "bind_attempts");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_round_trip() {
        let config = ClientConfig::builder()
            .max_retries(5)
            .response_timeout(Duration::from_millis(750))
            .ack_policy(AckPolicy::AwaitStatus)
            .build()
            .unwrap();

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("checksum"));

        let back: ClientConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.device_addr, config.device_addr);
        assert_eq!(back.max_retries, 5);
        assert_eq!(back.response_timeout, Duration::from_millis(750));
        assert_eq!(back.ack_policy, AckPolicy::AwaitStatus);
        assert_eq!(back.codes, config.codes);
        let covered = [0x03, 0x02, 0x00];
        assert_eq!(back.checksum.compute(&covered), Sum8.compute(&covered));
        assert!(back.validate().is_ok());
    }

    #[test]
    fn test_bind_backoff_grows() {
        let config = ClientConfig::builder()
            .binding(5, BIND_TIMEOUT, Duration::from_millis(100))
            .bind_backoff_factor(3)
            .build()
            .unwrap();
        assert_eq!(config.bind_backoff_after(1), Duration::from_millis(100));
        assert_eq!(config.bind_backoff_after(2), Duration::from_millis(300));
        assert_eq!(config.bind_backoff_after(3), Duration::from_millis(900));
    }
}
