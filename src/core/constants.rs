//! Protocol constants observed on the appliance's wire format.
//!
//! Values marked "observed" come from captures of the vendor app talking to
//! the indoor unit; changing them breaks interoperability with real firmware.

use std::time::Duration;

// =============================================================================
// FRAMING
// =============================================================================

/// Two-byte start-of-frame marker (observed).
pub const FRAME_MAGIC: [u8; 2] = [0x7E, 0x7E];

/// Bytes before the payload: magic (2) + length (1) + command (1).
pub const FRAME_HEADER_SIZE: usize = 4;

/// Total framing overhead: header plus the trailing checksum byte.
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_SIZE + 1;

/// Smallest legal value of the length byte (command + checksum, empty payload).
pub const MIN_FRAME_BODY: usize = 2;

/// Largest length byte accepted from the appliance (observed reader limit).
pub const DEFAULT_MAX_FRAME_BODY: usize = 60;

/// Largest length byte the one-byte length field can express.
pub const MAX_ENCODABLE_FRAME_BODY: usize = u8::MAX as usize;

// =============================================================================
// COMMAND CODES (observed unless noted)
// =============================================================================

/// Unified configuration update (also carries the remote-temperature update).
pub const CMD_CONFIG: u8 = 0x01;

/// Status query, no payload.
pub const CMD_QUERY: u8 = 0x02;

/// Status response.
pub const CMD_STATUS: u8 = 0x31;

/// Alternate status response code seen on some firmware.
pub const CMD_STATUS_ALT: u8 = 0x32;

/// Binding request (crate-defined, used by keyed binding only).
pub const CMD_BIND_REQUEST: u8 = 0x10;

/// Binding reply (crate-defined, used by keyed binding only).
pub const CMD_BIND_REPLY: u8 = 0x11;

/// Network configuration update (crate-defined layout).
pub const CMD_NETWORK: u8 = 0x20;

// =============================================================================
// PAYLOAD SIZES
// =============================================================================

/// Minimum status payload length (51-byte frame).
pub const STATUS_PAYLOAD_SIZE: usize = 46;

/// Unified configuration payload length (40-byte frame).
pub const CONFIG_PAYLOAD_SIZE: usize = 35;

/// Maximum SSID length for a network configuration update.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum WPA passphrase length for a network configuration update.
pub const MAX_PASSPHRASE_LEN: usize = 63;

// =============================================================================
// TIMING
// =============================================================================

/// Default appliance address when joined to its own access point.
pub const DEFAULT_DEVICE_ADDR: &str = "192.168.0.1:6000";

/// TCP connect timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for a response before re-sending a request.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Re-sends of a request before the session gives up with a timeout.
pub const MAX_RETRIES: u32 = 3;

/// Per-attempt binding handshake timeout.
pub const BIND_TIMEOUT: Duration = Duration::from_millis(1000);

/// Maximum binding attempts.
pub const BIND_MAX_ATTEMPTS: u32 = 5;

/// Delay before the second binding attempt; doubled after each failure.
pub const BIND_INITIAL_BACKOFF: Duration = Duration::from_millis(250);

/// Binding backoff multiplier.
pub const BIND_BACKOFF: u32 = 2;

/// Consecutive corrupt frames tolerated before the stream is declared lost.
pub const MAX_CORRUPT_FRAMES: u32 = 8;

/// Buffered unsolicited status snapshots per subscriber.
pub const UNSOLICITED_CAPACITY: usize = 16;

// =============================================================================
// CRYPTO
// =============================================================================

/// Symmetric session key size.
pub const SESSION_KEY_SIZE: usize = 32;

/// Poly1305 authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// XChaCha20 nonce size.
pub const AEAD_NONCE_SIZE: usize = 24;

/// Per-direction frame counter prepended to sealed payloads.
pub const SEAL_COUNTER_SIZE: usize = 8;

/// Bytes a sealed payload adds on top of the plaintext.
pub const SEALED_OVERHEAD: usize = SEAL_COUNTER_SIZE + AEAD_TAG_SIZE;

/// Random nonce contributed by each side of the binding handshake.
pub const BIND_NONCE_SIZE: usize = 16;

/// Device token size returned by keyed binding.
pub const DEVICE_TOKEN_SIZE: usize = 8;

/// Nonce direction: client -> appliance.
pub const NONCE_DIR_CLIENT: u8 = 0x00;

/// Nonce direction: appliance -> client.
pub const NONCE_DIR_DEVICE: u8 = 0x01;
