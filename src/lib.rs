//! # heatpump-protocol
//!
//! Client for the binary TCP control protocol spoken by WiFi-enabled heat
//! pump indoor units.
//!
//! The appliance listens on a single TCP port. A client binds a session,
//! polls the full operating status, and pushes configuration changes:
//!
//! - **Primary controls** (power, mode, setpoint, fan, louvers, timers,
//!   sleep curve, schedule) travel in one unified packet that overwrites
//!   every field, so updates are merged onto the last known status first.
//! - **Secondary parameters** (remote sensor reading, raw vendor packets)
//!   are sent as separate extended updates.
//! - **Network configuration** (AP/STA role and credentials) ends the
//!   session; the caller is told to expect the disconnect.
//!
//! ## Feature Flags
//!
//! - `sealed` (default): keyed binding handshake and XChaCha20-Poly1305
//!   payload protection
//! - `serde`: `Serialize`/`Deserialize` for configuration and status records
//!
//! ## Modules
//!
//! - [`core`]: constants and error types
//! - [`transport`]: TCP connection, framing and checksums
//! - [`crypto`]: binding schemes and payload ciphers
//! - [`packet`]: typed packet codec
//! - [`session`]: session phases and acknowledgements
//! - [`client`]: the [`HeatPumpClient`] API
//!
//! ## Example Usage
//!
//! ```no_run
//! use heatpump_protocol::prelude::*;
//!
//! # async fn run() -> HeatPumpResult<()> {
//! let client = HeatPumpClient::connect(ClientConfig::default()).await?;
//! client.bind().await?;
//!
//! let mut changes = client.subscribe_unsolicited();
//! client
//!     .update_primary(PrimaryChanges::new().power(true).mode(Mode::Heat))
//!     .await?;
//!
//! while let Some(status) = changes.recv().await {
//!     println!("{:?} at {}", status.mode, status.setpoint);
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod core;
pub mod crypto;
pub mod packet;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::client::{
        Ack, AckPolicy, ClientConfig, ClientConfigBuilder, HeatPumpClient, StatusPoller,
        UnsolicitedStatus,
    };
    pub use crate::core::{CloseReason, HeatPumpError, HeatPumpResult};
    pub use crate::crypto::{BindingScheme, DeviceIdentity, OpenBinding};
    #[cfg(feature = "sealed")]
    pub use crate::crypto::{KeyedBinding, SessionKey};
    pub use crate::packet::*;
    pub use crate::session::SessionPhase;
}

// Re-export commonly used items at crate root
pub use crate::client::{Ack, AckPolicy, ClientConfig, HeatPumpClient};
pub use crate::core::{CloseReason, HeatPumpError, HeatPumpResult};
pub use crate::packet::{NetworkConfig, PrimaryChanges, StatusSnapshot};
pub use crate::session::SessionPhase;
