//! Heat pump client.
//!
//! [`HeatPumpClient`] is the API collaborators use; [`ClientConfig`] holds
//! every tunable of the session engine.

#[allow(clippy::module_inception)]
mod client;
mod config;

pub use client::*;
pub use config::*;
pub use crate::session::{Ack, SessionView};
