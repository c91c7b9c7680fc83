//! Session engine.
//!
//! One driver task per connection owns the stream, the frame decoder, the
//! payload cipher and the [`SessionPhase`] bookkeeping. Client handles talk
//! to it over channels, so sends and receives never interleave mid-frame and
//! at most one request is ever in flight.

mod driver;
mod machine;

pub(crate) use driver::{spawn, Command, SessionHandles};
pub use machine::SessionPhase;

use crate::crypto::DeviceIdentity;
use crate::packet::StatusSnapshot;

/// Acknowledgement of a request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ack {
    /// Status returned with the acknowledgement, if any.
    pub status: Option<StatusSnapshot>,
    /// The appliance is expected to drop the connection; the session is
    /// closed and a new one must be opened on the new network.
    pub disconnect_expected: bool,
}

/// Snapshot of session state published by the driver.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionView {
    /// Current phase.
    pub phase: SessionPhase,
    /// Identity learned during binding.
    pub identity: Option<DeviceIdentity>,
    /// Most recent status, solicited or not.
    pub last_status: Option<StatusSnapshot>,
}
