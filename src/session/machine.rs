//! Session state machine.
//!
//! Pure bookkeeping: phases, the single pending request, its deadline and
//! retry count, and the corrupt frame counter. The driver feeds it events
//! and performs whatever I/O the answers call for.
//!
//! ```text
//! Unbound --bind--> Binding --ok--> Idle <--> AwaitingResponse
//!                      |                          |
//!                      +-----------> Closed <-----+
//! ```

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use zeroize::Zeroizing;

use crate::core::{CloseReason, HeatPumpError, HeatPumpResult};

/// Lifecycle phase of a session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionPhase {
    /// Connected, not yet bound.
    #[default]
    Unbound,
    /// Binding handshake running.
    Binding,
    /// Bound, no request in flight.
    Idle,
    /// One request waiting for its response.
    AwaitingResponse,
    /// Terminal.
    Closed(CloseReason),
}

impl SessionPhase {
    /// Whether binding has completed and the session is still open.
    pub fn is_bound(&self) -> bool {
        matches!(self, SessionPhase::Idle | SessionPhase::AwaitingResponse)
    }

    /// Whether the session is closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionPhase::Closed(_))
    }
}

/// How a pending request is resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Completion {
    /// By the next status frame.
    Status,
    /// As soon as every frame is written.
    Written,
    /// By whatever ends the session: a status, the peer closing, or the
    /// deadline. Never retried.
    Terminal,
}

/// Plaintext frame queued for (re)transmission. Network configuration
/// payloads carry credentials, so the plaintext is wiped on drop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Outbound {
    pub command: u8,
    pub payload: Zeroizing<Vec<u8>>,
}

impl Outbound {
    pub fn new(command: u8, payload: Vec<u8>) -> Self {
        Self {
            command,
            payload: Zeroizing::new(payload),
        }
    }
}

/// The one request in flight.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub id: u64,
    pub kind: &'static str,
    pub frames: Vec<Outbound>,
    pub completion: Completion,
    pub sends: u32,
    pub deadline: Instant,
}

/// What the driver should do when the pending deadline passes.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DeadlineAction {
    /// Nothing pending, or the deadline moved.
    None,
    /// Send the pending frames again.
    Resend,
    /// Retries exhausted; fail with a timeout and close.
    GiveUp { attempts: u32 },
    /// A terminal request ran out its wait.
    Expire,
}

/// Who a received status belongs to.
#[derive(Debug)]
pub(crate) enum StatusDisposition {
    /// Answers the pending request, now removed.
    Matched(PendingRequest),
    /// Ends a terminal request, now removed.
    Terminal(PendingRequest),
    /// Nobody asked for it.
    Unsolicited,
}

#[derive(Debug)]
pub(crate) struct SessionState {
    phase: SessionPhase,
    pending: Option<PendingRequest>,
    next_id: u64,
    corrupt_frames: u32,
    max_retries: u32,
    max_corrupt_frames: u32,
    response_timeout: Duration,
}

impl SessionState {
    pub fn new(max_retries: u32, max_corrupt_frames: u32, response_timeout: Duration) -> Self {
        Self {
            phase: SessionPhase::Unbound,
            pending: None,
            next_id: 1,
            corrupt_frames: 0,
            max_retries,
            max_corrupt_frames,
            response_timeout,
        }
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    /// Returns `Ok(false)` when already bound.
    pub fn begin_binding(&mut self) -> HeatPumpResult<bool> {
        match &self.phase {
            SessionPhase::Unbound => {
                self.set_phase(SessionPhase::Binding);
                Ok(true)
            }
            SessionPhase::Binding => Err(HeatPumpError::Busy),
            SessionPhase::Idle | SessionPhase::AwaitingResponse => Ok(false),
            SessionPhase::Closed(reason) => Err(HeatPumpError::Closed(reason.clone())),
        }
    }

    pub fn binding_complete(&mut self) {
        if self.phase == SessionPhase::Binding {
            self.corrupt_frames = 0;
            self.set_phase(SessionPhase::Idle);
        }
    }

    /// Register a request. Fails without side effects unless idle.
    pub fn issue(
        &mut self,
        kind: &'static str,
        frames: Vec<Outbound>,
        completion: Completion,
        now: Instant,
    ) -> HeatPumpResult<u64> {
        match &self.phase {
            SessionPhase::Idle => {}
            SessionPhase::AwaitingResponse => return Err(HeatPumpError::Busy),
            SessionPhase::Unbound | SessionPhase::Binding => return Err(HeatPumpError::NotBound),
            SessionPhase::Closed(reason) => return Err(HeatPumpError::Closed(reason.clone())),
        }

        let id = self.next_id;
        self.next_id += 1;
        self.pending = Some(PendingRequest {
            id,
            kind,
            frames,
            completion,
            sends: 1,
            deadline: now + self.response_timeout,
        });
        self.set_phase(SessionPhase::AwaitingResponse);
        Ok(id)
    }

    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    pub fn on_status(&mut self) -> StatusDisposition {
        self.corrupt_frames = 0;
        match self.pending.as_ref().map(|p| p.completion) {
            Some(Completion::Status) => match self.take_pending() {
                Some(pending) => StatusDisposition::Matched(pending),
                None => StatusDisposition::Unsolicited,
            },
            Some(Completion::Terminal) => match self.take_pending() {
                Some(pending) => StatusDisposition::Terminal(pending),
                None => StatusDisposition::Unsolicited,
            },
            Some(Completion::Written) | None => StatusDisposition::Unsolicited,
        }
    }

    /// A frame passed its checksum and opened.
    pub fn on_valid_frame(&mut self) {
        self.corrupt_frames = 0;
    }

    /// Count a corrupt frame. Returns the running count once it exceeds
    /// the threshold.
    pub fn on_corrupt_frame(&mut self) -> Option<u32> {
        self.corrupt_frames += 1;
        (self.corrupt_frames > self.max_corrupt_frames).then_some(self.corrupt_frames)
    }

    pub fn on_deadline(&mut self, now: Instant) -> DeadlineAction {
        let max_retries = self.max_retries;
        let timeout = self.response_timeout;
        let Some(pending) = self.pending.as_mut() else {
            return DeadlineAction::None;
        };
        if now < pending.deadline {
            return DeadlineAction::None;
        }

        match pending.completion {
            Completion::Terminal => DeadlineAction::Expire,
            Completion::Status | Completion::Written if pending.sends <= max_retries => {
                pending.sends += 1;
                pending.deadline = now + timeout;
                DeadlineAction::Resend
            }
            Completion::Status | Completion::Written => DeadlineAction::GiveUp {
                attempts: pending.sends,
            },
        }
    }

    /// Remove the pending request if it is `id`.
    pub fn complete(&mut self, id: u64) -> Option<PendingRequest> {
        if self.pending.as_ref().is_some_and(|p| p.id == id) {
            self.take_pending()
        } else {
            None
        }
    }

    /// Drop the pending request; the session stays open.
    pub fn cancel(&mut self) -> Option<PendingRequest> {
        self.take_pending()
    }

    /// Enter the terminal phase. The first reason sticks.
    pub fn close(&mut self, reason: CloseReason) -> Option<PendingRequest> {
        let pending = self.pending.take();
        if !self.phase.is_closed() {
            self.set_phase(SessionPhase::Closed(reason));
        }
        pending
    }

    fn take_pending(&mut self) -> Option<PendingRequest> {
        let pending = self.pending.take();
        if pending.is_some() && self.phase == SessionPhase::AwaitingResponse {
            self.set_phase(SessionPhase::Idle);
        }
        pending
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        debug!(from = ?self.phase, to = ?phase, "session phase");
        self.phase = phase;
    }
}
