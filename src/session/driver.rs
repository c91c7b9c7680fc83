//! Driver task: owns the connection and runs the session state machine.

use std::future::pending;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use super::machine::{
    Completion, DeadlineAction, Outbound, SessionPhase, SessionState, StatusDisposition,
};
use super::{Ack, SessionView};
use crate::client::{AckPolicy, ClientConfig};
use crate::core::{
    BindError, CloseReason, HeatPumpError, HeatPumpResult, PacketError, MAX_ENCODABLE_FRAME_BODY,
    MIN_FRAME_BODY,
};
use crate::crypto::{BindOutcome, BindStep, BindingScheme, Cleartext, DeviceIdentity, PayloadCipher};
use crate::packet::{Inbound, Request, StatusQuery, StatusSnapshot};
use crate::transport::{encode_frame, Checksum, Connection, Frame, FrameDecoder, TransportError};

const COMMAND_QUEUE: usize = 16;

/// Requests from client handles to the driver.
#[derive(Debug)]
pub(crate) enum Command {
    Bind {
        reply: oneshot::Sender<HeatPumpResult<DeviceIdentity>>,
    },
    Request {
        request: Request,
        policy: AckPolicy,
        reply: oneshot::Sender<HeatPumpResult<Ack>>,
    },
    Cancel,
    Disconnect {
        done: oneshot::Sender<()>,
    },
}

/// Channels connecting client handles to one driver task.
///
/// `unsolicited` is never read; subscribers resubscribe from it, so they see
/// the channel close when the driver exits.
#[derive(Debug)]
pub(crate) struct SessionHandles {
    pub commands: mpsc::Sender<Command>,
    pub view: watch::Receiver<SessionView>,
    pub unsolicited: broadcast::Receiver<StatusSnapshot>,
}

/// Spawn the driver for `conn`. Must be called inside a tokio runtime.
pub(crate) fn spawn<S>(
    conn: Connection<S>,
    config: ClientConfig,
    scheme: Box<dyn BindingScheme>,
) -> SessionHandles
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
    let (view_tx, view_rx) = watch::channel(SessionView::default());
    let (unsolicited_tx, unsolicited_rx) = broadcast::channel(config.unsolicited_capacity);

    let driver = Driver {
        conn,
        decoder: FrameDecoder::with_checksum(config.checksum.clone())
            .with_max_body(config.max_frame_body),
        cipher: Box::new(Cleartext),
        scheme,
        state: SessionState::new(
            config.max_retries,
            config.max_corrupt_frames,
            config.response_timeout,
        ),
        identity: None,
        waiter: None,
        closers: Vec::new(),
        commands: commands_rx,
        view: view_tx,
        unsolicited: unsolicited_tx,
        config,
    };
    tokio::spawn(driver.run());

    SessionHandles {
        commands: commands_tx,
        view: view_rx,
        unsolicited: unsolicited_rx,
    }
}

/// The caller waiting on the pending request.
struct Waiter {
    id: u64,
    reply: oneshot::Sender<HeatPumpResult<Ack>>,
}

enum AttemptError {
    /// Worth another attempt.
    Retry(BindError),
    /// The connection is unusable.
    Fatal(HeatPumpError),
}

struct Driver<S> {
    conn: Connection<S>,
    decoder: FrameDecoder<Arc<dyn Checksum>>,
    cipher: Box<dyn PayloadCipher>,
    scheme: Box<dyn BindingScheme>,
    state: SessionState,
    identity: Option<DeviceIdentity>,
    waiter: Option<Waiter>,
    closers: Vec<oneshot::Sender<()>>,
    commands: mpsc::Receiver<Command>,
    view: watch::Sender<SessionView>,
    unsolicited: broadcast::Sender<StatusSnapshot>,
    config: ClientConfig,
}

impl<S> Driver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn run(mut self) {
        debug!(peer = ?self.conn.peer(), "session driver started");

        while !self.state.phase().is_closed() {
            let deadline = self.state.deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => self.close(CloseReason::Disconnected),
                },
                read = self.conn.read_some(self.decoder.buffer_mut()) => match read {
                    Ok(_) => self.drain_frames(),
                    Err(err) => self.on_transport_error(err),
                },
                () = sleep_until_some(deadline) => self.on_deadline().await,
                () = requester_gone(&mut self.waiter) => self.on_requester_gone(),
            }
        }

        self.shutdown().await;
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Bind { reply } => {
                let result = match self.state.begin_binding() {
                    Ok(true) => {
                        self.publish_phase();
                        self.bind().await
                    }
                    Ok(false) => Ok(self.identity.clone().unwrap_or_default()),
                    Err(err) => Err(err),
                };
                let _ = reply.send(result);
            }
            Command::Request {
                request,
                policy,
                reply,
            } => self.on_request(request, policy, reply).await,
            Command::Cancel => {
                if let Some(pending) = self.state.cancel() {
                    debug!(id = pending.id, kind = pending.kind, "request cancelled");
                    self.publish_phase();
                    self.resolve(pending.id, Err(HeatPumpError::Cancelled));
                }
            }
            Command::Disconnect { done } => {
                self.closers.push(done);
                self.close(CloseReason::Disconnected);
            }
        }
    }

    // ========================================================================
    // Binding
    // ========================================================================

    async fn bind(&mut self) -> HeatPumpResult<DeviceIdentity> {
        let attempts = self.config.bind_attempts;
        let reply_body = self.scheme.max_reply_len() + MIN_FRAME_BODY;
        self.decoder
            .set_max_body(self.config.max_frame_body.max(reply_body));

        let mut last = BindError::Timeout;
        for attempt in 1..=attempts {
            match self.bind_attempt().await {
                Ok(outcome) => {
                    let identity = self.install(outcome);
                    self.drain_frames();
                    return Ok(identity);
                }
                Err(AttemptError::Fatal(err)) => {
                    self.close(close_reason_for(&err));
                    return Err(err);
                }
                Err(AttemptError::Retry(err)) => {
                    warn!(attempt, attempts, %err, "binding attempt failed");
                    last = err;
                    if attempt < attempts {
                        sleep(self.config.bind_backoff_after(attempt)).await;
                    }
                }
            }
        }

        let err = BindError::Exhausted {
            attempts,
            last: Box::new(last),
        };
        self.close(CloseReason::BindFailed(err.to_string()));
        Err(err.into())
    }

    async fn bind_attempt(&mut self) -> Result<BindOutcome, AttemptError> {
        let request = match self.scheme.start().map_err(AttemptError::Retry)? {
            BindStep::Complete(outcome) => return Ok(outcome),
            BindStep::Send(payload) => payload,
        };

        // Bytes left over from an abandoned attempt belong to nobody.
        self.decoder.clear();
        let frame = Frame::new(self.config.codes.bind_request, request);
        let bytes = encode_frame(&frame, &*self.config.checksum)
            .map_err(|err| AttemptError::Fatal(err.into()))?;
        trace!(frame = %hex::encode(&bytes), "sending binding request");
        self.conn
            .send(&bytes)
            .await
            .map_err(|err| AttemptError::Fatal(err.into()))?;

        let deadline = Instant::now() + self.config.bind_timeout;
        loop {
            while let Some(frame) = self.next_raw_frame() {
                if frame.command == self.config.codes.bind_reply {
                    match self.scheme.finish(&frame.payload) {
                        Err(BindError::Stale) => {
                            debug!("ignoring binding reply to an earlier attempt");
                            continue;
                        }
                        result => return result.map_err(AttemptError::Retry),
                    }
                }
                debug!(command = frame.command, "ignoring frame while binding");
            }
            match self.conn.receive(self.decoder.buffer_mut(), deadline).await {
                Ok(_) => {}
                Err(TransportError::Timeout) => {
                    return Err(AttemptError::Retry(BindError::Timeout));
                }
                Err(err) => return Err(AttemptError::Fatal(err.into())),
            }
        }
    }

    fn next_raw_frame(&mut self) -> Option<Frame> {
        loop {
            match self.decoder.decode() {
                Ok(frame) => return frame,
                Err(err) => {
                    let dropped = self.decoder.resync();
                    warn!(%err, dropped, "corrupt frame while binding");
                }
            }
        }
    }

    fn install(&mut self, outcome: BindOutcome) -> DeviceIdentity {
        let identity = outcome.identity.with_peer(self.conn.peer());
        self.decoder
            .set_max_body(self.config.max_frame_body + outcome.cipher.overhead());
        self.cipher = outcome.cipher;
        self.identity = Some(identity.clone());
        self.state.binding_complete();
        info!(
            peer = ?identity.peer,
            token = ?identity.token.map(hex::encode),
            "session bound"
        );

        let phase = self.state.phase().clone();
        let published = identity.clone();
        self.view.send_modify(|view| {
            view.phase = phase;
            view.identity = Some(published);
        });
        identity
    }

    // ========================================================================
    // Requests
    // ========================================================================

    async fn on_request(
        &mut self,
        request: Request,
        policy: AckPolicy,
        reply: oneshot::Sender<HeatPumpResult<Ack>>,
    ) {
        if reply.is_closed() {
            debug!(kind = request.kind(), "requester dropped before the request was issued");
            return;
        }
        let (frames, completion) = match self.plan(&request, policy) {
            Ok(plan) => plan,
            Err(err) => {
                let _ = reply.send(Err(err));
                return;
            }
        };
        let id = match self
            .state
            .issue(request.kind(), frames, completion, Instant::now())
        {
            Ok(id) => id,
            Err(err) => {
                let _ = reply.send(Err(err));
                return;
            }
        };
        debug!(id, kind = request.kind(), ?completion, "request issued");
        self.waiter = Some(Waiter { id, reply });
        self.publish_phase();

        if let Err(err) = self.transmit().await {
            let reason = close_reason_for(&err);
            self.fail(err, reason);
            return;
        }
        if completion == Completion::Written && self.state.complete(id).is_some() {
            self.publish_phase();
            self.resolve(id, Ok(Ack::default()));
        }
    }

    /// Frames to send for `request` and how its answer is recognized.
    fn plan(
        &self,
        request: &Request,
        policy: AckPolicy,
    ) -> HeatPumpResult<(Vec<Outbound>, Completion)> {
        let codes = &self.config.codes;
        let (command, payload) = request.encode(codes)?;
        let primary = Outbound::new(command, payload);

        let max = MAX_ENCODABLE_FRAME_BODY - MIN_FRAME_BODY - self.cipher.overhead();
        if primary.payload.len() > max {
            return Err(PacketError::TooLong {
                field: "payload",
                max,
                actual: primary.payload.len(),
            }
            .into());
        }

        Ok(match request {
            Request::Query(_) => (vec![primary], Completion::Status),
            Request::Network(_) => (vec![primary], Completion::Terminal),
            Request::Unified(_) | Request::Extended(_) => match policy {
                AckPolicy::ConfirmWithQuery => {
                    let (command, payload) = Request::Query(StatusQuery).encode(codes)?;
                    (
                        vec![primary, Outbound::new(command, payload)],
                        Completion::Status,
                    )
                }
                AckPolicy::AwaitStatus => (vec![primary], Completion::Status),
                AckPolicy::WriteOnly => (vec![primary], Completion::Written),
            },
        })
    }

    /// Seal and write every frame of the pending request. Re-sealing on each
    /// attempt keeps sealed counters increasing across retries.
    async fn transmit(&mut self) -> HeatPumpResult<()> {
        let Some(pending) = self.state.pending() else {
            return Ok(());
        };
        let frames = pending.frames.clone();
        let (id, attempt) = (pending.id, pending.sends);

        for out in &frames {
            let sealed = self.cipher.seal(out.command, &out.payload)?;
            let bytes = encode_frame(&Frame::new(out.command, sealed), &*self.config.checksum)?;
            trace!(id, attempt, frame = %hex::encode(&bytes), "sending");
            self.conn.send(&bytes).await?;
        }
        Ok(())
    }

    async fn on_deadline(&mut self) {
        match self.state.on_deadline(Instant::now()) {
            DeadlineAction::None => {}
            DeadlineAction::Resend => {
                if let Some(pending) = self.state.pending() {
                    debug!(
                        id = pending.id,
                        kind = pending.kind,
                        attempt = pending.sends,
                        "no response, retrying"
                    );
                }
                if let Err(err) = self.transmit().await {
                    let reason = close_reason_for(&err);
                    self.fail(err, reason);
                }
            }
            DeadlineAction::GiveUp { attempts } => {
                warn!(attempts, "no response, giving up");
                self.fail(HeatPumpError::Timeout { attempts }, CloseReason::Timeout);
            }
            DeadlineAction::Expire => {
                if let Some(id) = self.state.pending().map(|p| p.id) {
                    self.finish_terminal(id, None);
                }
            }
        }
    }

    fn on_requester_gone(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            if let Some(pending) = self.state.complete(waiter.id) {
                debug!(
                    id = pending.id,
                    kind = pending.kind,
                    "requester dropped, request cancelled"
                );
            }
            self.publish_phase();
        }
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    fn drain_frames(&mut self) {
        while !self.state.phase().is_closed() {
            match self.decoder.decode() {
                Ok(Some(frame)) => self.on_frame(frame),
                Ok(None) => break,
                Err(err) => {
                    let dropped = self.decoder.resync();
                    warn!(%err, dropped, "corrupt frame, resynchronizing");
                    self.on_corrupt(err.into());
                }
            }
        }
    }

    fn on_frame(&mut self, frame: Frame) {
        trace!(
            command = frame.command,
            payload = %hex::encode(&frame.payload),
            "received"
        );
        let plaintext = match self.cipher.open(frame.command, &frame.payload) {
            Ok(plaintext) => plaintext,
            Err(err) => {
                warn!(%err, command = frame.command, "payload failed to open");
                self.on_corrupt(err.into());
                return;
            }
        };
        self.state.on_valid_frame();

        match Inbound::decode(&self.config.codes, frame.command, &plaintext) {
            Ok(Inbound::Status(status)) => self.on_status(status),
            Ok(Inbound::BindReply(_)) => debug!("stray binding reply ignored"),
            Ok(Inbound::Unknown { command, payload }) => {
                debug!(command, len = payload.len(), "unhandled frame")
            }
            Err(err) => self.on_malformed(err),
        }
    }

    fn on_status(&mut self, status: StatusSnapshot) {
        let latest = status.clone();
        self.view.send_modify(|view| view.last_status = Some(latest));

        match self.state.on_status() {
            StatusDisposition::Matched(pending) => {
                debug!(
                    id = pending.id,
                    kind = pending.kind,
                    attempts = pending.sends,
                    "request answered"
                );
                self.publish_phase();
                self.resolve(
                    pending.id,
                    Ok(Ack {
                        status: Some(status),
                        disconnect_expected: false,
                    }),
                );
            }
            StatusDisposition::Terminal(pending) => self.finish_terminal(pending.id, Some(status)),
            StatusDisposition::Unsolicited => {
                trace!(receivers = self.unsolicited.receiver_count(), "unsolicited status");
                let _ = self.unsolicited.send(status);
            }
        }
    }

    /// A recognized packet with an invalid body fails the request waiting
    /// for it; the session stays usable.
    fn on_malformed(&mut self, err: PacketError) {
        warn!(%err, "malformed packet");
        let awaiting_status = self
            .state
            .pending()
            .is_some_and(|p| p.completion == Completion::Status);
        if awaiting_status {
            let pending = self.state.cancel();
            self.publish_phase();
            if let Some(pending) = pending {
                self.resolve(pending.id, Err(err.into()));
            }
        }
    }

    fn on_corrupt(&mut self, err: HeatPumpError) {
        if let Some(frames) = self.state.on_corrupt_frame() {
            warn!(frames, "too many consecutive corrupt frames");
            self.fail(err, CloseReason::CorruptStream { frames });
        }
    }

    fn on_transport_error(&mut self, err: TransportError) {
        let terminal = self
            .state
            .pending()
            .is_some_and(|p| p.completion == Completion::Terminal);
        if let (true, Some(id)) = (terminal, self.state.pending().map(|p| p.id)) {
            debug!(%err, "appliance dropped the connection after network reconfiguration");
            self.finish_terminal(id, None);
            return;
        }

        let err = HeatPumpError::from(err);
        let reason = close_reason_for(&err);
        self.fail(err, reason);
    }

    // ========================================================================
    // Completion and shutdown
    // ========================================================================

    fn resolve(&mut self, id: u64, result: HeatPumpResult<Ack>) {
        match self.waiter.take() {
            Some(waiter) if waiter.id == id => {
                if waiter.reply.send(result).is_err() {
                    debug!(id, "requester went away before the answer");
                }
            }
            other => self.waiter = other,
        }
    }

    fn finish_terminal(&mut self, id: u64, status: Option<StatusSnapshot>) {
        self.state.close(CloseReason::NetworkReconfigured);
        self.publish_phase();
        info!("network reconfigured, session closed");
        self.resolve(
            id,
            Ok(Ack {
                status,
                disconnect_expected: true,
            }),
        );
    }

    /// Close the session, failing the pending request with `err`.
    fn fail(&mut self, err: HeatPumpError, reason: CloseReason) {
        warn!(%reason, %err, "closing session");
        let pending = self.state.close(reason);
        self.publish_phase();
        if let Some(pending) = pending {
            self.resolve(pending.id, Err(err));
        }
    }

    /// Close the session, failing the pending request with the close reason.
    fn close(&mut self, reason: CloseReason) {
        debug!(%reason, "closing session");
        let pending = self.state.close(reason.clone());
        self.publish_phase();
        if let Some(pending) = pending {
            self.resolve(pending.id, Err(HeatPumpError::Closed(reason)));
        }
    }

    fn publish_phase(&mut self) {
        let phase = self.state.phase().clone();
        self.view.send_if_modified(|view| {
            if view.phase == phase {
                return false;
            }
            view.phase = phase;
            true
        });
    }

    async fn shutdown(mut self) {
        let reason = match self.state.phase() {
            SessionPhase::Closed(reason) => reason.clone(),
            _ => CloseReason::Disconnected,
        };
        self.conn.close().await;
        self.cipher = Box::new(Cleartext);

        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Bind { reply } => {
                    let _ = reply.send(Err(HeatPumpError::Closed(reason.clone())));
                }
                Command::Request { reply, .. } => {
                    let _ = reply.send(Err(HeatPumpError::Closed(reason.clone())));
                }
                Command::Cancel => {}
                Command::Disconnect { done } => self.closers.push(done),
            }
        }
        for done in self.closers.drain(..) {
            let _ = done.send(());
        }
        debug!(%reason, "session driver stopped");
    }
}

fn close_reason_for(err: &HeatPumpError) -> CloseReason {
    match err {
        HeatPumpError::Closed(reason) => reason.clone(),
        HeatPumpError::Timeout { .. } => CloseReason::Timeout,
        HeatPumpError::Bind(err) => CloseReason::BindFailed(err.to_string()),
        other => CloseReason::Transport(other.to_string()),
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn requester_gone(waiter: &mut Option<Waiter>) {
    match waiter {
        Some(waiter) => waiter.reply.closed().await,
        None => pending().await,
    }
}
