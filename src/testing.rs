//! In-process appliance for end-to-end tests.
//!
//! Speaks the wire protocol over any byte stream: answers status queries,
//! applies unified configurations to its own snapshot, answers keyed
//! binding requests, and hangs up after a network configuration.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use crate::core::{CMD_STATUS, MAX_ENCODABLE_FRAME_BODY};
use crate::crypto::{Cleartext, PayloadCipher};
#[cfg(feature = "sealed")]
use crate::crypto::KeyedResponder;
use crate::packet::{
    idle_payload, CommandCodes, ExtendedUpdate, StatusSnapshot, UnifiedConfig, WirePacket,
};
use crate::transport::{encode_frame, Frame, FrameDecoder, Sum8};

/// A powered-off unit cooling at 26 °C.
pub(crate) fn idle_status() -> StatusSnapshot {
    StatusSnapshot::decode(CMD_STATUS, &idle_payload()).unwrap()
}

/// Appliance behavior.
#[derive(Debug, Default)]
pub(crate) struct ApplianceBuilder {
    status: Option<StatusSnapshot>,
    silent: bool,
    echo_after_config: bool,
    #[cfg(feature = "sealed")]
    responder: Option<KeyedResponder>,
    #[cfg(feature = "sealed")]
    bind_replies: Vec<Option<Duration>>,
    #[cfg(feature = "sealed")]
    status_after_bind: bool,
}

impl ApplianceBuilder {
    pub fn status(mut self, status: StatusSnapshot) -> Self {
        self.status = Some(status);
        self
    }

    /// Record frames but never answer.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Reply with a status after every configuration frame.
    pub fn echo_after_config(mut self) -> Self {
        self.echo_after_config = true;
        self
    }

    #[cfg(feature = "sealed")]
    pub fn keyed(mut self, responder: KeyedResponder) -> Self {
        self.responder = Some(responder);
        self
    }

    /// How to answer each binding request, in order: `None` ignores it,
    /// `Some(delay)` replies after `delay`. Later requests are answered
    /// at once.
    #[cfg(feature = "sealed")]
    pub fn bind_replies(mut self, plan: Vec<Option<Duration>>) -> Self {
        self.bind_replies = plan;
        self
    }

    /// Send the current status in the same write as the binding reply.
    #[cfg(feature = "sealed")]
    pub fn status_after_bind(mut self) -> Self {
        self.status_after_bind = true;
        self
    }

    pub fn serve<S>(self, stream: S) -> Appliance
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (shared, push_tx, push_rx) = self.shared();
        let task = tokio::spawn(run(stream, self, shared.clone(), push_rx));
        Appliance {
            shared,
            push: push_tx,
            task,
        }
    }

    /// Accept one TCP connection on a loopback port.
    pub async fn listen(self) -> (Appliance, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shared, push_tx, push_rx) = self.shared();
        let state = shared.clone();
        let task = tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                run(stream, self, state, push_rx).await;
            }
        });
        let appliance = Appliance {
            shared,
            push: push_tx,
            task,
        };
        (appliance, addr)
    }

    fn shared(
        &self,
    ) -> (
        Arc<Mutex<Shared>>,
        mpsc::UnboundedSender<Push>,
        mpsc::UnboundedReceiver<Push>,
    ) {
        let shared = Arc::new(Mutex::new(Shared {
            status: self.status.clone().unwrap_or_else(idle_status),
            received: Vec::new(),
            bind_times: Vec::new(),
            silent: self.silent,
        }));
        let (tx, rx) = mpsc::unbounded_channel();
        (shared, tx, rx)
    }
}

#[derive(Debug)]
struct Shared {
    status: StatusSnapshot,
    /// Command and plaintext payload of every frame received.
    received: Vec<(u8, Vec<u8>)>,
    /// When each binding request arrived.
    #[cfg_attr(not(feature = "sealed"), allow(dead_code))]
    bind_times: Vec<Instant>,
    silent: bool,
}

#[derive(Debug)]
enum Push {
    Status,
    Raw(Vec<u8>),
}

enum Reply {
    None,
    Frames(Vec<Vec<u8>>),
    #[cfg_attr(not(feature = "sealed"), allow(dead_code))]
    Delayed(Duration, Vec<u8>),
    Hangup,
}

/// Handle to a running appliance. Dropping it stops the appliance.
#[derive(Debug)]
pub(crate) struct Appliance {
    shared: Arc<Mutex<Shared>>,
    push: mpsc::UnboundedSender<Push>,
    task: JoinHandle<()>,
}

impl Appliance {
    pub fn builder() -> ApplianceBuilder {
        ApplianceBuilder::default()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.shared.lock().unwrap().status.clone()
    }

    pub fn update_status(&self, f: impl FnOnce(&mut StatusSnapshot)) {
        f(&mut self.shared.lock().unwrap().status);
    }

    pub fn set_silent(&self, silent: bool) {
        self.shared.lock().unwrap().silent = silent;
    }

    /// Frames received with `command`.
    pub fn count(&self, command: u8) -> usize {
        self.payloads(command).len()
    }

    /// Plaintext payloads received with `command`, oldest first.
    pub fn payloads(&self, command: u8) -> Vec<Vec<u8>> {
        self.shared
            .lock()
            .unwrap()
            .received
            .iter()
            .filter(|(cmd, _)| *cmd == command)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Arrival time of every binding request.
    #[cfg(feature = "sealed")]
    pub fn bind_times(&self) -> Vec<Instant> {
        self.shared.lock().unwrap().bind_times.clone()
    }

    /// Send the current status without being asked.
    pub fn push_status(&self) {
        self.push.send(Push::Status).unwrap();
    }

    /// Write raw bytes to the client.
    pub fn push_raw(&self, bytes: Vec<u8>) {
        self.push.send(Push::Raw(bytes)).unwrap();
    }

    /// Wait until the client hangs up or the appliance does.
    pub async fn finished(&mut self) {
        let _ = (&mut self.task).await;
    }
}

impl Drop for Appliance {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<S>(
    mut stream: S,
    options: ApplianceBuilder,
    shared: Arc<Mutex<Shared>>,
    mut push: mpsc::UnboundedReceiver<Push>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let codes = CommandCodes::default();
    let mut decoder = FrameDecoder::new().with_max_body(MAX_ENCODABLE_FRAME_BODY);
    let mut cipher: Box<dyn PayloadCipher> = Box::new(Cleartext);

    loop {
        tokio::select! {
            read = stream.read_buf(decoder.buffer_mut()) => {
                if !matches!(read, Ok(n) if n > 0) {
                    return;
                }
                loop {
                    let frame = match decoder.decode() {
                        Ok(Some(frame)) => frame,
                        Ok(None) => break,
                        Err(_) => {
                            decoder.resync();
                            continue;
                        }
                    };
                    match handle(frame, &options, &shared, &codes, &mut cipher) {
                        Reply::None => {}
                        Reply::Frames(frames) => {
                            for bytes in frames {
                                if stream.write_all(&bytes).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Reply::Delayed(delay, bytes) => {
                            sleep(delay).await;
                            if stream.write_all(&bytes).await.is_err() {
                                return;
                            }
                        }
                        Reply::Hangup => {
                            let _ = stream.shutdown().await;
                            return;
                        }
                    }
                }
            }
            Some(push) = push.recv() => {
                let bytes = match push {
                    Push::Status => {
                        let status = shared.lock().unwrap().status.clone();
                        status_frame(&status, &codes, cipher.as_mut())
                    }
                    Push::Raw(bytes) => bytes,
                };
                if stream.write_all(&bytes).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn handle(
    frame: Frame,
    options: &ApplianceBuilder,
    shared: &Mutex<Shared>,
    codes: &CommandCodes,
    cipher: &mut Box<dyn PayloadCipher>,
) -> Reply {
    let mut shared = shared.lock().unwrap();

    if frame.command == codes.bind_request {
        #[cfg_attr(not(feature = "sealed"), allow(unused_variables))]
        let index = shared.bind_times.len();
        shared.bind_times.push(Instant::now());
        shared.received.push((frame.command, frame.payload.to_vec()));
        if shared.silent {
            return Reply::None;
        }
        #[cfg(feature = "sealed")]
        if let Some(responder) = &options.responder {
            let delay = match options.bind_replies.get(index) {
                Some(None) => return Reply::None,
                Some(Some(delay)) => *delay,
                None => Duration::ZERO,
            };
            if let Ok((reply, sealed)) = responder.respond(&frame.payload) {
                *cipher = Box::new(sealed);
                let mut bytes = encode_frame(&Frame::new(codes.bind_reply, reply), &Sum8)
                    .unwrap()
                    .to_vec();
                if options.status_after_bind {
                    bytes.extend(status_frame(&shared.status, codes, cipher.as_mut()));
                }
                return Reply::Delayed(delay, bytes);
            }
        }
        return Reply::None;
    }

    let Ok(plaintext) = cipher.open(frame.command, &frame.payload) else {
        return Reply::None;
    };
    shared.received.push((frame.command, plaintext.clone()));
    if shared.silent {
        return Reply::None;
    }

    if frame.command == codes.query {
        return Reply::Frames(vec![status_frame(&shared.status, codes, cipher.as_mut())]);
    }
    if frame.command == codes.network {
        return Reply::Hangup;
    }
    if frame.command == codes.config {
        if let Ok(config) = UnifiedConfig::decode(&plaintext) {
            config.apply_to(&mut shared.status);
        } else if let Ok(ExtendedUpdate::RemoteTemperature { celsius, .. }) =
            ExtendedUpdate::decode_payload(frame.command, &plaintext)
        {
            shared.status.remote_temperature = celsius;
        }
        if options.echo_after_config {
            return Reply::Frames(vec![status_frame(&shared.status, codes, cipher.as_mut())]);
        }
    }
    Reply::None
}

pub(crate) fn status_frame(
    status: &StatusSnapshot,
    codes: &CommandCodes,
    cipher: &mut dyn PayloadCipher,
) -> Vec<u8> {
    let payload = cipher.seal(codes.status, &status.encode().unwrap()).unwrap();
    encode_frame(&Frame::new(codes.status, payload), &Sum8)
        .unwrap()
        .to_vec()
}
