//! High-level heat pump client API.
//!
//! [`HeatPumpClient`] is a cheap, cloneable handle to one session driver.
//! Every clone shares the same connection, so concurrent callers still see at
//! most one request in flight; the second gets [`HeatPumpError::Busy`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use super::{AckPolicy, ClientConfig};
use crate::core::{CloseReason, ConfigError, HeatPumpError, HeatPumpResult, PacketError};
use crate::crypto::{BindingScheme, DeviceIdentity, OpenBinding};
use crate::packet::{
    ExtendedUpdate, NetworkConfig, PrimaryChanges, Request, StatusQuery, StatusSnapshot,
    UnifiedConfig,
};
use crate::session::{self, Ack, Command, SessionHandles, SessionPhase, SessionView};
use crate::transport::Connection;

/// A heat pump protocol client.
///
/// # Example
///
/// ```no_run
/// use heatpump_protocol::prelude::*;
///
/// # async fn run() -> HeatPumpResult<()> {
/// let config = ClientConfig::builder()
///     .device_addr("192.168.0.1:6000".parse().unwrap())
///     .build()?;
///
/// let client = HeatPumpClient::connect(config).await?;
/// client.bind().await?;
///
/// let status = client.get_status().await?;
/// println!("power {} at {}", status.power, status.setpoint);
///
/// client
///     .update_primary(
///         PrimaryChanges::new()
///             .power(true)
///             .setpoint(Setpoint::celsius(24)),
///     )
///     .await?;
///
/// client.disconnect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct HeatPumpClient {
    handles: Arc<SessionHandles>,
    ack_policy: AckPolicy,
    peer: Option<SocketAddr>,
}

impl HeatPumpClient {
    /// Connect to `config.device_addr` with the implicit binding the stock
    /// firmware uses. The session starts [`SessionPhase::Unbound`].
    pub async fn connect(config: ClientConfig) -> HeatPumpResult<Self> {
        Self::connect_with(config, Box::new(OpenBinding)).await
    }

    /// Connect with a custom binding scheme.
    pub async fn connect_with(
        config: ClientConfig,
        scheme: Box<dyn BindingScheme>,
    ) -> HeatPumpResult<Self> {
        config.validate()?;
        let addr = config.device_addr;
        let conn = Connection::connect(addr, config.connect_timeout)
            .await
            .map_err(|source| HeatPumpError::Connect { addr, source })?;
        info!(%addr, "connected to appliance");
        Ok(Self::spawn(conn, config, scheme))
    }

    /// Run a session over an already-open stream with implicit binding.
    ///
    /// Must be called inside a tokio runtime.
    pub fn from_stream<S>(stream: S, config: ClientConfig) -> HeatPumpResult<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::from_stream_with(stream, config, Box::new(OpenBinding))
    }

    /// Run a session over an already-open stream with a custom binding
    /// scheme.
    pub fn from_stream_with<S>(
        stream: S,
        config: ClientConfig,
        scheme: Box<dyn BindingScheme>,
    ) -> HeatPumpResult<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        config.validate()?;
        Ok(Self::spawn(Connection::from_stream(stream, None), config, scheme))
    }

    fn spawn<S>(conn: Connection<S>, config: ClientConfig, scheme: Box<dyn BindingScheme>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let peer = conn.peer();
        let ack_policy = config.ack_policy;
        Self {
            handles: Arc::new(session::spawn(conn, config, scheme)),
            ack_policy,
            peer,
        }
    }

    /// Run the binding handshake. Returns immediately when already bound.
    pub async fn bind(&self) -> HeatPumpResult<DeviceIdentity> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Bind { reply }).await?;
        rx.await.map_err(|_| self.closed())?
    }

    /// Query the full appliance status.
    pub async fn get_status(&self) -> HeatPumpResult<StatusSnapshot> {
        let ack = self
            .request(Request::Query(StatusQuery), AckPolicy::AwaitStatus)
            .await?;
        ack.status
            .ok_or_else(|| {
                PacketError::Invalid("status query acknowledged without a status".into()).into()
            })
    }

    /// Change primary controls.
    ///
    /// The appliance overwrites every primary field on each update, so the
    /// changes are merged onto the last known status (queried first if none
    /// has been seen) and the complete configuration is sent.
    pub async fn update_primary(&self, changes: PrimaryChanges) -> HeatPumpResult<Ack> {
        let baseline = match self.last_status() {
            Some(status) => status,
            None => self.get_status().await?,
        };
        let config = UnifiedConfig::merge(&baseline, &changes)?;
        debug!(?changes, "updating primary controls");
        self.request(Request::Unified(config), self.ack_policy).await
    }

    /// Send a secondary-parameter update.
    pub async fn update_extended(&self, update: ExtendedUpdate) -> HeatPumpResult<Ack> {
        self.request(Request::Extended(update), self.ack_policy).await
    }

    /// Reconfigure the appliance's WiFi.
    ///
    /// On success the session is closed with
    /// [`CloseReason::NetworkReconfigured`] and the returned [`Ack`] has
    /// `disconnect_expected` set; the appliance dropping the connection is
    /// part of that outcome, not an error.
    pub async fn update_network_config(&self, config: NetworkConfig) -> HeatPumpResult<Ack> {
        config.validate()?;
        info!(mode = ?config.mode, ssid = %config.ssid, "reconfiguring appliance network");
        self.request(Request::Network(config), AckPolicy::AwaitStatus).await
    }

    /// Subscribe to status frames nobody asked for.
    pub fn subscribe_unsolicited(&self) -> UnsolicitedStatus {
        UnsolicitedStatus {
            rx: self.handles.unsolicited.resubscribe(),
        }
    }

    /// Cancel the in-flight request, if any. The session stays open.
    pub async fn cancel(&self) -> HeatPumpResult<()> {
        self.send(Command::Cancel).await
    }

    /// Poll the status every `interval`.
    ///
    /// Ticks that find another request in flight are skipped. Polling stops
    /// when the session closes or the poller is dropped.
    pub fn poll(&self, interval: Duration) -> HeatPumpResult<StatusPoller> {
        if interval.is_zero() {
            return Err(ConfigError::new("poll interval", "must be non-zero").into());
        }

        let (tx, rx) = watch::channel(None);
        let client = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match client.get_status().await {
                    Ok(status) => {
                        if tx.send(Some(status)).is_err() {
                            break;
                        }
                    }
                    Err(HeatPumpError::Busy) => trace!("poll skipped, request in flight"),
                    Err(err) if err.is_fatal() => {
                        debug!(%err, "polling stopped");
                        break;
                    }
                    Err(err) => warn!(%err, "poll failed"),
                }
            }
        });

        Ok(StatusPoller { latest: rx, task })
    }

    /// Close the session and the connection. Idempotent.
    pub async fn disconnect(&self) -> HeatPumpResult<()> {
        let (done, finished) = oneshot::channel();
        if self.handles.commands.send(Command::Disconnect { done }).await.is_err() {
            return Ok(());
        }
        let _ = finished.await;
        info!(peer = ?self.peer, "disconnected");
        Ok(())
    }

    /// Current session phase.
    pub fn phase(&self) -> SessionPhase {
        self.handles.view.borrow().phase.clone()
    }

    /// Identity learned during binding.
    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.handles.view.borrow().identity.clone()
    }

    /// Most recent status received, solicited or not.
    pub fn last_status(&self) -> Option<StatusSnapshot> {
        self.handles.view.borrow().last_status.clone()
    }

    /// Snapshot of the whole session view.
    pub fn view(&self) -> SessionView {
        self.handles.view.borrow().clone()
    }

    /// Address of the appliance, when connected over TCP.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    async fn request(&self, request: Request, policy: AckPolicy) -> HeatPumpResult<Ack> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Request {
            request,
            policy,
            reply,
        })
        .await?;
        rx.await.map_err(|_| self.closed())?
    }

    async fn send(&self, command: Command) -> HeatPumpResult<()> {
        self.handles
            .commands
            .send(command)
            .await
            .map_err(|_| self.closed())
    }

    /// Error for a driver that has exited.
    fn closed(&self) -> HeatPumpError {
        match &self.handles.view.borrow().phase {
            SessionPhase::Closed(reason) => HeatPumpError::Closed(reason.clone()),
            _ => HeatPumpError::Closed(CloseReason::Disconnected),
        }
    }
}

/// Stream of unsolicited status snapshots.
#[derive(Debug)]
pub struct UnsolicitedStatus {
    rx: broadcast::Receiver<StatusSnapshot>,
}

impl UnsolicitedStatus {
    /// Next unsolicited status, or `None` once the session has closed.
    ///
    /// A subscriber that falls behind skips the oldest snapshots.
    pub async fn recv(&mut self) -> Option<StatusSnapshot> {
        loop {
            match self.rx.recv().await {
                Ok(status) => return Some(status),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "unsolicited subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Handle to a periodic status poll. Dropping it stops polling.
#[derive(Debug)]
pub struct StatusPoller {
    latest: watch::Receiver<Option<StatusSnapshot>>,
    task: JoinHandle<()>,
}

impl StatusPoller {
    /// Wait for the next polled status. `None` once polling has stopped.
    pub async fn changed(&mut self) -> Option<StatusSnapshot> {
        self.latest.changed().await.ok()?;
        self.latest.borrow_and_update().clone()
    }

    /// Latest polled status.
    pub fn latest(&self) -> Option<StatusSnapshot> {
        self.latest.borrow().clone()
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;
    use crate::core::{CMD_BIND_REQUEST, CMD_CONFIG, CMD_NETWORK, CMD_QUERY};
    use crate::packet::{Mode, Setpoint, WirePacket};
    use crate::testing::{idle_status, Appliance, ApplianceBuilder};
    use crate::transport::{encode_frame, Frame, Sum8};

    fn pair(builder: ApplianceBuilder, config: ClientConfig) -> (HeatPumpClient, Appliance) {
        let (client_io, appliance_io) = duplex(1024);
        let appliance = builder.serve(appliance_io);
        let client = HeatPumpClient::from_stream(client_io, config).unwrap();
        (client, appliance)
    }

    async fn bound(builder: ApplianceBuilder, config: ClientConfig) -> (HeatPumpClient, Appliance) {
        let (client, appliance) = pair(builder, config);
        client.bind().await.unwrap();
        (client, appliance)
    }

    async fn wait_for(client: &HeatPumpClient, phase: impl Fn(&SessionPhase) -> bool) {
        while !phase(&client.phase()) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn corrupt_frame() -> Vec<u8> {
        vec![0x7E, 0x7E, 0x03, 0x31, 0x00, 0xFF]
    }

    #[tokio::test]
    async fn test_requests_need_binding() {
        let (client, _appliance) = pair(Appliance::builder(), ClientConfig::default());
        assert_eq!(client.phase(), SessionPhase::Unbound);
        assert!(matches!(client.get_status().await, Err(HeatPumpError::NotBound)));

        let identity = client.bind().await.unwrap();
        assert_eq!(identity, DeviceIdentity::default());
        assert_eq!(client.phase(), SessionPhase::Idle);

        // binding twice is a no-op
        assert_eq!(client.bind().await.unwrap(), identity);
    }

    #[tokio::test]
    async fn test_power_on_keeps_other_fields() {
        let (client, appliance) = bound(Appliance::builder(), ClientConfig::default()).await;

        let before = client.get_status().await.unwrap();
        assert!(!before.power);
        assert_eq!(before, idle_status());

        let ack = client
            .update_primary(PrimaryChanges::new().power(true).setpoint(Setpoint::celsius(24)))
            .await
            .unwrap();
        assert!(!ack.disconnect_expected);

        let mut expected = before.clone();
        expected.power = true;
        expected.setpoint = Setpoint::celsius(24);
        assert_eq!(ack.status, Some(expected.clone()));
        assert_eq!(appliance.status(), expected);
        assert_eq!(client.last_status(), Some(expected));

        let sent = appliance.payloads(CMD_CONFIG);
        assert_eq!(sent.len(), 1);
        let config = UnifiedConfig::decode(&sent[0]).unwrap();
        assert!(config.power);
        assert_eq!(config.mode, Mode::Cool);
        assert_eq!(config.setpoint, Setpoint::celsius(24));
        assert_eq!(config.vertical_air, before.vertical_air);
        assert!(config.light);
        assert!(!config.update_timers);
    }

    #[tokio::test]
    async fn test_each_update_overwrites_from_latest_status() {
        let (client, appliance) = bound(Appliance::builder(), ClientConfig::default()).await;

        client
            .update_primary(PrimaryChanges::new().power(true))
            .await
            .unwrap();
        client
            .update_primary(PrimaryChanges::new().mode(Mode::Heat))
            .await
            .unwrap();

        let sent = appliance.payloads(CMD_CONFIG);
        assert_eq!(sent.len(), 2);
        let second = UnifiedConfig::decode(&sent[1]).unwrap();
        assert!(second.power, "power from the first update must be carried");
        assert_eq!(second.mode, Mode::Heat);
        assert_eq!(appliance.status().mode, Mode::Heat);
    }

    #[tokio::test]
    async fn test_second_request_is_busy() {
        let (client, appliance) = bound(Appliance::builder().silent(), ClientConfig::default()).await;

        let first = tokio::spawn({
            let client = client.clone();
            async move { client.get_status().await }
        });
        wait_for(&client, |p| *p == SessionPhase::AwaitingResponse).await;

        assert!(matches!(client.get_status().await, Err(HeatPumpError::Busy)));
        assert_eq!(appliance.count(CMD_QUERY), 1);
        first.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_request_retries_then_times_out() {
        let config = ClientConfig::builder()
            .max_retries(2)
            .response_timeout(Duration::from_secs(1))
            .build()
            .unwrap();
        let (client, appliance) = bound(Appliance::builder().silent(), config).await;

        let err = client.get_status().await.unwrap_err();
        assert!(matches!(err, HeatPumpError::Timeout { attempts: 3 }));
        assert_eq!(appliance.count(CMD_QUERY), 3);
        assert_eq!(client.phase(), SessionPhase::Closed(CloseReason::Timeout));
        assert!(matches!(
            client.get_status().await,
            Err(HeatPumpError::Closed(CloseReason::Timeout))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_retry_resends_whole_exchange() {
        let config = ClientConfig::builder()
            .max_retries(1)
            .response_timeout(Duration::from_secs(1))
            .build()
            .unwrap();
        let (client, appliance) = bound(Appliance::builder().silent(), config).await;

        let update = ExtendedUpdate::remote_temperature(21);
        assert!(client.update_extended(update).await.is_err());
        assert_eq!(appliance.count(CMD_CONFIG), 2);
        assert_eq!(appliance.count(CMD_QUERY), 2);
    }

    #[tokio::test]
    async fn test_network_config_ends_session() {
        let (client, mut appliance) = bound(Appliance::builder(), ClientConfig::default()).await;

        let ack = client
            .update_network_config(NetworkConfig::station("home", "hunter22"))
            .await
            .unwrap();
        assert!(ack.disconnect_expected);
        assert_eq!(
            client.phase(),
            SessionPhase::Closed(CloseReason::NetworkReconfigured)
        );
        assert!(matches!(
            client.get_status().await,
            Err(HeatPumpError::Closed(CloseReason::NetworkReconfigured))
        ));

        appliance.finished().await;
        let sent = appliance.payloads(CMD_NETWORK);
        assert_eq!(sent.len(), 1);
        let config = NetworkConfig::decode_payload(CMD_NETWORK, &sent[0]).unwrap();
        assert_eq!(config, NetworkConfig::station("home", "hunter22"));
    }

    #[tokio::test]
    async fn test_invalid_network_config_rejected_locally() {
        let (client, appliance) = bound(Appliance::builder(), ClientConfig::default()).await;

        let err = client
            .update_network_config(NetworkConfig::station("", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, HeatPumpError::MalformedPacket(_)));
        assert_eq!(appliance.count(CMD_NETWORK), 0);
        assert_eq!(client.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_unsolicited_status_is_published() {
        let (client, appliance) = bound(Appliance::builder(), ClientConfig::default()).await;
        let mut unsolicited = client.subscribe_unsolicited();

        appliance.update_status(|status| status.power = true);
        appliance.push_status();

        let status = unsolicited.recv().await.unwrap();
        assert!(status.power);
        assert_eq!(client.last_status().map(|s| s.power), Some(true));

        client.disconnect().await.unwrap();
        assert!(unsolicited.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_keeps_session_open() {
        let (client, appliance) = bound(Appliance::builder().silent(), ClientConfig::default()).await;

        let first = tokio::spawn({
            let client = client.clone();
            async move { client.get_status().await }
        });
        wait_for(&client, |p| *p == SessionPhase::AwaitingResponse).await;

        client.cancel().await.unwrap();
        assert!(matches!(first.await.unwrap(), Err(HeatPumpError::Cancelled)));
        assert_eq!(client.phase(), SessionPhase::Idle);

        appliance.set_silent(false);
        assert!(client.get_status().await.is_ok());
    }

    #[tokio::test]
    async fn test_status_after_cancel_is_unsolicited() {
        let (client, appliance) = bound(Appliance::builder().silent(), ClientConfig::default()).await;
        let mut unsolicited = client.subscribe_unsolicited();

        let first = tokio::spawn({
            let client = client.clone();
            async move { client.get_status().await }
        });
        wait_for(&client, |p| *p == SessionPhase::AwaitingResponse).await;
        client.cancel().await.unwrap();
        assert!(matches!(first.await.unwrap(), Err(HeatPumpError::Cancelled)));

        // the answer to the cancelled query shows up late
        appliance.update_status(|s| s.power = true);
        appliance.push_status();
        let late = unsolicited.recv().await.unwrap();
        assert!(late.power);
        assert_eq!(client.phase(), SessionPhase::Idle);

        // the next query is answered by its own reply, not the late one
        appliance.update_status(|s| {
            s.power = false;
            s.mode = Mode::Heat;
        });
        appliance.set_silent(false);
        let status = client.get_status().await.unwrap();
        assert!(!status.power);
        assert_eq!(status.mode, Mode::Heat);
        assert_eq!(appliance.count(CMD_QUERY), 2);
    }

    #[tokio::test]
    async fn test_dropped_request_frees_slot() {
        let (client, appliance) = bound(Appliance::builder().silent(), ClientConfig::default()).await;

        let attempt = tokio::time::timeout(Duration::from_millis(20), client.get_status()).await;
        assert!(attempt.is_err());
        wait_for(&client, |p| *p == SessionPhase::Idle).await;

        appliance.set_silent(false);
        assert!(client.get_status().await.is_ok());
    }

    #[tokio::test]
    async fn test_write_only_policy() {
        let config = ClientConfig::builder()
            .ack_policy(AckPolicy::WriteOnly)
            .build()
            .unwrap();
        let (client, appliance) = bound(Appliance::builder(), config).await;

        let ack = client
            .update_extended(ExtendedUpdate::remote_temperature(22))
            .await
            .unwrap();
        assert_eq!(ack, Ack::default());
        assert_eq!(appliance.count(CMD_QUERY), 0);

        assert_eq!(client.get_status().await.unwrap().remote_temperature, 22);
    }

    #[tokio::test]
    async fn test_await_status_policy() {
        let config = ClientConfig::builder()
            .ack_policy(AckPolicy::AwaitStatus)
            .build()
            .unwrap();
        let (client, appliance) = bound(Appliance::builder().echo_after_config(), config).await;

        let ack = client
            .update_primary(PrimaryChanges::new().power(true))
            .await
            .unwrap();
        assert!(ack.status.is_some_and(|s| s.power));
        // baseline query only
        assert_eq!(appliance.count(CMD_QUERY), 1);
    }

    #[tokio::test]
    async fn test_corrupt_frame_is_skipped() {
        let (client, appliance) = bound(Appliance::builder(), ClientConfig::default()).await;

        appliance.push_raw(corrupt_frame());
        assert!(client.get_status().await.is_ok());
        assert_eq!(client.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_corrupt_stream_closes_session() {
        let config = ClientConfig::builder().max_corrupt_frames(1).build().unwrap();
        let (client, appliance) = bound(Appliance::builder(), config).await;

        let mut garbage = corrupt_frame();
        garbage.extend(corrupt_frame());
        appliance.push_raw(garbage);

        wait_for(&client, SessionPhase::is_closed).await;
        assert_eq!(
            client.phase(),
            SessionPhase::Closed(CloseReason::CorruptStream { frames: 2 })
        );
    }

    #[tokio::test]
    async fn test_malformed_status_keeps_session() {
        let (client, appliance) = bound(Appliance::builder(), ClientConfig::default()).await;
        appliance.set_silent(true);

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.get_status().await }
        });
        wait_for(&client, |p| *p == SessionPhase::AwaitingResponse).await;

        // a status frame with a short body
        let short = encode_frame(&Frame::new(0x31, vec![0u8; 10]), &Sum8).unwrap();
        appliance.push_raw(short.to_vec());

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, HeatPumpError::MalformedPacket(_)));
        assert_eq!(client.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_poller_publishes_status() {
        let (client, _appliance) = bound(Appliance::builder(), ClientConfig::default()).await;

        assert!(client.poll(Duration::ZERO).is_err());

        let mut poller = client.poll(Duration::from_millis(10)).unwrap();
        let status = poller.changed().await.unwrap();
        assert_eq!(status, idle_status());
        assert_eq!(poller.latest(), Some(status));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (client, _appliance) = bound(Appliance::builder(), ClientConfig::default()).await;

        client.disconnect().await.unwrap();
        client.disconnect().await.unwrap();
        assert_eq!(client.phase(), SessionPhase::Closed(CloseReason::Disconnected));
        assert!(matches!(
            client.update_primary(PrimaryChanges::new().power(true)).await,
            Err(HeatPumpError::Closed(CloseReason::Disconnected))
        ));
    }

    #[tokio::test]
    async fn test_loopback_tcp_session() {
        let (appliance, addr) = Appliance::builder().listen().await;
        let config = ClientConfig::builder().device_addr(addr).build().unwrap();

        let client = HeatPumpClient::connect(config).await.unwrap();
        assert_eq!(client.peer(), Some(addr));
        let identity = client.bind().await.unwrap();
        assert_eq!(identity.peer, Some(addr));

        let status = client.get_status().await.unwrap();
        assert_eq!(status, appliance.status());

        client.disconnect().await.unwrap();
        assert_eq!(client.phase(), SessionPhase::Closed(CloseReason::Disconnected));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = ClientConfig::builder().device_addr(addr).build().unwrap();
        let err = HeatPumpClient::connect(config).await.unwrap_err();
        assert!(matches!(err, HeatPumpError::Connect { addr: a, .. } if a == addr));
    }

    #[cfg(feature = "sealed")]
    mod sealed {
        use super::*;
        use crate::core::SESSION_KEY_SIZE;
        use crate::crypto::{KeyedBinding, KeyedResponder, SessionKey};

        const TOKEN: [u8; 8] = *b"HP-00017";

        fn key() -> SessionKey {
            SessionKey::from_bytes([0x42; SESSION_KEY_SIZE])
        }

        #[tokio::test]
        async fn test_sealed_session() {
            let (client_io, appliance_io) = duplex(1024);
            let appliance = Appliance::builder()
                .keyed(KeyedResponder::new(key(), TOKEN))
                .serve(appliance_io);
            let client = HeatPumpClient::from_stream_with(
                client_io,
                ClientConfig::default(),
                Box::new(KeyedBinding::new(key())),
            )
            .unwrap();

            let identity = client.bind().await.unwrap();
            assert_eq!(identity.token, Some(TOKEN));
            assert_eq!(client.identity(), Some(identity));

            let ack = client
                .update_primary(PrimaryChanges::new().power(true))
                .await
                .unwrap();
            assert!(ack.status.is_some_and(|s| s.power));

            // the appliance saw the plaintext only after opening
            let sent = appliance.payloads(CMD_CONFIG);
            assert!(UnifiedConfig::decode(&sent[0]).unwrap().power);
        }

        #[tokio::test(start_paused = true)]
        async fn test_binding_attempts_exhausted() {
            let (client_io, appliance_io) = duplex(1024);
            let appliance = Appliance::builder().silent().serve(appliance_io);
            let config = ClientConfig::builder()
                .binding(3, Duration::from_secs(1), Duration::from_millis(100))
                .build()
                .unwrap();
            let client =
                HeatPumpClient::from_stream_with(client_io, config, Box::new(KeyedBinding::new(key())))
                    .unwrap();

            let err = client.bind().await.unwrap_err();
            assert!(matches!(
                err,
                HeatPumpError::Bind(crate::core::BindError::Exhausted { attempts: 3, .. })
            ));
            assert_eq!(appliance.count(CMD_BIND_REQUEST), 3);
            assert!(matches!(client.phase(), SessionPhase::Closed(CloseReason::BindFailed(_))));
        }

        fn keyed_client(client_io: tokio::io::DuplexStream, config: ClientConfig) -> HeatPumpClient {
            HeatPumpClient::from_stream_with(client_io, config, Box::new(KeyedBinding::new(key())))
                .unwrap()
        }

        #[tokio::test(start_paused = true)]
        async fn test_binding_retries_with_backoff() {
            let (client_io, appliance_io) = duplex(1024);
            let appliance = Appliance::builder()
                .keyed(KeyedResponder::new(key(), TOKEN))
                .bind_replies(vec![None, None])
                .serve(appliance_io);
            let config = ClientConfig::builder()
                .binding(4, Duration::from_secs(1), Duration::from_millis(100))
                .bind_backoff_factor(2)
                .build()
                .unwrap();
            let client = keyed_client(client_io, config);

            let identity = client.bind().await.unwrap();
            assert_eq!(identity.token, Some(TOKEN));

            let times = appliance.bind_times();
            assert_eq!(times.len(), 3);
            assert!(times[1] - times[0] >= Duration::from_millis(1100));
            assert!(times[2] - times[1] >= Duration::from_millis(1200));

            let status = client.get_status().await.unwrap();
            assert_eq!(status, idle_status());
        }

        #[tokio::test(start_paused = true)]
        async fn test_late_binding_reply_is_skipped() {
            let (client_io, appliance_io) = duplex(1024);
            let appliance = Appliance::builder()
                .keyed(KeyedResponder::new(key(), TOKEN))
                .bind_replies(vec![
                    Some(Duration::from_millis(1200)),
                    Some(Duration::from_millis(50)),
                    Some(Duration::from_millis(50)),
                ])
                .serve(appliance_io);
            let config = ClientConfig::builder()
                .binding(5, Duration::from_secs(1), Duration::from_millis(250))
                .build()
                .unwrap();
            let client = keyed_client(client_io, config);

            let identity = client.bind().await.unwrap();
            assert_eq!(identity.token, Some(TOKEN));
            assert_eq!(appliance.count(CMD_BIND_REQUEST), 2);

            // the session runs on the second attempt's keys
            let ack = client
                .update_primary(PrimaryChanges::new().power(true))
                .await
                .unwrap();
            assert!(ack.status.is_some_and(|s| s.power));
        }

        #[tokio::test]
        async fn test_status_in_binding_read_is_published() {
            let (client_io, appliance_io) = duplex(1024);
            let _appliance = Appliance::builder()
                .keyed(KeyedResponder::new(key(), TOKEN))
                .status_after_bind()
                .serve(appliance_io);
            let client = keyed_client(client_io, ClientConfig::default());
            let mut unsolicited = client.subscribe_unsolicited();

            client.bind().await.unwrap();
            let status = tokio::time::timeout(Duration::from_secs(1), unsolicited.recv())
                .await
                .expect("status buffered with the binding reply was not published");
            assert_eq!(status, Some(idle_status()));
        }

        #[tokio::test]
        async fn test_wrong_key_fails_binding() {
            let (client_io, appliance_io) = duplex(1024);
            let _appliance = Appliance::builder()
                .keyed(KeyedResponder::new(SessionKey::from_bytes([1; SESSION_KEY_SIZE]), TOKEN))
                .serve(appliance_io);
            let config = ClientConfig::builder()
                .binding(2, Duration::from_millis(50), Duration::from_millis(10))
                .build()
                .unwrap();
            let client =
                HeatPumpClient::from_stream_with(client_io, config, Box::new(KeyedBinding::new(key())))
                    .unwrap();

            assert!(matches!(client.bind().await, Err(HeatPumpError::Bind(_))));
            assert!(client.phase().is_closed());
        }
    }
}
