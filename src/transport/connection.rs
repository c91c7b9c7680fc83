//! Reliable byte-stream connection to one appliance.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, trace};

use super::error::{TransportError, TransportResult};

/// An open stream to the appliance.
///
/// Generic over the stream so sessions can run on anything that reads and
/// writes bytes; [`Connection::connect`] produces the TCP flavor. Closing is
/// idempotent and also happens when the connection is dropped.
#[derive(Debug)]
pub struct Connection<S = TcpStream> {
    stream: Option<S>,
    peer: Option<SocketAddr>,
}

impl Connection<TcpStream> {
    /// Open a TCP connection, failing after `connect_timeout`.
    pub async fn connect(addr: SocketAddr, connect_timeout: Duration) -> TransportResult<Self> {
        debug!(%addr, "connecting");
        let stream = match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(TransportError::Connect { addr, source }),
            Err(_) => {
                return Err(TransportError::ConnectTimeout {
                    addr,
                    timeout: connect_timeout,
                })
            }
        };
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream, Some(addr)))
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already-connected stream.
    pub fn from_stream(stream: S, peer: Option<SocketAddr>) -> Self {
        Self {
            stream: Some(stream),
            peer,
        }
    }

    /// Address of the appliance, when known.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Whether the connection is still open.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Write all bytes and flush.
    pub async fn send(&mut self, bytes: &[u8]) -> TransportResult<()> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        trace!(len = bytes.len(), "sent");
        Ok(())
    }

    /// Read whatever is available into `buf`, waiting at most until `deadline`.
    ///
    /// Returns the number of bytes appended. A zero-length read means the
    /// peer closed the stream and is reported as [`TransportError::PeerClosed`].
    pub async fn receive(
        &mut self,
        buf: &mut BytesMut,
        deadline: Instant,
    ) -> TransportResult<usize> {
        match timeout_at(deadline, self.read_some(buf)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    /// Read whatever is available into `buf` with no deadline of its own.
    ///
    /// Cancel safe: dropping the future before completion loses no bytes, so
    /// it can race other events in `select!` where the caller owns the timer.
    pub async fn read_some(&mut self, buf: &mut BytesMut) -> TransportResult<usize> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let n = stream.read_buf(buf).await?;
        if n == 0 {
            return Err(TransportError::PeerClosed);
        }
        trace!(len = n, "received");
        Ok(n)
    }

    /// Shut down the stream. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                trace!("shutdown failed: {e}");
            }
            debug!(peer = ?self.peer, "connection closed");
        }
    }
}
