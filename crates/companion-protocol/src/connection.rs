//! TCP connection to a Companion device.
//!
//! The socket is split into a reader task and a writer task. The reader pushes
//! every received chunk onto a bounded queue; [`TcpTransport::read`] waits
//! for the first chunk and then drains whatever else has arrived, so a single
//! read returns all bytes available at that moment. While the queue is full
//! the reader stops pulling from the socket and TCP flow control holds the
//! device back.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use companion_core::error::{Error, Result};
use companion_core::log_binary;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn, Instrument, Span};

use crate::traits::CompanionTransport;

/// How long `read` waits for the first byte.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(3);

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const READ_CHUNK_SIZE: usize = 4096;

/// Received chunks held before the reader stops pulling from the socket.
const INBOUND_CAPACITY: usize = 32;

enum Inbound {
    Data(Vec<u8>),
    /// Socket closed; `None` for an orderly close by the device.
    Closed(Option<io::Error>),
}

/// Live socket state, present between `connect` and `close`.
struct Link {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: mpsc::Receiver<Inbound>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    lost: Option<(io::ErrorKind, String)>,
}

impl Link {
    async fn read(&mut self, wait: Duration) -> Result<Vec<u8>> {
        if let Some((kind, message)) = &self.lost {
            return Err(io::Error::new(*kind, message.clone()).into());
        }

        let first = timeout(wait, self.inbound.recv()).await.map_err(|_| {
            debug!(timeout_ms = wait.as_millis() as u64, "No data received");
            Error::Timeout
        })?;

        let mut buffer = match first {
            Some(Inbound::Data(data)) => data,
            Some(Inbound::Closed(err)) => return Err(self.mark_lost(err)),
            None => return Err(self.mark_lost(None)),
        };

        while let Ok(item) = self.inbound.try_recv() {
            match item {
                Inbound::Data(data) => buffer.extend_from_slice(&data),
                Inbound::Closed(err) => {
                    // Hand out what arrived first; the next read reports the loss.
                    let _ = self.mark_lost(err);
                    break;
                }
            }
        }

        Ok(buffer)
    }

    fn mark_lost(&mut self, err: Option<io::Error>) -> Error {
        let err = err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by device")
        });
        self.lost = Some((err.kind(), err.to_string()));
        Error::Connection(err)
    }
}

/// TCP transport to a Companion device.
pub struct TcpTransport {
    host: String,
    port: u16,
    read_timeout: Duration,
    connect_timeout: Duration,
    span: Span,
    link: Option<Link>,
}

impl TcpTransport {
    /// Create new transport (not yet connected).
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let span = tracing::debug_span!("companion", host = %host, port);
        Self::with_span(host, port, span)
    }

    /// Create a transport that logs under the given span.
    pub fn with_span(host: impl Into<String>, port: u16, span: Span) -> Self {
        Self {
            host: host.into(),
            port,
            read_timeout: DEFAULT_READ_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            span,
            link: None,
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Connect to the device, replacing any previous connection.
    pub async fn connect(&mut self) -> Result<()> {
        self.close();

        let span = self.span.clone();
        let host = self.host.clone();
        let port = self.port;
        let connect_timeout = self.connect_timeout;

        let link = async move {
            debug!("Connecting");
            let stream = timeout(connect_timeout, TcpStream::connect((host.as_str(), port)))
                .await
                .map_err(|_| {
                    warn!("Connect timed out");
                    Error::Timeout
                })??;
            stream.set_nodelay(true)?;

            let (read_half, write_half) = stream.into_split();
            let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

            let reader = tokio::spawn(
                read_loop(read_half, inbound_tx.clone()).instrument(Span::current()),
            );
            let writer = tokio::spawn(
                write_loop(write_half, outbound_rx, inbound_tx).instrument(Span::current()),
            );
            debug!("Connected");

            Ok::<_, Error>(Link {
                outbound: outbound_tx,
                inbound: inbound_rx,
                reader,
                writer,
                lost: None,
            })
        }
        .instrument(span)
        .await?;

        self.link = Some(link);
        Ok(())
    }

    /// Queue bytes for the writer task.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        let _entered = self.span.enter();
        let link = self.link.as_ref().ok_or_else(not_connected)?;
        log_binary("Send data", &[("Data", data)]);
        link.outbound.send(data.to_vec()).map_err(|_| {
            Error::Connection(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "writer task stopped",
            ))
        })
    }

    /// Wait up to the read timeout for data, then return everything queued.
    pub async fn read(&mut self) -> Result<Vec<u8>> {
        let span = self.span.clone();
        let wait = self.read_timeout;
        let link = self.link.as_mut().ok_or_else(not_connected)?;
        link.read(wait).instrument(span).await
    }

    /// Close the connection. Does nothing when not connected.
    pub fn close(&mut self) {
        if let Some(link) = self.link.take() {
            let _entered = self.span.enter();
            debug!("Closing connection");
            link.reader.abort();
            link.writer.abort();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl CompanionTransport for TcpTransport {
    async fn connect(&mut self) -> Result<()> {
        self.connect().await
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.send(data)
    }

    async fn read(&mut self) -> Result<Vec<u8>> {
        self.read().await
    }

    fn close(&mut self) {
        self.close()
    }

    fn is_connected(&self) -> bool {
        self.is_connected()
    }
}

fn not_connected() -> Error {
    Error::Connection(io::Error::new(
        io::ErrorKind::NotConnected,
        "not connected",
    ))
}

async fn read_loop(mut reader: OwnedReadHalf, inbound: mpsc::Sender<Inbound>) {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("Connection closed by device");
                let _ = inbound.send(Inbound::Closed(None)).await;
                return;
            }
            Ok(n) => {
                log_binary("Received data", &[("Data", &buf[..n])]);
                if inbound.send(Inbound::Data(buf[..n].to_vec())).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(error = %e, "Connection lost");
                let _ = inbound.send(Inbound::Closed(Some(e))).await;
                return;
            }
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    inbound: mpsc::Sender<Inbound>,
) {
    while let Some(data) = outbound.recv().await {
        if let Err(e) = writer.write_all(&data).await {
            warn!(error = %e, "Write failed");
            let _ = inbound.send(Inbound::Closed(Some(e))).await;
            return;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    mod lifecycle {
        use super::*;

        #[test]
        fn new_is_not_connected() {
            let transport = TcpTransport::new("127.0.0.1", 49152);
            assert!(!transport.is_connected());
            assert_eq!(transport.host(), "127.0.0.1");
            assert_eq!(transport.port(), 49152);
            assert_eq!(transport.read_timeout(), DEFAULT_READ_TIMEOUT);
        }

        #[tokio::test]
        async fn connect_fails_on_refused() {
            let (listener, port) = listener().await;
            drop(listener);

            let mut transport = TcpTransport::new("127.0.0.1", port);
            let result = transport.connect().await;
            assert!(matches!(result, Err(Error::Connection(_))));
            assert!(!transport.is_connected());
        }

        #[tokio::test]
        async fn close_is_idempotent() {
            let (listener, port) = listener().await;
            let mut transport = TcpTransport::new("127.0.0.1", port);
            transport.close();

            transport.connect().await.unwrap();
            let _server = listener.accept().await.unwrap();
            assert!(transport.is_connected());

            transport.close();
            transport.close();
            assert!(!transport.is_connected());
        }

        #[tokio::test]
        async fn io_before_connect_fails() {
            let mut transport = TcpTransport::new("127.0.0.1", 49152);
            assert!(matches!(transport.send(&[1]), Err(Error::Connection(_))));
            assert!(matches!(transport.read().await, Err(Error::Connection(_))));
        }
    }

    mod data_flow {
        use super::*;

        #[tokio::test]
        async fn send_reaches_device() {
            let (listener, port) = listener().await;
            let mut transport = TcpTransport::new("127.0.0.1", port);
            transport.connect().await.unwrap();
            let (mut server, _) = listener.accept().await.unwrap();

            transport.send(&[0x03, 0x00, 0x00, 0x01, 0xE0]).unwrap();

            let mut buf = [0u8; 5];
            server.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, [0x03, 0x00, 0x00, 0x01, 0xE0]);
        }

        #[tokio::test]
        async fn read_returns_device_bytes() {
            let (listener, port) = listener().await;
            let mut transport = TcpTransport::new("127.0.0.1", port);
            transport.connect().await.unwrap();
            let (mut server, _) = listener.accept().await.unwrap();

            server.write_all(b"hello").await.unwrap();
            assert_eq!(transport.read().await.unwrap(), b"hello");
        }

        #[tokio::test]
        async fn read_drains_all_pending_chunks() {
            let (listener, port) = listener().await;
            let mut transport = TcpTransport::new("127.0.0.1", port);
            transport.connect().await.unwrap();
            let (mut server, _) = listener.accept().await.unwrap();

            server.write_all(b"abc").await.unwrap();
            server.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            server.write_all(b"def").await.unwrap();
            server.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;

            assert_eq!(transport.read().await.unwrap(), b"abcdef");
        }

        #[tokio::test]
        async fn unread_data_stalls_device_writes() {
            let (listener, port) = listener().await;
            let mut transport = TcpTransport::new("127.0.0.1", port);
            transport.connect().await.unwrap();
            let (mut server, _) = listener.accept().await.unwrap();

            let flood = tokio::spawn(async move {
                server.write_all(&vec![0x5A; 64 << 20]).await.unwrap();
                server
            });
            tokio::time::sleep(Duration::from_millis(300)).await;
            assert!(!flood.is_finished());

            let chunk = transport.read().await.unwrap();
            assert!(!chunk.is_empty());
            assert!(chunk.len() <= INBOUND_CAPACITY * READ_CHUNK_SIZE);
            flood.abort();
        }
    }

    mod failures {
        use super::*;

        #[tokio::test]
        async fn read_times_out_without_data() {
            let (listener, port) = listener().await;
            let mut transport =
                TcpTransport::new("127.0.0.1", port).with_read_timeout(Duration::from_millis(50));
            transport.connect().await.unwrap();
            let (mut server, _) = listener.accept().await.unwrap();

            assert!(matches!(transport.read().await, Err(Error::Timeout)));
            assert!(transport.is_connected());

            // A timeout leaves the connection usable.
            server.write_all(b"late").await.unwrap();
            let mut transport = transport.with_read_timeout(Duration::from_secs(2));
            assert_eq!(transport.read().await.unwrap(), b"late");
        }

        #[tokio::test]
        async fn read_after_device_closes_fails() {
            let (listener, port) = listener().await;
            let mut transport = TcpTransport::new("127.0.0.1", port);
            transport.connect().await.unwrap();
            let (server, _) = listener.accept().await.unwrap();
            drop(server);

            assert!(matches!(transport.read().await, Err(Error::Connection(_))));
            // The loss is remembered.
            assert!(matches!(transport.read().await, Err(Error::Connection(_))));
        }

        #[tokio::test]
        async fn data_before_close_is_delivered_first() {
            let (listener, port) = listener().await;
            let mut transport = TcpTransport::new("127.0.0.1", port);
            transport.connect().await.unwrap();
            let (mut server, _) = listener.accept().await.unwrap();

            server.write_all(b"bye").await.unwrap();
            drop(server);
            tokio::time::sleep(Duration::from_millis(100)).await;

            assert_eq!(transport.read().await.unwrap(), b"bye");
            assert!(matches!(transport.read().await, Err(Error::Connection(_))));
        }
    }
}
