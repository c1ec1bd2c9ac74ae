//! TCP session to the device.
//!
//! One session owns at most one socket at a time. [`Session::run`] keeps it
//! connected, reconnecting on a fixed interval, and forwards every decoded
//! frame as a [`SessionEvent`].

use crate::error::ClientError;
use crate::stats::BridgeStats;
use gimbalcam_protocol::{Decoder, Frame, DEFAULT_PORT};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex, Notify};

/// Default read buffer size (4 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4 * 1024;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Device TCP port.
    pub port: u16,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Longest silence tolerated on a live socket.
    pub read_timeout: Duration,
    /// Delay between reconnect attempts.
    pub reconnect_interval: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(3),
            reconnect_interval: Duration::from_secs(2),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl SessionConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }
}

/// A frame stamped with its arrival time.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub frame: Frame,
    pub received_at: Instant,
}

/// Events produced by the session.
#[derive(Debug)]
pub enum SessionEvent {
    /// Connection number `connection` is up; numbers start at 1.
    Connected { address: String, connection: u64 },
    ConnectFailed { address: String, reason: String },
    Frame(InboundFrame),
    Disconnected { reason: String },
}

/// Why a connected read loop ended.
enum ReadEnd {
    Shutdown,
    Reset(String),
    Failed(String),
}

/// A logical connection to one device address.
pub struct Session {
    config: SessionConfig,
    address: parking_lot::Mutex<String>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
    /// Successful connects so far. Changed only under the writer lock.
    connection: AtomicU64,
    /// Wakes the run loop to drop the socket and reconnect.
    reset: Notify,
    /// Wakes the read loop after a failed write.
    broken: Notify,
    write_error: parking_lot::Mutex<Option<String>>,
    stats: Arc<BridgeStats>,
}

impl Session {
    pub fn new(address: impl Into<String>, config: SessionConfig, stats: Arc<BridgeStats>) -> Self {
        Self {
            config,
            address: parking_lot::Mutex::new(address.into()),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            connection: AtomicU64::new(0),
            reset: Notify::new(),
            broken: Notify::new(),
            write_error: parking_lot::Mutex::new(None),
            stats,
        }
    }

    /// Returns the current target address.
    pub fn address(&self) -> String {
        self.address.lock().clone()
    }

    /// Returns whether a socket is up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Returns the number of the current (or last) connection.
    pub fn connection(&self) -> u64 {
        self.connection.load(Ordering::SeqCst)
    }

    /// Points the session at a new address, dropping any live socket.
    pub fn retarget(&self, address: impl Into<String>) {
        *self.address.lock() = address.into();
        self.reset.notify_one();
    }

    /// Writes one encoded frame.
    pub async fn send(&self, bytes: &[u8]) -> Result<(), ClientError> {
        self.write(bytes, None).await
    }

    /// Writes one encoded frame, but only on connection number `connection`.
    ///
    /// Fails with [`ClientError::ConnectionReset`] if the session has
    /// reconnected since.
    pub async fn send_on(&self, bytes: &[u8], connection: u64) -> Result<(), ClientError> {
        self.write(bytes, Some(connection)).await
    }

    async fn write(&self, bytes: &[u8], connection: Option<u64>) -> Result<(), ClientError> {
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
        if connection.is_some_and(|c| c != self.connection.load(Ordering::SeqCst)) {
            return Err(ClientError::ConnectionReset);
        }
        if let Err(e) = writer.write_all(bytes).await {
            tracing::debug!("Write failed: {}", e);
            writer_guard.take();
            self.fail(format!("write failed: {}", e));
            return Err(ClientError::Io(e));
        }
        Ok(())
    }

    /// Marks the live socket dead; the read loop reports `reason` and
    /// reconnects after the usual interval.
    fn fail(&self, reason: String) {
        self.connected.store(false, Ordering::SeqCst);
        *self.write_error.lock() = Some(reason);
        self.broken.notify_one();
    }

    /// Keeps the session connected until shutdown.
    ///
    /// Returns when `shutdown` fires or the event receiver is dropped.
    pub async fn run(&self, events: mpsc::Sender<SessionEvent>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let address = self.address();
            tracing::debug!("Connecting to {}:{}...", address, self.config.port);

            let attempt = tokio::time::timeout(
                self.config.connect_timeout,
                TcpStream::connect((address.as_str(), self.config.port)),
            );
            let result = tokio::select! {
                result = attempt => result,
                _ = shutdown.recv() => break,
            };

            let stream = match result {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    let reason = format!("connect to {} failed: {}", address, e);
                    if !self.backoff(&events, &mut shutdown, address, reason).await {
                        break;
                    }
                    continue;
                }
                Err(_) => {
                    let reason = format!("connect to {} timed out", address);
                    if !self.backoff(&events, &mut shutdown, address, reason).await {
                        break;
                    }
                    continue;
                }
            };

            stream.set_nodelay(true).ok();
            let (mut reader, writer) = stream.into_split();
            let connection = {
                let mut writer_guard = self.writer.lock().await;
                *writer_guard = Some(writer);
                self.write_error.lock().take();
                self.connection.fetch_add(1, Ordering::SeqCst) + 1
            };
            self.connected.store(true, Ordering::SeqCst);
            BridgeStats::incr(&self.stats.connects_total);
            tracing::info!("Connected to device at {}:{}", address, self.config.port);

            if events
                .send(SessionEvent::Connected {
                    address: address.clone(),
                    connection,
                })
                .await
                .is_err()
            {
                self.teardown().await;
                break;
            }

            let end = self.read_frames(&mut reader, &events, &mut shutdown).await;
            self.teardown().await;
            BridgeStats::incr(&self.stats.disconnects_total);

            let (reason, pause) = match end {
                ReadEnd::Shutdown => {
                    let _ = events
                        .send(SessionEvent::Disconnected {
                            reason: "bridge shutting down".to_string(),
                        })
                        .await;
                    break;
                }
                ReadEnd::Reset(reason) => (reason, false),
                ReadEnd::Failed(reason) => (reason, true),
            };

            tracing::info!("Disconnected from {}: {}", address, reason);
            if events
                .send(SessionEvent::Disconnected { reason })
                .await
                .is_err()
            {
                break;
            }

            if pause && !self.pause(&mut shutdown).await {
                break;
            }
        }

        tracing::debug!("Session loop stopped");
    }

    /// Reports a failed attempt and waits before the next one.
    async fn backoff(
        &self,
        events: &mpsc::Sender<SessionEvent>,
        shutdown: &mut broadcast::Receiver<()>,
        address: String,
        reason: String,
    ) -> bool {
        tracing::debug!("{}", reason);
        if events
            .send(SessionEvent::ConnectFailed { address, reason })
            .await
            .is_err()
        {
            return false;
        }
        self.pause(shutdown).await
    }

    /// Sleeps one reconnect interval. A retarget cuts the wait short.
    async fn pause(&self, shutdown: &mut broadcast::Receiver<()>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.config.reconnect_interval) => true,
            _ = self.reset.notified() => true,
            _ = shutdown.recv() => false,
        }
    }

    async fn teardown(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }

    async fn read_frames(
        &self,
        reader: &mut OwnedReadHalf,
        events: &mpsc::Sender<SessionEvent>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> ReadEnd {
        let mut decoder = Decoder::new();
        let mut buf = vec![0u8; self.config.read_buffer_size];

        loop {
            let read = tokio::time::timeout(self.config.read_timeout, reader.read(&mut buf));
            let n = tokio::select! {
                result = read => match result {
                    Err(_) => return ReadEnd::Failed("read timeout".to_string()),
                    Ok(Err(e)) => return ReadEnd::Failed(e.to_string()),
                    Ok(Ok(0)) => return ReadEnd::Failed("device closed connection".to_string()),
                    Ok(Ok(n)) => n,
                },
                _ = self.reset.notified() => {
                    return ReadEnd::Reset("connection reset".to_string());
                }
                _ = self.broken.notified() => {
                    // A permit left over from an earlier socket carries no error.
                    match self.write_error.lock().take() {
                        Some(reason) => return ReadEnd::Failed(reason),
                        None => continue,
                    }
                }
                _ = shutdown.recv() => return ReadEnd::Shutdown,
            };

            decoder.extend(&buf[..n]);

            loop {
                match decoder.decode_frame() {
                    Ok(Some(frame)) => {
                        BridgeStats::incr(&self.stats.frames_received);
                        let inbound = InboundFrame {
                            frame,
                            received_at: Instant::now(),
                        };
                        if events.send(SessionEvent::Frame(inbound)).await.is_err() {
                            return ReadEnd::Shutdown;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        BridgeStats::incr(&self.stats.checksum_errors);
                        tracing::debug!("Resynchronizing after bad frame: {}", e);
                    }
                }
            }
        }
    }
}
