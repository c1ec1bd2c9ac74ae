//! Command dispatch and reply correlation.
//!
//! The device protocol has no request ids, so replies are matched by
//! command identifier. Each [`CommandClass`] therefore admits a single
//! outstanding request; a second reservation is rejected, not queued.

use crate::error::ClientError;
use crate::session::Session;
use crate::stats::BridgeStats;
use gimbalcam_protocol::{Command, CommandSet, Encoder, Frame};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Logical command classes, one outstanding request each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandClass {
    Heartbeat,
    Status,
    Record,
    Photo,
    Zoom,
    ZoomRange,
    ZoomLevel,
    VideoMode,
    VideoModeQuery,
}

impl CommandClass {
    pub fn of(command: &Command) -> Self {
        match command {
            Command::Heartbeat => CommandClass::Heartbeat,
            Command::RequestGimbalInfo => CommandClass::Status,
            Command::ToggleRecord => CommandClass::Record,
            Command::TakePhoto => CommandClass::Photo,
            Command::SetZoom(_) => CommandClass::Zoom,
            Command::RequestZoomRange => CommandClass::ZoomRange,
            Command::RequestZoomLevel => CommandClass::ZoomLevel,
            Command::SetVideoMode(_) => CommandClass::VideoMode,
            Command::RequestVideoMode => CommandClass::VideoModeQuery,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandClass::Heartbeat => "heartbeat",
            CommandClass::Status => "status",
            CommandClass::Record => "record",
            CommandClass::Photo => "photo",
            CommandClass::Zoom => "zoom",
            CommandClass::ZoomRange => "zoom range",
            CommandClass::ZoomLevel => "zoom level",
            CommandClass::VideoMode => "video mode",
            CommandClass::VideoModeQuery => "video mode query",
        }
    }
}

impl fmt::Display for CommandClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatch timing configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// How long to wait for a correlated reply.
    pub reply_timeout: Duration,
    /// Resends after the first attempt times out.
    pub retries: u32,
    /// How long to wait for telemetry to confirm a state change.
    pub confirm_window: Duration,
    /// Query interval while waiting for confirmation.
    pub confirm_poll: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_millis(500),
            retries: 2,
            confirm_window: Duration::from_secs(1),
            confirm_poll: Duration::from_millis(250),
        }
    }
}

impl DispatchConfig {
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_confirm_window(mut self, window: Duration) -> Self {
        self.confirm_window = window;
        self
    }

    pub fn with_confirm_poll(mut self, poll: Duration) -> Self {
        self.confirm_poll = poll;
        self
    }
}

/// An outstanding request for one class.
#[derive(Default)]
struct Pending {
    reply_id: Option<u8>,
    waiter: Option<oneshot::Sender<Frame>>,
}

/// Reservation of a command class. Released on drop.
pub struct Slot<'a> {
    dispatcher: &'a Dispatcher,
    class: CommandClass,
}

impl Slot<'_> {
    pub fn class(&self) -> CommandClass {
        self.class
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.dispatcher.slots.lock().remove(&self.class);
    }
}

/// Encodes, sends and correlates commands.
pub struct Dispatcher {
    session: Arc<Session>,
    commands: CommandSet,
    config: DispatchConfig,
    seq: AtomicU16,
    slots: parking_lot::Mutex<HashMap<CommandClass, Pending>>,
    stats: Arc<BridgeStats>,
}

impl Dispatcher {
    pub fn new(
        session: Arc<Session>,
        commands: CommandSet,
        config: DispatchConfig,
        stats: Arc<BridgeStats>,
    ) -> Self {
        Self {
            session,
            commands,
            config,
            seq: AtomicU16::new(0),
            slots: parking_lot::Mutex::new(HashMap::new()),
            stats,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn commands(&self) -> &CommandSet {
        &self.commands
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Reserves a command class for the lifetime of the returned slot.
    pub fn reserve(&self, class: CommandClass) -> Result<Slot<'_>, ClientError> {
        let mut slots = self.slots.lock();
        if slots.contains_key(&class) {
            tracing::debug!("Rejecting {} command: one already pending", class);
            return Err(ClientError::CommandPending(class));
        }
        slots.insert(class, Pending::default());
        Ok(Slot {
            dispatcher: self,
            class,
        })
    }

    /// Returns the number of reserved classes.
    pub fn pending_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Encodes and writes a command without waiting for a reply.
    pub async fn send(&self, command: &Command) -> Result<(), ClientError> {
        self.write(command, None).await
    }

    /// Like [`send`](Self::send), but only on session connection
    /// `connection`.
    pub async fn send_on(&self, command: &Command, connection: u64) -> Result<(), ClientError> {
        self.write(command, Some(connection)).await
    }

    async fn write(&self, command: &Command, connection: Option<u64>) -> Result<(), ClientError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let encoded = Encoder::encode_command(command, &self.commands, seq)?;
        match connection {
            Some(connection) => self.session.send_on(&encoded, connection).await?,
            None => self.session.send(&encoded).await?,
        }
        BridgeStats::incr(&self.stats.commands_sent);
        tracing::debug!("Sent {:?} seq={} ({} bytes)", command, seq, encoded.len());
        Ok(())
    }

    /// Sends a command and waits for the frame that answers it, resending
    /// on timeout.
    pub async fn request(&self, slot: &Slot<'_>, command: &Command) -> Result<Frame, ClientError> {
        let reply_id = command.cmd_id(&self.commands);
        let attempts = self.config.retries + 1;

        for attempt in 1..=attempts {
            let rx = self.arm(slot.class, reply_id);
            self.send(command).await?;

            match tokio::time::timeout(self.config.reply_timeout, rx).await {
                Ok(Ok(frame)) => return Ok(frame),
                Ok(Err(_)) => return Err(ClientError::ConnectionReset),
                Err(_) => {
                    tracing::debug!(
                        "No reply to {} command (attempt {}/{})",
                        slot.class,
                        attempt,
                        attempts
                    );
                }
            }
        }

        self.disarm(slot.class);
        BridgeStats::incr(&self.stats.command_timeouts);
        tracing::warn!("{} command timed out after {} attempts", slot.class, attempts);
        Err(ClientError::DeviceTimeout(slot.class))
    }

    fn arm(&self, class: CommandClass, reply_id: u8) -> oneshot::Receiver<Frame> {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.slots.lock();
        let pending = slots.entry(class).or_default();
        pending.reply_id = Some(reply_id);
        pending.waiter = Some(tx);
        rx
    }

    fn disarm(&self, class: CommandClass) {
        if let Some(pending) = self.slots.lock().get_mut(&class) {
            pending.reply_id = None;
            pending.waiter = None;
        }
    }

    /// Hands a frame to the request waiting for it, if any.
    pub fn resolve(&self, frame: &Frame) -> bool {
        let waiter = {
            let mut slots = self.slots.lock();
            slots
                .values_mut()
                .find(|p| p.reply_id == Some(frame.cmd_id) && p.waiter.is_some())
                .and_then(|p| {
                    p.reply_id = None;
                    p.waiter.take()
                })
        };

        match waiter {
            Some(tx) => tx.send(frame.clone()).is_ok(),
            None => false,
        }
    }

    /// Fails every waiting request with a connection reset.
    ///
    /// Reservations stay held by their owners until dropped.
    pub fn reset_pending(&self) -> usize {
        let mut slots = self.slots.lock();
        let mut dropped = 0;
        for pending in slots.values_mut() {
            pending.reply_id = None;
            if pending.waiter.take().is_some() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            tracing::debug!("Failed {} in-flight requests on disconnect", dropped);
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use bytes::Bytes;

    fn dispatcher() -> Dispatcher {
        let stats = Arc::new(BridgeStats::default());
        let session = Arc::new(Session::new("127.0.0.1", SessionConfig::default(), stats.clone()));
        Dispatcher::new(session, CommandSet::default(), DispatchConfig::default(), stats)
    }

    #[test]
    fn test_second_reservation_rejected() {
        let d = dispatcher();
        let slot = d.reserve(CommandClass::Record).unwrap();
        assert!(matches!(
            d.reserve(CommandClass::Record),
            Err(ClientError::CommandPending(CommandClass::Record))
        ));
        assert!(d.reserve(CommandClass::Zoom).is_ok());

        drop(slot);
        assert!(d.reserve(CommandClass::Record).is_ok());
        assert_eq!(d.pending_count(), 0);
    }

    #[test]
    fn test_resolve_matches_reply_id() {
        let d = dispatcher();
        let slot = d.reserve(CommandClass::ZoomLevel).unwrap();
        let mut rx = d.arm(slot.class(), 0x18);

        assert!(!d.resolve(&Frame::new(0x0A, Bytes::new())));
        assert!(d.resolve(&Frame::new(0x18, Bytes::from_static(&[2, 0]))));
        assert_eq!(rx.try_recv().unwrap().cmd_id, 0x18);

        // Only one frame per arm.
        assert!(!d.resolve(&Frame::new(0x18, Bytes::new())));
    }

    #[test]
    fn test_reset_pending_fails_waiters() {
        let d = dispatcher();
        let slot = d.reserve(CommandClass::Status).unwrap();
        let mut rx = d.arm(slot.class(), 0x0A);

        assert_eq!(d.reset_pending(), 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(d.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_request_not_connected() {
        let d = dispatcher();
        let slot = d.reserve(CommandClass::Status).unwrap();
        let result = d.request(&slot, &Command::RequestGimbalInfo).await;
        assert!(matches!(result, Err(ClientError::NotConnected)));
    }

    #[test]
    fn test_command_classes() {
        assert_eq!(CommandClass::of(&Command::ToggleRecord), CommandClass::Record);
        assert_eq!(CommandClass::of(&Command::TakePhoto), CommandClass::Photo);
        assert_eq!(CommandClass::VideoMode.to_string(), "video mode");
    }
}
