//! Periodic telemetry queries.
//!
//! The device reports state only when asked, so the bridge keeps the
//! reconciler fed by querying it on a fixed interval. Replies are applied
//! by the event loop like any other inbound frame.
//!
//! A status reply to a batch counts as a successful exchange: it clears
//! any error recorded before that batch went out.

use crate::dispatcher::Dispatcher;
use crate::reconciler::Reconciler;
use gimbalcam_protocol::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

/// Telemetry polling configuration.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Interval between query batches.
    pub interval: Duration,
    /// Zoom range and video mode are queried every this many batches.
    pub slow_every: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            slow_every: 10,
        }
    }
}

impl PollConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_slow_every(mut self, slow_every: u32) -> Self {
        self.slow_every = slow_every;
        self
    }
}

/// Sends telemetry queries while the session is connected.
pub struct Poller {
    dispatcher: Arc<Dispatcher>,
    reconciler: Arc<Reconciler>,
    config: PollConfig,
}

impl Poller {
    pub fn new(dispatcher: Arc<Dispatcher>, reconciler: Arc<Reconciler>, config: PollConfig) -> Self {
        Self {
            dispatcher,
            reconciler,
            config,
        }
    }

    /// Returns the queries for batch number `tick` since connect.
    pub fn batch(&self, tick: u64, zoom_ready: bool) -> Vec<Command> {
        let slow = tick % u64::from(self.config.slow_every.max(1)) == 0;
        let mut commands = vec![
            Command::Heartbeat,
            Command::RequestGimbalInfo,
            Command::RequestZoomLevel,
        ];
        if slow || !zoom_ready {
            commands.push(Command::RequestZoomRange);
        }
        if slow {
            commands.push(Command::RequestVideoMode);
        }
        commands
    }

    /// Runs until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick: u64 = 0;
        // When the previous batch went out, and the status revision then.
        let mut previous: Option<(Instant, u64)> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => break,
            }

            if !self.dispatcher.is_connected() {
                tick = 0;
                previous = None;
                continue;
            }

            let state = self.reconciler.snapshot();
            if let Some((sent_at, revision)) = previous {
                if state.revisions.record > revision {
                    self.reconciler.clear_error_before(sent_at);
                }
            }
            previous = Some((Instant::now(), state.revisions.record));

            for command in self.batch(tick, state.zoom_ready) {
                if let Err(e) = self.dispatcher.send(&command).await {
                    tracing::debug!("Telemetry poll interrupted: {}", e);
                    break;
                }
            }
            tick = tick.wrapping_add(1);
        }

        tracing::debug!("Poller stopped");
    }
}
