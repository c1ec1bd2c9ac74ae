//! Prometheus metrics for the gimbalcam bridge.
//!
//! HTTP metrics are recorded per request. Device traffic counters live in
//! the bridge as atomics and are copied into the registry at scrape time.

use gimbalcam_client::StatsSnapshot;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Request duration histogram buckets (in seconds). Mutating routes can
/// wait out a full confirmation window.
const DURATION_BUCKETS: &[f64] = &[0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Prometheus metrics for the bridge.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Total HTTP requests by route.
    pub requests_total: CounterVec,
    /// Total failed requests by error code.
    pub errors_total: CounterVec,
    /// Request duration histogram by route.
    pub request_duration: HistogramVec,
    /// 1 while a socket to the device is up.
    pub device_connected: IntGauge,
    pub frames_received: IntCounter,
    pub checksum_errors: IntCounter,
    pub commands_sent: IntCounter,
    pub command_timeouts: IntCounter,
    pub device_connects: IntCounter,
    pub device_disconnects: IntCounter,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Requests
        let requests_total = CounterVec::new(
            Opts::new("gimbalcam_http_requests_total", "Total HTTP requests by route"),
            &["route"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        // Errors
        let errors_total = CounterVec::new(
            Opts::new("gimbalcam_errors_total", "Total failed requests by error code"),
            &["code"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        // Request duration
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "gimbalcam_request_duration_seconds",
                "Request duration in seconds by route",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["route"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        // Device
        let device_connected = IntGauge::with_opts(Opts::new(
            "gimbalcam_device_connected",
            "Whether the bridge holds a live device connection",
        ))?;
        registry.register(Box::new(device_connected.clone()))?;

        let frames_received = IntCounter::with_opts(Opts::new(
            "gimbalcam_frames_received_total",
            "Valid frames decoded from the device",
        ))?;
        registry.register(Box::new(frames_received.clone()))?;

        let checksum_errors = IntCounter::with_opts(Opts::new(
            "gimbalcam_checksum_errors_total",
            "Frames dropped for a bad checksum or length",
        ))?;
        registry.register(Box::new(checksum_errors.clone()))?;

        let commands_sent = IntCounter::with_opts(Opts::new(
            "gimbalcam_commands_sent_total",
            "Frames written to the device",
        ))?;
        registry.register(Box::new(commands_sent.clone()))?;

        let command_timeouts = IntCounter::with_opts(Opts::new(
            "gimbalcam_command_timeouts_total",
            "Commands that exhausted their retries",
        ))?;
        registry.register(Box::new(command_timeouts.clone()))?;

        let device_connects = IntCounter::with_opts(Opts::new(
            "gimbalcam_device_connects_total",
            "Successful device connections",
        ))?;
        registry.register(Box::new(device_connects.clone()))?;

        let device_disconnects = IntCounter::with_opts(Opts::new(
            "gimbalcam_device_disconnects_total",
            "Device connections lost",
        ))?;
        registry.register(Box::new(device_disconnects.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            errors_total,
            request_duration,
            device_connected,
            frames_received,
            checksum_errors,
            commands_sent,
            command_timeouts,
            device_connects,
            device_disconnects,
        })
    }

    /// Copies bridge state into the registry.
    pub fn observe_bridge(&self, connected: bool, stats: &StatsSnapshot) {
        self.device_connected.set(i64::from(connected));
        catch_up(&self.frames_received, stats.frames_received);
        catch_up(&self.checksum_errors, stats.checksum_errors);
        catch_up(&self.commands_sent, stats.commands_sent);
        catch_up(&self.command_timeouts, stats.command_timeouts);
        catch_up(&self.device_connects, stats.connects_total);
        catch_up(&self.device_disconnects, stats.disconnects_total);
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        buffer
    }
}

/// Counters only move forward; the bridge totals are monotonic too.
fn catch_up(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}
