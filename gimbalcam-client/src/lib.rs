//! # gimbalcam-client
//!
//! Device side of the gimbalcam bridge.
//!
//! This crate provides:
//! - A reconnecting TCP session to the camera
//! - Per-class command dispatch with reply correlation and retries
//! - A state reconciler that confirms toggles against device telemetry
//! - The [`Bridge`] facade consumed by the HTTP layer

pub mod bridge;
pub mod dispatcher;
pub mod error;
pub mod poller;
pub mod reconciler;
pub mod session;
pub mod state;
pub mod stats;

#[cfg(test)]
mod mock;

pub use bridge::{Bridge, BridgeConfig};
pub use dispatcher::{CommandClass, DispatchConfig};
pub use error::ClientError;
pub use poller::PollConfig;
pub use session::SessionConfig;
pub use state::{CameraState, RecordFault, RecordingState, StatusView};
pub use stats::StatsSnapshot;
