//! # gimbalcam-server
//!
//! HTTP front end for the gimbalcam bridge.
//!
//! This crate provides:
//! - Layered configuration (defaults, YAML file, environment)
//! - The dashboard JSON API over the bridge facade
//! - Prometheus metrics at `/metrics`

pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod server;

pub use config::{Config, ConfigError};
pub use error::ServerError;
pub use http::Api;
pub use metrics::Metrics;
pub use server::Server;
