//! Bridge server: the device bridge plus its HTTP listener.

use crate::config::Config;
use crate::error::ServerError;
use crate::http::{self, Api};
use crate::metrics::Metrics;
use gimbalcam_client::Bridge;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Owns the bridge and serves the HTTP API until shut down.
pub struct Server {
    config: Config,
    bridge: Arc<Bridge>,
    metrics: Option<Metrics>,
    shutdown: broadcast::Sender<()>,
    stopping: AtomicBool,
}

impl Server {
    /// Starts the device bridge.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: Config) -> Result<Self, ServerError> {
        let metrics = if config.metrics.enabled {
            Some(Metrics::new()?)
        } else {
            None
        };
        let bridge = Arc::new(Bridge::start(config.bridge_config()));
        let (shutdown, _) = broadcast::channel(1);

        Ok(Self {
            config,
            bridge,
            metrics,
            shutdown,
            stopping: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bridge(&self) -> Arc<Bridge> {
        self.bridge.clone()
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.http.bind_addr).await?;
        self.run_on(listener).await
    }

    /// Serves on an already bound listener until shutdown.
    pub async fn run_on(&self, listener: TcpListener) -> Result<(), ServerError> {
        let shutdown_rx = self.shutdown.subscribe();
        let result = if self.stopping.load(Ordering::SeqCst) {
            Ok(())
        } else {
            let api = Arc::new(Api::new(self.bridge.clone(), self.metrics.clone()));
            http::serve(listener, api, shutdown_rx).await
        };

        self.bridge.shutdown().await;
        result
    }

    /// Signals the server to stop.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_config() -> Config {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = Config::default();
        config.device.address = "127.0.0.1".to_string();
        config.device.port = port;
        config.device.connect_timeout_ms = 100;
        config.device.reconnect_interval_ms = 100;
        config
    }

    #[tokio::test]
    async fn test_serves_until_shutdown() {
        let server = Arc::new(Server::new(test_config()).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let runner = server.clone();
        let task = tokio::spawn(async move { runner.run_on(listener).await });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("OK"));

        server.shutdown();
        task.await.unwrap().unwrap();
        assert!(matches!(
            server.bridge().start_record().await,
            Err(gimbalcam_client::ClientError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_before_run() {
        let mut config = test_config();
        config.metrics.enabled = false;
        let server = Server::new(config).unwrap();
        server.shutdown();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        server.run_on(listener).await.unwrap();
    }
}
