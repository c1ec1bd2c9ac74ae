//! HTTP API consumed by the dashboard.
//!
//! Routes:
//! - `GET  /api/status`
//! - `POST /api/camera/ip {ip}`
//! - `POST /api/record/start`, `POST /api/record/stop`
//! - `POST /api/photo`
//! - `POST /api/zoom/inc`, `POST /api/zoom/dec`, `POST /api/zoom/set {zoom}`
//! - `POST /api/video-mode {mode}`
//! - `GET  /metrics` (when enabled), `GET /health`
//!
//! Failures answer `{"ok": false, "code": ..., "detail": ...}`.

use crate::error::ServerError;
use crate::metrics::Metrics;
use gimbalcam_client::Bridge;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Largest accepted request body.
const MAX_BODY_SIZE: usize = 16 * 1024;

const ROUTES: &[&str] = &[
    "/api/status",
    "/api/camera/ip",
    "/api/record/start",
    "/api/record/stop",
    "/api/photo",
    "/api/zoom/inc",
    "/api/zoom/dec",
    "/api/zoom/set",
    "/api/video-mode",
    "/metrics",
    "/health",
];

#[derive(Deserialize)]
struct IpRequest {
    ip: String,
}

#[derive(Deserialize)]
struct ZoomRequest {
    zoom: f32,
}

#[derive(Deserialize)]
struct VideoModeRequest {
    mode: String,
}

/// Request handler bound to one bridge.
pub struct Api {
    bridge: Arc<Bridge>,
    metrics: Option<Metrics>,
}

impl Api {
    /// Creates a handler. `metrics` enables `GET /metrics`.
    pub fn new(bridge: Arc<Bridge>, metrics: Option<Metrics>) -> Self {
        Self { bridge, metrics }
    }

    /// Handles one request with an already collected body.
    pub async fn handle(&self, method: &Method, path: &str, body: Bytes) -> Response<Full<Bytes>> {
        let started = Instant::now();
        let route = ROUTES.iter().copied().find(|r| *r == path).unwrap_or("other");
        let result = self.route(method, path, &body).await;

        if let Some(metrics) = &self.metrics {
            metrics.requests_total.with_label_values(&[route]).inc();
            metrics
                .request_duration
                .with_label_values(&[route])
                .observe(started.elapsed().as_secs_f64());
        }

        match result {
            Ok(response) => response,
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.errors_total.with_label_values(&[e.code()]).inc();
                }
                if e.status().is_server_error() {
                    tracing::warn!("{} {} failed: {}", method, path, e);
                } else {
                    tracing::debug!("{} {} rejected: {}", method, path, e);
                }
                error_response(&e)
            }
        }
    }

    async fn route(
        &self,
        method: &Method,
        path: &str,
        body: &Bytes,
    ) -> Result<Response<Full<Bytes>>, ServerError> {
        let bridge = &self.bridge;
        match (method, path) {
            (&Method::GET, "/api/status") => {
                let view = serde_json::to_value(bridge.status_view())?;
                json_response(StatusCode::OK, &view)
            }
            (&Method::POST, "/api/camera/ip") => {
                let request: IpRequest = parse_body(body)?;
                bridge.set_ip(&request.ip)?;
                ok(json!({ "ip": request.ip.trim() }))
            }
            (&Method::POST, "/api/record/start") => {
                bridge.start_record().await?;
                ok(json!({ "record_text": bridge.status_view().record_text }))
            }
            (&Method::POST, "/api/record/stop") => {
                bridge.stop_record().await?;
                ok(json!({ "record_text": bridge.status_view().record_text }))
            }
            (&Method::POST, "/api/photo") => {
                bridge.trigger_photo().await?;
                ok(json!({}))
            }
            (&Method::POST, "/api/zoom/inc") => {
                let zoom = bridge.zoom_increment().await?;
                ok(json!({ "zoom": zoom }))
            }
            (&Method::POST, "/api/zoom/dec") => {
                let zoom = bridge.zoom_decrement().await?;
                ok(json!({ "zoom": zoom }))
            }
            (&Method::POST, "/api/zoom/set") => {
                let request: ZoomRequest = parse_body(body)?;
                let zoom = bridge.set_absolute_zoom(request.zoom).await?;
                ok(json!({ "zoom": zoom }))
            }
            (&Method::POST, "/api/video-mode") => {
                let request: VideoModeRequest = parse_body(body)?;
                let mode = bridge.set_video_mode(&request.mode).await?;
                ok(json!({ "video_mode": mode.as_str() }))
            }
            (&Method::GET, "/metrics") => match &self.metrics {
                Some(metrics) => {
                    metrics.observe_bridge(bridge.status().connected, &bridge.stats());
                    Ok(text_response(
                        "text/plain; version=0.0.4; charset=utf-8",
                        metrics.encode(),
                    ))
                }
                None => Err(ServerError::NotFound(path.to_string())),
            },
            (&Method::GET, "/health") => Ok(text_response("text/plain", b"OK".to_vec())),
            (_, path) if ROUTES.contains(&path) => Err(ServerError::MethodNotAllowed),
            (_, path) => Err(ServerError::NotFound(path.to_string())),
        }
    }

    async fn serve_request(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let (parts, body) = req.into_parts();
        let body = match Limited::new(body, MAX_BODY_SIZE).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                let err = ServerError::InvalidRequest(format!("unreadable body: {}", e));
                return error_response(&err);
            }
        };
        self.handle(&parts.method, parts.uri.path(), body).await
    }
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ServerError> {
    Ok(serde_json::from_slice(body)?)
}

fn ok(mut fields: Value) -> Result<Response<Full<Bytes>>, ServerError> {
    if let Value::Object(map) = &mut fields {
        map.insert("ok".to_string(), Value::Bool(true));
    }
    json_response(StatusCode::OK, &fields)
}

fn json_response(status: StatusCode, value: &Value) -> Result<Response<Full<Bytes>>, ServerError> {
    let body = serde_json::to_vec(value)?;
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}

fn text_response(content_type: &'static str, body: Vec<u8>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn error_response(err: &ServerError) -> Response<Full<Bytes>> {
    let body = json!({
        "ok": false,
        "code": err.code(),
        "detail": err.to_string(),
    });
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = err.status();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Serves the API on `listener` until shutdown.
pub async fn serve(
    listener: TcpListener,
    api: Arc<Api>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    tracing::info!("HTTP API listening on http://{}", listener.local_addr()?);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let api = api.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let api = api.clone();
                                async move { Ok::<_, hyper::Error>(api.serve_request(req).await) }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("HTTP connection from {} failed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("HTTP accept error: {}", e);
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("HTTP API shutting down");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gimbalcam_client::{BridgeConfig, SessionConfig};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn unreachable_bridge() -> Arc<Bridge> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let session = SessionConfig::default()
            .with_port(port)
            .with_connect_timeout(Duration::from_millis(100))
            .with_reconnect_interval(Duration::from_millis(100));
        Arc::new(Bridge::start(
            BridgeConfig::new("127.0.0.1").with_session(session),
        ))
    }

    fn api() -> Api {
        Api::new(unreachable_bridge(), Some(Metrics::new().unwrap()))
    }

    async fn call(api: &Api, method: Method, path: &str, body: &str) -> (StatusCode, Value) {
        let response = api
            .handle(&method, path, Bytes::from(body.to_string()))
            .await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_status() {
        let api = api();
        let (status, body) = call(&api, Method::GET, "/api/status", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ip"], "127.0.0.1");
        assert_eq!(body["connected"], false);
        assert_eq!(body["record_text"], "error");
        assert_eq!(body["record_stale"], true);
        assert_eq!(body["video_mode"], "rgb");
    }

    #[tokio::test]
    async fn test_commands_without_device() {
        let api = api();
        for path in ["/api/record/start", "/api/record/stop", "/api/photo", "/api/zoom/inc"] {
            let (status, body) = call(&api, Method::POST, path, "").await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{}", path);
            assert_eq!(body["ok"], false);
            assert_eq!(body["code"], "NOT_CONNECTED");
            assert_eq!(body["detail"], "not connected");
        }
    }

    #[tokio::test]
    async fn test_input_validation() {
        let api = api();

        let (status, body) = call(&api, Method::POST, "/api/zoom/set", r#"{"zoom": 0.5}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "ZOOM_OUT_OF_RANGE");

        let (status, body) =
            call(&api, Method::POST, "/api/video-mode", r#"{"mode": "sepia"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_VIDEO_MODE");

        let (status, body) = call(&api, Method::POST, "/api/zoom/set", "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");

        let (status, body) = call(&api, Method::POST, "/api/camera/ip", r#"{"ip": " "}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_ADDRESS");
    }

    #[tokio::test]
    async fn test_set_ip() {
        let api = api();
        let (status, body) =
            call(&api, Method::POST, "/api/camera/ip", r#"{"ip": " 10.0.0.5 "}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true, "ip": "10.0.0.5"}));

        let (_, body) = call(&api, Method::GET, "/api/status", "").await;
        assert_eq!(body["ip"], "10.0.0.5");
    }

    #[tokio::test]
    async fn test_unknown_routes() {
        let api = api();
        let (status, body) = call(&api, Method::GET, "/api/record/start", "").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["code"], "METHOD_NOT_ALLOWED");

        let (status, body) = call(&api, Method::GET, "/api/nope", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_metrics_route() {
        let api = api();
        call(&api, Method::GET, "/api/status", "").await;
        call(&api, Method::POST, "/api/photo", "").await;

        let response = api.handle(&Method::GET, "/metrics", Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("gimbalcam_http_requests_total{route=\"/api/status\"} 1"));
        assert!(text.contains("gimbalcam_errors_total{code=\"NOT_CONNECTED\"} 1"));
        assert!(text.contains("gimbalcam_device_connected 0"));

        let disabled = Api::new(unreachable_bridge(), None);
        let (status, _) = call(&disabled, Method::GET, "/metrics", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_serve_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let server = tokio::spawn(serve(listener, Arc::new(api()), shutdown_rx));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /api/status HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"connected\":false"));

        shutdown_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
