//! Server error types.

use crate::config::ConfigError;
use gimbalcam_client::ClientError;
use hyper::StatusCode;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Client(#[from] ClientError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no route for {0}")]
    NotFound(String),

    #[error("method not allowed")]
    MethodNotAllowed,
}

impl ServerError {
    /// Returns a stable code identifying the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::Io(_) => "IO_ERROR",
            ServerError::Json(_) => "BAD_REQUEST",
            ServerError::Client(e) => e.code(),
            ServerError::Config(_) => "CONFIG_ERROR",
            ServerError::Metrics(_) => "METRICS_ERROR",
            ServerError::InvalidRequest(_) => "BAD_REQUEST",
            ServerError::NotFound(_) => "NOT_FOUND",
            ServerError::MethodNotAllowed => "METHOD_NOT_ALLOWED",
        }
    }

    /// Maps the error to an HTTP status.
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Json(_) | ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ServerError::Client(e) => client_status(e),
            ServerError::Io(_) | ServerError::Config(_) | ServerError::Metrics(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

fn client_status(err: &ClientError) -> StatusCode {
    if err.is_invalid_input() {
        return StatusCode::BAD_REQUEST;
    }
    match err {
        ClientError::CommandPending(_) => StatusCode::CONFLICT,
        ClientError::NotConnected | ClientError::ConnectionReset | ClientError::ShuttingDown => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ClientError::DeviceTimeout(_)
        | ClientError::RecordStateUnconfirmed
        | ClientError::ZoomUnconfirmed
        | ClientError::VideoModeUnconfirmed => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gimbalcam_client::CommandClass;

    #[test]
    fn test_client_status_mapping() {
        let cases = [
            (ClientError::InvalidVideoMode("sepia".into()), StatusCode::BAD_REQUEST),
            (
                ClientError::ZoomOutOfRange {
                    requested: 9.0,
                    max: 5.0,
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                ClientError::CommandPending(CommandClass::Record),
                StatusCode::CONFLICT,
            ),
            (ClientError::NotConnected, StatusCode::SERVICE_UNAVAILABLE),
            (
                ClientError::DeviceTimeout(CommandClass::Zoom),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                ClientError::RecordStateUnconfirmed,
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                ClientError::RecordingFault("no_tf_card".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ServerError::from(err).status(), status);
        }
    }

    #[test]
    fn test_codes() {
        assert_eq!(
            ServerError::from(ClientError::NotConnected).code(),
            "NOT_CONNECTED"
        );
        assert_eq!(ServerError::NotFound("/x".into()).code(), "NOT_FOUND");
        assert_eq!(
            ServerError::InvalidRequest("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
