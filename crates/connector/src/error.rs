use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("disconnected: {0}")]
    Disconnected(String),
    #[error("channel '{0}' is reserved")]
    ReservedChannel(String),
    #[error("subscription failed: {0}")]
    SubscriptionFailed(String),
    #[error("no heartbeat for {0:?}")]
    HeartbeatTimeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("{method} failed: {message}")]
    InvokeFailed { method: String, message: String },
    #[error("no response to {method} within {timeout:?}")]
    InvokeTimeout { method: String, timeout: Duration },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("stopped")]
    Stopped,
}

impl ConnectorError {
    /// Short label used for metrics and logs
    pub fn cause(&self) -> &'static str {
        match self {
            ConnectorError::ConnectionFailed(_) => "connection_failed",
            ConnectorError::AuthFailed(_) => "auth_failed",
            ConnectorError::Disconnected(_) => "disconnected",
            ConnectorError::ReservedChannel(_) => "reserved_channel",
            ConnectorError::SubscriptionFailed(_) => "subscription_failed",
            ConnectorError::HeartbeatTimeout(_) => "heartbeat_timeout",
            ConnectorError::Transport(_) => "transport",
            ConnectorError::InvokeFailed { .. } => "invoke_failed",
            ConnectorError::InvokeTimeout { .. } => "invoke_timeout",
            ConnectorError::Protocol(_) => "protocol",
            ConnectorError::Stopped => "stopped",
        }
    }
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("inflate error: {0}")]
    Inflate(std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected payload: {0}")]
    Shape(String),
}

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),
    #[error("missing key: {0}")]
    MissingKey(String),
}
