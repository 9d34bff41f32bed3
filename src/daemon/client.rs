//! Client for a running search daemon.

use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use super::protocol::{
    ErrorCode, Frame, FramedMessage, HealthStatus, PROTOCOL_VERSION, Request, Response,
    decode_message, default_socket_path, encode_message, read_frame, write_frame,
};
use crate::service::{
    RebuildResponse, SearchRequest, SearchResponse, StatusResponse, SuggestRequest,
    SuggestResponse,
};

#[derive(Debug, Clone, thiserror::Error)]
pub enum DaemonError {
    #[error("daemon unavailable: {0}")]
    Unavailable(String),
    #[error("daemon request timed out: {0}")]
    Timeout(String),
    #[error("daemon overloaded: {message}")]
    Overloaded {
        retry_after: Option<Duration>,
        message: String,
    },
    #[error("invalid request: {0}")]
    InvalidInput(String),
    #[error("daemon request failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct DaemonClientConfig {
    pub socket_path: PathBuf,
    /// How long `connect` keeps retrying a socket that is not accepting yet.
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for DaemonClientConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl DaemonClientConfig {
    pub fn with_socket(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Self::default()
        }
    }

    /// Apply `CSEARCH_CONNECT_TIMEOUT_MS` / `CSEARCH_REQUEST_TIMEOUT_MS`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = dotenvy::var("CSEARCH_CONNECT_TIMEOUT_MS")
            && let Ok(ms) = val.parse::<u64>()
        {
            self.connect_timeout = Duration::from_millis(ms);
        }
        if let Ok(val) = dotenvy::var("CSEARCH_REQUEST_TIMEOUT_MS")
            && let Ok(ms) = val.parse::<u64>()
        {
            self.request_timeout = Duration::from_millis(ms);
        }
        self
    }
}

/// Unix domain socket client. One connection is kept and reused; it is
/// re-established after any transport error.
pub struct UdsDaemonClient {
    config: DaemonClientConfig,
    connection: Mutex<Option<UnixStream>>,
    request_counter: AtomicU64,
}

impl UdsDaemonClient {
    pub fn new(config: DaemonClientConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
            request_counter: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &DaemonClientConfig {
        &self.config
    }

    /// Connect, retrying until `connect_timeout` while the socket is absent
    /// or refusing connections.
    pub fn connect(&self) -> Result<(), DaemonError> {
        let deadline = Instant::now() + self.config.connect_timeout;
        loop {
            match self.try_connect() {
                Ok(stream) => {
                    *self.connection.lock() = Some(stream);
                    debug!(socket = %self.config.socket_path.display(), "daemon_connected");
                    return Ok(());
                }
                Err(e) if Instant::now() >= deadline => {
                    return Err(DaemonError::Unavailable(format!(
                        "cannot connect to {}: {}",
                        self.config.socket_path.display(),
                        e
                    )));
                }
                Err(_) => std::thread::sleep(Duration::from_millis(25)),
            }
        }
    }

    fn try_connect(&self) -> std::io::Result<UnixStream> {
        let stream = UnixStream::connect(&self.config.socket_path)?;
        stream.set_read_timeout(Some(self.config.request_timeout))?;
        stream.set_write_timeout(Some(self.config.request_timeout))?;
        Ok(stream)
    }

    fn send_request(&self, request: Request) -> Result<Response, DaemonError> {
        let request_id = format!(
            "csearch-{}",
            self.request_counter.fetch_add(1, Ordering::Relaxed)
        );
        let encoded = encode_message(&FramedMessage::new(&request_id, request))
            .map_err(|e| DaemonError::Failed(e.to_string()))?;

        let mut guard = self.connection.lock();
        if guard.is_none() {
            drop(guard);
            self.connect()?;
            guard = self.connection.lock();
        }
        let Some(stream) = guard.as_mut() else {
            return Err(DaemonError::Unavailable("connection not established".to_string()));
        };

        let exchange = write_frame(stream, &encoded).and_then(|()| read_frame(stream));
        let frame = match exchange {
            Ok(frame) => frame,
            Err(e) => {
                *guard = None;
                return Err(if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) {
                    DaemonError::Timeout(format!("request {request_id}"))
                } else {
                    DaemonError::Unavailable(format!("transport error: {e}"))
                });
            }
        };
        let payload = match frame {
            Frame::Payload(payload) => payload,
            Frame::Closed => {
                *guard = None;
                return Err(DaemonError::Unavailable("daemon closed the connection".to_string()));
            }
            Frame::TooLarge(len) => {
                *guard = None;
                return Err(DaemonError::Failed(format!("response too large: {len} bytes")));
            }
        };
        drop(guard);

        let response: FramedMessage<Response> =
            decode_message(&payload).map_err(|e| DaemonError::Failed(e.to_string()))?;
        if response.version != PROTOCOL_VERSION {
            return Err(DaemonError::Failed(format!(
                "protocol version mismatch: expected {}, got {}",
                PROTOCOL_VERSION, response.version
            )));
        }

        match response.payload {
            Response::Error(err) => {
                if err.code == ErrorCode::Overloaded {
                    // Server closes rejected connections.
                    *self.connection.lock() = None;
                }
                Err(match err.code {
                    ErrorCode::Overloaded => DaemonError::Overloaded {
                        retry_after: err.retry_after_ms.map(Duration::from_millis),
                        message: err.message,
                    },
                    ErrorCode::Timeout => DaemonError::Timeout(err.message),
                    ErrorCode::InvalidInput => DaemonError::InvalidInput(err.message),
                    ErrorCode::Internal | ErrorCode::VersionMismatch => {
                        DaemonError::Failed(err.message)
                    }
                })
            }
            other => Ok(other),
        }
    }

    pub fn health(&self) -> Result<HealthStatus, DaemonError> {
        match self.send_request(Request::Health)? {
            Response::Health(status) => Ok(status),
            other => Err(unexpected(&other)),
        }
    }

    pub fn search(&self, request: SearchRequest) -> Result<SearchResponse, DaemonError> {
        match self.send_request(Request::Search(request))? {
            Response::Search(response) => Ok(response),
            other => Err(unexpected(&other)),
        }
    }

    pub fn suggest(&self, request: SuggestRequest) -> Result<SuggestResponse, DaemonError> {
        match self.send_request(Request::Suggest(request))? {
            Response::Suggest(response) => Ok(response),
            other => Err(unexpected(&other)),
        }
    }

    pub fn rebuild(&self) -> Result<RebuildResponse, DaemonError> {
        match self.send_request(Request::Rebuild)? {
            Response::Rebuild(response) => Ok(response),
            other => Err(unexpected(&other)),
        }
    }

    pub fn status(&self) -> Result<StatusResponse, DaemonError> {
        match self.send_request(Request::Status)? {
            Response::Status(response) => Ok(response),
            other => Err(unexpected(&other)),
        }
    }

    pub fn shutdown(&self) -> Result<(), DaemonError> {
        match self.send_request(Request::Shutdown)? {
            Response::Shutdown { .. } => {
                *self.connection.lock() = None;
                Ok(())
            }
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &Response) -> DaemonError {
    DaemonError::Failed(format!("unexpected response: {:?}", response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = DaemonClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.socket_path.to_string_lossy().ends_with(".sock"));
    }

    #[test]
    fn missing_socket_is_unavailable() {
        let tmp = tempfile::TempDir::new().unwrap();
        let client = UdsDaemonClient::new(DaemonClientConfig {
            connect_timeout: Duration::from_millis(50),
            ..DaemonClientConfig::with_socket(tmp.path().join("none.sock"))
        });
        let err = client.health().unwrap_err();
        assert!(matches!(err, DaemonError::Unavailable(_)));
    }

    #[test]
    fn request_ids_increase() {
        let client = UdsDaemonClient::new(DaemonClientConfig::default());
        let first = client.request_counter.fetch_add(1, Ordering::Relaxed);
        let second = client.request_counter.fetch_add(1, Ordering::Relaxed);
        assert_eq!(second, first + 1);
    }
}
