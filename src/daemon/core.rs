//! Daemon server: keeps one index warm and answers requests over a Unix
//! domain socket. Each connection is served on its own thread.

use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::protocol::{
    ErrorCode, ErrorResponse, Frame, FramedMessage, HealthStatus, PROTOCOL_VERSION, Request,
    Response, decode_message, encode_message, read_frame, write_frame,
};
use crate::config::SearchConfig;
use crate::service::SearchService;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    /// Maximum concurrent connections; extra clients get `Overloaded`.
    pub max_connections: usize,
    /// Read/write timeout per connection.
    pub request_timeout: Duration,
    /// Build the index before accepting connections.
    pub warm_on_start: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self::from_search_config(&SearchConfig::default())
    }
}

impl DaemonConfig {
    pub fn from_search_config(config: &SearchConfig) -> Self {
        Self {
            socket_path: config.socket_path(),
            max_connections: config.max_connections.max(1),
            request_timeout: Duration::from_secs(60),
            warm_on_start: true,
        }
    }
}

struct DaemonState {
    service: SearchService,
    start_time: Instant,
    total_requests: AtomicU64,
    active_connections: AtomicU64,
    shutdown: AtomicBool,
}

#[derive(Clone)]
pub struct SearchDaemon {
    config: DaemonConfig,
    state: Arc<DaemonState>,
}

impl SearchDaemon {
    pub fn new(config: DaemonConfig, service: SearchService) -> Self {
        Self {
            config,
            state: Arc::new(DaemonState {
                service,
                start_time: Instant::now(),
                total_requests: AtomicU64::new(0),
                active_connections: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn uptime_secs(&self) -> u64 {
        self.state.start_time.elapsed().as_secs()
    }

    pub fn request_shutdown(&self) {
        self.state.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.shutdown.load(Ordering::SeqCst)
    }

    /// Bind the socket and serve until shutdown is requested.
    pub fn run(&self) -> std::io::Result<()> {
        if self.config.socket_path.exists() {
            std::fs::remove_file(&self.config.socket_path)?;
        }
        if let Some(parent) = self.config.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.config.socket_path)?;
        listener.set_nonblocking(true)?;

        if self.config.warm_on_start {
            match self.state.service.store().get() {
                Ok(generation) => info!(records = generation.len(), "index_warm"),
                Err(e) => warn!(error = %e, "index_warm_failed"),
            }
        }

        info!(
            socket = %self.config.socket_path.display(),
            max_connections = self.config.max_connections,
            "daemon_listening"
        );

        while !self.is_shutting_down() {
            match listener.accept() {
                Ok((stream, _addr)) => self.dispatch(stream),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    error!(error = %e, "accept_failed");
                    thread::sleep(Duration::from_millis(100));
                }
            }
        }

        if self.config.socket_path.exists() {
            let _ = std::fs::remove_file(&self.config.socket_path);
        }
        info!(
            total_requests = self.state.total_requests.load(Ordering::Relaxed),
            "daemon_stopped"
        );
        Ok(())
    }

    fn dispatch(&self, stream: UnixStream) {
        let active = self.state.active_connections.fetch_add(1, Ordering::SeqCst);
        if active >= self.config.max_connections as u64 {
            self.state.active_connections.fetch_sub(1, Ordering::SeqCst);
            warn!(
                active,
                max = self.config.max_connections,
                "connection_rejected"
            );
            reject_overloaded(stream);
            return;
        }

        let daemon = self.clone();
        let spawned = thread::Builder::new()
            .name("csearch-conn".to_string())
            .spawn(move || {
                if let Err(e) = daemon.handle_connection(stream) {
                    debug!(error = %e, "connection_error");
                }
                daemon.state.active_connections.fetch_sub(1, Ordering::SeqCst);
            });
        if let Err(e) = spawned {
            self.state.active_connections.fetch_sub(1, Ordering::SeqCst);
            error!(error = %e, "connection_thread_spawn_failed");
        }
    }

    fn handle_connection(&self, mut stream: UnixStream) -> std::io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.config.request_timeout))?;
        stream.set_write_timeout(Some(self.config.request_timeout))?;

        loop {
            let payload = match read_frame(&mut stream) {
                Ok(Frame::Payload(payload)) => payload,
                Ok(Frame::Closed) => {
                    debug!("client_disconnected");
                    return Ok(());
                }
                Ok(Frame::TooLarge(len)) => {
                    warn!(len, "frame_too_large");
                    return Ok(());
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                    ) =>
                {
                    debug!("connection_timed_out");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let response = match decode_message::<Request>(&payload) {
                Ok(msg) if msg.version != PROTOCOL_VERSION => FramedMessage::new(
                    msg.request_id,
                    error_response(
                        ErrorCode::VersionMismatch,
                        format!(
                            "protocol version {} not supported (expected {})",
                            msg.version, PROTOCOL_VERSION
                        ),
                    ),
                ),
                Ok(msg) => {
                    self.state.total_requests.fetch_add(1, Ordering::Relaxed);
                    let response = self.handle_request(&msg.request_id, msg.payload);
                    FramedMessage::new(msg.request_id, response)
                }
                Err(e) => {
                    warn!(error = %e, "request_decode_failed");
                    FramedMessage::new(
                        "error",
                        error_response(ErrorCode::InvalidInput, e.to_string()),
                    )
                }
            };

            let encoded = match encode_message(&response) {
                Ok(encoded) => encoded,
                Err(e) => {
                    warn!(error = %e, "response_encode_failed");
                    let fallback = FramedMessage::new(
                        response.request_id.clone(),
                        error_response(ErrorCode::Internal, e.to_string()),
                    );
                    encode_message(&fallback).map_err(|e| std::io::Error::other(e.to_string()))?
                }
            };
            write_frame(&mut stream, &encoded)?;

            if matches!(response.payload, Response::Shutdown { .. }) {
                return Ok(());
            }
        }
    }

    fn handle_request(&self, request_id: &str, request: Request) -> Response {
        let started = Instant::now();
        let service = &self.state.service;
        let response = match request {
            Request::Health => Response::Health(HealthStatus {
                uptime_secs: self.uptime_secs(),
                version: PROTOCOL_VERSION,
                ready: service.store().current().is_some(),
                total_requests: self.state.total_requests.load(Ordering::Relaxed),
            }),
            Request::Search(req) => Response::Search(service.search(&req)),
            Request::Suggest(req) => Response::Suggest(service.suggest(&req)),
            Request::Rebuild => Response::Rebuild(service.rebuild()),
            Request::Status => Response::Status(service.status()),
            Request::Shutdown => {
                info!(request_id, "shutdown_requested");
                self.request_shutdown();
                Response::Shutdown {
                    message: "daemon shutting down".to_string(),
                }
            }
        };
        debug!(
            request_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request_handled"
        );
        response
    }
}

fn error_response(code: ErrorCode, message: String) -> Response {
    Response::Error(ErrorResponse {
        code,
        message,
        retryable: false,
        retry_after_ms: None,
    })
}

fn reject_overloaded(mut stream: UnixStream) {
    let msg = FramedMessage::new(
        "overloaded",
        Response::Error(ErrorResponse {
            code: ErrorCode::Overloaded,
            message: "too many concurrent connections".to_string(),
            retryable: true,
            retry_after_ms: Some(250),
        }),
    );
    if let Ok(encoded) = encode_message(&msg) {
        let _ = stream.set_nonblocking(false);
        let _ = stream.set_write_timeout(Some(Duration::from_secs(1)));
        let _ = write_frame(&mut stream, &encoded);
    }
}
