//! Wire protocol for the search daemon.
//!
//! Each frame is a 4-byte big-endian length followed by a MessagePack-encoded
//! [`FramedMessage`]. Payload structs are encoded positionally, so fields are
//! never skipped on serialization.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::service::{
    RebuildResponse, SearchRequest, SearchResponse, StatusResponse, SuggestRequest,
    SuggestResponse,
};

/// Bumped whenever `Request` or `Response` change shape.
pub const PROTOCOL_VERSION: u32 = 1;

/// Frames larger than this close the connection.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Per-user socket path under `/tmp`.
pub fn default_socket_path() -> std::path::PathBuf {
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".into());
    // Only alphanumerics, dash and underscore reach the path.
    let safe_user: String = user
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .take(64)
        .collect();
    let safe_user = if safe_user.is_empty() {
        "unknown".to_string()
    } else {
        safe_user
    };
    std::path::PathBuf::from(format!("/tmp/content-search-{}.sock", safe_user))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Request {
    Health,
    Search(SearchRequest),
    Suggest(SuggestRequest),
    /// Force a rebuild from all sources.
    Rebuild,
    Status,
    /// Stop accepting connections and exit the serve loop.
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Response {
    Health(HealthStatus),
    Search(SearchResponse),
    Suggest(SuggestResponse),
    Rebuild(RebuildResponse),
    Status(StatusResponse),
    Shutdown { message: String },
    Error(ErrorResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub uptime_secs: u64,
    pub version: u32,
    /// Whether a generation is installed.
    pub ready: bool,
    pub total_requests: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    pub retry_after_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    Internal,
    InvalidInput,
    /// Connection limit reached, try again later.
    Overloaded,
    Timeout,
    VersionMismatch,
}

/// Envelope carried inside every frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramedMessage<T> {
    pub version: u32,
    /// Echoed back on the matching response.
    pub request_id: String,
    pub payload: T,
}

impl<T> FramedMessage<T> {
    pub fn new(request_id: impl Into<String>, payload: T) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            request_id: request_id.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("encode error: {0}")]
pub struct EncodeError(pub String);

#[derive(Debug, Clone, thiserror::Error)]
#[error("decode error: {0}")]
pub struct DecodeError(pub String);

/// MessagePack body preceded by its big-endian `u32` length.
pub fn encode_message<T: Serialize>(msg: &FramedMessage<T>) -> Result<Vec<u8>, EncodeError> {
    let payload = rmp_serde::to_vec(msg).map_err(|e| EncodeError(e.to_string()))?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(EncodeError(format!(
            "frame of {} bytes exceeds {} byte limit",
            payload.len(),
            MAX_FRAME_BYTES
        )));
    }
    let len = payload.len() as u32;
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Inverse of [`encode_message`]; `data` excludes the length prefix.
pub fn decode_message<T: for<'de> Deserialize<'de>>(
    data: &[u8],
) -> Result<FramedMessage<T>, DecodeError> {
    rmp_serde::from_slice(data).map_err(|e| DecodeError(e.to_string()))
}

/// Outcome of reading one frame off a stream.
#[derive(Debug)]
pub enum Frame {
    Payload(Vec<u8>),
    /// Peer closed the stream before a new frame began.
    Closed,
    /// Declared length was over [`MAX_FRAME_BYTES`].
    TooLarge(usize),
}

pub fn read_frame<R: Read>(reader: &mut R) -> std::io::Result<Frame> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(Frame::Closed),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Ok(Frame::TooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Frame::Payload(payload))
}

pub fn write_frame<W: Write>(writer: &mut W, encoded: &[u8]) -> std::io::Result<()> {
    writer.write_all(encoded)?;
    writer.flush()
}
