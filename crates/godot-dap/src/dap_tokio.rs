//! DAP's `Content-Length` framing between the client and the adapter.
//!
//! Inbound bodies are capped at [`DebugSessionConfig::max_message_bytes`]
//! before anything is allocated for them. Every frame is traced under
//! `godot.dap.protocol`.
//!
//! [`DebugSessionConfig::max_message_bytes`]: crate::session::DebugSessionConfig::max_message_bytes

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

const PROTOCOL_TARGET: &str = "godot.dap.protocol";

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("client stream: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed DAP body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("DAP header block has no Content-Length")]
    MissingContentLength,

    #[error("bad Content-Length {0:?}")]
    BadContentLength(String),

    #[error("DAP message of {len} bytes exceeds the {limit} byte limit")]
    TooLarge { len: usize, limit: usize },

    #[error("client stream ended inside a header block")]
    TruncatedHeader,
}

pub type Result<T> = std::result::Result<T, FramingError>;

/// An inbound client request. Responses and events are built straight into
/// JSON with [`response`] and [`event`].
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub seq: i64,
    #[serde(rename = "type")]
    pub message_type: String,
    pub command: String,
    #[serde(default)]
    pub arguments: Value,
}

pub fn response(
    seq: i64,
    request: &Request,
    success: bool,
    body: Option<Value>,
    message: Option<String>,
) -> Value {
    let mut out = json!({
        "seq": seq,
        "type": "response",
        "request_seq": request.seq,
        "success": success,
        "command": request.command,
    });
    if let Some(message) = message {
        out["message"] = Value::String(message);
    }
    if let Some(body) = body {
        out["body"] = body;
    }
    out
}

pub fn event(seq: i64, name: &str, body: Option<Value>) -> Value {
    let mut out = json!({ "seq": seq, "type": "event", "event": name });
    if let Some(body) = body {
        out["body"] = body;
    }
    out
}

/// Folds one header line into `content_length`. Headers other than
/// `Content-Length` (and lines without a colon) are ignored.
fn apply_header(line: &str, content_length: &mut Option<usize>) -> Result<()> {
    let Some((name, value)) = line.split_once(':') else {
        return Ok(());
    };
    if name.trim().eq_ignore_ascii_case("content-length") {
        let value = value.trim();
        let len = value
            .parse()
            .map_err(|_| FramingError::BadContentLength(value.to_owned()))?;
        *content_length = Some(len);
    }
    Ok(())
}

pub struct DapReader<R> {
    inner: BufReader<R>,
    limit: usize,
    line: String,
}

impl<R: AsyncRead + Unpin> DapReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_message_bytes(inner, usize::MAX)
    }

    pub fn with_max_message_bytes(inner: R, limit: usize) -> Self {
        Self {
            inner: BufReader::new(inner),
            limit,
            line: String::new(),
        }
    }

    /// Returns the body length from the next header block, or `None` if the
    /// stream ended before the block started.
    async fn read_headers(&mut self) -> Result<Option<usize>> {
        let mut content_length = None;
        let mut started = false;
        loop {
            self.line.clear();
            if self.inner.read_line(&mut self.line).await? == 0 {
                if started {
                    return Err(FramingError::TruncatedHeader);
                }
                return Ok(None);
            }
            started = true;
            let line = self.line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                return content_length
                    .map(Some)
                    .ok_or(FramingError::MissingContentLength);
            }
            apply_header(line, &mut content_length)?;
        }
    }

    /// `Ok(None)` means the client closed the stream between messages.
    pub async fn read_value(&mut self) -> Result<Option<Value>> {
        let Some(len) = self.read_headers().await? else {
            return Ok(None);
        };
        if len > self.limit {
            tracing::warn!(target: PROTOCOL_TARGET, len, limit = self.limit, "oversized DAP message");
            return Err(FramingError::TooLarge { len, limit: self.limit });
        }
        let mut body = vec![0u8; len];
        self.inner.read_exact(&mut body).await?;
        tracing::trace!(target: PROTOCOL_TARGET, body = %String::from_utf8_lossy(&body), "rx");
        Ok(Some(serde_json::from_slice(&body)?))
    }

    pub async fn read_request(&mut self) -> Result<Option<Request>> {
        match self.read_value().await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

pub struct DapWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> DapWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_value(&mut self, value: &Value) -> Result<()> {
        let body = serde_json::to_string(value)?;
        tracing::trace!(target: PROTOCOL_TARGET, %body, "tx");
        let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
        frame.extend_from_slice(body.as_bytes());
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }
}
