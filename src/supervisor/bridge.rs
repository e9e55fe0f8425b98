//! Protocol bridge: raw output chunks to classified lines
//!
//! Each output stream gets its own [`LineBuffer`], so a partial line on
//! stdout is never joined with stderr output. Complete lines are classified
//! as plain text or JSON-RPC messages and checked for the readiness marker.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::events::{Notification, NotificationKind, OutputStream};

/// Maximum bytes held for a single unterminated line (1MB)
const MAX_LINE_BYTES: usize = 1024 * 1024;

// ============================================================================
// Line reassembly
// ============================================================================

/// Splits a byte stream on `\n`, holding the trailing partial line until
/// the next chunk completes it.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completes.
    /// Blank lines are dropped; `\r\n` endings are handled.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            if let Some(line) = decode_line(&self.buffer[start..end]) {
                lines.push(line);
            }
            start = end + 1;
        }
        self.buffer.drain(..start);

        if self.buffer.len() > MAX_LINE_BYTES {
            warn!(bytes = self.buffer.len(), "Line exceeds buffer limit, flushing");
            if let Some(line) = decode_line(&std::mem::take(&mut self.buffer)) {
                lines.push(line);
            }
        }

        lines
    }

    /// Flush whatever is left once the stream has closed
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest)
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn decode_line(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_end_matches('\r');
    if text.trim().is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

// ============================================================================
// Classification
// ============================================================================

/// JSON-RPC shaped inbound object. Every member is optional so that
/// replies, notifications and errors all parse.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    /// Plain log output
    Text,
    Message(InboundMessage),
    /// Started with `{` but did not parse
    Malformed(String),
}

/// Parse a line as JSON only when it looks like an object
pub fn classify(line: &str) -> LineKind {
    if !line.trim_start().starts_with('{') {
        return LineKind::Text;
    }
    match serde_json::from_str::<InboundMessage>(line) {
        Ok(message) => LineKind::Message(message),
        Err(e) => LineKind::Malformed(e.to_string()),
    }
}

/// What a parsed message means to the supervisor
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Notification(Notification),
    ProtocolError {
        method: Option<String>,
        id: Option<Value>,
        error: Value,
    },
    /// Reply to something we sent, or an object without a method
    Response {
        id: Option<Value>,
        result: Option<Value>,
    },
}

pub fn dispatch(message: InboundMessage) -> Inbound {
    match message.method {
        Some(method) => {
            let kind = NotificationKind::from_method(&method);
            match message.error {
                Some(error) if kind.is_unknown() => Inbound::ProtocolError {
                    method: Some(method),
                    id: message.id,
                    error,
                },
                _ => Inbound::Notification(Notification {
                    kind,
                    method,
                    id: message.id,
                    params: message.params,
                }),
            }
        }
        None => match message.error {
            Some(error) => Inbound::ProtocolError {
                method: None,
                id: message.id,
                error,
            },
            None => Inbound::Response {
                id: message.id,
                result: message.result,
            },
        },
    }
}

// ============================================================================
// Bridge
// ============================================================================

/// One complete line, classified
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeLine {
    pub stream: OutputStream,
    pub text: String,
    pub kind: LineKind,
    /// Contains the readiness marker. Checked on every line, JSON or not.
    pub ready: bool,
}

#[derive(Debug)]
pub struct ProtocolBridge {
    stdout: LineBuffer,
    stderr: LineBuffer,
    readiness_marker: String,
}

impl ProtocolBridge {
    pub fn new(readiness_marker: impl Into<String>) -> Self {
        Self {
            stdout: LineBuffer::new(),
            stderr: LineBuffer::new(),
            readiness_marker: readiness_marker.into(),
        }
    }

    pub fn feed(&mut self, stream: OutputStream, chunk: &[u8]) -> Vec<BridgeLine> {
        let lines = self.buffer(stream).push(chunk);
        lines.into_iter().map(|text| self.line(stream, text)).collect()
    }

    /// Flush a stream's trailing partial line at EOF
    pub fn finish(&mut self, stream: OutputStream) -> Option<BridgeLine> {
        let text = self.buffer(stream).finish()?;
        Some(self.line(stream, text))
    }

    fn buffer(&mut self, stream: OutputStream) -> &mut LineBuffer {
        match stream {
            OutputStream::Stdout => &mut self.stdout,
            OutputStream::Stderr => &mut self.stderr,
        }
    }

    fn line(&self, stream: OutputStream, text: String) -> BridgeLine {
        let ready = !self.readiness_marker.is_empty() && text.contains(&self.readiness_marker);
        BridgeLine {
            stream,
            kind: classify(&text),
            text,
            ready,
        }
    }
}
