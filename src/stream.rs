//! Line-oriented event stream decoding shared by the relay and the client.
//!
//! Network reads arrive in arbitrary slices; `LineDecoder` holds back the
//! trailing fragment until its newline shows up so only complete lines are
//! ever parsed. Splitting happens on raw bytes, which keeps multi-byte UTF-8
//! sequences intact across read boundaries.

use crate::models::UpstreamChunk;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sentinel payload that ends an event stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Longest line kept by default. Anything longer is dropped whole.
pub const MAX_LINE_BYTES: usize = 1 << 20;

#[derive(Debug)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    max_line: usize,
    /// Inside an oversized line; bytes are dropped until its newline
    discarding: bool,
    oversized: u64,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line,
            discarding: false,
            oversized: 0,
        }
    }

    /// Appends a network chunk and returns every line it completed, without
    /// line terminators. Lines longer than the limit are never returned; see
    /// `take_oversized`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(offset) = rest.iter().position(|&b| b == b'\n') {
            let head = &rest[..offset];
            rest = &rest[offset + 1..];

            if self.discarding {
                self.discarding = false;
            } else if self.buffer.len() + head.len() > self.max_line {
                self.buffer.clear();
                self.oversized += 1;
            } else {
                self.buffer.extend_from_slice(head);
                let line = self.buffer.strip_suffix(b"\r").unwrap_or(&self.buffer[..]);
                lines.push(String::from_utf8_lossy(line).into_owned());
                self.buffer.clear();
            }
        }

        if !self.discarding {
            if self.buffer.len() + rest.len() > self.max_line {
                self.buffer.clear();
                self.discarding = true;
                self.oversized += 1;
            } else {
                self.buffer.extend_from_slice(rest);
            }
        }
        lines
    }

    /// Drains the unterminated remainder once the source has ended
    pub fn finish(&mut self) -> Option<String> {
        if std::mem::take(&mut self.discarding) || self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.strip_suffix(b"\r").unwrap_or(&rest[..]);
        Some(String::from_utf8_lossy(rest).into_owned())
    }

    /// Bytes held back waiting for a newline
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Number of oversized lines dropped since the last call
    pub fn take_oversized(&mut self) -> u64 {
        std::mem::take(&mut self.oversized)
    }
}

/// Returns the payload of a `data:` line
pub fn data_payload(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Returns the name of an `event:` line
pub fn event_name(line: &str) -> Option<&str> {
    line.strip_prefix("event:").map(str::trim)
}

/// Whether the line is a legitimate event-stream field that carries nothing
/// for us: a comment, an id or a retry hint
pub fn is_ignorable_field(line: &str) -> bool {
    line.starts_with(':') || line.starts_with("id:") || line.starts_with("retry:")
}

/// One complete upstream line, classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamFrame {
    Delta(String),
    Done,
    /// In-band error reported by the provider
    Failed(String),
    /// Well-formed but carries no text (blank lines, comments, role-only deltas)
    Ignored,
    /// Missing prefix or undecodable payload
    Malformed,
}

pub fn parse_upstream_line(line: &str) -> UpstreamFrame {
    let line = line.trim();
    if line.is_empty() || is_ignorable_field(line) || event_name(line).is_some() {
        return UpstreamFrame::Ignored;
    }

    let Some(payload) = data_payload(line) else {
        return UpstreamFrame::Malformed;
    };
    if payload == DONE_SENTINEL {
        return UpstreamFrame::Done;
    }

    let chunk: UpstreamChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(_) => return UpstreamFrame::Malformed,
    };
    if let Some(error) = chunk.error {
        return UpstreamFrame::Failed(error.describe());
    }

    match chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
    {
        Some(content) if !content.is_empty() => UpstreamFrame::Delta(content),
        _ => UpstreamFrame::Ignored,
    }
}

/// Process-wide stream counters
#[derive(Debug, Default)]
pub struct StreamStats {
    frames_skipped: AtomicU64,
    streams_completed: AtomicU64,
    streams_failed: AtomicU64,
}

impl StreamStats {
    pub fn record_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.streams_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.streams_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped.load(Ordering::Relaxed)
    }

    pub fn streams_completed(&self) -> u64 {
        self.streams_completed.load(Ordering::Relaxed)
    }

    pub fn streams_failed(&self) -> u64 {
        self.streams_failed.load(Ordering::Relaxed)
    }
}
