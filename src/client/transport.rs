//! HTTP client for the relay's `/chat` endpoint

use super::overlay::{ChatOverlay, PendingReply};
use super::render::ReplyRenderer;
use crate::models::{ChatRequest, ContentFrame, ErrorBody, RelayFrame};
use crate::stream::{data_payload, event_name, is_ignorable_field, LineDecoder, DONE_SENTINEL};
use futures_util::stream::{self, Stream, StreamExt};
use log::{debug, warn};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("relay request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("relay returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("reply stream interrupted: {0}")]
    Stream(String),
}

/// Turns the relay's event-stream lines into frames
#[derive(Debug, Default)]
pub struct FrameParser {
    event: Option<String>,
    skipped: u64,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn skip(&mut self, line: &str) -> Option<RelayFrame> {
        self.skipped += 1;
        debug!("[transport] Skipping unreadable line: {:?}", line);
        None
    }

    pub fn parse_line(&mut self, line: &str) -> Option<RelayFrame> {
        if line.is_empty() {
            self.event = None;
            return None;
        }
        if is_ignorable_field(line) {
            return None;
        }
        if let Some(name) = event_name(line) {
            self.event = Some(name.to_string());
            return None;
        }
        let Some(payload) = data_payload(line) else {
            return self.skip(line);
        };

        if self.event.as_deref() == Some("error") {
            let body = serde_json::from_str::<ErrorBody>(payload).unwrap_or_else(|_| ErrorBody {
                error: payload.to_string(),
                details: None,
            });
            return Some(RelayFrame::Error(body));
        }
        if payload == DONE_SENTINEL {
            return Some(RelayFrame::Done);
        }
        match serde_json::from_str::<ContentFrame>(payload) {
            Ok(frame) => Some(RelayFrame::Content(frame.content)),
            Err(_) => self.skip(line),
        }
    }
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<RelayFrame, ClientError>> + Send>>;

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, ClientError>> + Send>>;

struct FrameState {
    body: ByteStream,
    decoder: LineDecoder,
    parser: FrameParser,
    ready: VecDeque<Result<RelayFrame, ClientError>>,
    finished: bool,
}

impl FrameState {
    fn handle_line(&mut self, line: &str) {
        if let Some(frame) = self.parser.parse_line(line) {
            self.finished = !matches!(frame, RelayFrame::Content(_));
            self.ready.push_back(Ok(frame));
        }
    }
}

/// Decodes a relay response body into frames. The stream ends after `Done`
/// or `Error`; a body that ends without either yields `ClientError::Stream`.
pub fn decode_frames<S>(
    body: S,
) -> impl Stream<Item = Result<RelayFrame, ClientError>> + Send + 'static
where
    S: Stream<Item = Result<Vec<u8>, ClientError>> + Send + 'static,
{
    let state = FrameState {
        body: Box::pin(body),
        decoder: LineDecoder::new(),
        parser: FrameParser::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let lines = state.decoder.push(&chunk);
                    state.parser.skipped += state.decoder.take_oversized();
                    for line in lines {
                        state.handle_line(&line);
                        if state.finished {
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state.ready.push_back(Err(e));
                }
                None => {
                    if let Some(rest) = state.decoder.finish() {
                        state.handle_line(&rest);
                    }
                    if !state.finished {
                        state.finished = true;
                        state.ready.push_back(Err(ClientError::Stream(
                            "relay closed the stream without a terminal frame".to_string(),
                        )));
                    }
                }
            }
        }
    })
}

#[derive(Debug, Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    endpoint: String,
}

impl RelayClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Posts the request and returns the live reply frames
    pub async fn stream_chat(&self, request: &ChatRequest) -> Result<FrameStream, ClientError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("Accept", "text/event-stream")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ErrorBody>(&text) {
                Ok(ErrorBody {
                    error,
                    details: Some(details),
                }) => format!("{}: {}", error, details),
                Ok(ErrorBody { error, .. }) => error,
                Err(_) => text,
            };
            warn!("[transport] Server error {}: {}", status.as_u16(), message);
            return Err(ClientError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ClientError::from));
        Ok(Box::pin(decode_frames(body)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Full reply, already committed to the session
    Completed(String),
    /// The apology is showing
    Failed,
    /// The overlay moved on; nothing was changed
    Stale,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Streams one reply into the overlay, one chunk at a time in arrival order.
/// The lock is only held while a chunk is applied, so the overlay stays free
/// to close in between. `on_delta` sees each chunk that was applied.
pub async fn deliver_reply<R: ReplyRenderer>(
    overlay: &Mutex<ChatOverlay<R>>,
    client: &RelayClient,
    pending: PendingReply,
    mut on_delta: impl FnMut(&str),
) -> ReplyOutcome {
    let generation = pending.generation;
    let fail = |reason: &dyn std::fmt::Display| {
        warn!("[transport] Reply failed: {}", reason);
        if lock(overlay).fail(generation) {
            ReplyOutcome::Failed
        } else {
            ReplyOutcome::Stale
        }
    };

    let mut frames = match client.stream_chat(&pending.request).await {
        Ok(frames) => frames,
        Err(e) => return fail(&e),
    };
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(RelayFrame::Content(text)) => {
                if !lock(overlay).apply_chunk(generation, &text) {
                    return ReplyOutcome::Stale;
                }
                on_delta(&text);
            }
            Ok(RelayFrame::Done) => {
                let mut overlay = lock(overlay);
                if !overlay.is_current(generation) {
                    return ReplyOutcome::Stale;
                }
                return match overlay.complete(generation) {
                    Some(reply) => ReplyOutcome::Completed(reply),
                    None => ReplyOutcome::Failed,
                };
            }
            Ok(RelayFrame::Error(body)) => {
                return fail(&format!(
                    "{}{}",
                    body.error,
                    body.details.map(|d| format!(": {}", d)).unwrap_or_default()
                ));
            }
            Err(e) => return fail(&e),
        }
    }
    fail(&"reply stream ended early")
}
