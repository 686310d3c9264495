//! Completion API calls and stream decoding

use crate::config::{RelayConfig, UPSTREAM_REFERER, UPSTREAM_TITLE};
use crate::error::RelayError;
use crate::models::{ConversationTurn, UpstreamMessage};
use crate::stream::{parse_upstream_line, LineDecoder, StreamStats, UpstreamFrame};
use futures_util::stream::{self, Stream, StreamExt};
use log::{debug, error, info, warn};
use serde_json::json;
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Builds the prompt: persona directive, the client's history in order, then
/// the new user message.
pub fn build_messages(
    system_prompt: String,
    history: &[ConversationTurn],
    message: &str,
) -> Vec<UpstreamMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(UpstreamMessage {
        role: "system",
        content: system_prompt,
    });
    messages.extend(history.iter().map(|turn| UpstreamMessage {
        role: turn.sender.role(),
        content: turn.text.clone(),
    }));
    messages.push(UpstreamMessage {
        role: "user",
        content: message.to_string(),
    });
    messages
}

/// What the relay forwards to its client. A decoded stream yields any number
/// of `Delta`s followed by exactly one `Done` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Done,
    Failed(String),
}

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    config: Arc<RelayConfig>,
}

impl UpstreamClient {
    pub fn new(http: reqwest::Client, config: Arc<RelayConfig>) -> Self {
        Self { http, config }
    }

    /// Sends the prompt with streaming enabled. Non-success statuses are
    /// turned into errors here, before any byte reaches the client.
    pub async fn open_stream(
        &self,
        messages: &[UpstreamMessage],
    ) -> Result<reqwest::Response, RelayError> {
        let body = json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": self.config.max_tokens,
            "stream": true
        });

        let response = self
            .http
            .post(&self.config.upstream_url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("HTTP-Referer", UPSTREAM_REFERER)
            .header("X-Title", UPSTREAM_TITLE)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("[upstream] API request failed: {}", e);
                RelayError::Network(format!("API request failed: {}", e))
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        warn!("[upstream] API error {}: {}", status.as_u16(), error_text);
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(RelayError::RateLimited {
                details: error_text,
            })
        } else {
            Err(RelayError::Upstream {
                status: status.as_u16(),
                details: error_text,
            })
        }
    }

    /// Opens the upstream stream and decodes it into relay events
    pub async fn stream_reply(
        &self,
        messages: &[UpstreamMessage],
        stats: Arc<StreamStats>,
    ) -> Result<EventStream, RelayError> {
        let response = self.open_stream(messages).await?;
        Ok(Box::pin(decode_events(
            response.bytes_stream(),
            self.config.idle_timeout(),
            stats,
        )))
    }
}

type BoxedBody<B, E> = Pin<Box<dyn Stream<Item = Result<B, E>> + Send>>;

struct DecodeState<B, E> {
    body: BoxedBody<B, E>,
    decoder: LineDecoder,
    ready: VecDeque<StreamEvent>,
    idle_timeout: Duration,
    stats: Arc<StreamStats>,
    deltas: u64,
    skipped: u64,
    finished: bool,
}

impl<B, E> DecodeState<B, E> {
    fn handle_line(&mut self, line: &str) {
        match parse_upstream_line(line) {
            UpstreamFrame::Delta(text) => {
                self.deltas += 1;
                self.ready.push_back(StreamEvent::Delta(text));
            }
            UpstreamFrame::Done => self.complete(),
            UpstreamFrame::Failed(reason) => self.fail(format!("upstream error: {}", reason)),
            UpstreamFrame::Ignored => {}
            UpstreamFrame::Malformed => {
                self.skipped += 1;
                self.stats.record_skipped();
                debug!("[upstream] Skipping malformed frame: {:?}", line);
            }
        }
    }

    fn count_oversized(&mut self) {
        let dropped = self.decoder.take_oversized();
        for _ in 0..dropped {
            self.skipped += 1;
            self.stats.record_skipped();
        }
        if dropped > 0 {
            debug!("[upstream] Dropped {} oversized lines", dropped);
        }
    }

    fn complete(&mut self) {
        self.finished = true;
        self.stats.record_completed();
        info!(
            "[upstream] Stream completed: {} deltas, {} malformed frames skipped",
            self.deltas, self.skipped
        );
        self.ready.push_back(StreamEvent::Done);
    }

    fn fail(&mut self, reason: String) {
        self.finished = true;
        self.stats.record_failed();
        error!(
            "[upstream] Stream failed after {} deltas: {}",
            self.deltas, reason
        );
        self.ready.push_back(StreamEvent::Failed(reason));
    }
}

/// Turns raw upstream bytes into relay events.
///
/// Lines are only parsed once complete. The sentinel ends the stream even if
/// more bytes follow; a transport error or an idle gap longer than
/// `idle_timeout` ends it with `Failed`. Source EOF counts as completion after
/// the unterminated tail, if any, has been parsed.
pub fn decode_events<S, B, E>(
    body: S,
    idle_timeout: Duration,
    stats: Arc<StreamStats>,
) -> impl Stream<Item = StreamEvent> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let body: BoxedBody<B, E> = Box::pin(body);
    let state = DecodeState {
        body,
        decoder: LineDecoder::new(),
        ready: VecDeque::new(),
        idle_timeout,
        stats,
        deltas: 0,
        skipped: 0,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((event, state));
            }
            if state.finished {
                return None;
            }

            match tokio::time::timeout(state.idle_timeout, state.body.next()).await {
                Ok(Some(Ok(chunk))) => {
                    let lines = state.decoder.push(chunk.as_ref());
                    state.count_oversized();
                    for line in lines {
                        state.handle_line(&line);
                        if state.finished {
                            break;
                        }
                    }
                }
                Ok(Some(Err(e))) => state.fail(format!("upstream stream error: {}", e)),
                Ok(None) => {
                    let rest = state.decoder.finish();
                    state.count_oversized();
                    if let Some(rest) = rest {
                        state.handle_line(&rest);
                    }
                    if !state.finished {
                        state.complete();
                    }
                }
                Err(_) => state.fail(format!(
                    "upstream sent nothing for {}s",
                    state.idle_timeout.as_secs()
                )),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sender;

    fn chunks(
        parts: Vec<Result<&'static str, &'static str>>,
    ) -> impl Stream<Item = Result<&'static str, &'static str>> + Send + 'static {
        stream::iter(parts)
    }

    async fn collect(parts: Vec<Result<&'static str, &'static str>>) -> Vec<StreamEvent> {
        let stats = Arc::new(StreamStats::default());
        decode_events(chunks(parts), Duration::from_secs(5), stats)
            .collect()
            .await
    }

    fn text_of(events: &[StreamEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Delta(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn messages_keep_history_order_and_end_with_new_message() {
        let history = vec![
            ConversationTurn::user("hi"),
            ConversationTurn::model("hello, traveller"),
            ConversationTurn::user("what is 25?"),
            ConversationTurn::model("a number"),
        ];
        let messages = build_messages("persona".to_string(), &history, "tell me more");

        let roles: Vec<&str> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec!["system", "user", "assistant", "user", "assistant", "user"]
        );
        assert_eq!(messages[0].content, "persona");
        assert_eq!(messages[2].content, "hello, traveller");
        assert_eq!(messages[5].content, "tell me more");
        assert_eq!(history[1].sender, Sender::Model);
    }

    #[tokio::test]
    async fn reassembles_deltas_and_stops_at_sentinel() {
        let events = collect(vec![
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n"),
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\ndata: [DONE]\n"),
        ])
        .await;

        assert_eq!(text_of(&events), "Hello");
        assert_eq!(events.last(), Some(&StreamEvent::Done));
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn line_split_across_reads_is_parsed_once() {
        let events = collect(vec![
            Ok("data: {\"cho"),
            Ok("ices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n"),
            Ok("data: [DONE]\n"),
        ])
        .await;

        assert_eq!(
            events,
            vec![StreamEvent::Delta("Hi".to_string()), StreamEvent::Done]
        );
    }

    #[tokio::test]
    async fn content_after_sentinel_is_dropped() {
        let events = collect(vec![Ok(
            "data: [DONE]\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
        )])
        .await;
        assert_eq!(events, vec![StreamEvent::Done]);
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped_and_counted() {
        let stats = Arc::new(StreamStats::default());
        let events: Vec<StreamEvent> = decode_events(
            chunks(vec![
                Ok("noise\n"),
                Ok("data: {broken\n"),
                Ok(": keep-alive\n"),
                Ok("data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n"),
                Ok("data: [DONE]\n"),
            ]),
            Duration::from_secs(5),
            stats.clone(),
        )
        .collect()
        .await;

        assert_eq!(text_of(&events), "ok");
        assert_eq!(stats.frames_skipped(), 2);
        assert_eq!(stats.streams_completed(), 1);
    }

    #[tokio::test]
    async fn oversized_line_counts_as_malformed() {
        let stats = Arc::new(StreamStats::default());
        let huge = format!("data: {}", "x".repeat(crate::stream::MAX_LINE_BYTES));
        let parts: Vec<Result<String, &'static str>> = vec![
            Ok(huge),
            Ok("\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n".to_string()),
        ];
        let events: Vec<StreamEvent> =
            decode_events(stream::iter(parts), Duration::from_secs(5), stats.clone())
                .collect()
                .await;

        assert_eq!(
            events,
            vec![StreamEvent::Delta("ok".to_string()), StreamEvent::Done]
        );
        assert_eq!(stats.frames_skipped(), 1);
    }

    #[tokio::test]
    async fn transport_error_after_partial_content_terminates_once() {
        let events = collect(vec![
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n"),
            Err("connection reset"),
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n"),
        ])
        .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::Delta("par".to_string()));
        assert!(matches!(&events[1], StreamEvent::Failed(reason) if reason.contains("connection reset")));
    }

    #[tokio::test]
    async fn eof_without_sentinel_flushes_tail_and_completes() {
        let events = collect(vec![Ok(
            "data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}",
        )])
        .await;
        assert_eq!(
            events,
            vec![StreamEvent::Delta("tail".to_string()), StreamEvent::Done]
        );
    }

    #[tokio::test]
    async fn in_band_error_fails_the_stream() {
        let events = collect(vec![Ok(
            "data: {\"error\":{\"message\":\"provider overloaded\"}}\n",
        )])
        .await;
        assert!(matches!(&events[..], [StreamEvent::Failed(reason)] if reason.contains("provider overloaded")));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_upstream_times_out() {
        let stats = Arc::new(StreamStats::default());
        let body = stream::pending::<Result<&'static str, &'static str>>();
        let events: Vec<StreamEvent> = decode_events(body, Duration::from_secs(2), stats.clone())
            .collect()
            .await;

        assert!(matches!(&events[..], [StreamEvent::Failed(_)]));
        assert_eq!(stats.streams_failed(), 1);
    }
}
