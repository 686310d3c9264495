//! HTTP surface of the chat relay.
//!
//! `POST /chat` walks each request through
//! `Received → Validated → PromptBuilt → Streaming → {Completed | FailedUpstream | FailedMidStream}`.
//! Failures before streaming starts become a JSON error response; once the
//! event stream is open, failures become a single `error` event and the body
//! ends. Requests share nothing but read-only configuration and counters.

use crate::config::{ConfigError, RelayConfig};
use crate::error::RelayError;
use crate::models::{ChatRequest, ContentFrame, ConversationTurn, ErrorBody};
use crate::prompts::system_prompt;
use crate::stream::{StreamStats, DONE_SENTINEL};
use crate::upstream::{build_messages, StreamEvent, UpstreamClient};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, Method};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use log::{debug, info};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub upstream: UpstreamClient,
    pub stats: Arc<StreamStats>,
    pub started_at: String,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let http = config.http_client()?;
        let config = Arc::new(config);
        Ok(Self {
            upstream: UpstreamClient::new(http, config.clone()),
            config,
            stats: Arc::new(StreamStats::default()),
            started_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestPhase {
    Received,
    Validated,
    PromptBuilt,
    Streaming,
    Completed,
    FailedUpstream,
    FailedMidStream,
}

impl fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestPhase::Received => "received",
            RequestPhase::Validated => "validated",
            RequestPhase::PromptBuilt => "prompt-built",
            RequestPhase::Streaming => "streaming",
            RequestPhase::Completed => "completed",
            RequestPhase::FailedUpstream => "failed-upstream",
            RequestPhase::FailedMidStream => "failed-mid-stream",
        };
        f.write_str(name)
    }
}

fn enter(npc: &str, phase: RequestPhase) {
    debug!("[chat] {} -> {}", npc, phase);
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/health", get(health))
        .with_state(Arc::new(state))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE])
                .allow_origin(Any),
        )
}

pub async fn serve(config: RelayConfig) -> anyhow::Result<()> {
    let addr = config.socket_addr();
    let state = AppState::new(config)?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_listener(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("[relay] Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("[relay] Shutting down");
    })
    .await?;
    Ok(())
}

pub async fn serve_listener(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<SocketAddr> {
    let addr = listener.local_addr()?;
    info!(
        "[relay] Listening on http://{} (upstream {}, model {})",
        addr, state.config.upstream_url, state.config.model
    );
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(addr)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "started_at": state.started_at,
        "streams_completed": state.stats.streams_completed(),
        "streams_failed": state.stats.streams_failed(),
        "frames_skipped": state.stats.frames_skipped(),
    }))
}

/// Loosely typed view of the body so missing fields map to our own 400
#[derive(Deserialize)]
struct RawChatRequest {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    npc: Option<String>,
    #[serde(default)]
    history: Option<Value>,
}

const REQUIRED_FIELDS: &str = "Message, NPC, and history are required";

pub fn parse_chat_request(body: &[u8]) -> Result<ChatRequest, RelayError> {
    let raw: RawChatRequest = serde_json::from_slice(body)
        .map_err(|e| RelayError::Validation(format!("Malformed request body: {}", e)))?;

    let message = raw
        .message
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| RelayError::Validation(REQUIRED_FIELDS.to_string()))?;
    let npc = raw
        .npc
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| RelayError::Validation(REQUIRED_FIELDS.to_string()))?;
    let history = match raw.history {
        Some(history @ Value::Array(_)) => history,
        _ => return Err(RelayError::Validation(REQUIRED_FIELDS.to_string())),
    };
    let history: Vec<ConversationTurn> = serde_json::from_value(history)
        .map_err(|e| RelayError::Validation(format!("Malformed history: {}", e)))?;

    Ok(ChatRequest {
        message,
        npc,
        history,
    })
}

fn to_event(event: StreamEvent) -> Event {
    match event {
        StreamEvent::Delta(content) => {
            Event::default().data(json!(ContentFrame { content }).to_string())
        }
        StreamEvent::Done => Event::default().data(DONE_SENTINEL),
        StreamEvent::Failed(reason) => Event::default().event("error").data(
            json!(ErrorBody {
                error: "Stream interrupted".to_string(),
                details: Some(reason),
            })
            .to_string(),
        ),
    }
}

async fn chat(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, RelayError> {
    debug!("[chat] {} ({} bytes)", RequestPhase::Received, body.len());
    let request = parse_chat_request(&body)?;
    enter(&request.npc, RequestPhase::Validated);

    let prompt = system_prompt(&request.npc)
        .ok_or_else(|| RelayError::UnknownCharacter(request.npc.clone()))?;
    let messages = build_messages(prompt, &request.history, &request.message);
    enter(&request.npc, RequestPhase::PromptBuilt);
    info!(
        "[chat] {}: {} history turns, new message of {} chars",
        request.npc,
        request.history.len(),
        request.message.chars().count()
    );

    let events = match state
        .upstream
        .stream_reply(&messages, state.stats.clone())
        .await
    {
        Ok(events) => events,
        Err(e) => {
            enter(&request.npc, RequestPhase::FailedUpstream);
            state.stats.record_failed();
            return Err(e);
        }
    };
    enter(&request.npc, RequestPhase::Streaming);

    let npc = request.npc;
    let events = events.map(move |event| {
        match &event {
            StreamEvent::Done => enter(&npc, RequestPhase::Completed),
            StreamEvent::Failed(_) => enter(&npc, RequestPhase::FailedMidStream),
            StreamEvent::Delta(_) => {}
        }
        Ok::<_, Infallible>(to_event(event))
    });

    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}
