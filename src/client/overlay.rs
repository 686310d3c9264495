//! Chat overlay controller.
//!
//! Owns the conversation session and the visible transcript. Every submission
//! and every close moves the overlay to a new generation; replies are tagged
//! with the generation they were issued under and anything carrying an older
//! one is dropped, so a reply that outlives its overlay never touches the
//! transcript or the history.

use super::render::{render_or_raw, InlineMarkupRenderer, ReplyRenderer};
use super::session::ConversationSession;
use super::world::Character;
use crate::models::ChatRequest;
use log::debug;

pub const USER_SPEAKER: &str = "You";
pub const THINKING: &str = "...";
pub const APOLOGY: &str = "Sorry, I'm having trouble thinking right now.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Generation(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine {
    pub speaker: String,
    /// Rendered HTML, or the escaped plain text when rendering failed
    pub content: String,
}

/// A submission the caller must send to the relay
#[derive(Debug, Clone)]
pub struct PendingReply {
    pub generation: Generation,
    pub request: ChatRequest,
}

#[derive(Debug)]
struct InFlight {
    generation: Generation,
    user_text: String,
    placeholder: usize,
    buffer: String,
}

fn matching(in_flight: &mut Option<InFlight>, generation: Generation) -> Option<&mut InFlight> {
    match in_flight.as_mut() {
        Some(in_flight) if in_flight.generation == generation => Some(in_flight),
        _ => {
            debug!("[overlay] Ignoring stale reply {:?}", generation);
            None
        }
    }
}

pub struct ChatOverlay<R = InlineMarkupRenderer> {
    renderer: R,
    session: ConversationSession,
    active: Option<Character>,
    generation: u64,
    transcript: Vec<TranscriptLine>,
    in_flight: Option<InFlight>,
}

impl<R: ReplyRenderer> ChatOverlay<R> {
    pub fn new(renderer: R) -> Self {
        Self::with_session(renderer, ConversationSession::new())
    }

    pub fn with_session(renderer: R, session: ConversationSession) -> Self {
        Self {
            renderer,
            session,
            active: None,
            generation: 0,
            transcript: Vec::new(),
            in_flight: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_character(&self) -> Option<&Character> {
        self.active.as_ref()
    }

    pub fn generation(&self) -> Generation {
        Generation(self.generation)
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        generation.0 == self.generation
    }

    pub fn is_awaiting_reply(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn transcript(&self) -> &[TranscriptLine] {
        &self.transcript
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    /// Shows the panel for `character`, starting from its greeting
    pub fn open(&mut self, character: &Character) {
        if self.is_open() {
            self.close();
        }
        self.transcript.push(TranscriptLine {
            speaker: character.name.clone(),
            content: render_or_raw(&self.renderer, &character.greeting),
        });
        self.active = Some(character.clone());
        debug!("[overlay] Opened chat with {}", character.name);
    }

    /// Hides the panel. Any reply still streaming becomes stale.
    pub fn close(&mut self) {
        if let Some(character) = self.active.take() {
            debug!("[overlay] Closed chat with {}", character.name);
        }
        self.generation += 1;
        self.in_flight = None;
        self.transcript.clear();
    }

    /// Shows the user's line and a placeholder reply, and returns the request
    /// to send. Blank input, a closed overlay or a reply still in flight make
    /// this a no-op.
    pub fn submit(&mut self, input: &str) -> Option<PendingReply> {
        let text = input.trim();
        if text.is_empty() || self.in_flight.is_some() {
            return None;
        }
        let character = self.active.as_ref()?;

        self.generation += 1;
        let generation = Generation(self.generation);
        let request = ChatRequest {
            message: text.to_string(),
            npc: character.name.clone(),
            history: self.session.history(&character.name).to_vec(),
        };

        self.transcript.push(TranscriptLine {
            speaker: USER_SPEAKER.to_string(),
            content: render_or_raw(&self.renderer, text),
        });
        self.transcript.push(TranscriptLine {
            speaker: character.name.clone(),
            content: THINKING.to_string(),
        });
        self.in_flight = Some(InFlight {
            generation,
            user_text: text.to_string(),
            placeholder: self.transcript.len() - 1,
            buffer: String::new(),
        });

        Some(PendingReply {
            generation,
            request,
        })
    }

    /// Appends a chunk and re-renders the whole reply into the placeholder.
    /// Returns `false` for stale replies.
    pub fn apply_chunk(&mut self, generation: Generation, chunk: &str) -> bool {
        let Some(in_flight) = matching(&mut self.in_flight, generation) else {
            return false;
        };
        in_flight.buffer.push_str(chunk);
        let placeholder = in_flight.placeholder;
        let content = render_or_raw(&self.renderer, &in_flight.buffer);
        self.transcript[placeholder].content = content;
        true
    }

    /// Commits the exchange to the session and returns the full reply. An
    /// empty reply is treated as a failure.
    pub fn complete(&mut self, generation: Generation) -> Option<String> {
        let in_flight = matching(&mut self.in_flight, generation)?;
        if in_flight.buffer.is_empty() {
            self.fail(generation);
            return None;
        }

        let in_flight = self.in_flight.take()?;
        let character = self.active.as_ref()?.name.clone();
        self.session
            .record_exchange(&character, in_flight.user_text, in_flight.buffer.clone());
        Some(in_flight.buffer)
    }

    /// Replaces the placeholder with the apology. History is left untouched.
    pub fn fail(&mut self, generation: Generation) -> bool {
        if matching(&mut self.in_flight, generation).is_none() {
            return false;
        }
        if let Some(in_flight) = self.in_flight.take() {
            self.transcript[in_flight.placeholder].content = APOLOGY.to_string();
        }
        true
    }
}

impl Default for ChatOverlay<InlineMarkupRenderer> {
    fn default() -> Self {
        Self::new(InlineMarkupRenderer)
    }
}
