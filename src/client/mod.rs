//! Interaction client: proximity-triggered conversations with streamed replies

pub mod game;
pub mod overlay;
pub mod render;
pub mod session;
pub mod transport;
pub mod world;

pub use game::Game;
pub use overlay::{ChatOverlay, Generation, PendingReply, TranscriptLine, APOLOGY};
pub use render::{InlineMarkupRenderer, PlainTextRenderer, RenderError, ReplyRenderer};
pub use session::ConversationSession;
pub use transport::{deliver_reply, ClientError, RelayClient, ReplyOutcome};
pub use world::{try_interact, Character, MovementInput, Player, Roster, Vec2};
