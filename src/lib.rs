//! NPC chat: a proximity dialogue client and the relay that streams its
//! replies from an LLM completion API.

pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod prompts;
pub mod relay;
pub mod stream;
pub mod upstream;

pub use config::RelayConfig;
pub use error::RelayError;
pub use models::{ChatRequest, ConversationTurn, Sender};
