//! Per-character conversation history, owned by the chat overlay

use crate::models::ConversationTurn;
use std::collections::HashMap;

/// Append-only histories keyed by character name. Lives for one play
/// session; nothing is persisted.
#[derive(Debug, Clone, Default)]
pub struct ConversationSession {
    histories: HashMap<String, Vec<ConversationTurn>>,
}

impl ConversationSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// History with `character`, oldest first. Empty if they never talked.
    pub fn history(&self, character: &str) -> &[ConversationTurn] {
        self.histories
            .get(character)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Records one finished exchange: the user's turn, then the reply
    pub fn record_exchange(&mut self, character: &str, user_text: String, reply: String) {
        let history = self.histories.entry(character.to_string()).or_default();
        history.push(ConversationTurn::user(user_text));
        history.push(ConversationTurn::model(reply));
    }

    pub fn turn_count(&self, character: &str) -> usize {
        self.history(character).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sender;

    #[test]
    fn exchanges_append_user_then_model() {
        let mut session = ConversationSession::new();
        session.record_exchange("Gem", "Oxygen?".into(), "Indeed.".into());
        session.record_exchange("Gem", "And then?".into(), "Silicon.".into());

        let history = session.history("Gem");
        assert_eq!(history.len(), 4);
        assert_eq!(history[0], ConversationTurn::user("Oxygen?"));
        assert_eq!(history[1].sender, Sender::Model);
        assert_eq!(history[3].text, "Silicon.");
    }

    #[test]
    fn histories_are_scoped_per_character() {
        let mut session = ConversationSession::new();
        session.record_exchange("Slime", "Hi".into(), "Riddle me this".into());
        assert_eq!(session.turn_count("Slime"), 2);
        assert_eq!(session.turn_count("Gem"), 0);
        assert!(session.history("Mushroom").is_empty());
    }
}
