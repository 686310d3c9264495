//! Per-tick wiring of movement, proximity and the chat overlay

use super::overlay::ChatOverlay;
use super::render::{InlineMarkupRenderer, ReplyRenderer};
use super::world::{try_interact, Character, MovementInput, Player, Roster, INTERACTION_RADIUS};

pub struct Game<R = InlineMarkupRenderer> {
    pub player: Player,
    roster: Roster,
    overlay: ChatOverlay<R>,
    threshold: f32,
}

impl<R: ReplyRenderer> Game<R> {
    pub fn new(roster: Roster, overlay: ChatOverlay<R>) -> Self {
        Self {
            player: Player::default(),
            roster,
            overlay,
            threshold: INTERACTION_RADIUS,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn overlay(&self) -> &ChatOverlay<R> {
        &self.overlay
    }

    pub fn overlay_mut(&mut self) -> &mut ChatOverlay<R> {
        &mut self.overlay
    }

    pub fn into_overlay(self) -> ChatOverlay<R> {
        self.overlay
    }

    /// Movement is ignored while the overlay is open. Characters are solid.
    pub fn tick(&mut self, input: MovementInput, dt: f32) {
        self.player.apply_input(input, self.overlay.is_open());
        self.player.step(dt, self.roster.characters());
    }

    /// Handles the interact key: opens a chat with the first character in
    /// reach. Does nothing while a chat is already open.
    pub fn interact(&mut self) -> Option<&Character> {
        if self.overlay.is_open() {
            return None;
        }
        let character =
            try_interact(self.player.position, self.roster.characters(), self.threshold)?.clone();
        self.player.halt();
        self.overlay.open(&character);
        self.overlay.active_character()
    }

    pub fn close_chat(&mut self) {
        self.overlay.close();
    }
}

impl Default for Game<InlineMarkupRenderer> {
    fn default() -> Self {
        Self::new(Roster::default(), ChatOverlay::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::world::{Vec2, PLAYER_SPEED};

    const RIGHT: MovementInput = MovementInput {
        left: false,
        right: true,
        up: false,
        down: false,
    };

    #[test]
    fn walking_up_to_a_character_and_interacting_opens_chat() {
        let mut game: Game = Game::default();
        game.player.position = Vec2::new(210.0, 100.0);
        game.tick(RIGHT, 0.25);
        assert_eq!(game.player.position, Vec2::new(210.0 + PLAYER_SPEED * 0.25, 100.0));

        let name = game.interact().map(|c| c.name.clone());
        assert_eq!(name.as_deref(), Some("Mushroom"));
        assert!(game.overlay().is_open());
        assert_eq!(game.player.velocity, Vec2::ZERO);
    }

    #[test]
    fn movement_is_frozen_while_chatting() {
        let mut game: Game = Game::default();
        game.player.position = Vec2::new(300.0, 140.0);
        assert!(game.interact().is_some());

        let before = game.player.position;
        game.tick(RIGHT, 1.0);
        assert_eq!(game.player.position, before);

        game.close_chat();
        game.tick(RIGHT, 1.0);
        assert_eq!(game.player.position.x, before.x + PLAYER_SPEED);
    }

    #[test]
    fn player_cannot_walk_through_a_character() {
        let mut game: Game = Game::default();
        game.player.position = Vec2::new(250.0, 100.0);
        for _ in 0..20 {
            game.tick(RIGHT, 0.1);
        }
        assert!(game.player.position.x < 300.0 - 16.0);
        assert!(game.player.position.x > 250.0);
        assert!(game.interact().is_some());
    }

    #[test]
    fn interacting_out_of_reach_does_nothing() {
        let mut game: Game = Game::default();
        assert!(game.interact().is_none());
        assert!(!game.overlay().is_open());
    }
}
