//! Static characters, player movement and proximity checks

use serde::{Deserialize, Serialize};

/// Characters strictly closer than this can be talked to
pub const INTERACTION_RADIUS: f32 = 60.0;
/// Player speed in world units per second
pub const PLAYER_SPEED: f32 = 160.0;
pub const PLAYER_START: Vec2 = Vec2 { x: 100.0, y: 100.0 };
/// Centre distance at which the player's body touches a character's
pub const CONTACT_DISTANCE: f32 = 32.0;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Vec2) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// A talkable NPC. Loaded once and never mutated during play.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    #[serde(rename = "sprite")]
    pub sprite_ref: String,
    #[serde(flatten)]
    pub position: Vec2,
    /// Line shown when the chat opens
    #[serde(rename = "message")]
    pub greeting: String,
}

/// Returns the first character, in declaration order, within `threshold` of
/// the player.
pub fn try_interact(player: Vec2, characters: &[Character], threshold: f32) -> Option<&Character> {
    characters
        .iter()
        .find(|character| character.position.distance(player) < threshold)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Roster {
    characters: Vec<Character>,
}

impl Roster {
    pub fn new(characters: Vec<Character>) -> Self {
        Self { characters }
    }

    /// Parses a JSON array of `{name, sprite, x, y, message}` entries
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json).map(Self::new)
    }

    pub fn characters(&self) -> &[Character] {
        &self.characters
    }

    pub fn get(&self, name: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.name == name)
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::new(vec![
            Character {
                name: "Mushroom".to_string(),
                sprite_ref: "npc1".to_string(),
                position: Vec2::new(300.0, 100.0),
                greeting: "I have a math question for you. What is $5 \\times (3+2)$?".to_string(),
            },
            Character {
                name: "Slime".to_string(),
                sprite_ref: "npc2".to_string(),
                position: Vec2::new(500.0, 400.0),
                greeting: "I know a bit about our world. What is the name of the valley we live in?"
                    .to_string(),
            },
            Character {
                name: "Gem".to_string(),
                sprite_ref: "npc3".to_string(),
                position: Vec2::new(150.0, 450.0),
                greeting: "I hold ancient knowledge. What element is the most abundant in the Earth's crust?"
                    .to_string(),
            },
        ])
    }
}

/// Arrow-key state polled once per tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MovementInput {
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Player {
    pub position: Vec2,
    pub velocity: Vec2,
}

impl Player {
    pub fn new(position: Vec2) -> Self {
        Self {
            position,
            velocity: Vec2::ZERO,
        }
    }

    /// Sets velocity from the held keys. While `suppressed` the input is
    /// dropped and velocity keeps whatever value it had.
    pub fn apply_input(&mut self, input: MovementInput, suppressed: bool) {
        if suppressed {
            return;
        }
        self.velocity = Vec2::ZERO;
        if input.left {
            self.velocity.x = -PLAYER_SPEED;
        } else if input.right {
            self.velocity.x = PLAYER_SPEED;
        }
        if input.up {
            self.velocity.y = -PLAYER_SPEED;
        } else if input.down {
            self.velocity.y = PLAYER_SPEED;
        }
    }

    pub fn halt(&mut self) {
        self.velocity = Vec2::ZERO;
    }

    /// Moves one axis at a time. An axis move that would push further into a
    /// character is dropped, so the player slides along it instead of
    /// walking through.
    pub fn step(&mut self, dt: f32, obstacles: &[Character]) {
        let blocked = |from: Vec2, to: Vec2| {
            obstacles.iter().any(|c| {
                let d = c.position.distance(to);
                d < CONTACT_DISTANCE && d < c.position.distance(from)
            })
        };

        let next = Vec2::new(self.position.x + self.velocity.x * dt, self.position.y);
        if !blocked(self.position, next) {
            self.position = next;
        }
        let next = Vec2::new(self.position.x, self.position.y + self.velocity.y * dt);
        if !blocked(self.position, next) {
            self.position = next;
        }
    }
}

impl Default for Player {
    fn default() -> Self {
        Self::new(PLAYER_START)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn character(name: &str, x: f32, y: f32) -> Character {
        Character {
            name: name.to_string(),
            sprite_ref: "npc".to_string(),
            position: Vec2::new(x, y),
            greeting: String::new(),
        }
    }

    #[test]
    fn character_within_threshold_is_found() {
        let roster = Roster::default();
        let found = try_interact(Vec2::new(300.0, 140.0), roster.characters(), INTERACTION_RADIUS);
        assert_eq!(found.map(|c| c.name.as_str()), Some("Mushroom"));
    }

    #[test]
    fn nobody_in_reach_returns_none() {
        let roster = Roster::default();
        assert!(try_interact(PLAYER_START, roster.characters(), INTERACTION_RADIUS).is_none());
    }

    #[test]
    fn exact_threshold_distance_does_not_trigger() {
        let characters = vec![character("Edge", 60.0, 0.0)];
        assert!(try_interact(Vec2::ZERO, &characters, 60.0).is_none());
        assert!(try_interact(Vec2::new(0.5, 0.0), &characters, 60.0).is_some());
    }

    #[test]
    fn declaration_order_wins_over_nearness() {
        let characters = vec![character("Far", 50.0, 0.0), character("Near", 5.0, 0.0)];
        let found = try_interact(Vec2::ZERO, &characters, 60.0).expect("in reach");
        assert_eq!(found.name, "Far");
    }

    #[test]
    fn roster_loads_from_flat_json() {
        let roster = Roster::from_json(
            r#"[{"name":"Owl","sprite":"npc9","x":10,"y":20.5,"message":"Hoo?"}]"#,
        )
        .expect("roster");
        let owl = roster.get("Owl").expect("owl");
        assert_eq!(owl.position, Vec2::new(10.0, 20.5));
        assert_eq!(owl.sprite_ref, "npc9");
        assert_eq!(owl.greeting, "Hoo?");
    }

    #[test]
    fn movement_follows_keys_and_is_suppressed_on_request() {
        let mut player = Player::default();
        player.apply_input(
            MovementInput {
                left: true,
                down: true,
                ..Default::default()
            },
            false,
        );
        assert_eq!(player.velocity, Vec2::new(-PLAYER_SPEED, PLAYER_SPEED));

        player.halt();
        player.apply_input(
            MovementInput {
                right: true,
                ..Default::default()
            },
            true,
        );
        assert_eq!(player.velocity, Vec2::ZERO);

        player.step(1.0, &[]);
        assert_eq!(player.position, PLAYER_START);
    }

    #[test]
    fn characters_block_the_player() {
        let rock = [character("Rock", 100.0, 0.0)];
        let mut player = Player::new(Vec2::new(50.0, 0.0));
        player.velocity = Vec2::new(PLAYER_SPEED, PLAYER_SPEED);

        // heading straight into the rock: x is dropped, y still slides
        player.position = Vec2::new(80.0, 0.0);
        player.step(0.1, &rock);
        assert_eq!(player.position, Vec2::new(80.0, 16.0));

        // far away nothing interferes
        player.position = Vec2::new(0.0, 0.0);
        player.step(0.1, &rock);
        assert_eq!(player.position, Vec2::new(16.0, 16.0));

        // already overlapping, backing out is allowed
        player.position = Vec2::new(90.0, 0.0);
        player.velocity = Vec2::new(-PLAYER_SPEED, 0.0);
        player.step(0.1, &rock);
        assert_eq!(player.position, Vec2::new(74.0, 0.0));
    }
}
