//! Per-character persona directives for the completion API

/// Persona of a character the relay knows how to voice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Persona {
    pub name: &'static str,
    pub behavior: &'static str,
    pub question: &'static str,
}

/// Every character the relay accepts, in declaration order
pub const PERSONAS: &[Persona] = &[
    Persona {
        name: "Mushroom",
        behavior: "enthusiastic math teacher who loves puzzles",
        question: "What is 5 × (3 + 2)?",
    },
    Persona {
        name: "Slime",
        behavior: "curious historian who speaks in riddles",
        question: "What is the name of the valley we live in?",
    },
    Persona {
        name: "Gem",
        behavior: "wise geologist who speaks slowly and clearly",
        question: "What element is the most abundant in the Earth's crust?",
    },
];

/// Looks up a persona by exact character name
pub fn persona(name: &str) -> Option<&'static Persona> {
    PERSONAS.iter().find(|p| p.name == name)
}

/// Builds the system directive for a character, or `None` for unknown names
pub fn system_prompt(name: &str) -> Option<String> {
    let persona = persona(name)?;
    Some(format!(
        "You are {}, a character in an educational game for students aged 15–18. \
         Your behavior is: {}. The question you want to ask is: \"{}\". \
         Stay in character and respond based on your role.",
        persona.name, persona.behavior, persona.question
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_character_gets_directive_with_behavior_and_question() {
        let prompt = system_prompt("Slime").expect("Slime is known");
        assert!(prompt.starts_with("You are Slime, a character"));
        assert!(prompt.contains("curious historian who speaks in riddles"));
        assert!(prompt.contains("\"What is the name of the valley we live in?\""));
    }

    #[test]
    fn lookup_is_case_sensitive() {
        assert!(system_prompt("Gem").is_some());
        assert!(system_prompt("gem").is_none());
        assert!(system_prompt("Dragon").is_none());
    }
}
