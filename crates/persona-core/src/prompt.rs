//! System context for in-character chat, and plain-text character summaries
//! for the generation prompts.

use serde::{Deserialize, Serialize};

use crate::character::{Character, CharacterPatch};

/// Which character attribute a context block was built from.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContextLabel {
    Identity,
    Description,
    Backstory,
    Motivations,
    Voice,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextBlock {
    pub label: ContextLabel,
    pub content: String,
}

/// Everything the provider needs to speak as a character.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatContext {
    pub character_name: String,
    pub blocks: Vec<ContextBlock>,
}

impl ChatContext {
    /// Build from the character's role, description, backstory, motivations
    /// and voice. Empty attributes are left out.
    pub fn for_character(character: &Character) -> Self {
        let mut blocks = vec![ContextBlock {
            label: ContextLabel::Identity,
            content: format!(
                "You are {}, a {} in a work of fiction.",
                character.name, character.role
            ),
        }];

        let optional = [
            (ContextLabel::Description, "Description", &character.description),
            (ContextLabel::Backstory, "Backstory", &character.backstory),
            (ContextLabel::Motivations, "Motivations", &character.motivations),
            (ContextLabel::Voice, "Voice and manner of speech", &character.voice),
        ];
        for (label, heading, value) in optional {
            if let Some(text) = value.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                blocks.push(ContextBlock {
                    label,
                    content: format!("{heading}: {text}"),
                });
            }
        }

        Self {
            character_name: character.name.clone(),
            blocks,
        }
    }

    /// Render the blocks into one system prompt.
    pub fn system_prompt(&self) -> String {
        let mut out = self
            .blocks
            .iter()
            .map(|b| b.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        out.push_str(&format!(
            "\n\nStay in character as {} at all times. Answer in the first person and never mention that you are an AI.",
            self.character_name
        ));
        out
    }
}

/// Summarize a (possibly partial) character for a generation prompt.
pub fn describe_draft(draft: &CharacterPatch) -> String {
    let mut lines = vec![format!("Name: {}", draft.display_name())];
    fn text(v: &Option<Option<String>>) -> Option<&str> {
        v.as_ref().and_then(|v| v.as_deref())
    }
    let fields = [
        ("Role", draft.role.as_deref()),
        ("Description", text(&draft.description)),
        ("Appearance", text(&draft.appearance)),
        ("Motivations", text(&draft.motivations)),
        ("Conflicts", text(&draft.conflicts)),
        ("Backstory", text(&draft.backstory)),
        ("Voice", text(&draft.voice)),
        ("Arc", text(&draft.arc)),
    ];
    for (heading, value) in fields {
        if let Some(text) = value.map(str::trim).filter(|t| !t.is_empty()) {
            lines.push(format!("{heading}: {text}"));
        }
    }
    if let Some(traits) = draft.traits.as_ref().filter(|t| !t.is_empty()) {
        let list = traits
            .iter()
            .map(|t| format!("{} ({}/5)", t.name, t.value))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("Traits: {list}"));
    }
    lines.join("\n")
}
