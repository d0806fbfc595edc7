//! Character records, creation payloads and partial patches.

use serde::{Deserialize, Deserializer, Serialize};

use crate::ids::{CharacterId, UserId};

pub const DEFAULT_CATEGORY: &str = "Uncategorized";
pub const DEFAULT_FOLDER: &str = "My Novel";

/// Trait values and relationship strengths are rated on this scale.
pub const RATING_RANGE: std::ops::RangeInclusive<i64> = 1..=5;
pub const PROGRESS_RANGE: std::ops::RangeInclusive<i64> = 0..=100;

/// A rated personality trait.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterTrait {
    pub name: String,
    pub value: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A relationship to another (possibly unsaved) character.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub name: String,
    pub relation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<i64>,
}

/// A stored character.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub id: CharacterId,
    pub name: String,
    pub role: String,
    pub image_url: Option<String>,
    pub category: String,
    pub appearance: Option<String>,
    pub description: Option<String>,
    pub traits: Vec<CharacterTrait>,
    pub motivations: Option<String>,
    pub conflicts: Option<String>,
    pub backstory: Option<String>,
    pub relationships: Vec<Relationship>,
    pub arc: Option<String>,
    pub voice: Option<String>,
    pub progress: i64,
    pub folder: String,
    pub user_id: Option<UserId>,
}

impl Character {
    /// Overwrite every field present in `patch`, keeping the rest.
    pub fn apply(&mut self, patch: &CharacterPatch) {
        fn set<T: Clone>(dst: &mut T, src: &Option<T>) {
            if let Some(v) = src {
                *dst = v.clone();
            }
        }
        fn set_nullable<T: Clone>(dst: &mut Option<T>, src: &Option<Option<T>>) {
            if let Some(v) = src {
                *dst = v.clone();
            }
        }

        set(&mut self.name, &patch.name);
        set(&mut self.role, &patch.role);
        set_nullable(&mut self.image_url, &patch.image_url);
        set(&mut self.category, &patch.category);
        set_nullable(&mut self.appearance, &patch.appearance);
        set_nullable(&mut self.description, &patch.description);
        set(&mut self.traits, &patch.traits);
        set_nullable(&mut self.motivations, &patch.motivations);
        set_nullable(&mut self.conflicts, &patch.conflicts);
        set_nullable(&mut self.backstory, &patch.backstory);
        set(&mut self.relationships, &patch.relationships);
        set_nullable(&mut self.arc, &patch.arc);
        set_nullable(&mut self.voice, &patch.voice);
        set(&mut self.progress, &patch.progress);
        set(&mut self.folder, &patch.folder);
    }
}

/// Body of a character creation request. Omitted fields take the column defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCharacter {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub appearance: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub traits: Vec<CharacterTrait>,
    #[serde(default)]
    pub motivations: Option<String>,
    #[serde(default)]
    pub conflicts: Option<String>,
    #[serde(default)]
    pub backstory: Option<String>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub arc: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub progress: i64,
    #[serde(default = "default_folder")]
    pub folder: String,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

fn default_folder() -> String {
    DEFAULT_FOLDER.to_string()
}

impl NewCharacter {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            image_url: None,
            category: default_category(),
            appearance: None,
            description: None,
            traits: Vec::new(),
            motivations: None,
            conflicts: None,
            backstory: None,
            relationships: Vec::new(),
            arc: None,
            voice: None,
            progress: 0,
            folder: default_folder(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        check_required(&mut errors, "name", &self.name);
        check_required(&mut errors, "role", &self.role);
        check_traits(&mut errors, &self.traits);
        check_relationships(&mut errors, &self.relationships);
        check_progress(&mut errors, self.progress);
        errors.into_result()
    }
}

/// A partial field-set. Present fields overwrite, absent fields are kept.
///
/// Optional text fields are doubly wrapped: `None` when absent,
/// `Some(None)` when sent as `null` (clears the field), `Some(Some(_))` to set.
///
/// Also used as the loose "draft" shape sent to the AI endpoints, where the
/// client may be describing a character that has not been saved yet.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub appearance: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traits: Option<Vec<CharacterTrait>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub motivations: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub backstory: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationships: Option<Vec<Relationship>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub arc: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub voice: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
}

impl CharacterPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        if let Some(name) = &self.name {
            check_required(&mut errors, "name", name);
        }
        if let Some(role) = &self.role {
            check_required(&mut errors, "role", role);
        }
        if let Some(traits) = &self.traits {
            check_traits(&mut errors, traits);
        }
        if let Some(relationships) = &self.relationships {
            check_relationships(&mut errors, relationships);
        }
        if let Some(progress) = self.progress {
            check_progress(&mut errors, progress);
        }
        errors.into_result()
    }

    /// Display name for prompts built from an unsaved draft.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.trim().is_empty()).unwrap_or("The character")
    }
}

impl From<&Character> for CharacterPatch {
    fn from(c: &Character) -> Self {
        Self {
            name: Some(c.name.clone()),
            role: Some(c.role.clone()),
            image_url: Some(c.image_url.clone()),
            category: Some(c.category.clone()),
            appearance: Some(c.appearance.clone()),
            description: Some(c.description.clone()),
            traits: Some(c.traits.clone()),
            motivations: Some(c.motivations.clone()),
            conflicts: Some(c.conflicts.clone()),
            backstory: Some(c.backstory.clone()),
            relationships: Some(c.relationships.clone()),
            arc: Some(c.arc.clone()),
            voice: Some(c.voice.clone()),
            progress: Some(c.progress),
            folder: Some(c.folder.clone()),
        }
    }
}

/// Keep an explicit `null` apart from an absent field.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// One failed field check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// All field checks that failed for a payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("invalid character data: {}", summary(.errors))]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

fn summary(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{} {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    fn into_result(self) -> Result<(), Self> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

fn check_required(errors: &mut ValidationErrors, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(field, "must not be empty");
    }
}

fn check_traits(errors: &mut ValidationErrors, traits: &[CharacterTrait]) {
    for (i, t) in traits.iter().enumerate() {
        if !RATING_RANGE.contains(&t.value) {
            errors.push(format!("traits[{i}].value"), "must be between 1 and 5");
        }
    }
}

fn check_relationships(errors: &mut ValidationErrors, relationships: &[Relationship]) {
    for (i, r) in relationships.iter().enumerate() {
        if let Some(strength) = r.strength {
            if !RATING_RANGE.contains(&strength) {
                errors.push(format!("relationships[{i}].strength"), "must be between 1 and 5");
            }
        }
    }
}

fn check_progress(errors: &mut ValidationErrors, progress: i64) {
    if !PROGRESS_RANGE.contains(&progress) {
        errors.push("progress", "must be between 0 and 100");
    }
}
