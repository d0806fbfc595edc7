use async_trait::async_trait;

use crate::character::{CharacterPatch, CharacterTrait, Relationship};
use crate::errors::ProviderError;
use crate::prompt::ChatContext;

/// Opaque AI content generation backend (text and image in, text and image out).
///
/// Implementations must be cheap to share behind an `Arc` and safe to call
/// from many connections at once.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Reply in character to `user_text`.
    async fn chat_reply(&self, context: &ChatContext, user_text: &str) -> Result<String, ProviderError>;

    /// Generate a portrait and return its URL.
    async fn generate_image(&self, prompt: &str) -> Result<String, ProviderError>;

    async fn generate_traits(&self, draft: &CharacterPatch) -> Result<Vec<CharacterTrait>, ProviderError>;

    async fn enhance_backstory(&self, backstory: &str) -> Result<String, ProviderError>;

    async fn generate_voice(&self, draft: &CharacterPatch) -> Result<String, ProviderError>;

    async fn generate_relationships(&self, draft: &CharacterPatch) -> Result<Vec<Relationship>, ProviderError>;

    async fn generate_arc(&self, draft: &CharacterPatch) -> Result<String, ProviderError>;

    /// Describe how the character would react to `scenario`.
    async fn simulate(&self, draft: &CharacterPatch, scenario: &str) -> Result<String, ProviderError>;
}
