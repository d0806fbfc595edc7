use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use persona_core::{CharacterPatch, CharacterTrait, ChatContext, ContentProvider, ProviderError, Relationship};

/// Wraps a provider so that every call finishes within `deadline`.
/// Expiry surfaces as `ProviderError::Timeout` and drops the inner future.
pub struct DeadlineProvider {
    inner: Arc<dyn ContentProvider>,
    deadline: Duration,
}

impl DeadlineProvider {
    pub fn new(inner: Arc<dyn ContentProvider>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, ProviderError>> + Send,
    ) -> Result<T, ProviderError> {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    provider = self.inner.name(),
                    operation,
                    deadline_ms = self.deadline.as_millis() as u64,
                    "provider call timed out"
                );
                Err(ProviderError::Timeout(self.deadline))
            }
        }
    }
}

#[async_trait]
impl ContentProvider for DeadlineProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn chat_reply(&self, context: &ChatContext, user_text: &str) -> Result<String, ProviderError> {
        self.bounded("chat_reply", self.inner.chat_reply(context, user_text)).await
    }

    async fn generate_image(&self, prompt: &str) -> Result<String, ProviderError> {
        self.bounded("generate_image", self.inner.generate_image(prompt)).await
    }

    async fn generate_traits(&self, draft: &CharacterPatch) -> Result<Vec<CharacterTrait>, ProviderError> {
        self.bounded("generate_traits", self.inner.generate_traits(draft)).await
    }

    async fn enhance_backstory(&self, backstory: &str) -> Result<String, ProviderError> {
        self.bounded("enhance_backstory", self.inner.enhance_backstory(backstory)).await
    }

    async fn generate_voice(&self, draft: &CharacterPatch) -> Result<String, ProviderError> {
        self.bounded("generate_voice", self.inner.generate_voice(draft)).await
    }

    async fn generate_relationships(&self, draft: &CharacterPatch) -> Result<Vec<Relationship>, ProviderError> {
        self.bounded("generate_relationships", self.inner.generate_relationships(draft)).await
    }

    async fn generate_arc(&self, draft: &CharacterPatch) -> Result<String, ProviderError> {
        self.bounded("generate_arc", self.inner.generate_arc(draft)).await
    }

    async fn simulate(&self, draft: &CharacterPatch, scenario: &str) -> Result<String, ProviderError> {
        self.bounded("simulate", self.inner.simulate(draft, scenario)).await
    }
}
