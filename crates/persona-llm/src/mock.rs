use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use persona_core::{CharacterPatch, CharacterTrait, ChatContext, ContentProvider, ProviderError, Relationship};

/// Pre-programmed responses for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Text returned as-is; structured operations parse it as JSON.
    Text(String),
    Error(ProviderError),
    /// Wait a duration, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self::Text(value.to_string())
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// One recorded invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockCall {
    pub operation: &'static str,
    /// System prompt for chat, empty otherwise.
    pub system: String,
    pub input: String,
}

/// Provider that answers every operation from one scripted queue, in order.
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    calls: Mutex<Vec<MockCall>>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Queue another response after construction.
    pub fn push(&self, response: MockResponse) {
        self.responses.lock().push_back(response);
    }

    async fn next(&self, operation: &'static str, system: String, input: String) -> Result<String, ProviderError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.calls.lock().push(MockCall {
            operation,
            system,
            input,
        });
        let response = self.responses.lock().pop_front().ok_or_else(|| {
            ProviderError::InvalidRequest(format!("MockProvider: no response configured for call {idx}"))
        })?;
        resolve_response(response).await
    }

    async fn next_json<T: DeserializeOwned>(&self, operation: &'static str, input: String) -> Result<T, ProviderError> {
        let raw = self.next(operation, String::new(), input).await?;
        serde_json::from_str(&raw).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: MockResponse) -> Result<String, ProviderError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Text(text) => return Ok(text),
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}

fn draft_input(draft: &CharacterPatch) -> String {
    draft.display_name().to_string()
}

#[async_trait]
impl ContentProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn chat_reply(&self, context: &ChatContext, user_text: &str) -> Result<String, ProviderError> {
        self.next("chat_reply", context.system_prompt(), user_text.to_string()).await
    }

    async fn generate_image(&self, prompt: &str) -> Result<String, ProviderError> {
        self.next("generate_image", String::new(), prompt.to_string()).await
    }

    async fn generate_traits(&self, draft: &CharacterPatch) -> Result<Vec<CharacterTrait>, ProviderError> {
        self.next_json("generate_traits", draft_input(draft)).await
    }

    async fn enhance_backstory(&self, backstory: &str) -> Result<String, ProviderError> {
        self.next("enhance_backstory", String::new(), backstory.to_string()).await
    }

    async fn generate_voice(&self, draft: &CharacterPatch) -> Result<String, ProviderError> {
        self.next("generate_voice", String::new(), draft_input(draft)).await
    }

    async fn generate_relationships(&self, draft: &CharacterPatch) -> Result<Vec<Relationship>, ProviderError> {
        self.next_json("generate_relationships", draft_input(draft)).await
    }

    async fn generate_arc(&self, draft: &CharacterPatch) -> Result<String, ProviderError> {
        self.next("generate_arc", String::new(), draft_input(draft)).await
    }

    async fn simulate(&self, draft: &CharacterPatch, scenario: &str) -> Result<String, ProviderError> {
        self.next("simulate", draft_input(draft), scenario.to_string()).await
    }
}
