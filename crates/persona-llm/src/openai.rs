use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use persona_core::prompt::describe_draft;
use persona_core::{CharacterPatch, CharacterTrait, ChatContext, ContentProvider, ProviderError, Relationship};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_CHAT_MODEL: &str = "gpt-4o";
const IMAGE_MODEL: &str = "dall-e-3";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: SecretString,
    pub base_url: Option<String>,
    pub chat_model: Option<String>,
}

impl OpenAiConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            base_url: None,
            chat_model: None,
        }
    }
}

/// Chat completions and image generation against the OpenAI HTTP API.
pub struct OpenAiProvider {
    client: Client,
    api_key: SecretString,
    base_url: String,
    chat_model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'static str,
    prompt: &'a str,
    n: u8,
    size: &'static str,
    quality: &'static str,
}

#[derive(Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Deserialize)]
struct TraitList {
    traits: Vec<CharacterTrait>,
}

#[derive(Deserialize)]
struct RelationshipList {
    relationships: Vec<Relationship>,
}

const WRITING_ASSISTANT: &str =
    "You are a creative writing assistant helping a novelist develop believable, layered characters.";

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::NetworkError(format!("build HTTP client: {e}")))?;
        let base_url = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let chat_model = config.chat_model.unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string());

        info!(model = %chat_model, base_url = %base_url, "OpenAI provider initialized");

        Ok(Self {
            client,
            api_key: config.api_key,
            base_url,
            chat_model,
        })
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), parse_api_error(&body)));
        }

        resp.json::<R>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    async fn complete(&self, system: &str, user: &str, json: bool) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.chat_model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            response_format: json.then_some(ResponseFormat { kind: "json_object" }),
        };
        let resp: ChatResponse = self.post("/chat/completions", &request).await?;
        let text = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse("completion had no content".into()))?;
        debug!(chars = text.len(), "completion received");
        Ok(text)
    }

    async fn complete_json<T: DeserializeOwned>(&self, user: &str) -> Result<T, ProviderError> {
        let raw = self.complete(WRITING_ASSISTANT, user, true).await?;
        serde_json::from_str(&raw).map_err(|e| ProviderError::InvalidResponse(format!("malformed JSON: {e}")))
    }
}

/// Pull `error.message` out of an API error body, falling back to the raw text.
fn parse_api_error(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| json["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

fn clamp_rating(value: i64) -> i64 {
    value.clamp(1, 5)
}

#[async_trait]
impl ContentProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    #[instrument(skip_all, fields(character = %context.character_name))]
    async fn chat_reply(&self, context: &ChatContext, user_text: &str) -> Result<String, ProviderError> {
        self.complete(&context.system_prompt(), user_text, false).await
    }

    #[instrument(skip_all)]
    async fn generate_image(&self, prompt: &str) -> Result<String, ProviderError> {
        let prompt = format!("Create a character portrait of {prompt}. Realistic style, dramatic lighting, high quality.");
        let request = ImageRequest {
            model: IMAGE_MODEL,
            prompt: &prompt,
            n: 1,
            size: "1024x1024",
            quality: "standard",
        };
        let resp: ImageResponse = self.post("/images/generations", &request).await?;
        resp.data
            .into_iter()
            .find_map(|d| d.url)
            .ok_or_else(|| ProviderError::InvalidResponse("image response had no url".into()))
    }

    async fn generate_traits(&self, draft: &CharacterPatch) -> Result<Vec<CharacterTrait>, ProviderError> {
        let prompt = format!(
            "{}\n\nSuggest four defining personality traits for this character. Respond with JSON of the form \
             {{\"traits\": [{{\"name\": string, \"value\": integer 1-5, \"description\": string}}]}}.",
            describe_draft(draft)
        );
        let mut list: TraitList = self.complete_json(&prompt).await?;
        for t in &mut list.traits {
            t.value = clamp_rating(t.value);
        }
        Ok(list.traits)
    }

    async fn enhance_backstory(&self, backstory: &str) -> Result<String, ProviderError> {
        let prompt = if backstory.trim().is_empty() {
            "Write a short, evocative backstory for a new character in two or three paragraphs.".to_string()
        } else {
            format!(
                "Enrich this character backstory with formative experiences and emotional depth, \
                 keeping every existing fact:\n\n{backstory}"
            )
        };
        self.complete(WRITING_ASSISTANT, &prompt, false).await
    }

    async fn generate_voice(&self, draft: &CharacterPatch) -> Result<String, ProviderError> {
        let prompt = format!(
            "{}\n\nDescribe how this character speaks: cadence, vocabulary, verbal habits and a few signature phrases.",
            describe_draft(draft)
        );
        self.complete(WRITING_ASSISTANT, &prompt, false).await
    }

    async fn generate_relationships(&self, draft: &CharacterPatch) -> Result<Vec<Relationship>, ProviderError> {
        let prompt = format!(
            "{}\n\nInvent three people important to this character. Respond with JSON of the form \
             {{\"relationships\": [{{\"name\": string, \"relation\": string, \"description\": string, \
             \"strength\": integer 1-5}}]}}.",
            describe_draft(draft)
        );
        let mut list: RelationshipList = self.complete_json(&prompt).await?;
        for r in &mut list.relationships {
            r.strength = r.strength.map(clamp_rating);
        }
        Ok(list.relationships)
    }

    async fn generate_arc(&self, draft: &CharacterPatch) -> Result<String, ProviderError> {
        let prompt = format!(
            "{}\n\nOutline this character's arc across a novel: starting state, turning points, climax and final state.",
            describe_draft(draft)
        );
        self.complete(WRITING_ASSISTANT, &prompt, false).await
    }

    async fn simulate(&self, draft: &CharacterPatch, scenario: &str) -> Result<String, ProviderError> {
        let prompt = format!(
            "{}\n\nScenario: {scenario}\n\nDescribe how this character would react and why, in the third person.",
            describe_draft(draft)
        );
        self.complete(WRITING_ASSISTANT, &prompt, false).await
    }
}
