//! Character export to a Notion workspace.
//!
//! A character becomes one database page: Name, Role, Category and Progress
//! properties, the portrait as cover and icon, and one heading per section.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use persona_core::Character;

pub const DEFAULT_BASE_URL: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Notion rejects rich-text runs longer than this.
const MAX_TEXT_RUN: usize = 2000;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("invalid Notion {kind} ID: {id}")]
    InvalidTarget { kind: &'static str, id: String },
    #[error("Notion API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("unusable Notion response: {0}")]
    InvalidResponse(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSummary {
    pub id: String,
    pub title: String,
}

/// Destination for exported characters.
#[async_trait]
pub trait DocumentExporter: Send + Sync {
    async fn list_databases(&self) -> Result<Vec<DatabaseSummary>, ExportError>;

    /// Create a page for `character` in `database_id` and return its URL.
    async fn export(&self, character: &Character, database_id: &str) -> Result<String, ExportError>;

    /// Rewrite an existing page's properties from `character`.
    async fn refresh(&self, page_id: &str, character: &Character) -> Result<(), ExportError>;
}

#[derive(Clone, Debug)]
pub struct NotionConfig {
    pub api_key: SecretString,
    pub base_url: Option<String>,
}

pub struct NotionExporter {
    client: Client,
    api_key: SecretString,
    base_url: String,
}

#[derive(Deserialize)]
struct CreatedPage {
    url: Option<String>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct SearchResult {
    id: String,
    #[serde(default)]
    title: Vec<PlainText>,
}

#[derive(Deserialize)]
struct PlainText {
    #[serde(default)]
    plain_text: String,
}

impl NotionExporter {
    pub fn new(config: NotionConfig) -> Result<Self, ExportError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ExportError::Network(format!("build HTTP client: {e}")))?;
        let base_url = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            client,
            api_key: config.api_key,
            base_url,
        })
    }

    async fn call<R: DeserializeOwned>(&self, method: Method, path: &str, body: Option<&Value>) -> Result<R, ExportError> {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(self.api_key.expose_secret())
            .header("Notion-Version", NOTION_VERSION);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(|e| ExportError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v["message"].as_str().map(String::from))
                .unwrap_or(text);
            return Err(ExportError::Api {
                status: status.as_u16(),
                message,
            });
        }
        resp.json::<R>()
            .await
            .map_err(|e| ExportError::InvalidResponse(e.to_string()))
    }

    /// Confirm a database or page exists before writing to it.
    async fn ensure_exists(&self, kind: &'static str, path: String, id: &str) -> Result<(), ExportError> {
        match self.call::<Value>(Method::GET, &path, None).await {
            Ok(_) => Ok(()),
            Err(ExportError::Api { status: 400 | 404, .. }) => {
                warn!(kind, id, "Notion target not found");
                Err(ExportError::InvalidTarget { kind, id: id.to_string() })
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl DocumentExporter for NotionExporter {
    #[instrument(skip(self))]
    async fn list_databases(&self) -> Result<Vec<DatabaseSummary>, ExportError> {
        let body = json!({ "filter": { "property": "object", "value": "database" } });
        let resp: SearchResponse = self.call(Method::POST, "/search", Some(&body)).await?;
        Ok(resp
            .results
            .into_iter()
            .map(|db| {
                let title: String = db.title.iter().map(|t| t.plain_text.as_str()).collect();
                DatabaseSummary {
                    id: db.id,
                    title: if title.is_empty() { "Untitled Database".into() } else { title },
                }
            })
            .collect())
    }

    #[instrument(skip(self, character), fields(character_id = %character.id))]
    async fn export(&self, character: &Character, database_id: &str) -> Result<String, ExportError> {
        self.ensure_exists("database", format!("/databases/{database_id}"), database_id)
            .await?;

        let body = page_body(character, database_id);
        let page: CreatedPage = self.call(Method::POST, "/pages", Some(&body)).await?;
        let url = page
            .url
            .ok_or_else(|| ExportError::InvalidResponse("created page has no url".into()))?;
        info!(url = %url, "character exported to Notion");
        Ok(url)
    }

    #[instrument(skip(self, character), fields(character_id = %character.id))]
    async fn refresh(&self, page_id: &str, character: &Character) -> Result<(), ExportError> {
        self.ensure_exists("page", format!("/pages/{page_id}"), page_id).await?;
        let body = json!({ "properties": page_properties(character) });
        self.call::<Value>(Method::PATCH, &format!("/pages/{page_id}"), Some(&body))
            .await?;
        info!(page_id, "Notion page refreshed");
        Ok(())
    }
}

/// Pull a database ID out of a Notion URL or return a bare ID unchanged.
///
/// The ID is the trailing alphanumeric run of the path, before any query.
pub fn extract_database_id(input: &str) -> Option<String> {
    let compact = input.trim().split(['?', '#']).next().unwrap_or_default();

    // Bare dashed UUID
    if compact.len() == 36 && compact.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
        return Some(compact.replace('-', ""));
    }

    let start = compact
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_alphanumeric())
        .last()
        .map(|(i, _)| i)?;
    Some(compact[start..].to_string())
}

/// Page properties shared by create and refresh.
pub fn page_properties(character: &Character) -> Value {
    json!({
        "Name": { "title": [{ "text": { "content": character.name } }] },
        "Role": { "rich_text": [{ "text": { "content": character.role } }] },
        "Category": { "select": { "name": character.category } },
        "Progress": { "number": character.progress },
    })
}

/// Full `POST /pages` body for a new character page.
pub fn page_body(character: &Character, database_id: &str) -> Value {
    let mut body = json!({
        "parent": { "database_id": database_id },
        "properties": page_properties(character),
        "children": page_children(character),
    });
    if let Some(url) = character.image_url.as_deref().filter(|u| !u.is_empty()) {
        let external = json!({ "type": "external", "external": { "url": url } });
        body["icon"] = external.clone();
        body["cover"] = external;
    }
    body
}

/// Section blocks in page order.
pub fn page_children(character: &Character) -> Vec<Value> {
    let mut blocks = Vec::new();
    let mut section = |title: &str, body: Vec<Value>| {
        blocks.push(heading(title));
        blocks.extend(body);
    };

    section("Description", vec![paragraph(character.description.as_deref())]);
    section("Appearance", vec![paragraph(character.appearance.as_deref())]);
    section(
        "Traits",
        character
            .traits
            .iter()
            .map(|t| {
                let mut line = format!("{}: {}/5", t.name, t.value);
                if let Some(description) = t.description.as_deref().filter(|d| !d.is_empty()) {
                    line.push_str(&format!(" - {description}"));
                }
                bullet(&line)
            })
            .collect(),
    );
    section("Motivations", vec![paragraph(character.motivations.as_deref())]);
    section("Conflicts", vec![paragraph(character.conflicts.as_deref())]);
    section("Backstory", vec![paragraph(character.backstory.as_deref())]);
    section(
        "Relationships",
        character
            .relationships
            .iter()
            .map(|r| {
                let mut line = format!("{} ({})", r.name, r.relation);
                if let Some(description) = r.description.as_deref().filter(|d| !d.is_empty()) {
                    line.push_str(&format!(" - {description}"));
                }
                if let Some(strength) = r.strength {
                    line.push_str(&format!(" - Bond strength: {strength}/5"));
                }
                bullet(&line)
            })
            .collect(),
    );
    section("Character Arc", vec![paragraph(character.arc.as_deref())]);
    section("Voice", vec![paragraph(character.voice.as_deref())]);
    blocks
}

fn heading(title: &str) -> Value {
    json!({
        "object": "block",
        "type": "heading_2",
        "heading_2": { "rich_text": rich_text(title) },
    })
}

fn paragraph(content: Option<&str>) -> Value {
    json!({
        "object": "block",
        "type": "paragraph",
        "paragraph": { "rich_text": rich_text(content.unwrap_or_default()) },
    })
}

fn bullet(content: &str) -> Value {
    json!({
        "object": "block",
        "type": "bulleted_list_item",
        "bulleted_list_item": { "rich_text": rich_text(content) },
    })
}

fn rich_text(content: &str) -> Vec<Value> {
    let chars: Vec<char> = content.chars().collect();
    if chars.is_empty() {
        return vec![json!({ "type": "text", "text": { "content": "" } })];
    }
    chars
        .chunks(MAX_TEXT_RUN)
        .map(|chunk| {
            let run: String = chunk.iter().collect();
            json!({ "type": "text", "text": { "content": run } })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use persona_core::{CharacterId, CharacterTrait, Relationship};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn character() -> Character {
        Character {
            id: CharacterId::new(3),
            name: "Marcus Wells".into(),
            role: "Supporting Character".into(),
            image_url: Some("https://img.example/marcus.png".into()),
            category: "Supporting Characters".into(),
            appearance: Some("Rumpled tweed".into()),
            description: Some("Julian's mentor".into()),
            traits: vec![CharacterTrait {
                name: "Kindness".into(),
                value: 4,
                description: Some("Gentle".into()),
            }],
            motivations: None,
            conflicts: None,
            backstory: Some("Taught for thirty years.".into()),
            relationships: vec![Relationship {
                name: "Julian Carter".into(),
                relation: "Student/Mentee".into(),
                description: None,
                strength: Some(4),
            }],
            arc: None,
            voice: None,
            progress: 30,
            folder: "My Novel".into(),
            user_id: None,
        }
    }

    fn exporter(server: &MockServer) -> NotionExporter {
        NotionExporter::new(NotionConfig {
            api_key: SecretString::from("secret_test"),
            base_url: Some(server.uri()),
        })
        .unwrap()
    }

    fn block_text(block: &Value) -> String {
        let kind = block["type"].as_str().unwrap();
        block[kind]["rich_text"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["text"]["content"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn extract_id_from_urls() {
        assert_eq!(
            extract_database_id("https://www.notion.so/workspace/abc123def456?v=789").as_deref(),
            Some("abc123def456")
        );
        assert_eq!(
            extract_database_id("https://www.notion.so/My-Cast-0123456789abcdef").as_deref(),
            Some("0123456789abcdef")
        );
        assert_eq!(extract_database_id("abc123").as_deref(), Some("abc123"));
        assert_eq!(
            extract_database_id("12345678-1234-1234-1234-123456789abc").as_deref(),
            Some("12345678123412341234123456789abc")
        );
        assert_eq!(extract_database_id("https://www.notion.so/"), None);
        assert_eq!(extract_database_id(""), None);
    }

    #[test]
    fn page_has_every_section_in_order() {
        let blocks = page_children(&character());
        let headings: Vec<String> = blocks
            .iter()
            .filter(|b| b["type"] == "heading_2")
            .map(block_text)
            .collect();
        assert_eq!(
            headings,
            [
                "Description",
                "Appearance",
                "Traits",
                "Motivations",
                "Conflicts",
                "Backstory",
                "Relationships",
                "Character Arc",
                "Voice"
            ]
        );
        let bullets: Vec<String> = blocks
            .iter()
            .filter(|b| b["type"] == "bulleted_list_item")
            .map(block_text)
            .collect();
        assert_eq!(bullets[0], "Kindness: 4/5 - Gentle");
        assert_eq!(bullets[1], "Julian Carter (Student/Mentee) - Bond strength: 4/5");
    }

    #[test]
    fn body_carries_properties_and_images() {
        let body = page_body(&character(), "db1");
        assert_eq!(body["parent"]["database_id"], "db1");
        assert_eq!(body["properties"]["Name"]["title"][0]["text"]["content"], "Marcus Wells");
        assert_eq!(body["properties"]["Category"]["select"]["name"], "Supporting Characters");
        assert_eq!(body["properties"]["Progress"]["number"], 30);
        assert_eq!(body["cover"]["external"]["url"], "https://img.example/marcus.png");
        assert_eq!(body["icon"]["type"], "external");

        let mut bare = character();
        bare.image_url = None;
        assert!(page_body(&bare, "db1").get("cover").is_none());
    }

    #[test]
    fn long_text_split_into_runs() {
        let long = "x".repeat(MAX_TEXT_RUN * 2 + 5);
        let runs = rich_text(&long);
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[2]["text"]["content"].as_str().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn export_validates_database_then_creates_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/databases/db1"))
            .and(header("Notion-Version", NOTION_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "object": "database", "id": "db1" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/pages"))
            .and(header("authorization", "Bearer secret_test"))
            .and(body_partial_json(json!({ "parent": { "database_id": "db1" } })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "object": "page", "url": "https://notion.so/page1" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let url = exporter(&server).export(&character(), "db1").await.unwrap();
        assert_eq!(url, "https://notion.so/page1");
    }

    #[tokio::test]
    async fn export_to_missing_database_is_invalid_target() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/databases/nope"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Could not find database" })))
            .mount(&server)
            .await;

        let err = exporter(&server).export(&character(), "nope").await.unwrap_err();
        assert!(matches!(err, ExportError::InvalidTarget { kind: "database", .. }));
        assert_eq!(err.to_string(), "invalid Notion database ID: nope");
    }

    #[tokio::test]
    async fn list_databases_joins_titles() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_partial_json(json!({ "filter": { "value": "database" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    { "id": "a", "title": [{ "plain_text": "Novel " }, { "plain_text": "Cast" }] },
                    { "id": "b", "title": [] }
                ]
            })))
            .mount(&server)
            .await;

        let dbs = exporter(&server).list_databases().await.unwrap();
        assert_eq!(
            dbs,
            vec![
                DatabaseSummary { id: "a".into(), title: "Novel Cast".into() },
                DatabaseSummary { id: "b".into(), title: "Untitled Database".into() },
            ]
        );
    }

    #[tokio::test]
    async fn refresh_patches_properties() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pages/p1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "object": "page" })))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/pages/p1"))
            .and(body_partial_json(json!({ "properties": { "Progress": { "number": 30 } } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "object": "page" })))
            .expect(1)
            .mount(&server)
            .await;

        exporter(&server).refresh("p1", &character()).await.unwrap();
    }

    #[tokio::test]
    async fn api_errors_surface_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "API token is invalid." })))
            .mount(&server)
            .await;

        let err = exporter(&server).list_databases().await.unwrap_err();
        match err {
            ExportError::Api { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "API token is invalid.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
