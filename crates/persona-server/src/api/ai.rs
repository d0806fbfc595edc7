//! AI-assisted authoring. Every call goes through the configured provider,
//! which is already wrapped in the request deadline.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use persona_core::{CharacterPatch, CharacterTrait};

use super::error::{ApiError, ApiJson};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct ImageRequest {
    #[serde(default)]
    prompt: Option<String>,
}

/// Body for endpoints that describe a (possibly unsaved) character.
#[derive(Debug, Deserialize)]
pub struct DraftRequest {
    #[serde(default)]
    character: Option<CharacterPatch>,
}

#[derive(Debug, Deserialize)]
pub struct BackstoryRequest {
    #[serde(default)]
    backstory: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SimulateRequest {
    #[serde(default)]
    character: Option<CharacterPatch>,
    #[serde(default)]
    scenario: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub async fn generate_image(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ImageRequest>,
) -> Result<Json<Value>, ApiError> {
    let prompt = non_blank(req.prompt).ok_or_else(|| ApiError::bad_request("Prompt is required"))?;
    let image_url = state.provider.generate_image(&prompt).await?;
    debug!(provider = state.provider.name(), "portrait generated");
    Ok(Json(json!({ "imageUrl": image_url })))
}

pub async fn generate_traits(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<DraftRequest>,
) -> Result<Json<Vec<CharacterTrait>>, ApiError> {
    let draft = req.character.unwrap_or_default();
    Ok(Json(state.provider.generate_traits(&draft).await?))
}

pub async fn enhance_backstory(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<BackstoryRequest>,
) -> Result<Json<Value>, ApiError> {
    let backstory = req.backstory.unwrap_or_default();
    let enhanced = state.provider.enhance_backstory(&backstory).await?;
    Ok(Json(json!({ "enhancedBackstory": enhanced })))
}

pub async fn generate_voice(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<DraftRequest>,
) -> Result<Json<Value>, ApiError> {
    let draft = req.character.unwrap_or_default();
    let voice = state.provider.generate_voice(&draft).await?;
    Ok(Json(json!({ "voice": voice })))
}

pub async fn generate_relationships(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<DraftRequest>,
) -> Result<Json<Value>, ApiError> {
    let draft = req.character.unwrap_or_default();
    let relationships = state.provider.generate_relationships(&draft).await?;
    Ok(Json(json!({ "relationships": relationships })))
}

pub async fn generate_arc(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<DraftRequest>,
) -> Result<Json<Value>, ApiError> {
    let draft = req.character.unwrap_or_default();
    let arc = state.provider.generate_arc(&draft).await?;
    Ok(Json(json!({ "arc": arc })))
}

pub async fn simulate_character(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SimulateRequest>,
) -> Result<Json<Value>, ApiError> {
    let (Some(draft), Some(scenario)) = (req.character, non_blank(req.scenario)) else {
        return Err(ApiError::bad_request("Character and scenario are required"));
    };
    let response = state.provider.simulate(&draft, &scenario).await?;
    Ok(Json(json!({ "response": response })))
}
