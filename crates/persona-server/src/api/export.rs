//! Notion export endpoints. Available only when an exporter is configured.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use persona_integrations::{extract_database_id, DatabaseSummary, DocumentExporter};

use super::characters::{character_not_found, parse_character_id};
use super::error::{ApiError, ApiJson};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    #[serde(default)]
    database_id: Option<String>,
    #[serde(default)]
    database_url: Option<String>,
}

impl ExportRequest {
    fn target(&self) -> Result<String, ApiError> {
        if let Some(id) = self.database_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            return Ok(id.to_string());
        }
        let url = self
            .database_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ApiError::bad_request("Database ID or URL is required"))?;
        extract_database_id(url).ok_or_else(|| ApiError::bad_request("Could not find a database ID in that URL"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    character_id: persona_core::CharacterId,
}

fn exporter(state: &AppState) -> Result<&Arc<dyn DocumentExporter>, ApiError> {
    state
        .exporter
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("Notion integration is not configured".into()))
}

pub async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "available": state.exporter.is_some() }))
}

pub async fn databases(State(state): State<AppState>) -> Result<Json<Vec<DatabaseSummary>>, ApiError> {
    Ok(Json(exporter(&state)?.list_databases().await?))
}

pub async fn export_character(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ExportRequest>,
) -> Result<Json<Value>, ApiError> {
    let exporter = exporter(&state)?;
    let id = parse_character_id(&id)?;
    let database_id = req.target()?;
    let character = state.characters.get(id).map_err(character_not_found)?;
    let url = exporter.export(&character, &database_id).await?;
    info!(character_id = %id, url = %url, "character exported to Notion");
    Ok(Json(json!({ "url": url })))
}

pub async fn refresh_page(
    State(state): State<AppState>,
    Path(page_id): Path<String>,
    ApiJson(req): ApiJson<RefreshRequest>,
) -> Result<Json<Value>, ApiError> {
    let exporter = exporter(&state)?;
    let character = state.characters.get(req.character_id).map_err(character_not_found)?;
    exporter.refresh(&page_id, &character).await?;
    info!(character_id = %character.id, page_id = %page_id, "Notion page refreshed");
    Ok(Json(json!({ "message": "Notion page updated" })))
}
