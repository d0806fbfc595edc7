//! Character CRUD.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::info;

use persona_core::{Character, CharacterId, CharacterPatch, NewCharacter};
use persona_store::StoreError;

use super::error::{ApiError, ApiJson};
use crate::auth::MaybeUser;
use crate::server::AppState;

pub(crate) fn parse_character_id(raw: &str) -> Result<CharacterId, ApiError> {
    raw.parse().map_err(|_| ApiError::bad_request("Invalid character ID"))
}

pub(crate) fn character_not_found(e: StoreError) -> ApiError {
    match e {
        StoreError::NotFound(_) => ApiError::not_found("Character not found"),
        other => other.into(),
    }
}

/// All characters, or only the caller's own when a session token is sent.
pub async fn list(State(state): State<AppState>, MaybeUser(user): MaybeUser) -> Result<Json<Vec<Character>>, ApiError> {
    let characters = match user {
        Some(user) => state.characters.list_for_user(user.user_id)?,
        None => state.characters.list()?,
    };
    Ok(Json(characters))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Character>, ApiError> {
    let id = parse_character_id(&id)?;
    state
        .characters
        .find(id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Character not found"))
}

pub async fn create(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    ApiJson(new): ApiJson<NewCharacter>,
) -> Result<impl IntoResponse, ApiError> {
    new.validate()?;
    let owner = user.map(|u| u.user_id);
    let character = state.characters.create(&new, owner)?;
    info!(character_id = %character.id, owner = ?owner, "character created");
    Ok((StatusCode::CREATED, Json(character)))
}

/// Apply a partial update and push the result to the character's live session.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<CharacterPatch>,
) -> Result<Json<Character>, ApiError> {
    let id = parse_character_id(&id)?;
    patch.validate()?;
    let character = state.characters.update(id, &patch).map_err(character_not_found)?;
    let delivered = state.relay.publish_update(&character);
    info!(character_id = %id, delivered, "character updated");
    Ok(Json(character))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    let id = parse_character_id(&id)?;
    state.characters.delete(id).map_err(character_not_found)?;
    info!(character_id = %id, "character deleted");
    Ok(StatusCode::NO_CONTENT)
}
