//! Registration, login sessions and password reset.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use persona_integrations::password_reset_email;
use persona_store::{NewUser, StoreError, User};

use super::error::{ApiError, ApiJson};
use crate::auth::{hash_password, random_token, verify_password, AuthUser, BearerToken};
use crate::server::AppState;

const MIN_USERNAME_LEN: usize = 3;
const MIN_PASSWORD_LEN: usize = 6;
const INVALID_LOGIN: &str = "Invalid username or password";
const RESET_SENT: &str = "If an account with that email exists, a password reset link has been sent";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    username: String,
    email: String,
    password: String,
    #[serde(default)]
    display_name: Option<String>,
}

impl RegisterRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.username.trim().chars().count() < MIN_USERNAME_LEN {
            return Err(ApiError::bad_request("Username must be at least 3 characters"));
        }
        if !self.email.contains('@') {
            return Err(ApiError::bad_request("A valid email address is required"));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ApiError::bad_request("Password must be at least 6 characters"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    token: String,
    password: String,
}

fn session_body(user: User, token: String) -> Json<Value> {
    Json(json!({ "user": user, "token": token }))
}

pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    let new = NewUser {
        username: req.username.trim().to_string(),
        email: req.email.trim().to_string(),
        password_hash: hash_password(&req.password),
        display_name: req.display_name.filter(|n| !n.trim().is_empty()),
    };
    let user = state.users.create(&new).map_err(|e| match e {
        StoreError::Conflict(_) => ApiError::Conflict("Username or email already in use".into()),
        other => other.into(),
    })?;
    let token = state.sessions.issue(user.id);
    info!(user_id = %user.id, "user registered");
    Ok((StatusCode::CREATED, session_body(user, token)))
}

pub async fn login(State(state): State<AppState>, ApiJson(req): ApiJson<LoginRequest>) -> Result<Json<Value>, ApiError> {
    let Some((user, hash)) = state.users.credentials(req.username.trim())? else {
        return Err(ApiError::Unauthorized(INVALID_LOGIN.into()));
    };
    if !verify_password(&req.password, &hash)? {
        warn!(user_id = %user.id, "failed login");
        return Err(ApiError::Unauthorized(INVALID_LOGIN.into()));
    }
    state.users.record_login(user.id)?;
    let user = state.users.get(user.id)?;
    let token = state.sessions.issue(user.id);
    info!(user_id = %user.id, "user logged in");
    Ok(session_body(user, token))
}

pub async fn logout(State(state): State<AppState>, BearerToken(token): BearerToken) -> StatusCode {
    state.sessions.revoke(&token);
    StatusCode::NO_CONTENT
}

pub async fn current_user(State(state): State<AppState>, user: AuthUser) -> Result<Json<User>, ApiError> {
    match state.users.get(user.user_id) {
        Ok(found) => Ok(Json(found)),
        Err(StoreError::NotFound(_)) => {
            state.sessions.revoke(&user.token);
            Err(ApiError::Unauthorized("Not authenticated".into()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Always answers 200 so the response does not reveal which emails exist.
pub async fn forgot_password(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ForgotPasswordRequest>,
) -> Result<Json<Value>, ApiError> {
    if let Some(user) = state.users.find_by_email(req.email.trim())? {
        let token = random_token();
        let ttl = chrono::Duration::from_std(state.config.reset_token_ttl())
            .map_err(|e| ApiError::Internal(format!("reset token ttl: {e}")))?;
        state.users.set_reset_token(user.id, &token, Utc::now() + ttl)?;

        let email = password_reset_email(&user.email, &state.config.reset_url(&token));
        if let Err(e) = state.mailer.send(&email).await {
            warn!(user_id = %user.id, error = %e, "password reset email not delivered");
        } else {
            info!(user_id = %user.id, "password reset email sent");
        }
    }
    Ok(Json(json!({ "message": RESET_SENT })))
}

pub async fn reset_password(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ResetPasswordRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request("Password must be at least 6 characters"));
    }
    let hash = hash_password(&req.password);
    let user_id = state
        .users
        .redeem_reset_token(&req.token, &hash, Utc::now())?
        .ok_or_else(|| ApiError::bad_request("Invalid or expired reset token"))?;
    let revoked = state.sessions.revoke_user(user_id);
    info!(user_id = %user_id, revoked, "password reset");
    Ok(Json(json!({ "message": "Password has been reset successfully" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(username: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            display_name: None,
        }
    }

    #[test]
    fn register_validation() {
        assert!(request("ada", "ada@example.com", "secret").validate().is_ok());
        assert!(request("ad", "ada@example.com", "secret").validate().is_err());
        assert!(request("ada", "not-an-email", "secret").validate().is_err());
        assert!(request("ada", "ada@example.com", "short").validate().is_err());
    }
}
