//! Password hashing, in-memory login sessions and the request extractors
//! built on them.

use std::time::Duration;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::debug;

use persona_core::UserId;

use crate::api::error::ApiError;
use crate::server::AppState;

const SALT_LEN: usize = 16;
const TOKEN_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Not authenticated")]
    MissingToken,
    #[error("Session expired or invalid")]
    InvalidToken,
    #[error("stored password hash is malformed")]
    MalformedHash,
}

/// Hash `password` with a fresh random salt. Output is `salt$digest`, both base64url.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let digest = digest(&salt, password);
    format!("{}${}", URL_SAFE_NO_PAD.encode(salt), URL_SAFE_NO_PAD.encode(digest))
}

/// Check `password` against a value produced by [`hash_password`].
pub fn verify_password(password: &str, stored: &str) -> Result<bool, AuthError> {
    let (salt, expected) = stored.split_once('$').ok_or(AuthError::MalformedHash)?;
    let salt = URL_SAFE_NO_PAD.decode(salt).map_err(|_| AuthError::MalformedHash)?;
    let expected = URL_SAFE_NO_PAD.decode(expected).map_err(|_| AuthError::MalformedHash)?;
    Ok(constant_time_eq(&digest(&salt, password), &expected))
}

fn digest(salt: &[u8], password: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// A random 32-byte token, base64url. Used for sessions and password resets.
pub fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Clone, Copy, Debug)]
struct SessionEntry {
    user_id: UserId,
    expires_at: DateTime<Utc>,
}

/// Bearer tokens of logged-in users. Lost on restart.
pub struct AuthSessions {
    tokens: DashMap<String, SessionEntry>,
    ttl: Duration,
}

impl AuthSessions {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: DashMap::new(),
            ttl,
        }
    }

    pub fn issue(&self, user_id: UserId) -> String {
        let token = random_token();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let expires_at = Utc::now().checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.tokens.insert(token.clone(), SessionEntry { user_id, expires_at });
        token
    }

    /// The user behind `token`, if it is known and unexpired.
    pub fn resolve(&self, token: &str) -> Option<UserId> {
        let entry = *self.tokens.get(token)?;
        if entry.expires_at > Utc::now() {
            Some(entry.user_id)
        } else {
            self.tokens.remove(token);
            None
        }
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.remove(token).is_some()
    }

    /// Drop every session of `user_id`. Returns how many were removed.
    pub fn revoke_user(&self, user_id: UserId) -> usize {
        self.remove_where(|entry| entry.user_id == user_id)
    }

    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let removed = self.remove_where(|entry| entry.expires_at <= now);
        if removed > 0 {
            debug!(removed, "purged expired sessions");
        }
        removed
    }

    /// Remove matching entries, counting only what this call removed so
    /// concurrent inserts cannot skew the result.
    fn remove_where(&self, mut doomed: impl FnMut(&SessionEntry) -> bool) -> usize {
        let mut removed = 0;
        self.tokens.retain(|_, entry| {
            if doomed(entry) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// The caller's session token, required. Rejects with 401.
#[derive(Clone, Debug)]
pub struct BearerToken(pub String);

impl FromRequestParts<AppState> for BearerToken {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &AppState) -> Result<Self, Self::Rejection> {
        bearer_token(parts)
            .map(|t| Self(t.to_string()))
            .ok_or_else(|| AuthError::MissingToken.into())
    }
}

/// An authenticated caller. Rejects with 401.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: UserId,
    pub token: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(AuthError::MissingToken)?;
        let user_id = state.sessions.resolve(token).ok_or(AuthError::InvalidToken)?;
        Ok(Self {
            user_id,
            token: token.to_string(),
        })
    }
}

/// An optional caller. Missing or stale tokens resolve to `None`.
#[derive(Clone, Debug)]
pub struct MaybeUser(pub Option<AuthUser>);

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(Self(AuthUser::from_request_parts(parts, state).await.ok()))
    }
}
