//! REST endpoints under `/api`.

pub mod ai;
pub mod auth;
pub mod characters;
pub mod error;
pub mod export;

use axum::routing::{get, post, put};
use axum::Router;

use crate::server::AppState;

pub use error::{ApiError, ApiJson};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/characters", get(characters::list).post(characters::create))
        .route(
            "/characters/{id}",
            get(characters::get).patch(characters::update).delete(characters::delete),
        )
        .route("/characters/{id}/export/notion", post(export::export_character))
        .route("/generate-image", post(ai::generate_image))
        .route("/generate-traits", post(ai::generate_traits))
        .route("/enhance-backstory", post(ai::enhance_backstory))
        .route("/generate-voice", post(ai::generate_voice))
        .route("/generate-relationships", post(ai::generate_relationships))
        .route("/generate-arc", post(ai::generate_arc))
        .route("/simulate-character", post(ai::simulate_character))
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/user", get(auth::current_user))
        .route("/forgot-password", post(auth::forgot_password))
        .route("/reset-password", post(auth::reset_password))
        .route("/notion/status", get(export::status))
        .route("/notion/databases", get(export::databases))
        .route("/notion/pages/{page_id}", put(export::refresh_page))
}
