pub mod characters;
pub mod database;
pub mod error;
pub mod row_helpers;
pub mod schema;
pub mod seed;
pub mod users;

pub use characters::{CharacterRepo, CharacterStore};
pub use database::Database;
pub use error::StoreError;
pub use seed::seed_demo_characters;
pub use users::{NewUser, User, UserRepo};
