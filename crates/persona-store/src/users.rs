use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::instrument;

use persona_core::UserId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{get, get_opt};

const TABLE: &str = "users";

const COLUMNS: &str = "id, username, email, display_name, bio, avatar_url, created_at, last_login";

/// Public view of a user. The password hash and reset token never leave the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: String,
    pub last_login: Option<String>,
}

/// Insert payload. The caller hashes the password.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub display_name: Option<String>,
}

pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a user. Duplicate usernames or emails fail with `Conflict`.
    #[instrument(skip(self, new), fields(username = %new.username))]
    pub fn create(&self, new: &NewUser) -> Result<User, StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO users (username, email, password_hash, display_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![new.username, new.email, new.password_hash, new.display_name, now],
            )?;
            let id = UserId::new(conn.last_insert_rowid());
            select_by(conn, "id = ?1", &id.get())?
                .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
        })
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: UserId) -> Result<User, StoreError> {
        self.db
            .with_conn(|conn| select_by(conn, "id = ?1", &id.get()))?
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.db.with_conn(|conn| select_by(conn, "email = ?1 COLLATE NOCASE", &email))
    }

    /// The user and stored password hash for a login attempt.
    #[instrument(skip(self))]
    pub fn credentials(&self, username: &str) -> Result<Option<(User, String)>, StoreError> {
        self.db.with_conn(|conn| {
            let user = select_by(conn, "username = ?1", &username)?;
            let Some(user) = user else {
                return Ok(None);
            };
            let hash: String = conn.query_row(
                "SELECT password_hash FROM users WHERE id = ?1",
                [user.id.get()],
                |row| row.get(0),
            )?;
            Ok(Some((user, hash)))
        })
    }

    pub fn record_login(&self, id: UserId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET last_login = ?2 WHERE id = ?1",
                params![id.get(), Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Store a password-reset token, replacing any earlier one.
    #[instrument(skip(self, token), fields(user_id = %id))]
    pub fn set_reset_token(&self, id: UserId, token: &str, expires_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET reset_token = ?2, reset_token_expiry = ?3 WHERE id = ?1",
                params![id.get(), token, expires_at.to_rfc3339()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("user {id}")));
            }
            Ok(())
        })
    }

    /// Redeem a reset token: if it exists and has not expired at `now`, set the
    /// new password hash and clear the token in the same step. Returns the user
    /// whose password changed, or `None` for an unknown or expired token.
    /// Expired tokens are cleared as well.
    #[instrument(skip_all)]
    pub fn redeem_reset_token(
        &self,
        token: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<UserId>, StoreError> {
        self.db.with_conn(|conn| {
            let found: Option<(i64, Option<String>)> = conn
                .query_row(
                    "SELECT id, reset_token_expiry FROM users WHERE reset_token = ?1",
                    [token],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((id, expiry)) = found else {
                return Ok(None);
            };

            let valid = expiry
                .as_deref()
                .and_then(|e| DateTime::parse_from_rfc3339(e).ok())
                .is_some_and(|e| e.with_timezone(&Utc) > now);

            if valid {
                conn.execute(
                    "UPDATE users SET password_hash = ?2, reset_token = NULL, reset_token_expiry = NULL
                     WHERE id = ?1",
                    params![id, new_password_hash],
                )?;
                Ok(Some(UserId::new(id)))
            } else {
                conn.execute(
                    "UPDATE users SET reset_token = NULL, reset_token_expiry = NULL WHERE id = ?1",
                    [id],
                )?;
                Ok(None)
            }
        })
    }
}

fn select_by(conn: &Connection, predicate: &str, arg: &dyn rusqlite::ToSql) -> Result<Option<User>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM users WHERE {predicate}"))?;
    let mut rows = stmt.query([arg])?;
    rows.next()?.map(map_row).transpose()
}

fn map_row(row: &rusqlite::Row<'_>) -> Result<User, StoreError> {
    Ok(User {
        id: UserId::new(get(row, 0, TABLE, "id")?),
        username: get(row, 1, TABLE, "username")?,
        email: get(row, 2, TABLE, "email")?,
        display_name: get_opt(row, 3, TABLE, "display_name")?,
        bio: get_opt(row, 4, TABLE, "bio")?,
        avatar_url: get_opt(row, 5, TABLE, "avatar_url")?,
        created_at: get(row, 6, TABLE, "created_at")?,
        last_login: get_opt(row, 7, TABLE, "last_login")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn repo() -> UserRepo {
        UserRepo::new(Database::in_memory().unwrap())
    }

    fn new_user(name: &str) -> NewUser {
        NewUser {
            username: name.into(),
            email: format!("{name}@example.com"),
            password_hash: "salt$hash".into(),
            display_name: Some(name.to_uppercase()),
        }
    }

    #[test]
    fn create_and_get() {
        let repo = repo();
        let user = repo.create(&new_user("ada")).unwrap();
        assert_eq!(user.username, "ada");
        assert!(user.last_login.is_none());
        assert_eq!(repo.get(user.id).unwrap(), user);
    }

    #[test]
    fn duplicate_username_conflicts() {
        let repo = repo();
        repo.create(&new_user("ada")).unwrap();
        let mut dup = new_user("ada");
        dup.email = "other@example.com".into();
        assert!(matches!(repo.create(&dup), Err(StoreError::Conflict(_))));
    }

    #[test]
    fn credentials_return_hash() {
        let repo = repo();
        repo.create(&new_user("ada")).unwrap();
        let (user, hash) = repo.credentials("ada").unwrap().unwrap();
        assert_eq!(user.username, "ada");
        assert_eq!(hash, "salt$hash");
        assert!(repo.credentials("nobody").unwrap().is_none());
    }

    #[test]
    fn user_json_has_no_secrets() {
        let repo = repo();
        let user = repo.create(&new_user("ada")).unwrap();
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("hash"));
        assert!(json.contains("displayName"));
    }

    #[test]
    fn find_by_email_is_case_insensitive() {
        let repo = repo();
        repo.create(&new_user("ada")).unwrap();
        assert!(repo.find_by_email("ADA@example.com").unwrap().is_some());
        assert!(repo.find_by_email("zed@example.com").unwrap().is_none());
    }

    #[test]
    fn record_login_sets_timestamp() {
        let repo = repo();
        let user = repo.create(&new_user("ada")).unwrap();
        repo.record_login(user.id).unwrap();
        assert!(repo.get(user.id).unwrap().last_login.is_some());
    }

    #[test]
    fn reset_token_is_single_use() {
        let repo = repo();
        let user = repo.create(&new_user("ada")).unwrap();
        let now = Utc::now();
        repo.set_reset_token(user.id, "tok", now + Duration::hours(1)).unwrap();

        let redeemed = repo.redeem_reset_token("tok", "new$hash", now).unwrap();
        assert_eq!(redeemed, Some(user.id));
        let (_, hash) = repo.credentials("ada").unwrap().unwrap();
        assert_eq!(hash, "new$hash");

        assert!(repo.redeem_reset_token("tok", "again", now).unwrap().is_none());
    }

    #[test]
    fn expired_reset_token_rejected_and_cleared() {
        let repo = repo();
        let user = repo.create(&new_user("ada")).unwrap();
        let now = Utc::now();
        repo.set_reset_token(user.id, "tok", now - Duration::minutes(1)).unwrap();

        assert!(repo.redeem_reset_token("tok", "new$hash", now).unwrap().is_none());
        let (_, hash) = repo.credentials("ada").unwrap().unwrap();
        assert_eq!(hash, "salt$hash");

        repo.set_reset_token(user.id, "tok2", now + Duration::hours(1)).unwrap();
        assert!(repo.redeem_reset_token("tok", "x", now).unwrap().is_none());
    }

    #[test]
    fn set_reset_token_for_missing_user() {
        let repo = repo();
        let result = repo.set_reset_token(UserId::new(42), "tok", Utc::now());
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}
