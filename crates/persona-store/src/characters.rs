use async_trait::async_trait;
use rusqlite::{params, Connection};
use tracing::instrument;

use persona_core::{Character, CharacterId, CharacterPatch, NewCharacter, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{get, get_opt, parse_json};

const TABLE: &str = "characters";

const COLUMNS: &str = "id, name, role, image_url, category, appearance, description, traits, \
    motivations, conflicts, backstory, relationships, arc, voice, progress, folder, user_id";

/// The subset of character persistence the relay depends on.
///
/// The relay never caches characters: every chat or update re-reads through
/// this trait.
#[async_trait]
pub trait CharacterStore: Send + Sync {
    async fn get(&self, id: CharacterId) -> Result<Option<Character>, StoreError>;

    /// Apply `patch` atomically and return the stored result.
    /// Fails with `StoreError::NotFound` when the character does not exist.
    async fn update(&self, id: CharacterId, patch: &CharacterPatch) -> Result<Character, StoreError>;
}

#[derive(Clone)]
pub struct CharacterRepo {
    db: Database,
}

impl CharacterRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, new), fields(name = %new.name))]
    pub fn create(&self, new: &NewCharacter, owner: Option<UserId>) -> Result<Character, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO characters (name, role, image_url, category, appearance, description, traits,
                     motivations, conflicts, backstory, relationships, arc, voice, progress, folder, user_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    new.name,
                    new.role,
                    new.image_url,
                    new.category,
                    new.appearance,
                    new.description,
                    serde_json::to_string(&new.traits)?,
                    new.motivations,
                    new.conflicts,
                    new.backstory,
                    serde_json::to_string(&new.relationships)?,
                    new.arc,
                    new.voice,
                    new.progress,
                    new.folder,
                    owner.map(UserId::get),
                ],
            )?;
            let id = CharacterId::new(conn.last_insert_rowid());
            select_one(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("character {id}")))
        })
    }

    /// Look up a character; `Ok(None)` when absent.
    #[instrument(skip(self), fields(character_id = %id))]
    pub fn find(&self, id: CharacterId) -> Result<Option<Character>, StoreError> {
        self.db.with_conn(|conn| select_one(conn, id))
    }

    /// Look up a character; `NotFound` when absent.
    pub fn get(&self, id: CharacterId) -> Result<Character, StoreError> {
        self.find(id)?
            .ok_or_else(|| StoreError::NotFound(format!("character {id}")))
    }

    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<Character>, StoreError> {
        self.db.with_conn(|conn| {
            select_many(conn, &format!("SELECT {COLUMNS} FROM characters ORDER BY id"), &[])
        })
    }

    #[instrument(skip(self), fields(user_id = %owner))]
    pub fn list_for_user(&self, owner: UserId) -> Result<Vec<Character>, StoreError> {
        self.db.with_conn(|conn| {
            select_many(
                conn,
                &format!("SELECT {COLUMNS} FROM characters WHERE user_id = ?1 ORDER BY id"),
                &[&owner.get() as &dyn rusqlite::ToSql],
            )
        })
    }

    /// Read, patch and write back under one connection lock.
    #[instrument(skip(self, patch), fields(character_id = %id))]
    pub fn update(&self, id: CharacterId, patch: &CharacterPatch) -> Result<Character, StoreError> {
        self.db.with_conn(|conn| {
            let mut character =
                select_one(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("character {id}")))?;
            character.apply(patch);
            conn.execute(
                "UPDATE characters SET name = ?2, role = ?3, image_url = ?4, category = ?5, appearance = ?6,
                     description = ?7, traits = ?8, motivations = ?9, conflicts = ?10, backstory = ?11,
                     relationships = ?12, arc = ?13, voice = ?14, progress = ?15, folder = ?16
                 WHERE id = ?1",
                params![
                    id.get(),
                    character.name,
                    character.role,
                    character.image_url,
                    character.category,
                    character.appearance,
                    character.description,
                    serde_json::to_string(&character.traits)?,
                    character.motivations,
                    character.conflicts,
                    character.backstory,
                    serde_json::to_string(&character.relationships)?,
                    character.arc,
                    character.voice,
                    character.progress,
                    character.folder,
                ],
            )?;
            Ok(character)
        })
    }

    #[instrument(skip(self), fields(character_id = %id))]
    pub fn delete(&self, id: CharacterId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM characters WHERE id = ?1", [id.get()])?;
            if removed == 0 {
                return Err(StoreError::NotFound(format!("character {id}")));
            }
            Ok(())
        })
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        self.db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM characters", [], |row| row.get(0))?))
    }
}

#[async_trait]
impl CharacterStore for CharacterRepo {
    async fn get(&self, id: CharacterId) -> Result<Option<Character>, StoreError> {
        let repo = self.clone();
        blocking(move || repo.find(id)).await
    }

    async fn update(&self, id: CharacterId, patch: &CharacterPatch) -> Result<Character, StoreError> {
        let repo = self.clone();
        let patch = patch.clone();
        blocking(move || CharacterRepo::update(&repo, id, &patch)).await
    }
}

/// Run a rusqlite call on the blocking pool so async callers never stall a
/// runtime worker on the connection lock.
async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Database(format!("store task failed: {e}")))?
}

fn select_one(conn: &Connection, id: CharacterId) -> Result<Option<Character>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM characters WHERE id = ?1"))?;
    let mut rows = stmt.query([id.get()])?;
    rows.next()?.map(map_row).transpose()
}

fn select_many(
    conn: &Connection,
    sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Character>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(args)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(map_row(row)?);
    }
    Ok(out)
}

fn map_row(row: &rusqlite::Row<'_>) -> Result<Character, StoreError> {
    let traits: String = get(row, 7, TABLE, "traits")?;
    let relationships: String = get(row, 11, TABLE, "relationships")?;
    Ok(Character {
        id: CharacterId::new(get(row, 0, TABLE, "id")?),
        name: get(row, 1, TABLE, "name")?,
        role: get(row, 2, TABLE, "role")?,
        image_url: get_opt(row, 3, TABLE, "image_url")?,
        category: get(row, 4, TABLE, "category")?,
        appearance: get_opt(row, 5, TABLE, "appearance")?,
        description: get_opt(row, 6, TABLE, "description")?,
        traits: parse_json(&traits, TABLE, "traits")?,
        motivations: get_opt(row, 8, TABLE, "motivations")?,
        conflicts: get_opt(row, 9, TABLE, "conflicts")?,
        backstory: get_opt(row, 10, TABLE, "backstory")?,
        relationships: parse_json(&relationships, TABLE, "relationships")?,
        arc: get_opt(row, 12, TABLE, "arc")?,
        voice: get_opt(row, 13, TABLE, "voice")?,
        progress: get(row, 14, TABLE, "progress")?,
        folder: get(row, 15, TABLE, "folder")?,
        user_id: get_opt::<i64>(row, 16, TABLE, "user_id")?.map(UserId::new),
    })
}
