/// SQL DDL for the persona-store database.
/// WAL mode + foreign keys enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    display_name TEXT,
    bio TEXT,
    avatar_url TEXT,
    created_at TEXT NOT NULL,
    last_login TEXT,
    reset_token TEXT,
    reset_token_expiry TEXT
);

CREATE TABLE IF NOT EXISTS characters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    role TEXT NOT NULL,
    image_url TEXT,
    category TEXT NOT NULL DEFAULT 'Uncategorized',
    appearance TEXT,
    description TEXT,
    traits TEXT NOT NULL DEFAULT '[]',
    motivations TEXT,
    conflicts TEXT,
    backstory TEXT,
    relationships TEXT NOT NULL DEFAULT '[]',
    arc TEXT,
    voice TEXT,
    progress INTEGER NOT NULL DEFAULT 0,
    folder TEXT NOT NULL DEFAULT 'My Novel',
    user_id INTEGER REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_characters_user ON characters(user_id);
CREATE INDEX IF NOT EXISTS idx_users_reset_token ON users(reset_token);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
