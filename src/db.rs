use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    username TEXT PRIMARY KEY NOT NULL,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    profile_pic TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS friendships (
    username TEXT NOT NULL,
    friend TEXT NOT NULL,
    PRIMARY KEY (username, friend)
);

CREATE TABLE IF NOT EXISTS friend_requests (
    receiver TEXT NOT NULL,
    sender TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (receiver, sender)
);

CREATE TABLE IF NOT EXISTS direct_messages (
    id TEXT PRIMARY KEY NOT NULL,
    sender TEXT NOT NULL,
    receiver TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS rooms (
    id TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    category TEXT,
    kind TEXT NOT NULL,
    is_private INTEGER NOT NULL DEFAULT 0,
    code TEXT UNIQUE,
    created_by TEXT NOT NULL,
    video_queue TEXT NOT NULL DEFAULT '[]',
    current_video_index INTEGER NOT NULL DEFAULT 0,
    is_playing INTEGER NOT NULL DEFAULT 0,
    last_sync_time REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS room_participants (
    room_id TEXT NOT NULL,
    username TEXT NOT NULL,
    PRIMARY KEY (room_id, username)
);

CREATE INDEX IF NOT EXISTS room_participants_by_user ON room_participants (username);
CREATE INDEX IF NOT EXISTS direct_messages_by_pair ON direct_messages (sender, receiver);
"#;

/// Opens the pool and makes sure every table exists.
pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<SqlitePool> {
    let mut options = SqlitePoolOptions::new().max_connections(max_connections);
    if url.contains(":memory:") {
        // an in-memory database lives exactly as long as its connection
        options = options.min_connections(1).idle_timeout(None).max_lifetime(None);
    }

    let db_pool = options.connect(url).await?;
    migrate(&db_pool).await?;
    Ok(db_pool)
}

pub async fn migrate(db_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(db_pool).await?;
    Ok(())
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    connect("sqlite::memory:", 1).await.unwrap()
}
