use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use time::OffsetDateTime;
use tokio::sync::OwnedMutexGuard;

use crate::{error::{CoreError, CoreResult}, locks::KeyedLocks};

use super::{code, NewRoom, QueueEntry, Room, RoomKind};

const ROOM_COLUMNS: &str = "id,title,description,category,kind,is_private,code,created_by,video_queue,current_video_index,is_playing,last_sync_time,created_at";

/// Collisions in a 32^6 space are rare; this bounds a pathological loop.
const MAX_CODE_ATTEMPTS: usize = 64;

/// Persisted rooms plus the per-room lock table that serializes their
/// read-modify-write cycles.
#[derive(Clone)]
pub struct RoomStore {
    db_pool: SqlitePool,
    locks: KeyedLocks,
}

fn room_from_row(row: &SqliteRow) -> CoreResult<Room> {
    let queue: String = row.try_get("video_queue")?;
    let index: i64 = row.try_get("current_video_index")?;
    let kind: String = row.try_get("kind")?;

    Ok(Room {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        kind: RoomKind::from(kind),
        is_private: row.try_get("is_private")?,
        code: row.try_get("code")?,
        created_by: row.try_get("created_by")?,
        participants: Vec::new(),
        video_queue: serde_json::from_str(&queue)?,
        current_video_index: usize::try_from(index).unwrap_or(0),
        is_playing: row.try_get("is_playing")?,
        last_sync_time: row.try_get("last_sync_time")?,
        created_at: row.try_get("created_at")?,
    })
}

impl RoomStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        RoomStore { db_pool, locks: KeyedLocks::new() }
    }

    /// Held across a load-mutate-save of one room.
    pub async fn lock(&self, room_id: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(room_id).await
    }

    pub async fn create(&self, new: NewRoom, creator: &str) -> CoreResult<Room> {
        let _guard = self.lock(&new.id).await;
        if self.exists(&new.id).await? {
            return Err(CoreError::AlreadyExists("Room"));
        }

        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = match new.is_private {
                true => Some(self.generate_unique_code().await?),
                false => None,
            };
            let room = Room {
                id: new.id.clone(),
                title: new.title.clone(),
                description: new.description.clone(),
                category: new.category.clone(),
                kind: new.kind.clone(),
                is_private: new.is_private,
                code,
                created_by: creator.to_owned(),
                participants: vec![creator.to_owned()],
                video_queue: Vec::new(),
                current_video_index: 0,
                is_playing: false,
                last_sync_time: 0.0,
                created_at: OffsetDateTime::now_utc(),
            };

            match self.insert(&room).await {
                Ok(()) => {
                    tracing::info!(room = %room.id, identity = creator, private = room.is_private, "Room created");
                    return Ok(room);
                }
                Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                    if self.exists(&room.id).await? {
                        return Err(CoreError::AlreadyExists("Room"));
                    }
                    // lost a race for the code, draw again
                    tracing::debug!(room = %room.id, "Room code collided on insert");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(CoreError::AlreadyExists("Room code"))
    }

    async fn insert(&self, room: &Room) -> Result<(), sqlx::Error> {
        let mut tx = self.db_pool.begin().await?;
        sqlx::query(
            "INSERT INTO rooms (id,title,description,category,kind,is_private,code,created_by,video_queue,current_video_index,is_playing,last_sync_time,created_at)
             VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?)",
        )
        .bind(&room.id)
        .bind(&room.title)
        .bind(&room.description)
        .bind(&room.category)
        .bind(room.kind.as_str())
        .bind(room.is_private)
        .bind(&room.code)
        .bind(&room.created_by)
        .bind(serde_json::to_string(&room.video_queue).map_err(|err| sqlx::Error::Encode(err.into()))?)
        .bind(room.current_video_index as i64)
        .bind(room.is_playing)
        .bind(room.last_sync_time)
        .bind(room.created_at)
        .execute(&mut *tx)
        .await?;

        for participant in &room.participants {
            sqlx::query("INSERT OR IGNORE INTO room_participants (room_id,username) VALUES (?,?)")
                .bind(&room.id)
                .bind(participant)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await
    }

    /// Draws codes until one is not held by any room.
    pub async fn generate_unique_code(&self) -> CoreResult<String> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let candidate = code::random_code();
            let taken: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM rooms WHERE code=?")
                .bind(&candidate)
                .fetch_optional(&self.db_pool)
                .await?;
            if taken.is_none() {
                return Ok(candidate);
            }
        }
        Err(CoreError::AlreadyExists("Room code"))
    }

    async fn exists(&self, room_id: &str) -> CoreResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM rooms WHERE id=?")
            .bind(room_id)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(row.is_some())
    }

    async fn participants(&self, room_id: &str) -> CoreResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT username FROM room_participants WHERE room_id=? ORDER BY rowid")
            .bind(room_id)
            .fetch_all(&self.db_pool)
            .await?;
        Ok(rows.into_iter().map(|(username,)| username).collect())
    }

    async fn hydrate(&self, row: Option<SqliteRow>) -> CoreResult<Option<Room>> {
        let Some(row) = row else {
            return Ok(None);
        };
        let mut room = room_from_row(&row)?;
        room.participants = self.participants(&room.id).await?;
        Ok(Some(room))
    }

    pub async fn find_by_id(&self, room_id: &str) -> CoreResult<Option<Room>> {
        let row = sqlx::query(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id=?"))
            .bind(room_id)
            .fetch_optional(&self.db_pool)
            .await?;
        self.hydrate(row).await
    }

    /// Only private rooms carry a code; public rooms are never found here.
    pub async fn find_by_code(&self, code: &str) -> CoreResult<Option<Room>> {
        let row = sqlx::query(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE code=? AND is_private=1"))
            .bind(code.trim().to_uppercase())
            .fetch_optional(&self.db_pool)
            .await?;
        self.hydrate(row).await
    }

    /// Public rooms, plus private rooms the identity created or joined.
    /// Newest first.
    pub async fn list_visible_to(&self, identity: Option<&str>) -> CoreResult<Vec<Room>> {
        let rows = sqlx::query(&format!(
            "SELECT {ROOM_COLUMNS} FROM rooms r
             WHERE r.is_private=0
                OR (?1 IS NOT NULL AND (r.created_by=?1
                    OR EXISTS (SELECT 1 FROM room_participants p WHERE p.room_id=r.id AND p.username=?1)))
             ORDER BY r.created_at DESC, r.rowid DESC"
        ))
        .bind(identity)
        .fetch_all(&self.db_pool)
        .await?;

        let mut rooms = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(room) = self.hydrate(Some(row)).await? {
                rooms.push(room);
            }
        }
        Ok(rooms)
    }

    /// Idempotent. Returns the room as it stands afterwards.
    pub async fn add_participant(&self, room_id: &str, identity: &str) -> CoreResult<Room> {
        let _guard = self.lock(room_id).await;
        if !self.exists(room_id).await? {
            return Err(CoreError::NotFound("Room"));
        }
        sqlx::query("INSERT OR IGNORE INTO room_participants (room_id,username) VALUES (?,?)")
            .bind(room_id)
            .bind(identity)
            .execute(&self.db_pool)
            .await?;
        self.find_by_id(room_id).await?.ok_or(CoreError::NotFound("Room"))
    }

    /// Idempotent; a no-op when the identity is not a participant.
    pub async fn remove_participant(&self, room_id: &str, identity: &str) -> CoreResult<Option<Room>> {
        let _guard = self.lock(room_id).await;
        sqlx::query("DELETE FROM room_participants WHERE room_id=? AND username=?")
            .bind(room_id)
            .bind(identity)
            .execute(&self.db_pool)
            .await?;
        self.find_by_id(room_id).await
    }

    pub async fn rooms_with_participant(&self, identity: &str) -> CoreResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT room_id FROM room_participants WHERE username=? ORDER BY rowid")
            .bind(identity)
            .fetch_all(&self.db_pool)
            .await?;
        Ok(rows.into_iter().map(|(room_id,)| room_id).collect())
    }

    /// Writes back the queue and playback fields. Caller holds the room lock.
    pub async fn save_player_state(&self, room: &Room) -> CoreResult<()> {
        sqlx::query("UPDATE rooms SET video_queue=?, current_video_index=?, is_playing=?, last_sync_time=? WHERE id=?")
            .bind(serde_json::to_string(&room.video_queue)?)
            .bind(room.current_video_index as i64)
            .bind(room.is_playing)
            .bind(room.last_sync_time)
            .bind(&room.id)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn store() -> RoomStore {
        RoomStore::new(db::memory_pool().await)
    }

    fn new_room(id: &str, is_private: bool) -> NewRoom {
        NewRoom {
            id: id.to_owned(),
            title: "Movie Night".to_owned(),
            description: None,
            category: Some("Movies".to_owned()),
            kind: RoomKind::WatchTogether,
            is_private,
        }
    }

    #[tokio::test]
    async fn public_room_has_no_code() {
        let rooms = store().await;
        let room = rooms.create(new_room("r1", false), "host").await.unwrap();

        assert!(room.code.is_none());
        assert_eq!(room.participants, ["host"]);
        for candidate in ["", "ABCDEF"] {
            assert!(rooms.find_by_code(candidate).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn private_room_is_found_by_its_code() {
        let rooms = store().await;
        let room = rooms.create(new_room("r1", true), "host").await.unwrap();
        let code = room.code.clone().unwrap();
        assert_eq!(code.len(), code::CODE_LEN);

        let found = rooms.find_by_code(&code).await.unwrap().unwrap();
        assert_eq!(found.id, "r1");
        assert_eq!(found.is_private, found.code.is_some());

        let lowercase = rooms.find_by_code(&code.to_lowercase()).await.unwrap();
        assert_eq!(lowercase.map(|r| r.id).as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let rooms = store().await;
        rooms.create(new_room("r1", false), "host").await.unwrap();

        let err = rooms.create(new_room("r1", true), "other").await.unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists("Room")));
    }

    #[tokio::test]
    async fn concurrent_creates_with_one_id_admit_one() {
        let rooms = store().await;
        let (a, b) = tokio::join!(
            rooms.create(new_room("same", false), "a"),
            rooms.create(new_room("same", false), "b"),
        );
        assert!(a.is_ok() ^ b.is_ok());
    }

    #[tokio::test]
    async fn participants_are_idempotent() {
        let rooms = store().await;
        rooms.create(new_room("r1", false), "host").await.unwrap();

        rooms.add_participant("r1", "guest").await.unwrap();
        let room = rooms.add_participant("r1", "guest").await.unwrap();
        assert_eq!(room.participants.iter().filter(|p| *p == "guest").count(), 1);

        rooms.remove_participant("r1", "guest").await.unwrap();
        let room = rooms.remove_participant("r1", "guest").await.unwrap().unwrap();
        assert_eq!(room.participants, ["host"]);

        rooms.remove_participant("r1", "host").await.unwrap();
        let room = rooms.find_by_id("r1").await.unwrap().unwrap();
        assert!(!room.is_active());
    }

    #[tokio::test]
    async fn joining_a_missing_room_is_not_found() {
        let rooms = store().await;
        let err = rooms.add_participant("ghost", "guest").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound("Room")));
    }

    #[tokio::test]
    async fn listing_follows_visibility() {
        let rooms = store().await;
        rooms.create(new_room("public", false), "host").await.unwrap();
        rooms.create(new_room("secret", true), "host").await.unwrap();
        rooms.create(new_room("club", true), "other").await.unwrap();
        rooms.add_participant("club", "guest").await.unwrap();

        let ids = |list: Vec<Room>| list.into_iter().map(|r| r.id).collect::<Vec<_>>();

        assert_eq!(ids(rooms.list_visible_to(None).await.unwrap()), ["public"]);
        assert_eq!(ids(rooms.list_visible_to(Some("host")).await.unwrap()), ["secret", "public"]);
        assert_eq!(ids(rooms.list_visible_to(Some("guest")).await.unwrap()), ["club", "public"]);
    }

    #[tokio::test]
    async fn player_state_persists() {
        let rooms = store().await;
        let mut room = rooms.create(new_room("r1", false), "host").await.unwrap();

        room.video_queue.push(QueueEntry::new("https://v/1", "host"));
        room.is_playing = true;
        room.last_sync_time = 42.5;
        rooms.save_player_state(&room).await.unwrap();

        let loaded = rooms.find_by_id("r1").await.unwrap().unwrap();
        assert_eq!(loaded.video_queue, room.video_queue);
        assert!(loaded.is_playing);
        assert_eq!(loaded.last_sync_time, 42.5);
        assert_eq!(rooms.rooms_with_participant("host").await.unwrap(), ["r1"]);
    }
}
