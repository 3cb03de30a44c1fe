//! Direct messages between two identities. These are persisted; room chat
//! is relayed by the Event Router and never stored.

use axum::{debug_handler, extract::{Path, State}, routing::get, Json, Router};
use serde::Serialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{auth::Caller, error::{CoreError, CoreResult}, AppResult, AppState};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    pub id: Uuid,
    pub sender: String,
    pub receiver: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Clone)]
pub struct MessageStore {
    db_pool: SqlitePool,
}

impl MessageStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        MessageStore { db_pool }
    }

    pub async fn send(&self, sender: &str, receiver: &str, content: &str) -> CoreResult<DirectMessage> {
        if receiver.is_empty() || content.is_empty() || receiver == sender {
            return Err(CoreError::validation("A direct message needs another receiver and some content."));
        }

        let message = DirectMessage {
            id: Uuid::now_v7(),
            sender: sender.to_owned(),
            receiver: receiver.to_owned(),
            content: content.to_owned(),
            timestamp: OffsetDateTime::now_utc(),
        };

        sqlx::query("INSERT INTO direct_messages (id,sender,receiver,content,timestamp) VALUES (?,?,?,?,?)")
            .bind(message.id.to_string())
            .bind(&message.sender)
            .bind(&message.receiver)
            .bind(&message.content)
            .bind(message.timestamp)
            .execute(&self.db_pool)
            .await?;

        Ok(message)
    }

    /// Both directions between `a` and `b`, oldest first.
    pub async fn history(&self, a: &str, b: &str) -> CoreResult<Vec<DirectMessage>> {
        let rows: Vec<(String, String, String, String, OffsetDateTime)> = sqlx::query_as(
            "SELECT id,sender,receiver,content,timestamp FROM direct_messages
             WHERE (sender=? AND receiver=?) OR (sender=? AND receiver=?)
             ORDER BY timestamp, rowid",
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_all(&self.db_pool)
        .await?;

        rows.into_iter()
            .map(|(id, sender, receiver, content, timestamp)| -> CoreResult<DirectMessage> {
                Ok(DirectMessage {
                    id: Uuid::parse_str(&id).map_err(anyhow::Error::from)?,
                    sender,
                    receiver,
                    content,
                    timestamp,
                })
            })
            .collect()
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/messages/{a}/{b}", get(history))
}

#[debug_handler(state = AppState)]
pub(crate) async fn history(
    Caller(claims): Caller,
    Path((a, b)): Path<(String, String)>,
    State(messages): State<MessageStore>,
) -> AppResult<Json<Vec<DirectMessage>>> {
    if claims.username != a && claims.username != b {
        return Err(CoreError::Forbidden("Access denied"))?;
    }
    Ok(Json(messages.history(&a, &b).await?))
}
