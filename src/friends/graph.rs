use std::sync::Arc;

use serde::Serialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::{
    error::{CoreError, CoreResult},
    locks::KeyedLocks,
    presence::{ConnectionId, Presence},
    profiles::UserStore,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Friend {
    pub username: String,
    pub profile_pic: String,
    pub is_online: bool,
}

/// Friend-request lifecycle and presence fan-out targets.
///
/// Friendship is stored as two directed rows so either side can list its
/// friends with one lookup. A pending request is a single row keyed by
/// (receiver, sender).
#[derive(Clone)]
pub struct SocialGraph {
    db_pool: SqlitePool,
    users: UserStore,
    presence: Arc<dyn Presence>,
    locks: KeyedLocks,
}

impl SocialGraph {
    pub fn new(db_pool: SqlitePool, presence: Arc<dyn Presence>) -> Self {
        SocialGraph { users: UserStore::new(db_pool.clone()), db_pool, presence, locks: KeyedLocks::new() }
    }

    pub async fn are_friends(&self, a: &str, b: &str) -> CoreResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM friendships WHERE username=? AND friend=?")
            .bind(a)
            .bind(b)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(row.is_some())
    }

    async fn has_request(&self, receiver: &str, sender: &str) -> CoreResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM friend_requests WHERE receiver=? AND sender=?")
            .bind(receiver)
            .bind(sender)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn send_request(&self, from: &str, to: &str) -> CoreResult<()> {
        if to.is_empty() || to == from {
            return Err(CoreError::validation("Invalid username."));
        }
        if !self.users.exists(to).await? {
            return Err(CoreError::NotFound("User"));
        }

        let _guard = self.locks.lock(to).await;
        if self.are_friends(to, from).await? {
            return Err(CoreError::AlreadyFriends);
        }
        if self.has_request(to, from).await? {
            return Err(CoreError::AlreadyRequested);
        }

        sqlx::query("INSERT INTO friend_requests (receiver,sender,created_at) VALUES (?,?,?)")
            .bind(to)
            .bind(from)
            .bind(OffsetDateTime::now_utc())
            .execute(&self.db_pool)
            .await?;

        tracing::info!(from, to, "Friend request sent");
        Ok(())
    }

    /// Returns `false` when there was no pending request from `from`.
    pub async fn accept_request(&self, me: &str, from: &str) -> CoreResult<bool> {
        let _guards = self.locks.lock_pair(me, from).await;
        if !self.has_request(me, from).await? || !self.users.exists(from).await? {
            return Ok(false);
        }

        let mut tx = self.db_pool.begin().await?;
        for (a, b) in [(me, from), (from, me)] {
            sqlx::query("INSERT OR IGNORE INTO friendships (username,friend) VALUES (?,?)")
                .bind(a)
                .bind(b)
                .execute(&mut *tx)
                .await?;
        }
        // a crossed request in the other direction is settled too
        sqlx::query("DELETE FROM friend_requests WHERE (receiver=? AND sender=?) OR (receiver=? AND sender=?)")
            .bind(me)
            .bind(from)
            .bind(from)
            .bind(me)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(identity = me, friend = from, "Friend request accepted");
        Ok(true)
    }

    /// Drops the pending entry if present. Nobody is told.
    pub async fn reject_request(&self, me: &str, from: &str) -> CoreResult<bool> {
        let _guard = self.locks.lock(me).await;
        let removed = sqlx::query("DELETE FROM friend_requests WHERE receiver=? AND sender=?")
            .bind(me)
            .bind(from)
            .execute(&self.db_pool)
            .await?
            .rows_affected();
        Ok(removed > 0)
    }

    pub async fn friends_of(&self, identity: &str) -> CoreResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT friend FROM friendships WHERE username=? ORDER BY friend")
            .bind(identity)
            .fetch_all(&self.db_pool)
            .await?;
        Ok(rows.into_iter().map(|(friend,)| friend).collect())
    }

    pub async fn pending_requests(&self, identity: &str) -> CoreResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT sender FROM friend_requests WHERE receiver=? ORDER BY created_at, rowid")
            .bind(identity)
            .fetch_all(&self.db_pool)
            .await?;
        Ok(rows.into_iter().map(|(sender,)| sender).collect())
    }

    /// Friends with their profile picture and live presence.
    pub async fn friend_list(&self, identity: &str) -> CoreResult<Vec<Friend>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT u.username,u.profile_pic FROM friendships f JOIN users u ON u.username=f.friend
             WHERE f.username=? ORDER BY u.username",
        )
        .bind(identity)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(username, profile_pic)| Friend {
                is_online: self.presence.is_online(&username),
                username,
                profile_pic,
            })
            .collect())
    }

    /// Connections of the identity's friends that are bound right now.
    pub async fn online_friends(&self, identity: &str) -> CoreResult<Vec<ConnectionId>> {
        let friends = self.friends_of(identity).await?;
        Ok(friends.iter().filter_map(|friend| self.presence.connection_for(friend)).collect())
    }

    /// Where a friend-online notice for `identity` must go.
    pub async fn go_online(&self, identity: &str) -> CoreResult<Vec<ConnectionId>> {
        let targets = self.online_friends(identity).await?;
        tracing::debug!(identity, notified = targets.len(), "Online");
        Ok(targets)
    }

    /// Where a friend-offline notice for `identity` must go.
    pub async fn go_offline(&self, identity: &str) -> CoreResult<Vec<ConnectionId>> {
        let targets = self.online_friends(identity).await?;
        tracing::debug!(identity, notified = targets.len(), "Offline");
        Ok(targets)
    }
}
