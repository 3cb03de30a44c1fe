//! Video queue ordering and playback authority for watch-party rooms.
//!
//! The `apply_*` functions are the state machine over a loaded [`Room`];
//! [`QueueEngine`] wraps them in the per-room lock and persists the result.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

use super::{QueueEntry, Room, RoomStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Up,
    Down,
}

impl Vote {
    fn delta(self) -> i64 {
        match self {
            Vote::Up => 1,
            Vote::Down => -1,
        }
    }
}

/// Outcome of a queue mutation, ready to be fanned out to the room.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueDelta {
    /// The queue was reordered or shrunk; clients jump to `index`.
    Reordered { queue: Vec<QueueEntry>, index: usize },
    /// Scores moved but the leader stayed; playback position is untouched.
    ScoresUpdated { queue: Vec<QueueEntry> },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerAction {
    Play,
    Pause,
    Seek { time: f64 },
    ChangeVideo { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub is_playing: bool,
    pub current_time: f64,
    pub current_index: usize,
}

impl PlayerState {
    fn of(room: &Room) -> Self {
        PlayerState {
            is_playing: room.is_playing,
            current_time: room.last_sync_time,
            current_index: room.current_video_index,
        }
    }
}

pub fn apply_add_video(room: &mut Room, url: &str, added_by: &str) -> Option<QueueEntry> {
    if !room.kind.has_video_queue() {
        return None;
    }
    let entry = QueueEntry::new(url, added_by);
    room.video_queue.push(entry.clone());
    Some(entry)
}

/// Out-of-range indexes are ignored. After scoring, the queue is
/// stable-sorted by descending score; only a change of the leading URL
/// moves playback back to the top.
pub fn apply_vote(room: &mut Room, index: usize, vote: Vote) -> Option<QueueDelta> {
    if !room.kind.has_video_queue() {
        return None;
    }
    let entry = room.video_queue.get_mut(index)?;
    entry.score += vote.delta();

    let top_before = room.video_queue.first().map(|e| e.url.clone());
    room.video_queue.sort_by(|a, b| b.score.cmp(&a.score));
    let top_after = room.video_queue.first().map(|e| e.url.clone());

    if top_after.is_some() && top_after != top_before {
        room.current_video_index = 0;
        Some(QueueDelta::Reordered { queue: room.video_queue.clone(), index: 0 })
    } else {
        Some(QueueDelta::ScoresUpdated { queue: room.video_queue.clone() })
    }
}

pub fn apply_remove_video(room: &mut Room, index: usize) -> Option<QueueDelta> {
    if !room.kind.has_video_queue() || index >= room.video_queue.len() {
        return None;
    }
    room.video_queue.remove(index);
    if room.current_video_index >= room.video_queue.len() {
        room.current_video_index = 0;
    }
    Some(QueueDelta::Reordered { queue: room.video_queue.clone(), index: room.current_video_index })
}

/// Only the room's creator may drive playback.
pub fn check_host(room: &Room, actor: &str) -> CoreResult<()> {
    if room.created_by != actor {
        return Err(CoreError::Forbidden("Only the host can control the video."));
    }
    Ok(())
}

/// `Ok(None)` means the room type has no host playback and nothing
/// happened.
pub fn apply_control(room: &mut Room, actor: &str, action: PlayerAction) -> CoreResult<Option<PlayerState>> {
    if !room.kind.has_host_playback() {
        return Ok(None);
    }
    check_host(room, actor)?;

    match action {
        PlayerAction::Play => room.is_playing = true,
        PlayerAction::Pause => room.is_playing = false,
        PlayerAction::Seek { time } => room.last_sync_time = time,
        PlayerAction::ChangeVideo { index } => {
            // the index is client supplied; keep the pointer inside the queue
            if index >= room.video_queue.len() {
                return Err(CoreError::IndexOutOfRange { index, len: room.video_queue.len() });
            }
            room.current_video_index = index;
        }
    }

    Ok(Some(PlayerState::of(room)))
}

#[derive(Clone)]
pub struct QueueEngine {
    rooms: RoomStore,
}

impl QueueEngine {
    pub fn new(rooms: RoomStore) -> Self {
        QueueEngine { rooms }
    }

    /// Loads the room under its lock, applies `f`, and saves when `f`
    /// reports a change.
    async fn mutate<T>(
        &self,
        room_id: &str,
        f: impl FnOnce(&mut Room) -> CoreResult<Option<T>>,
    ) -> CoreResult<Option<T>> {
        let _guard = self.rooms.lock(room_id).await;
        let mut room = self.rooms.find_by_id(room_id).await?.ok_or(CoreError::NotFound("Room"))?;

        let outcome = f(&mut room)?;
        if outcome.is_some() {
            self.rooms.save_player_state(&room).await?;
        }
        Ok(outcome)
    }

    pub async fn add_video(&self, room_id: &str, url: &str, added_by: &str) -> CoreResult<Option<QueueEntry>> {
        let entry = self.mutate(room_id, |room| Ok(apply_add_video(room, url, added_by))).await?;
        if entry.is_some() {
            tracing::info!(room = room_id, identity = added_by, url, "Video queued");
        }
        Ok(entry)
    }

    pub async fn vote(&self, room_id: &str, index: usize, vote: Vote) -> CoreResult<Option<QueueDelta>> {
        let delta = self.mutate(room_id, |room| Ok(apply_vote(room, index, vote))).await?;
        if let Some(QueueDelta::Reordered { .. }) = delta {
            tracing::info!(room = room_id, "Queue leader changed");
        }
        Ok(delta)
    }

    pub async fn remove_video(&self, room_id: &str, index: usize) -> CoreResult<Option<QueueDelta>> {
        self.mutate(room_id, |room| Ok(apply_remove_video(room, index))).await
    }

    pub async fn control(&self, room_id: &str, actor: &str, action: PlayerAction) -> CoreResult<Option<PlayerState>> {
        let state = self.mutate(room_id, |room| apply_control(room, actor, action)).await?;
        if state.is_some() {
            tracing::debug!(room = room_id, identity = actor, ?action, "Playback changed");
        }
        Ok(state)
    }
}
