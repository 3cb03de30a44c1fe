use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// What a room can do. Only "Watch Together" rooms carry a video queue and
/// host-controlled playback; any other type string is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RoomKind {
    WatchTogether,
    Other(String),
}

impl RoomKind {
    pub const WATCH_TOGETHER: &'static str = "Watch Together";

    pub fn as_str(&self) -> &str {
        match self {
            RoomKind::WatchTogether => Self::WATCH_TOGETHER,
            RoomKind::Other(name) => name,
        }
    }

    pub fn has_video_queue(&self) -> bool {
        matches!(self, RoomKind::WatchTogether)
    }

    pub fn has_host_playback(&self) -> bool {
        matches!(self, RoomKind::WatchTogether)
    }
}

impl From<String> for RoomKind {
    fn from(name: String) -> Self {
        if name == Self::WATCH_TOGETHER { RoomKind::WatchTogether } else { RoomKind::Other(name) }
    }
}

impl From<RoomKind> for String {
    fn from(kind: RoomKind) -> Self {
        kind.as_str().to_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub url: String,
    pub score: i64,
    pub added_by: String,
}

impl QueueEntry {
    pub fn new(url: impl Into<String>, added_by: impl Into<String>) -> Self {
        QueueEntry { url: url.into(), score: 0, added_by: added_by.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    #[serde(rename = "type")]
    pub kind: RoomKind,
    pub is_private: bool,
    // present iff is_private
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub created_by: String,
    pub participants: Vec<String>,
    pub video_queue: Vec<QueueEntry>,
    pub current_video_index: usize,
    pub is_playing: bool,
    pub last_sync_time: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Room {
    pub fn is_active(&self) -> bool {
        !self.participants.is_empty()
    }

    /// Snapshot with the derived `isActive` field, as sent to clients.
    pub fn view(&self) -> RoomView {
        RoomView { is_active: self.is_active(), room: self.clone() }
    }

    /// Snapshot safe to broadcast to every connection: the join code is
    /// only ever handed to members.
    pub fn public_view(&self) -> RoomView {
        let mut room = self.clone();
        room.code = None;
        RoomView { is_active: room.is_active(), room }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    #[serde(flatten)]
    pub room: Room,
    pub is_active: bool,
}

/// Fields a client supplies when creating a room.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRoom {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub kind: RoomKind,
    pub is_private: bool,
}
