//! Wire shapes of the event channel. Every frame is
//! `{"event": "<name>", "data": <payload>}` in both directions.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use time::OffsetDateTime;

use crate::{
    error::{CoreError, CoreResult},
    rooms::{NewRoom, PlayerAction, PlayerState, QueueEntry, RoomKind, RoomView, Vote},
};

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// An identity given either bare (`"bob"`) or as an object field.
#[derive(Deserialize)]
#[serde(untagged)]
enum NameArg {
    Bare(String),
    Field {
        #[serde(alias = "target", alias = "from", alias = "username")]
        name: String,
    },
}

impl NameArg {
    fn into_name(self) -> String {
        match self {
            NameArg::Bare(name) | NameArg::Field { name } => name.trim().to_owned(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectMessageArgs {
    receiver: String,
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomArgs {
    room_id: String,
    title: String,
    description: Option<String>,
    category: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    is_private: bool,
}

#[derive(Deserialize)]
struct CodeArgs {
    code: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomArgs {
    room_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddVideoArgs {
    room_id: String,
    video_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoteArgs {
    room_id: String,
    video_index: usize,
    vote_type: Vote,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexArgs {
    room_id: String,
    video_index: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ControlArgs {
    room_id: String,
    action: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomMessageArgs {
    room_id: String,
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncArgs {
    room_id: String,
    #[serde(default)]
    current_time: Value,
    #[serde(default)]
    is_playing: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Online,
    SendFriendRequest { target: String },
    AcceptFriendRequest { from: String },
    RejectFriendRequest { from: String },
    SendDirectMessage { receiver: String, content: String },
    CreateRoom(NewRoom),
    JoinRoomByCode { code: String },
    JoinRoom { room_id: String },
    LeaveRoom { room_id: String },
    AddVideo { room_id: String, video_url: String },
    VoteVideo { room_id: String, video_index: usize, vote: Vote },
    RemoveVideoFromQueue { room_id: String, video_index: usize },
    /// The action stays raw until the sender's authority is known.
    VideoPlayerControl { room_id: String, action: String, payload: Value },
    RoomMessage { room_id: String, content: String },
    VideoSync { room_id: String, current_time: Value, is_playing: Value },
}

/// Splits a frame into its event name and raw payload.
pub fn split_frame(frame: &[u8]) -> CoreResult<(String, Value)> {
    let Envelope { event, data } = serde_json::from_slice(frame)
        .map_err(|err| CoreError::validation(format!("malformed frame: {err}")))?;
    Ok((event, data))
}

fn args<T: DeserializeOwned>(event: &str, data: Value) -> CoreResult<T> {
    serde_json::from_value(data).map_err(|err| CoreError::validation(format!("{event}: {err}")))
}

fn required(field: &str, value: String) -> CoreResult<String> {
    let value = value.trim().to_owned();
    if value.is_empty() {
        return Err(CoreError::validation(format!("{field} is required")));
    }
    Ok(value)
}

/// Reads a player action and its payload. `Ok(None)` is an action name
/// nobody handles; a known action with a bad payload is a validation error.
pub fn player_action(action: &str, payload: &Value) -> CoreResult<Option<PlayerAction>> {
    let number = |key: &str| payload.get(key).and_then(Value::as_f64);
    let action = match action {
        "PLAY" => PlayerAction::Play,
        "PAUSE" => PlayerAction::Pause,
        "SEEK" => number("time")
            .filter(|time| time.is_finite() && *time >= 0.0)
            .map(|time| PlayerAction::Seek { time })
            .ok_or_else(|| CoreError::validation("SEEK needs a time"))?,
        "CHANGE_VIDEO" => payload
            .get("index")
            .and_then(Value::as_u64)
            .map(|index| PlayerAction::ChangeVideo { index: index as usize })
            .ok_or_else(|| CoreError::validation("CHANGE_VIDEO needs an index"))?,
        _ => return Ok(None),
    };
    Ok(Some(action))
}

impl ClientEvent {
    /// Parses one text frame. Anything malformed is a validation error.
    pub fn parse(frame: &[u8]) -> CoreResult<ClientEvent> {
        let (event, data) = split_frame(frame)?;
        ClientEvent::from_parts(&event, data)
    }

    pub fn from_parts(event: &str, data: Value) -> CoreResult<ClientEvent> {
        use ClientEvent::*;

        Ok(match event {
            "online" => Online,
            "sendFriendRequest" => SendFriendRequest { target: args::<NameArg>(event, data)?.into_name() },
            "acceptFriendRequest" => AcceptFriendRequest { from: required("from", args::<NameArg>(event, data)?.into_name())? },
            "rejectFriendRequest" => RejectFriendRequest { from: required("from", args::<NameArg>(event, data)?.into_name())? },
            "sendDirectMessage" => {
                let DirectMessageArgs { receiver, content } = args(event, data)?;
                SendDirectMessage { receiver: required("receiver", receiver)?, content: required("content", content)? }
            }
            "createRoom" => {
                let CreateRoomArgs { room_id, title, description, category, kind, is_private } = args(event, data)?;
                CreateRoom(NewRoom {
                    id: required("roomId", room_id)?,
                    title: required("title", title)?,
                    description: description.filter(|d| !d.trim().is_empty()),
                    category: category.filter(|c| !c.trim().is_empty()),
                    kind: RoomKind::from(required("type", kind)?),
                    is_private,
                })
            }
            "joinRoomByCode" => JoinRoomByCode { code: required("code", args::<CodeArgs>(event, data)?.code)? },
            "joinRoom" => JoinRoom { room_id: required("roomId", args::<RoomArgs>(event, data)?.room_id)? },
            "leaveRoom" => LeaveRoom { room_id: required("roomId", args::<RoomArgs>(event, data)?.room_id)? },
            "addVideo" => {
                let AddVideoArgs { room_id, video_url } = args(event, data)?;
                AddVideo { room_id: required("roomId", room_id)?, video_url: required("videoUrl", video_url)? }
            }
            "voteVideo" => {
                let VoteArgs { room_id, video_index, vote_type } = args(event, data)?;
                VoteVideo { room_id: required("roomId", room_id)?, video_index, vote: vote_type }
            }
            "removeVideoFromQueue" => {
                let IndexArgs { room_id, video_index } = args(event, data)?;
                RemoveVideoFromQueue { room_id: required("roomId", room_id)?, video_index }
            }
            "videoPlayerControl" => {
                let ControlArgs { room_id, action, payload } = args(event, data)?;
                VideoPlayerControl { room_id: required("roomId", room_id)?, action, payload }
            }
            "roomMessage" => {
                let RoomMessageArgs { room_id, content } = args(event, data)?;
                RoomMessage { room_id: required("roomId", room_id)?, content: required("content", content)? }
            }
            "videoSync" => {
                let SyncArgs { room_id, current_time, is_playing } = args(event, data)?;
                VideoSync { room_id: required("roomId", room_id)?, current_time, is_playing }
            }
            other => return Err(CoreError::validation(format!("unknown event {other}"))),
        })
    }

    pub fn name(&self) -> &'static str {
        use ClientEvent::*;
        match self {
            Online => "online",
            SendFriendRequest { .. } => "sendFriendRequest",
            AcceptFriendRequest { .. } => "acceptFriendRequest",
            RejectFriendRequest { .. } => "rejectFriendRequest",
            SendDirectMessage { .. } => "sendDirectMessage",
            CreateRoom(_) => "createRoom",
            JoinRoomByCode { .. } => "joinRoomByCode",
            JoinRoom { .. } => "joinRoom",
            LeaveRoom { .. } => "leaveRoom",
            AddVideo { .. } => "addVideo",
            VoteVideo { .. } => "voteVideo",
            RemoveVideoFromQueue { .. } => "removeVideoFromQueue",
            VideoPlayerControl { .. } => "videoPlayerControl",
            RoomMessage { .. } => "roomMessage",
            VideoSync { .. } => "videoSync",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub message: String,
}

impl Notice {
    pub fn new(message: impl Into<String>) -> Self {
        Notice { message: message.into() }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    FriendOnline(String),
    FriendOffline(String),
    FriendRequest(String),
    FriendRequestAccepted(String),
    #[serde(rename = "friend_request_success")]
    FriendRequestSuccess(Notice),
    #[serde(rename = "friend_request_error")]
    FriendRequestError(Notice),
    DirectMessage {
        sender: String,
        content: String,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
    MessageSent { receiver: String, content: String },
    RoomCreated(RoomView),
    PrivateRoomCode { code: String },
    CreateRoomError(Notice),
    RoomJoined(RoomView),
    JoinRoomByCodeError(Notice),
    JoinRoomError(Notice),
    UserJoined { username: String, room_id: String },
    UserLeft { username: String, room_id: String },
    RoomUpdated(RoomView),
    VideoAdded(QueueEntry),
    VideoVoted { new_queue: Vec<QueueEntry> },
    ChangeVideo { new_queue: Vec<QueueEntry>, new_index: usize },
    #[serde(rename = "control_error")]
    ControlError(Notice),
    VideoPlayerStateChanged { action: String, payload: Value, new_state: PlayerState },
    RoomMessage {
        username: String,
        content: String,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
    VideoSync { username: String, current_time: Value, is_playing: Value },
}
