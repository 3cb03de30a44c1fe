use serde_json::Value;
use time::OffsetDateTime;

use super::{protocol, ClientEvent, ConnectionState, Notice, Outbox, ServerEvent};
use crate::{
    auth::Claims,
    error::{CoreError, CoreResult, ErrorKind},
    presence::ConnectionId,
    rooms::{queue, NewRoom, QueueDelta, Vote},
    AppState,
};

/// One live connection as the router sees it.
#[derive(Debug)]
pub struct Session {
    pub connection: ConnectionId,
    pub identity: String,
    state: ConnectionState,
}

impl Session {
    pub fn state(&self) -> ConnectionState {
        self.state
    }
}

/// Which error event, if any, answers a failed inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    FriendRequest,
    CreateRoom,
    JoinRoom,
    JoinRoomByCode,
    Control,
    Silent,
}

impl Reply {
    fn for_event(name: &str) -> Reply {
        match name {
            "sendFriendRequest" => Reply::FriendRequest,
            "createRoom" => Reply::CreateRoom,
            "joinRoom" => Reply::JoinRoom,
            "joinRoomByCode" => Reply::JoinRoomByCode,
            "videoPlayerControl" => Reply::Control,
            _ => Reply::Silent,
        }
    }

    fn failure(self, err: &CoreError) -> Option<ServerEvent> {
        let unexpected = err.kind() == ErrorKind::Unexpected;
        let message = |generic: &str| if unexpected { generic.to_owned() } else { err.to_string() };

        let event = match self {
            Reply::Silent => return None,
            Reply::FriendRequest => ServerEvent::FriendRequestError(Notice::new(message("An error occurred."))),
            Reply::CreateRoom => ServerEvent::CreateRoomError(Notice::new(message("Failed to create room."))),
            Reply::JoinRoom => ServerEvent::JoinRoomError(Notice::new(match err {
                CoreError::NotFound(_) => "Room not found. Please check the room ID and try again.".to_owned(),
                _ => message("Failed to join room. Please try again."),
            })),
            Reply::JoinRoomByCode => ServerEvent::JoinRoomByCodeError(Notice::new(match err {
                CoreError::NotFound(_) => "Invalid or expired room code.".to_owned(),
                _ => message("Failed to join room."),
            })),
            Reply::Control => ServerEvent::ControlError(Notice::new(message("Failed to control the video."))),
        };
        Some(event)
    }
}

/// Translates inbound events into engine calls and engine results into
/// outbound events. The only place where results become wire errors.
#[derive(Clone)]
pub struct EventRouter {
    state: AppState,
}

impl EventRouter {
    pub fn new(state: AppState) -> Self {
        EventRouter { state }
    }

    /// Handshake check. A missing or bad credential rejects the attempt.
    pub fn authenticate(&self, credential: Option<&str>) -> CoreResult<Claims> {
        let outcome = credential
            .ok_or(CoreError::InvalidCredential)
            .and_then(|token| self.state.verifier.verify(token));
        match &outcome {
            Ok(claims) => tracing::debug!(identity = %claims.username, state = ?ConnectionState::Authenticated, "Handshake"),
            Err(_) => tracing::warn!(state = ?ConnectionState::Rejected, "Handshake rejected"),
        }
        outcome
    }

    /// Registers a connection for an authenticated identity and binds it.
    pub fn connect(&self, identity: &str) -> (Session, Outbox) {
        let connection = ConnectionId::new();
        let outbox = self.state.hub.register(connection);
        self.state.presence.bind(connection, identity);
        tracing::info!(%connection, identity, "Connected");

        let session = Session { connection, identity: identity.to_owned(), state: ConnectionState::Bound };
        (session, outbox)
    }

    /// Parses and dispatches one raw frame. Malformed request-style events
    /// are answered with their error event; the rest are dropped.
    pub async fn handle_frame(&self, session: &Session, frame: &[u8]) {
        let (name, data) = match protocol::split_frame(frame) {
            Ok(parts) => parts,
            Err(err) => {
                tracing::debug!(connection = %session.connection, error = %err, "Dropped frame");
                return;
            }
        };

        match ClientEvent::from_parts(&name, data) {
            Ok(event) => self.handle(session, event).await,
            Err(err) => self.fail(session, &name, err),
        }
    }

    pub async fn handle(&self, session: &Session, event: ClientEvent) {
        let name = event.name();
        let me = session.identity.as_str();

        let outcome = match event {
            ClientEvent::Online => self.online(me).await,
            ClientEvent::SendFriendRequest { target } => self.send_friend_request(session, &target).await,
            ClientEvent::AcceptFriendRequest { from } => self.accept_friend_request(session, &from).await,
            ClientEvent::RejectFriendRequest { from } => self.state.social.reject_request(me, &from).await.map(drop),
            ClientEvent::SendDirectMessage { receiver, content } => {
                self.send_direct_message(session, &receiver, &content).await
            }
            ClientEvent::CreateRoom(new) => self.create_room(session, new).await,
            ClientEvent::JoinRoomByCode { code } => self.join_room_by_code(session, &code).await,
            ClientEvent::JoinRoom { room_id } => self.join_room(session, &room_id).await,
            ClientEvent::LeaveRoom { room_id } => self.leave_room(session, &room_id).await,
            ClientEvent::AddVideo { room_id, video_url } => self.add_video(me, &room_id, &video_url).await,
            ClientEvent::VoteVideo { room_id, video_index, vote } => self.vote_video(&room_id, video_index, vote).await,
            ClientEvent::RemoveVideoFromQueue { room_id, video_index } => {
                self.remove_video(&room_id, video_index).await
            }
            ClientEvent::VideoPlayerControl { room_id, action, payload } => {
                self.control(session, &room_id, action, payload).await
            }
            ClientEvent::RoomMessage { room_id, content } => {
                let event = ServerEvent::RoomMessage {
                    username: me.to_owned(),
                    content,
                    timestamp: OffsetDateTime::now_utc(),
                };
                self.state.hub.send_to_room(&room_id, event, None);
                Ok(())
            }
            ClientEvent::VideoSync { room_id, current_time, is_playing } => {
                let event = ServerEvent::VideoSync { username: me.to_owned(), current_time, is_playing };
                self.state.hub.send_to_room(&room_id, event, Some(session.connection));
                Ok(())
            }
        };

        if let Err(err) = outcome {
            self.fail(session, name, err);
        }
    }

    fn fail(&self, session: &Session, name: &str, err: CoreError) {
        if err.kind() == ErrorKind::Unexpected {
            tracing::error!(connection = %session.connection, event = name, error = %err, "Event failed");
        } else {
            tracing::debug!(connection = %session.connection, event = name, error = %err, "Event refused");
        }

        if let Some(reply) = Reply::for_event(name).failure(&err) {
            self.state.hub.send(session.connection, reply);
        }
    }

    /// Unbinds the connection, pulls the identity out of every room it sat
    /// in and tells online friends it left.
    pub async fn disconnect(&self, mut session: Session) {
        let connection = session.connection;
        let me = session.identity.as_str();

        self.state.presence.unbind(connection);
        self.state.hub.remove(connection);

        if let Err(err) = self.leave_all_rooms(me).await {
            tracing::error!(%connection, identity = me, error = %err, "Failed to clear room membership");
        }

        match self.state.social.go_offline(me).await {
            Ok(targets) => self.state.hub.send_all(targets, ServerEvent::FriendOffline(me.to_owned())),
            Err(err) => tracing::error!(%connection, identity = me, error = %err, "Failed to announce offline"),
        }

        session.state = ConnectionState::Disconnected;
        tracing::info!(%connection, identity = me, state = ?session.state, "Disconnected");
    }

    async fn leave_all_rooms(&self, me: &str) -> CoreResult<()> {
        for room_id in self.state.rooms.rooms_with_participant(me).await? {
            if let Some(room) = self.state.rooms.remove_participant(&room_id, me).await? {
                self.state.hub.broadcast(ServerEvent::RoomUpdated(room.public_view()));
            }
        }
        Ok(())
    }

    async fn online(&self, me: &str) -> CoreResult<()> {
        let targets = self.state.social.go_online(me).await?;
        self.state.hub.send_all(targets, ServerEvent::FriendOnline(me.to_owned()));
        Ok(())
    }

    async fn send_friend_request(&self, session: &Session, target: &str) -> CoreResult<()> {
        let me = session.identity.as_str();
        self.state.social.send_request(me, target).await?;

        if let Some(connection) = self.state.presence.connection_for(target) {
            self.state.hub.send(connection, ServerEvent::FriendRequest(me.to_owned()));
        }
        let notice = Notice::new(format!("Friend request sent to {target}."));
        self.state.hub.send(session.connection, ServerEvent::FriendRequestSuccess(notice));
        Ok(())
    }

    async fn accept_friend_request(&self, session: &Session, from: &str) -> CoreResult<()> {
        let me = session.identity.as_str();
        if !self.state.social.accept_request(me, from).await? {
            return Ok(());
        }

        if let Some(connection) = self.state.presence.connection_for(from) {
            self.state.hub.send(connection, ServerEvent::FriendRequestAccepted(me.to_owned()));
        }
        self.state.hub.send(session.connection, ServerEvent::FriendRequestAccepted(from.to_owned()));
        Ok(())
    }

    async fn send_direct_message(&self, session: &Session, receiver: &str, content: &str) -> CoreResult<()> {
        let message = self.state.messages.send(&session.identity, receiver, content).await?;

        if let Some(connection) = self.state.presence.connection_for(receiver) {
            let event = ServerEvent::DirectMessage {
                sender: message.sender.clone(),
                content: message.content.clone(),
                timestamp: message.timestamp,
            };
            self.state.hub.send(connection, event);
        }
        let event = ServerEvent::MessageSent { receiver: message.receiver, content: message.content };
        self.state.hub.send(session.connection, event);
        Ok(())
    }

    async fn create_room(&self, session: &Session, new: NewRoom) -> CoreResult<()> {
        let room = self.state.rooms.create(new, &session.identity).await?;
        self.state.hub.join(&room.id, session.connection);

        self.state.hub.send(session.connection, ServerEvent::RoomCreated(room.view()));
        if let Some(code) = room.code.clone() {
            self.state.hub.send(session.connection, ServerEvent::PrivateRoomCode { code });
        }
        Ok(())
    }

    async fn join_room_by_code(&self, session: &Session, code: &str) -> CoreResult<()> {
        let room = self.state.rooms.find_by_code(code).await?.ok_or(CoreError::NotFound("Room code"))?;
        self.join_room(session, &room.id).await
    }

    async fn join_room(&self, session: &Session, room_id: &str) -> CoreResult<()> {
        let me = session.identity.as_str();
        let room = self.state.rooms.add_participant(room_id, me).await?;
        self.state.hub.join(&room.id, session.connection);

        let joined = ServerEvent::UserJoined { username: me.to_owned(), room_id: room.id.clone() };
        self.state.hub.send_to_room(&room.id, joined, Some(session.connection));
        self.state.hub.send(session.connection, ServerEvent::RoomJoined(room.view()));
        self.state.hub.broadcast(ServerEvent::RoomUpdated(room.public_view()));
        tracing::info!(room = %room.id, identity = me, "Joined room");
        Ok(())
    }

    async fn leave_room(&self, session: &Session, room_id: &str) -> CoreResult<()> {
        let me = session.identity.as_str();
        self.state.hub.leave(room_id, session.connection);

        if let Some(room) = self.state.rooms.remove_participant(room_id, me).await? {
            self.state.hub.broadcast(ServerEvent::RoomUpdated(room.public_view()));
        }
        let left = ServerEvent::UserLeft { username: me.to_owned(), room_id: room_id.to_owned() };
        self.state.hub.send_to_room(room_id, left, None);
        Ok(())
    }

    async fn add_video(&self, me: &str, room_id: &str, url: &str) -> CoreResult<()> {
        if let Some(entry) = self.state.queue.add_video(room_id, url, me).await? {
            self.state.hub.send_to_room(room_id, ServerEvent::VideoAdded(entry), None);
        }
        Ok(())
    }

    async fn vote_video(&self, room_id: &str, index: usize, vote: Vote) -> CoreResult<()> {
        if let Some(delta) = self.state.queue.vote(room_id, index, vote).await? {
            self.state.hub.send_to_room(room_id, queue_event(delta), None);
        }
        Ok(())
    }

    async fn remove_video(&self, room_id: &str, index: usize) -> CoreResult<()> {
        if let Some(delta) = self.state.queue.remove_video(room_id, index).await? {
            self.state.hub.send_to_room(room_id, queue_event(delta), None);
        }
        Ok(())
    }

    /// Authority is settled before the payload is read, so a non-host always
    /// hears about authority. Missing rooms and unknown actions are dropped.
    async fn control(&self, session: &Session, room_id: &str, action_name: String, payload: Value) -> CoreResult<()> {
        let Some(room) = self.state.rooms.find_by_id(room_id).await? else {
            tracing::debug!(connection = %session.connection, room = room_id, "Control for unknown room dropped");
            return Ok(());
        };
        if !room.kind.has_host_playback() {
            return Ok(());
        }
        queue::check_host(&room, &session.identity)?;

        let Some(action) = protocol::player_action(&action_name, &payload)? else {
            tracing::debug!(connection = %session.connection, action = %action_name, "Unknown player action dropped");
            return Ok(());
        };

        if let Some(new_state) = self.state.queue.control(room_id, &session.identity, action).await? {
            let event = ServerEvent::VideoPlayerStateChanged { action: action_name, payload, new_state };
            self.state.hub.send_to_room(room_id, event, Some(session.connection));
        }
        Ok(())
    }
}

fn queue_event(delta: QueueDelta) -> ServerEvent {
    match delta {
        QueueDelta::Reordered { queue, index } => ServerEvent::ChangeVideo { new_queue: queue, new_index: index },
        QueueDelta::ScoresUpdated { queue } => ServerEvent::VideoVoted { new_queue: queue },
    }
}
