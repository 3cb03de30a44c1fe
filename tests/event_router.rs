use serde_json::{json, Value};
use watchroom::{
    config::Config,
    db,
    error::CoreError,
    events::{ClientEvent, ConnectionState, EventRouter, Outbox, Session},
    rooms::{NewRoom, RoomKind, Vote},
    AppState,
};

async fn setup(users: &[&str]) -> (AppState, EventRouter) {
    let db_pool = db::connect("sqlite::memory:", 1).await.unwrap();
    let config = Config { password_iterations: 1_000, ..Config::default() };
    let state = AppState::new(config, db_pool);
    for name in users {
        state.users.create(name, &format!("{name}@example.com"), "x").await.unwrap();
    }
    let router = state.event_router();
    (state, router)
}

fn drain(outbox: &mut Outbox) -> Vec<Value> {
    let mut events = Vec::new();
    while let Ok(event) = outbox.try_recv() {
        events.push(serde_json::to_value(&*event).unwrap());
    }
    events
}

fn names(events: &[Value]) -> Vec<&str> {
    events.iter().filter_map(|e| e["event"].as_str()).collect()
}

fn find<'a>(events: &'a [Value], name: &str) -> Option<&'a Value> {
    events.iter().find(|e| e["event"] == json!(name)).map(|e| &e["data"])
}

fn new_room(id: &str, is_private: bool) -> ClientEvent {
    ClientEvent::CreateRoom(NewRoom {
        id: id.into(),
        title: "Movie Night".into(),
        description: None,
        category: None,
        kind: RoomKind::WatchTogether,
        is_private,
    })
}

fn add_video(room_id: &str, url: &str) -> ClientEvent {
    ClientEvent::AddVideo { room_id: room_id.into(), video_url: url.into() }
}

fn control(room_id: &str, action: &str, payload: Value) -> ClientEvent {
    ClientEvent::VideoPlayerControl { room_id: room_id.into(), action: action.into(), payload }
}

/// alice hosts room `r1`, bob has joined it; both outboxes are drained.
async fn hosted_room(router: &EventRouter) -> ((Session, Outbox), (Session, Outbox)) {
    let (alice, mut alice_rx) = router.connect("alice");
    let (bob, mut bob_rx) = router.connect("bob");
    router.handle(&alice, new_room("r1", false)).await;
    router.handle(&bob, ClientEvent::JoinRoom { room_id: "r1".into() }).await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);
    ((alice, alice_rx), (bob, bob_rx))
}

#[tokio::test]
async fn handshake_needs_a_valid_token() {
    let (state, router) = setup(&["alice"]).await;

    assert!(matches!(router.authenticate(None), Err(CoreError::InvalidCredential)));
    assert!(matches!(router.authenticate(Some("garbage")), Err(CoreError::InvalidCredential)));

    let token = state.verifier.issue("alice", "alice@example.com").unwrap();
    assert_eq!(router.authenticate(Some(token.as_str())).unwrap().username, "alice");

    let (session, _rx) = router.connect("alice");
    assert_eq!(session.state(), ConnectionState::Bound);
    assert!(state.presence.is_online("alice"));
}

#[tokio::test]
async fn non_host_cannot_control_playback() {
    let (state, router) = setup(&[]).await;
    let ((_alice, mut alice_rx), (bob, mut bob_rx)) = hosted_room(&router).await;

    router.handle(&bob, control("r1", "PLAY", Value::Null)).await;

    let events = drain(&mut bob_rx);
    assert_eq!(names(&events), ["control_error"]);
    assert_eq!(find(&events, "control_error").unwrap()["message"], "Only the host can control the video.");
    assert!(drain(&mut alice_rx).is_empty());

    let room = state.rooms.find_by_id("r1").await.unwrap().unwrap();
    assert!(!room.is_playing);
}

#[tokio::test]
async fn host_control_reaches_everyone_but_the_host() {
    let (state, router) = setup(&[]).await;
    let ((alice, mut alice_rx), (_bob, mut bob_rx)) = hosted_room(&router).await;

    router.handle(&alice, control("r1", "SEEK", json!({ "time": 42.0 }))).await;

    assert!(drain(&mut alice_rx).is_empty());
    let events = drain(&mut bob_rx);
    let changed = find(&events, "videoPlayerStateChanged").unwrap();
    assert_eq!(changed["action"], "SEEK");
    assert_eq!(changed["payload"], json!({ "time": 42.0 }));
    assert_eq!(changed["newState"]["currentTime"], json!(42.0));

    assert_eq!(state.rooms.find_by_id("r1").await.unwrap().unwrap().last_sync_time, 42.0);
}

#[tokio::test]
async fn change_video_out_of_range_is_refused() {
    let (_state, router) = setup(&[]).await;
    let ((alice, mut alice_rx), _) = hosted_room(&router).await;

    router.handle(&alice, control("r1", "CHANGE_VIDEO", json!({ "index": 3 }))).await;

    assert_eq!(names(&drain(&mut alice_rx)), ["control_error"]);
}

#[tokio::test]
async fn unknown_player_actions_are_dropped() {
    let (state, router) = setup(&[]).await;
    let ((alice, mut alice_rx), (_bob, mut bob_rx)) = hosted_room(&router).await;

    router
        .handle_frame(&alice, br#"{"event":"videoPlayerControl","data":{"roomId":"r1","action":"REWIND"}}"#)
        .await;

    assert!(drain(&mut alice_rx).is_empty());
    assert!(drain(&mut bob_rx).is_empty());
    assert!(!state.rooms.find_by_id("r1").await.unwrap().unwrap().is_playing);
}

#[tokio::test]
async fn authority_is_checked_before_the_payload() {
    let (_state, router) = setup(&[]).await;
    let ((alice, mut alice_rx), (bob, mut bob_rx)) = hosted_room(&router).await;

    router.handle(&bob, control("r1", "SEEK", json!({}))).await;
    let events = drain(&mut bob_rx);
    assert_eq!(find(&events, "control_error").unwrap()["message"], "Only the host can control the video.");

    // the host with a bad payload is told what was wrong
    router.handle(&alice, control("r1", "SEEK", json!({}))).await;
    let events = drain(&mut alice_rx);
    assert_eq!(find(&events, "control_error").unwrap()["message"], "SEEK needs a time");
}

#[tokio::test]
async fn control_for_a_missing_room_is_dropped() {
    let (_state, router) = setup(&[]).await;
    let (alice, mut alice_rx) = router.connect("alice");

    router.handle(&alice, control("nope", "PLAY", Value::Null)).await;

    assert!(drain(&mut alice_rx).is_empty());
}

#[tokio::test]
async fn private_rooms_keep_their_code_through_every_mutation() {
    let (state, router) = setup(&[]).await;
    let (alice, _alice_rx) = router.connect("alice");
    let (bob, _bob_rx) = router.connect("bob");
    router.handle(&alice, new_room("p1", true)).await;

    let steps = [
        (&bob, ClientEvent::JoinRoom { room_id: "p1".into() }),
        (&alice, add_video("p1", "A")),
        (&bob, add_video("p1", "B")),
        (&bob, ClientEvent::VoteVideo { room_id: "p1".into(), video_index: 1, vote: Vote::Up }),
        (&alice, control("p1", "PLAY", Value::Null)),
        (&alice, control("p1", "CHANGE_VIDEO", json!({ "index": 1 }))),
        (&bob, ClientEvent::RemoveVideoFromQueue { room_id: "p1".into(), video_index: 0 }),
        (&bob, ClientEvent::LeaveRoom { room_id: "p1".into() }),
    ];

    let code = state.rooms.find_by_id("p1").await.unwrap().unwrap().code;
    assert!(code.is_some());
    for (session, event) in steps {
        let name = event.name();
        router.handle(session, event).await;
        let room = state.rooms.find_by_id("p1").await.unwrap().unwrap();
        assert_eq!(room.is_private, room.code.is_some(), "after {name}");
        assert_eq!(room.code, code, "after {name}");
    }

    let room = state.rooms.find_by_id("p1").await.unwrap().unwrap();
    assert!(room.current_video_index < room.video_queue.len().max(1));
}

#[tokio::test]
async fn vote_that_changes_the_leader_resets_playback() {
    let (state, router) = setup(&[]).await;
    let ((alice, mut alice_rx), (bob, mut bob_rx)) = hosted_room(&router).await;
    router.handle(&alice, add_video("r1", "A")).await;
    router.handle(&alice, add_video("r1", "B")).await;
    assert_eq!(names(&drain(&mut bob_rx)), ["videoAdded", "videoAdded"]);
    drain(&mut alice_rx);

    router.handle(&bob, ClientEvent::VoteVideo { room_id: "r1".into(), video_index: 1, vote: Vote::Up }).await;

    let events = drain(&mut alice_rx);
    let change = find(&events, "changeVideo").unwrap();
    assert_eq!(change["newIndex"], json!(0));
    assert_eq!(change["newQueue"][0]["url"], "B");
    assert_eq!(change["newQueue"][0]["score"], json!(1));
    assert_eq!(names(&drain(&mut bob_rx)), ["changeVideo"]);

    let room = state.rooms.find_by_id("r1").await.unwrap().unwrap();
    assert_eq!(room.video_queue[0].url, "B");
}

#[tokio::test]
async fn vote_that_keeps_the_leader_keeps_playback() {
    let (state, router) = setup(&[]).await;
    let ((alice, mut alice_rx), (bob, _bob_rx)) = hosted_room(&router).await;
    router.handle(&alice, add_video("r1", "A")).await;
    router.handle(&alice, add_video("r1", "B")).await;
    router.handle(&alice, control("r1", "CHANGE_VIDEO", json!({ "index": 1 }))).await;
    drain(&mut alice_rx);

    router.handle(&bob, ClientEvent::VoteVideo { room_id: "r1".into(), video_index: 0, vote: Vote::Up }).await;

    let events = drain(&mut alice_rx);
    assert_eq!(names(&events), ["videoVoted"]);
    assert_eq!(find(&events, "videoVoted").unwrap()["newQueue"][0]["score"], json!(1));

    let room = state.rooms.find_by_id("r1").await.unwrap().unwrap();
    assert_eq!(room.current_video_index, 1);
}

#[tokio::test]
async fn votes_on_missing_entries_are_ignored() {
    let (_state, router) = setup(&[]).await;
    let ((alice, mut alice_rx), _) = hosted_room(&router).await;
    router.handle(&alice, add_video("r1", "A")).await;
    drain(&mut alice_rx);

    router.handle(&alice, ClientEvent::VoteVideo { room_id: "r1".into(), video_index: 5, vote: Vote::Down }).await;
    assert!(drain(&mut alice_rx).is_empty());
}

#[tokio::test]
async fn removing_the_playing_last_entry_wraps_to_zero() {
    let (state, router) = setup(&[]).await;
    let ((alice, mut alice_rx), (bob, _bob_rx)) = hosted_room(&router).await;
    router.handle(&alice, add_video("r1", "A")).await;
    router.handle(&alice, add_video("r1", "B")).await;
    router.handle(&alice, control("r1", "CHANGE_VIDEO", json!({ "index": 1 }))).await;
    drain(&mut alice_rx);

    router.handle(&bob, ClientEvent::RemoveVideoFromQueue { room_id: "r1".into(), video_index: 1 }).await;

    let events = drain(&mut alice_rx);
    let change = find(&events, "changeVideo").unwrap();
    assert_eq!(change["newIndex"], json!(0));
    assert_eq!(change["newQueue"].as_array().unwrap().len(), 1);
    assert_eq!(state.rooms.find_by_id("r1").await.unwrap().unwrap().current_video_index, 0);
}

#[tokio::test]
async fn joining_announces_to_the_room_and_everyone() {
    let (_state, router) = setup(&[]).await;
    let (alice, mut alice_rx) = router.connect("alice");
    let (bob, mut bob_rx) = router.connect("bob");
    let (_carol, mut carol_rx) = router.connect("carol");

    router.handle(&alice, new_room("r1", true)).await;
    let events = drain(&mut alice_rx);
    assert_eq!(names(&events), ["roomCreated", "privateRoomCode"]);
    let code = find(&events, "privateRoomCode").unwrap()["code"].as_str().unwrap().to_owned();
    assert_eq!(find(&events, "roomCreated").unwrap()["code"], json!(code));

    router.handle(&bob, ClientEvent::JoinRoomByCode { code: code.to_lowercase() }).await;

    let alice_events = drain(&mut alice_rx);
    assert_eq!(names(&alice_events), ["userJoined", "roomUpdated"]);
    assert_eq!(find(&alice_events, "userJoined").unwrap(), &json!({ "username": "bob", "roomId": "r1" }));

    let bob_events = drain(&mut bob_rx);
    assert_eq!(names(&bob_events), ["roomJoined", "roomUpdated"]);
    assert_eq!(find(&bob_events, "roomJoined").unwrap()["code"], json!(code));

    // outsiders learn about the room but never its code
    let carol_events = drain(&mut carol_rx);
    let updated = find(&carol_events, "roomUpdated").unwrap();
    assert_eq!(updated["participants"], json!(["alice", "bob"]));
    assert!(updated.get("code").is_none());
}

#[tokio::test]
async fn unknown_rooms_and_codes_answer_with_errors() {
    let (_state, router) = setup(&[]).await;
    let (alice, mut alice_rx) = router.connect("alice");

    router.handle(&alice, ClientEvent::JoinRoom { room_id: "nope".into() }).await;
    router.handle(&alice, ClientEvent::JoinRoomByCode { code: "ZZZZZZ".into() }).await;

    let events = drain(&mut alice_rx);
    assert_eq!(names(&events), ["joinRoomError", "joinRoomByCodeError"]);
    assert_eq!(find(&events, "joinRoomByCodeError").unwrap()["message"], "Invalid or expired room code.");
}

#[tokio::test]
async fn public_rooms_cannot_be_joined_by_code() {
    let (state, router) = setup(&[]).await;
    let (alice, mut alice_rx) = router.connect("alice");
    router.handle(&alice, new_room("r1", false)).await;
    assert_eq!(names(&drain(&mut alice_rx)), ["roomCreated"]);
    assert_eq!(state.rooms.find_by_id("r1").await.unwrap().unwrap().code, None);
}

#[tokio::test]
async fn duplicate_and_malformed_rooms_answer_create_room_error() {
    let (_state, router) = setup(&[]).await;
    let (alice, mut alice_rx) = router.connect("alice");

    router.handle(&alice, new_room("r1", false)).await;
    router.handle(&alice, new_room("r1", false)).await;
    router.handle_frame(&alice, br#"{"event":"createRoom","data":{"roomId":"r2"}}"#).await;
    router.handle_frame(&alice, br#"{"event":"addVideo","data":{}}"#).await;
    router.handle_frame(&alice, b"{not json").await;

    let events = drain(&mut alice_rx);
    assert_eq!(names(&events), ["roomCreated", "createRoomError", "createRoomError"]);
    assert_eq!(events[1]["data"]["message"], "Room already exists.");
}

#[tokio::test]
async fn leaving_tells_the_room() {
    let (state, router) = setup(&[]).await;
    let ((_alice, mut alice_rx), (bob, mut bob_rx)) = hosted_room(&router).await;

    router.handle(&bob, ClientEvent::LeaveRoom { room_id: "r1".into() }).await;

    let events = drain(&mut alice_rx);
    assert_eq!(names(&events), ["roomUpdated", "userLeft"]);
    assert_eq!(find(&events, "roomUpdated").unwrap()["participants"], json!(["alice"]));
    // bob left the channel first, so only the broadcast reaches him
    assert_eq!(names(&drain(&mut bob_rx)), ["roomUpdated"]);

    let room = state.rooms.find_by_id("r1").await.unwrap().unwrap();
    assert_eq!(room.participants, ["alice"]);
}

#[tokio::test]
async fn room_chat_and_sync_are_relayed() {
    let (_state, router) = setup(&[]).await;
    let ((alice, mut alice_rx), (bob, mut bob_rx)) = hosted_room(&router).await;

    router.handle(&bob, ClientEvent::RoomMessage { room_id: "r1".into(), content: "hi".into() }).await;
    router
        .handle(&alice, ClientEvent::VideoSync { room_id: "r1".into(), current_time: json!(3.5), is_playing: json!(true) })
        .await;

    let alice_events = drain(&mut alice_rx);
    assert_eq!(names(&alice_events), ["roomMessage"]);
    assert_eq!(find(&alice_events, "roomMessage").unwrap()["username"], "bob");

    let bob_events = drain(&mut bob_rx);
    assert_eq!(names(&bob_events), ["roomMessage", "videoSync"]);
    let sync = find(&bob_events, "videoSync").unwrap();
    assert_eq!(sync["currentTime"], json!(3.5));
    assert_eq!(sync["isPlaying"], json!(true));
}

#[tokio::test]
async fn online_notifies_friends_but_not_pending_requesters() {
    let (state, router) = setup(&["alice", "bob", "carol"]).await;
    state.social.send_request("alice", "bob").await.unwrap();
    state.social.accept_request("bob", "alice").await.unwrap();
    state.social.send_request("carol", "bob").await.unwrap();

    let (_alice, mut alice_rx) = router.connect("alice");
    let (_carol, mut carol_rx) = router.connect("carol");
    let (bob, _bob_rx) = router.connect("bob");

    router.handle(&bob, ClientEvent::Online).await;

    let events = drain(&mut alice_rx);
    assert_eq!(names(&events), ["friendOnline"]);
    assert_eq!(events[0]["data"], "bob");
    assert!(drain(&mut carol_rx).is_empty());
}

#[tokio::test]
async fn friend_request_flow_over_events() {
    let (state, router) = setup(&["alice", "bob"]).await;
    let (alice, mut alice_rx) = router.connect("alice");
    let (bob, mut bob_rx) = router.connect("bob");

    router.handle_frame(&alice, br#"{"event":"sendFriendRequest","data":"bob"}"#).await;
    assert_eq!(names(&drain(&mut alice_rx)), ["friend_request_success"]);
    let events = drain(&mut bob_rx);
    assert_eq!(names(&events), ["friendRequest"]);
    assert_eq!(events[0]["data"], "alice");

    router.handle(&alice, ClientEvent::SendFriendRequest { target: "bob".into() }).await;
    let events = drain(&mut alice_rx);
    assert_eq!(names(&events), ["friend_request_error"]);
    assert_eq!(events[0]["data"]["message"], "Friend request already sent.");

    router.handle_frame(&bob, br#"{"event":"acceptFriendRequest","data":{"from":"alice"}}"#).await;
    let to_alice = drain(&mut alice_rx);
    assert_eq!(names(&to_alice), ["friendRequestAccepted"]);
    assert_eq!(to_alice[0]["data"], "bob");
    let to_bob = drain(&mut bob_rx);
    assert_eq!(to_bob[0]["data"], "alice");

    assert!(state.social.are_friends("alice", "bob").await.unwrap());

    // accepting again is silent
    router.handle(&bob, ClientEvent::AcceptFriendRequest { from: "alice".into() }).await;
    assert!(drain(&mut bob_rx).is_empty());
}

#[tokio::test]
async fn direct_messages_reach_an_online_receiver() {
    let (state, router) = setup(&["alice", "bob"]).await;
    let (alice, mut alice_rx) = router.connect("alice");
    let (_bob, mut bob_rx) = router.connect("bob");

    router
        .handle(&alice, ClientEvent::SendDirectMessage { receiver: "bob".into(), content: "hello".into() })
        .await;

    let events = drain(&mut bob_rx);
    let message = find(&events, "directMessage").unwrap();
    assert_eq!(message["sender"], "alice");
    assert_eq!(message["content"], "hello");
    assert_eq!(names(&drain(&mut alice_rx)), ["messageSent"]);

    assert_eq!(state.messages.history("alice", "bob").await.unwrap().len(), 1);
}

#[tokio::test]
async fn disconnect_clears_rooms_and_presence() {
    let (state, router) = setup(&["alice", "bob"]).await;
    state.social.send_request("alice", "bob").await.unwrap();
    state.social.accept_request("bob", "alice").await.unwrap();
    let ((_alice, mut alice_rx), (bob, _bob_rx)) = hosted_room(&router).await;

    router.disconnect(bob).await;

    let events = drain(&mut alice_rx);
    assert_eq!(names(&events), ["roomUpdated", "friendOffline"]);
    assert_eq!(find(&events, "roomUpdated").unwrap()["participants"], json!(["alice"]));
    assert_eq!(find(&events, "friendOffline").unwrap(), "bob");

    assert!(!state.presence.is_online("bob"));
    assert!(state.rooms.rooms_with_participant("bob").await.unwrap().is_empty());
}

#[tokio::test]
async fn a_newer_connection_replaces_the_older_binding() {
    let (state, router) = setup(&[]).await;
    let (first, _first_rx) = router.connect("alice");
    let (second, _second_rx) = router.connect("alice");

    assert_eq!(state.presence.connection_for("alice"), Some(second.connection));

    router.disconnect(first).await;
    assert_eq!(state.presence.connection_for("alice"), Some(second.connection));
}
