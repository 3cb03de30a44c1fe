use axum::{
    debug_handler,
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use super::{ConnectionState, EventRouter};
use crate::{auth, AppError, AppState};

#[derive(Deserialize)]
pub struct Handshake {
    token: Option<String>,
}

/// Upgrades to the event channel once the handshake token verifies. The
/// token comes from `Authorization: Bearer` or the `token` query parameter.
#[debug_handler(state = AppState)]
pub async fn connect(
    State(app_state): State<AppState>,
    Query(Handshake { token }): Query<Handshake>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    tracing::trace!(state = ?ConnectionState::Connecting, "Handshake");
    let router = app_state.event_router();
    let credential = auth::bearer_token(&headers).map(str::to_owned).or(token);

    let claims = match router.authenticate(credential.as_deref()) {
        Ok(claims) => claims,
        Err(err) => return AppError::from(err).into_response(),
    };

    ws.on_upgrade(async move |stream| serve(router, claims.username, stream).await)
}

async fn serve(router: EventRouter, identity: String, stream: WebSocket) {
    let (session, mut outbox) = router.connect(&identity);
    let connection = session.connection;
    let (mut sender, mut receiver) = stream.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = outbox.recv().await {
            let text = match serde_json::to_string(&*event) {
                Ok(text) => text,
                Err(err) => {
                    tracing::error!(%connection, error = %err, "Failed to encode event");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut send_task => break,
            msg = receiver.next() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => router.handle_frame(&session, text.as_bytes()).await,
                    Message::Binary(bytes) => router.handle_frame(&session, &bytes).await,
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    router.disconnect(session).await;
    send_task.abort();
}
