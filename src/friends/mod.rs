mod graph;

use axum::{debug_handler, extract::{Path, State}, routing::get, Json, Router};
use serde::Serialize;

pub use graph::{Friend, SocialGraph};

use crate::{auth::Caller, error::CoreError, AppResult, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/friends/{username}", get(friends))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FriendsResponse {
    friends: Vec<Friend>,
    friend_requests: Vec<String>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn friends(
    Caller(claims): Caller,
    Path(username): Path<String>,
    State(social): State<SocialGraph>,
) -> AppResult<Json<FriendsResponse>> {
    if claims.username != username {
        return Err(CoreError::Forbidden("Access denied"))?;
    }

    Ok(Json(FriendsResponse {
        friends: social.friend_list(&username).await?,
        friend_requests: social.pending_requests(&username).await?,
    }))
}
