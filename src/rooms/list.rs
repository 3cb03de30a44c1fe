use axum::{debug_handler, extract::State, Json};

use crate::{auth::MaybeCaller, AppResult, AppState};

use super::{RoomStore, RoomView};

/// Rooms the caller may see; anonymous callers get public rooms only.
#[debug_handler(state = AppState)]
pub(crate) async fn rooms(
    MaybeCaller(claims): MaybeCaller,
    State(rooms): State<RoomStore>,
) -> AppResult<Json<Vec<RoomView>>> {
    let identity = claims.as_ref().map(|claims| claims.username.as_str());
    let visible = rooms.list_visible_to(identity).await?;
    Ok(Json(visible.iter().map(|room| room.view()).collect()))
}
