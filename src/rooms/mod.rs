mod code;
mod list;
mod model;
pub mod queue;
mod store;

use axum::{routing::get, Router};

pub use code::{random_code, ALPHABET, CODE_LEN};
pub use model::{NewRoom, QueueEntry, Room, RoomKind, RoomView};
pub use queue::{PlayerAction, PlayerState, QueueDelta, QueueEngine, Vote};
pub use store::RoomStore;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rooms", get(list::rooms))
}
