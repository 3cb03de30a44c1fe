mod page;
mod store;

use axum::{routing::{get, post}, Router};

pub use store::{Profile, User, UserStore};

use crate::AppState;

pub(crate) const MIN_PASSWORD_LEN: usize = 6;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/profile", post(page::update))
        // literal segment wins over the capture
        .route("/users/search", get(page::search))
        .route("/users/{username}", get(page::profile))
}
