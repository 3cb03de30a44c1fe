use axum::{debug_handler, extract::{Path, Query, State}, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{auth::{self, Caller}, config::Config, error::CoreError, AppResult, AppState};

use super::{Profile, UserStore};

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 50;

#[derive(Deserialize)]
pub(crate) struct SearchQuery {
    q: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProfileUpdate {
    password: Option<String>,
    profile_pic: Option<String>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn profile(
    Path(username): Path<String>,
    State(users): State<UserStore>,
) -> AppResult<Json<Profile>> {
    let profile = users.profile(&username).await?.ok_or(CoreError::NotFound("User"))?;
    Ok(Json(profile))
}

#[debug_handler(state = AppState)]
pub(crate) async fn search(
    Caller(claims): Caller,
    Query(SearchQuery { q, page, limit }): Query<SearchQuery>,
    State(users): State<UserStore>,
) -> AppResult<Json<Vec<Profile>>> {
    let q = q.filter(|q| !q.trim().is_empty()).ok_or("Search query required")?;
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    let found = users.search(q.trim(), &claims.username, page.unwrap_or(0), limit).await?;
    Ok(Json(found))
}

#[debug_handler(state = AppState)]
pub(crate) async fn update(
    Caller(claims): Caller,
    State(users): State<UserStore>,
    State(config): State<std::sync::Arc<Config>>,
    Json(ProfileUpdate { password, profile_pic }): Json<ProfileUpdate>,
) -> AppResult<Json<Value>> {
    let password_hash = match password.filter(|password| password.len() >= super::MIN_PASSWORD_LEN) {
        Some(password) => Some(auth::hash_password_blocking(password, config.password_iterations).await?),
        None => None,
    };
    let profile_pic = profile_pic.filter(|pic| !pic.is_empty());

    users.update_profile(&claims.username, password_hash.as_deref(), profile_pic.as_deref()).await?;
    tracing::info!(identity = %claims.username, "Profile updated");

    Ok(Json(json!({ "success": true })))
}
