use axum::{debug_handler, extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{error::CoreError, profiles::UserStore, AppResult, AppState};

use super::{signup::Session, verify_password_blocking, Caller, Verifier};

#[derive(Deserialize)]
pub(crate) struct LoginRequest {
    #[serde(default)]
    login: String,
    #[serde(default)]
    password: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn login(
    State(users): State<UserStore>,
    State(verifier): State<Verifier>,
    Json(LoginRequest { login, password }): Json<LoginRequest>,
) -> AppResult<Json<Session>> {
    let login = login.trim();
    if login.is_empty() || password.is_empty() {
        return Err("Login credential and password required")?;
    }

    let Some(user) = users.find_by_login(login).await? else {
        return Err(CoreError::InvalidCredential)?;
    };
    if !verify_password_blocking(user.password_hash.clone(), password).await? {
        tracing::info!(identity = %user.username, "Login refused");
        return Err(CoreError::InvalidCredential)?;
    }

    let token = verifier.issue(&user.username, &user.email)?;
    tracing::info!(identity = %user.username, "Login");

    Ok(Json(Session {
        token,
        username: user.username,
        email: user.email,
        profile_pic: user.profile_pic,
    }))
}

#[debug_handler(state = AppState)]
pub(crate) async fn verify(
    Caller(claims): Caller,
    State(users): State<UserStore>,
) -> AppResult<Json<Value>> {
    let profile_pic = users.profile(&claims.username).await?.map(|p| p.profile_pic).unwrap_or_default();
    Ok(Json(json!({
        "valid": true,
        "user": { "username": claims.username, "profilePic": profile_pic },
    })))
}
