use std::sync::Arc;

use axum::{debug_handler, extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::{config::Config, profiles::{UserStore, MIN_PASSWORD_LEN}, AppResult, AppState};

use super::{hash_password_blocking, Verifier};

#[derive(Deserialize)]
pub(crate) struct SignupRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

/// What signup and login hand back to the client.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Session {
    pub(crate) token: String,
    pub(crate) username: String,
    pub(crate) email: String,
    pub(crate) profile_pic: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn signup(
    State(users): State<UserStore>,
    State(verifier): State<Verifier>,
    State(config): State<Arc<Config>>,
    Json(SignupRequest { username, email, password }): Json<SignupRequest>,
) -> AppResult<Json<Session>> {
    let username = username.trim().to_owned();
    let email = email.trim().to_lowercase();

    if username.is_empty() || email.is_empty() || password.is_empty() {
        return Err("Username, email, and password are required")?;
    }
    validate_username(&username)?;
    if !looks_like_email(&email) {
        return Err("Invalid email format")?;
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err("Password must be at least 6 characters")?;
    }

    let password_hash = hash_password_blocking(password, config.password_iterations).await?;
    let user = users.create(&username, &email, &password_hash).await?;
    let token = verifier.issue(&user.username, &user.email)?;

    Ok(Json(Session {
        token,
        username: user.username,
        email: user.email,
        profile_pic: user.profile_pic,
    }))
}

fn validate_username(username: &str) -> Result<(), &'static str> {
    if !(3..=20).contains(&username.chars().count()) {
        return Err("Username must be between 3 and 20 characters");
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err("Username can only contain letters, numbers, and underscores");
    }
    Ok(())
}

/// `x@y.z` with no whitespace anywhere.
fn looks_like_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !local.is_empty() && !host.is_empty() && !tld.is_empty()
}
