use serde::Serialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub profile_pic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub username: String,
    pub profile_pic: String,
}

type UserRow = (String, String, String, String);

fn user_from_row((username, email, password_hash, profile_pic): UserRow) -> User {
    User { username, email, password_hash, profile_pic }
}

/// Identity records. Identities are created at signup and never deleted.
#[derive(Clone)]
pub struct UserStore {
    db_pool: SqlitePool,
}

impl UserStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        UserStore { db_pool }
    }

    pub async fn create(&self, username: &str, email: &str, password_hash: &str) -> CoreResult<User> {
        let existing: Option<(String, String)> =
            sqlx::query_as("SELECT username,email FROM users WHERE username=? OR email=?")
                .bind(username)
                .bind(email)
                .fetch_optional(&self.db_pool)
                .await?;
        if let Some((taken_username, _)) = existing {
            return Err(CoreError::AlreadyExists(if taken_username == username { "Username" } else { "Email" }));
        }

        let inserted = sqlx::query("INSERT INTO users (username,email,password_hash,profile_pic,created_at) VALUES (?,?,?,'',?)")
            .bind(username)
            .bind(email)
            .bind(password_hash)
            .bind(OffsetDateTime::now_utc())
            .execute(&self.db_pool)
            .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                return Err(CoreError::AlreadyExists("Username or email"));
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(identity = username, "Identity created");
        Ok(User {
            username: username.to_owned(),
            email: email.to_owned(),
            password_hash: password_hash.to_owned(),
            profile_pic: String::new(),
        })
    }

    /// `login` may be either the username or the email; emails match
    /// case-insensitively since they are stored lowercased.
    pub async fn find_by_login(&self, login: &str) -> CoreResult<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT username,email,password_hash,profile_pic FROM users WHERE username=? OR email=? LIMIT 1")
                .bind(login)
                .bind(login.to_lowercase())
                .fetch_optional(&self.db_pool)
                .await?;
        Ok(row.map(user_from_row))
    }

    pub async fn exists(&self, username: &str) -> CoreResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM users WHERE username=?")
            .bind(username)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn profile(&self, username: &str) -> CoreResult<Option<Profile>> {
        let row: Option<(String, String)> = sqlx::query_as("SELECT username,profile_pic FROM users WHERE username=?")
            .bind(username)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(row.map(|(username, profile_pic)| Profile { username, profile_pic }))
    }

    /// Case-insensitive substring search on usernames, never returning `exclude`.
    pub async fn search(&self, query: &str, exclude: &str, page: u32, limit: u32) -> CoreResult<Vec<Profile>> {
        let pattern = format!("%{}%", escape_like(query));
        let rows: Vec<(String, String)> = sqlx::query_as(
            r"SELECT username,profile_pic FROM users
              WHERE username LIKE ? ESCAPE '\' AND username != ?
              ORDER BY username LIMIT ? OFFSET ?",
        )
        .bind(pattern)
        .bind(exclude)
        .bind(i64::from(limit))
        .bind(i64::from(page) * i64::from(limit))
        .fetch_all(&self.db_pool)
        .await?;

        Ok(rows.into_iter().map(|(username, profile_pic)| Profile { username, profile_pic }).collect())
    }

    pub async fn update_profile(&self, username: &str, password_hash: Option<&str>, profile_pic: Option<&str>) -> CoreResult<()> {
        sqlx::query(
            "UPDATE users SET password_hash=COALESCE(?,password_hash), profile_pic=COALESCE(?,profile_pic) WHERE username=?",
        )
        .bind(password_hash)
        .bind(profile_pic)
        .bind(username)
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }
}

fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
