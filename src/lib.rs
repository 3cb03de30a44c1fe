pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod friends;
pub mod locks;
pub mod messages;
pub mod presence;
pub mod profiles;
pub mod rooms;

use std::sync::Arc;

use axum::{extract::FromRef, http::{Method, StatusCode}, response::{IntoResponse, Response}, routing::get, Json, Router};
use serde_json::json;
use sqlx::SqlitePool;
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};

use crate::{
    auth::Verifier,
    config::Config,
    error::{CoreError, ErrorKind},
    events::{EventRouter, Hub},
    friends::SocialGraph,
    messages::MessageStore,
    presence::{LocalPresence, Presence},
    profiles::UserStore,
    rooms::{QueueEngine, RoomStore},
};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Arc<Config>,
    pub verifier: Verifier,
    pub presence: Arc<dyn Presence>,
    pub hub: Arc<Hub>,
    pub users: UserStore,
    pub rooms: RoomStore,
    pub queue: QueueEngine,
    pub social: SocialGraph,
    pub messages: MessageStore,
}

impl AppState {
    pub fn new(config: Config, db_pool: SqlitePool) -> AppState {
        let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
        let rooms = RoomStore::new(db_pool.clone());

        AppState {
            verifier: Verifier::new(&config.jwt_secret, config.token_ttl_days),
            hub: Arc::new(Hub::new()),
            users: UserStore::new(db_pool.clone()),
            queue: QueueEngine::new(rooms.clone()),
            rooms,
            social: SocialGraph::new(db_pool.clone(), presence.clone()),
            messages: MessageStore::new(db_pool.clone()),
            presence,
            config: Arc::new(config),
            db_pool,
        }
    }

    pub fn event_router(&self) -> EventRouter {
        EventRouter::new(self.clone())
    }
}

/// Every HTTP route plus the event channel.
pub fn app(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(events::ws::connect))
        .nest(
            "/api",
            Router::new()
                .merge(auth::router())
                .merge(profiles::router())
                .merge(friends::router())
                .merge(messages::router())
                .merge(rooms::router()),
        )
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub type AppResult<T> = Result<T, AppError>;
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<CoreError>().map(CoreError::kind) {
            Some(ErrorKind::InvalidCredential) => StatusCode::UNAUTHORIZED,
            Some(ErrorKind::Validation) => StatusCode::BAD_REQUEST,
            Some(ErrorKind::NotFound) => StatusCode::NOT_FOUND,
            Some(ErrorKind::Conflict) => StatusCode::CONFLICT,
            Some(ErrorKind::Forbidden) => StatusCode::FORBIDDEN,
            Some(ErrorKind::Unexpected) | None => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("{}\n\n{}", self.0, self.0.backtrace());
            return (status, Json(json!({ "error": "Server error" }))).into_response();
        }

        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        Self(CoreError::Validation(err).into())
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        Self(CoreError::Validation(err.to_owned()).into())
    }
}

macro_rules! apperr_impl {
    ($E:ty) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                Self(anyhow::Error::from(err))
            }
        }
    };
}

apperr_impl!(CoreError);
apperr_impl!(serde_json::Error);
apperr_impl!(sqlx::Error);
apperr_impl!(axum::Error);
