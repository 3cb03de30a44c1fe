use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use watchroom::{app, config::Config, db, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let db_pool = db::connect(&config.database_url, config.database_max_connections)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "Listening");

    let app_state = AppState::new(config, db_pool);
    axum::serve(listener, app(app_state)).await?;
    Ok(())
}
