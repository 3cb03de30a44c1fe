use std::str::FromStr;

use anyhow::Context;

const DEFAULT_SECRET: &str = "default_secret";

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub bind_addr: String,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    pub password_iterations: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: "sqlite://watchroom.db?mode=rwc".to_owned(),
            database_max_connections: 16,
            bind_addr: "0.0.0.0:5001".to_owned(),
            jwt_secret: DEFAULT_SECRET.to_owned(),
            token_ttl_days: 7,
            password_iterations: 100_000,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        // a missing .env is fine, the process environment still applies
        let _ = dotenv::dotenv();

        let defaults = Config::default();
        let config = Config {
            database_url: dotenv::var("DATABASE_URL").unwrap_or(defaults.database_url),
            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS", defaults.database_max_connections)?,
            bind_addr: dotenv::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            jwt_secret: dotenv::var("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            token_ttl_days: parse_var("TOKEN_TTL_DAYS", defaults.token_ttl_days)?,
            password_iterations: parse_var("PASSWORD_ITERATIONS", defaults.password_iterations)?,
        };

        if config.jwt_secret == DEFAULT_SECRET {
            tracing::warn!("JWT_SECRET not set, using the built-in default secret");
        }

        Ok(config)
    }
}

fn parse_var<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match dotenv::var(key) {
        Ok(raw) => raw.trim().parse().with_context(|| format!("{key}={raw} is not valid")),
        Err(_) => Ok(default),
    }
}
