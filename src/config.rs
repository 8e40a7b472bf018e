use std::env;
use std::str::FromStr;

use crate::appointments::DEFAULT_TX_RETRY_LIMIT;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    pub db_max_connections: u32,
    pub tx_retry_limit: u32,
    /// Unset means any origin is allowed.
    pub cors_origin: Option<String>,
    pub run_migrations: bool,
    pub login_rate_window_ms: u64,
    pub login_rate_max: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let cors_origin = env::var("CORS_ORIGIN").ok().filter(|s| !s.trim().is_empty());

        Ok(Self {
            database_url,
            bind_addr,
            session_ttl_hours: parse_or("SESSION_TTL_HOURS", 8),
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", 10),
            tx_retry_limit: parse_or("TX_RETRY_LIMIT", DEFAULT_TX_RETRY_LIMIT),
            cors_origin,
            run_migrations: parse_or("RUN_MIGRATIONS", true),
            login_rate_window_ms: parse_or("RATE_LIMIT_WINDOW_MS", 15 * 60 * 1000),
            login_rate_max: parse_or("RATE_LIMIT_MAX", 100),
        })
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}
