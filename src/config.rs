use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
const DEFAULT_PG_HOST: &str = "127.0.0.1";
const DEFAULT_PG_PORT: u16 = 5432;
const DEFAULT_PG_DBNAME: &str = "sqlcoach";
const DEFAULT_PG_USER: &str = "postgres";
const DEFAULT_POOL_MAX: usize = 20;
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_STATEMENT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_ROWS: usize = 1000;
const DEFAULT_PREVIEW_ROWS: usize = 10;

/// Ceilings applied to every query submission.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub statement_timeout_ms: u64,
    pub max_rows: usize,
    pub preview_rows: usize,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub pg_host: String,
    pub pg_port: u16,
    pub pg_dbname: String,
    pub pg_user: String,
    pub pg_password: String,
    pub pool_max: usize,
    /// How long a request waits for a pooled connection. Distinct from the
    /// statement timeout enforced on the query itself.
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub limits: Limits,
    pub assignments_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            listen_addr: env_or("SQLCOACH_LISTEN", DEFAULT_LISTEN),
            pg_host: env_or("SQLCOACH_PG_HOST", DEFAULT_PG_HOST),
            pg_port: env_parse("SQLCOACH_PG_PORT", DEFAULT_PG_PORT)?,
            pg_dbname: env_or("SQLCOACH_PG_DBNAME", DEFAULT_PG_DBNAME),
            pg_user: env_or("SQLCOACH_PG_USER", DEFAULT_PG_USER),
            pg_password: env_or("SQLCOACH_PG_PASSWORD", ""),
            pool_max: env_parse("SQLCOACH_POOL_MAX", DEFAULT_POOL_MAX)?,
            acquire_timeout: Duration::from_millis(env_parse(
                "SQLCOACH_ACQUIRE_TIMEOUT_MS",
                DEFAULT_ACQUIRE_TIMEOUT_MS,
            )?),
            idle_timeout: Duration::from_millis(env_parse(
                "SQLCOACH_IDLE_TIMEOUT_MS",
                DEFAULT_IDLE_TIMEOUT_MS,
            )?),
            limits: Limits {
                statement_timeout_ms: env_parse(
                    "SQLCOACH_STATEMENT_TIMEOUT_MS",
                    DEFAULT_STATEMENT_TIMEOUT_MS,
                )?,
                max_rows: env_parse("SQLCOACH_MAX_ROWS", DEFAULT_MAX_ROWS)?,
                preview_rows: env_parse("SQLCOACH_PREVIEW_ROWS", DEFAULT_PREVIEW_ROWS)?,
            },
            assignments_path: env::var("SQLCOACH_ASSIGNMENTS").ok(),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw}")),
        Err(_) => Ok(default),
    }
}
