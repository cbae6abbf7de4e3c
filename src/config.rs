use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::auth::memory::DEFAULT_SESSION_TTL_MS;

pub const APP_IDENTIFIER: &str = "com.homebudget.app";
pub const DB_FILE_NAME: &str = "homebudget.sqlite3";
pub const DEFAULT_LOG_FILTER: &str = "homebudget=info,sqlx=warn";

pub const ENV_DB: &str = "HOMEBUDGET_DB";
pub const ENV_LOG: &str = "HOMEBUDGET_LOG";
pub const ENV_LOG_DIR: &str = "HOMEBUDGET_LOG_DIR";
pub const ENV_SESSION_TTL_MS: &str = "HOMEBUDGET_SESSION_TTL_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_path: PathBuf,
    pub log_filter: String,
    /// Daily JSON log files are written here when set.
    pub log_dir: Option<PathBuf>,
    pub session_ttl_ms: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_path = match non_empty(ENV_DB) {
            Some(path) => PathBuf::from(path),
            None => default_db_path()?,
        };
        let session_ttl_ms = match non_empty(ENV_SESSION_TTL_MS) {
            Some(raw) => {
                let ttl: i64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("{ENV_SESSION_TTL_MS} must be an integer, got {raw:?}"))?;
                anyhow::ensure!(ttl > 0, "{ENV_SESSION_TTL_MS} must be positive");
                ttl
            }
            None => DEFAULT_SESSION_TTL_MS,
        };

        Ok(Self {
            db_path,
            log_filter: non_empty(ENV_LOG).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            log_dir: non_empty(ENV_LOG_DIR).map(PathBuf::from),
            session_ttl_ms,
        })
    }

    /// CLI flags win over the environment.
    pub fn with_db_path(mut self, db_path: Option<PathBuf>) -> Self {
        if let Some(path) = db_path {
            self.db_path = path;
        }
        self
    }
}

pub fn default_db_path() -> Result<PathBuf> {
    db_path_under(dirs::data_dir(), std::env::current_dir)
}

/// The working directory is only consulted when there is no data directory.
fn db_path_under(
    data_dir: Option<PathBuf>,
    current_dir: impl FnOnce() -> std::io::Result<PathBuf>,
) -> Result<PathBuf> {
    let base = match data_dir {
        Some(dir) => dir,
        None => current_dir().context("resolve working directory for the database")?,
    };
    Ok(base.join(APP_IDENTIFIER).join(DB_FILE_NAME))
}
