use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;

use crate::{
    account::Orchestrator,
    auth::{AuthProvider, MemoryAuth},
    config::Config,
    db::open_sqlite_pool,
    migrate::apply_migrations,
    session::SessionManager,
    store::{AccountStore, SqliteStore},
};

/// Everything one session context needs, wired once at startup.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub store: Arc<SqliteStore>,
    pub auth: Arc<MemoryAuth>,
    pub orchestrator: Arc<Orchestrator>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Opens the configured database, brings the schema up to date and wires
    /// the account components.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = open_sqlite_pool(&config.db_path).await?;
        apply_migrations(&pool).await?;
        Ok(Self::from_pool(pool, config))
    }

    pub fn from_pool(pool: SqlitePool, config: Config) -> Self {
        let store = Arc::new(SqliteStore::new(pool.clone()));
        let account_store: Arc<dyn AccountStore> = store.clone();
        Self {
            auth: Arc::new(MemoryAuth::new(config.session_ttl_ms, false)),
            orchestrator: Arc::new(Orchestrator::new(account_store)),
            pool,
            store,
            config: Arc::new(config),
        }
    }

    pub fn session_manager(&self) -> Arc<SessionManager> {
        let auth: Arc<dyn AuthProvider> = self.auth.clone();
        Arc::new(SessionManager::new(auth, self.orchestrator.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_migrates_a_fresh_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            db_path: dir.path().join("hb.sqlite3"),
            log_filter: "homebudget=info".into(),
            log_dir: None,
            session_ttl_ms: 1_000,
        };
        let state = AppState::open(config).await.expect("open");
        assert_eq!(state.store.count_households().await.expect("count"), 0);
        state.pool.close().await;
    }
}
