use sha2::{Digest, Sha256};
use sqlx::{Executor, Row, SqlitePool};
use std::collections::HashMap;

use crate::time::now_ms;
use tracing::{error, info};

pub static MIGRATIONS: &[(&str, &str)] = &[
    (
        "202510010900_initial.sql",
        include_str!("../migrations/202510010900_initial.sql"),
    ),
    (
        "202510010910_income.sql",
        include_str!("../migrations/202510010910_income.sql"),
    ),
    (
        "202510020800_households_created_by.sql",
        include_str!("../migrations/202510020800_households_created_by.sql"),
    ),
];

fn preview(sql: &str) -> String {
    let one_line = sql.replace(['\n', '\t'], " ");
    let trimmed = one_line.trim();
    if trimmed.chars().count() > 160 {
        let cut: String = trimmed.chars().take(160).collect();
        format!("{cut}…")
    } else {
        trimmed.to_string()
    }
}

fn strip_comments(raw_sql: &str) -> String {
    raw_sql
        .lines()
        .filter(|line| {
            let t = line.trim_start();
            !(t.is_empty() || t.starts_with("--"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn checksum(raw_sql: &str) -> String {
    format!("{:x}", Sha256::digest(strip_comments(raw_sql).as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub version: String,
    pub applied: bool,
}

async fn ensure_ledger(pool: &SqlitePool) -> anyhow::Result<()> {
    pool.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
           version   TEXT PRIMARY KEY,\
           applied_at INTEGER NOT NULL,\
           checksum TEXT NOT NULL\
         )",
    )
    .await?;
    Ok(())
}

async fn applied_checksums(pool: &SqlitePool) -> anyhow::Result<HashMap<String, String>> {
    let rows = sqlx::query("SELECT version, checksum FROM schema_migrations")
        .fetch_all(pool)
        .await?;
    let mut applied = HashMap::new();
    for r in rows {
        if let (Ok(v), Ok(c)) = (
            r.try_get::<String, _>("version"),
            r.try_get::<String, _>("checksum"),
        ) {
            applied.insert(v, c);
        }
    }
    Ok(applied)
}

pub async fn status(pool: &SqlitePool) -> anyhow::Result<Vec<MigrationStatus>> {
    ensure_ledger(pool).await?;
    let applied = applied_checksums(pool).await?;
    Ok(MIGRATIONS
        .iter()
        .map(|(filename, _)| MigrationStatus {
            version: filename.to_string(),
            applied: applied.contains_key(*filename),
        })
        .collect())
}

pub async fn apply_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    ensure_ledger(pool).await?;
    let applied = applied_checksums(pool).await?;

    for (filename, raw_sql) in MIGRATIONS {
        let cleaned = strip_comments(raw_sql);
        let checksum = checksum(raw_sql);

        if let Some(stored) = applied.get(*filename) {
            if stored != &checksum {
                anyhow::bail!("migration {} edited after application", filename);
            }
            info!(target: "homebudget", event = "migration_skip_file", file = %filename);
            continue;
        }

        let mut tx = pool.begin().await?;
        for stmt in cleaned.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            info!(target: "homebudget", event = "migration_stmt", file = %filename, sql = %preview(s));
            if let Err(e) = sqlx::query(s).execute(&mut *tx).await {
                error!(target: "homebudget", event = "migration_stmt_error", file = %filename, sql = %preview(s), error = %e);
                return Err(e.into());
            }
        }

        sqlx::query(
            "INSERT INTO schema_migrations (version, applied_at, checksum) VALUES (?, ?, ?)",
        )
        .bind(*filename)
        .bind(now_ms())
        .bind(&checksum)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(target: "homebudget", event = "migration_file_applied", file = %filename);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_pool;

    #[tokio::test]
    async fn applies_all_and_is_idempotent() {
        let pool = open_memory_pool().await.expect("pool");
        apply_migrations(&pool).await.expect("first run");
        apply_migrations(&pool).await.expect("second run");

        let statuses = status(&pool).await.expect("status");
        assert_eq!(statuses.len(), MIGRATIONS.len());
        assert!(statuses.iter().all(|s| s.applied));
    }

    #[tokio::test]
    async fn detects_edited_migration() {
        let pool = open_memory_pool().await.expect("pool");
        apply_migrations(&pool).await.expect("apply");
        sqlx::query("UPDATE schema_migrations SET checksum = 'bogus' WHERE version = ?")
            .bind(MIGRATIONS[0].0)
            .execute(&pool)
            .await
            .expect("tamper");

        let err = apply_migrations(&pool).await.expect_err("tamper detected");
        assert!(err.to_string().contains("edited after application"));
    }

    #[test]
    fn checksum_ignores_comments_and_blank_lines() {
        assert_eq!(
            checksum("-- note\nCREATE TABLE a (id TEXT);\n\n"),
            checksum("CREATE TABLE a (id TEXT);")
        );
    }
}
