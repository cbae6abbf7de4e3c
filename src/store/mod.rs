//! Relational store boundary used by account bootstrap.
//!
//! The store owns durable rows and enforces the one constraint bootstrap
//! depends on: a profile id is unique. Implementations must report a
//! violation of that constraint as [`StoreError::DuplicateKey`], because
//! the orchestrator resolves it by re-reading instead of failing.

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    model::{
        Household, NewHousehold, NewProfile, Profile, STORE_DECODE, STORE_DUPLICATE_KEY,
        STORE_FAILURE, STORE_UNAVAILABLE,
    },
    AppError,
};

pub mod sqlite;

pub use sqlite::SqliteStore;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("duplicate key on {constraint}")]
    DuplicateKey { constraint: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("row could not be decoded: {0}")]
    Decode(String),
    #[error("store failure: {0}")]
    Other(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::DuplicateKey { .. } => STORE_DUPLICATE_KEY,
            StoreError::Unavailable(_) => STORE_UNAVAILABLE,
            StoreError::Decode(_) => STORE_DECODE,
            StoreError::Other(_) => STORE_FAILURE,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateKey {
                constraint: db
                    .constraint()
                    .map(str::to_owned)
                    .unwrap_or_else(|| db.message().to_string()),
            },
            sqlx::Error::Database(db) if is_busy_or_locked(db.code().as_deref()) => {
                StoreError::Unavailable(error.to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(error.to_string())
            }
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_) => StoreError::Decode(error.to_string()),
            _ => StoreError::Other(error.to_string()),
        }
    }
}

/// SQLITE_BUSY (5) and SQLITE_LOCKED (6), including their extended codes.
fn is_busy_or_locked(code: Option<&str>) -> bool {
    matches!(
        code.and_then(|c| c.parse::<i32>().ok()).map(|c| c & 0xff),
        Some(5 | 6)
    )
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        let message = match &error {
            StoreError::DuplicateKey { .. } => "That record already exists.".to_string(),
            StoreError::Unavailable(_) => {
                "The service is temporarily unavailable. Please try again.".to_string()
            }
            other => other.to_string(),
        };
        let mut app = AppError::new(error.code(), message);
        match error {
            StoreError::DuplicateKey { constraint } => {
                app = app.with_context("constraint", constraint);
            }
            StoreError::Unavailable(detail)
            | StoreError::Decode(detail)
            | StoreError::Other(detail) => {
                app = app.with_context("detail", detail);
            }
        }
        app
    }
}

/// Queries and inserts the bootstrap sequence needs from the relational store.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Zero rows is `Ok(None)`; only real failures are `Err`.
    async fn find_profile(&self, identity_id: &str) -> Result<Option<Profile>, StoreError>;

    /// Inserts a household with a store-generated id.
    async fn insert_household(&self, household: NewHousehold) -> Result<Household, StoreError>;

    /// Fails with [`StoreError::DuplicateKey`] when the profile id is taken.
    async fn insert_profile(&self, profile: NewProfile) -> Result<Profile, StoreError>;

    /// Households created by `identity_id` that no profile references.
    async fn orphaned_households_for(
        &self,
        identity_id: &str,
    ) -> Result<Vec<Household>, StoreError>;
}
