use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use super::{AccountStore, StoreError};
use crate::{
    id::new_uuid_v7,
    model::{Household, NewHousehold, NewProfile, OrphanedHousehold, Profile},
    time::now_ms,
};

const PROFILE_COLUMNS: &str =
    "id, household_id, full_name, role, email, avatar_url, created_at, updated_at";
const HOUSEHOLD_COLUMNS: &str = "id, name, created_by, created_at, updated_at";

/// [`AccountStore`] over the local SQLite schema.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn get_household(&self, id: &str) -> Result<Option<Household>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {HOUSEHOLD_COLUMNS} FROM households WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(decode_household).transpose()
    }

    pub async fn profiles_in_household(
        &self,
        household_id: &str,
    ) -> Result<Vec<Profile>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM user_profiles WHERE household_id = ? ORDER BY created_at, id"
        ))
        .bind(household_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(decode_profile).collect()
    }

    pub async fn count_households(&self) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM households")
            .fetch_one(&self.pool)
            .await?)
    }

    /// Every household that no profile references, oldest first.
    pub async fn orphaned_households(&self) -> Result<Vec<OrphanedHousehold>, StoreError> {
        let rows = sqlx::query(
            "SELECT h.id, h.name, h.created_by, h.created_at, h.updated_at FROM households h \
             WHERE NOT EXISTS (SELECT 1 FROM user_profiles p WHERE p.household_id = h.id) \
             ORDER BY h.created_at, h.id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| decode_household(row).map(|household| OrphanedHousehold { household }))
            .collect()
    }
}

pub(crate) fn decode_profile(row: SqliteRow) -> Result<Profile, StoreError> {
    Ok(Profile {
        id: row.try_get("id")?,
        household_id: row.try_get("household_id")?,
        full_name: row.try_get("full_name")?,
        role: row.try_get("role")?,
        email: row.try_get("email")?,
        avatar_url: row.try_get("avatar_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn decode_household(row: SqliteRow) -> Result<Household, StoreError> {
    Ok(Household {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl AccountStore for SqliteStore {
    async fn find_profile(&self, identity_id: &str) -> Result<Option<Profile>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM user_profiles WHERE id = ?"
        ))
        .bind(identity_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(decode_profile).transpose()
    }

    async fn insert_household(&self, household: NewHousehold) -> Result<Household, StoreError> {
        let now = now_ms();
        let record = Household {
            id: new_uuid_v7(),
            name: household.name,
            created_by: household.created_by,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO households (id, name, created_by, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.created_by)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(record)
    }

    async fn insert_profile(&self, profile: NewProfile) -> Result<Profile, StoreError> {
        let now = now_ms();
        let record = Profile {
            id: profile.id,
            household_id: Some(profile.household_id),
            full_name: profile.full_name,
            role: profile.role,
            email: profile.email,
            avatar_url: None,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO user_profiles (id, household_id, full_name, role, email, avatar_url, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.household_id)
        .bind(&record.full_name)
        .bind(&record.role)
        .bind(&record.email)
        .bind(&record.avatar_url)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(record)
    }

    async fn orphaned_households_for(
        &self,
        identity_id: &str,
    ) -> Result<Vec<Household>, StoreError> {
        let rows = sqlx::query(
            "SELECT h.id, h.name, h.created_by, h.created_at, h.updated_at FROM households h \
             WHERE h.created_by = ? \
               AND NOT EXISTS (SELECT 1 FROM user_profiles p WHERE p.household_id = h.id) \
             ORDER BY h.created_at, h.id",
        )
        .bind(identity_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(decode_household).collect()
    }
}
