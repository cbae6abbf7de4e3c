#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::Barrier;

use homebudget_lib::{
    db::open_memory_pool,
    migrate::apply_migrations,
    model::{Household, Identity, NewHousehold, NewProfile, Profile},
    store::{AccountStore, SqliteStore, StoreError},
};

pub async fn memory_pool() -> SqlitePool {
    let pool = open_memory_pool().await.expect("open sqlite::memory:");
    apply_migrations(&pool).await.expect("apply migrations");
    pool
}

pub async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .expect("count rows")
}

pub fn alice() -> Identity {
    Identity::new("u-alice", Some("alice@example.com"))
}

/// [`SqliteStore`] wrapper that counts calls and fails on request.
pub struct FlakyStore {
    inner: SqliteStore,
    lookup_failures: Mutex<VecDeque<StoreError>>,
    household_failure: Mutex<Option<StoreError>>,
    profile_failure: Mutex<Option<StoreError>>,
    lookup_barrier: Mutex<Option<(Arc<Barrier>, usize)>>,
    lookups: AtomicUsize,
    writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteStore::new(pool),
            lookup_failures: Mutex::new(VecDeque::new()),
            household_failure: Mutex::new(None),
            profile_failure: Mutex::new(None),
            lookup_barrier: Mutex::new(None),
            lookups: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        })
    }

    pub fn inner(&self) -> &SqliteStore {
        &self.inner
    }

    pub fn fail_next_lookup(&self, error: StoreError) {
        self.lookup_failures.lock().unwrap().push_back(error);
    }

    pub fn fail_next_household(&self, error: StoreError) {
        *self.household_failure.lock().unwrap() = Some(error);
    }

    pub fn fail_next_profile(&self, error: StoreError) {
        *self.profile_failure.lock().unwrap() = Some(error);
    }

    /// The next `uses` lookups each wait on `barrier` after reading.
    pub fn hold_lookups(&self, barrier: Arc<Barrier>, uses: usize) {
        *self.lookup_barrier.lock().unwrap() = Some((barrier, uses));
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Insert attempts, failed ones included.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn take_barrier(&self) -> Option<Arc<Barrier>> {
        let mut slot = self.lookup_barrier.lock().unwrap();
        match slot.as_mut() {
            Some((barrier, uses)) if *uses > 0 => {
                *uses -= 1;
                Some(barrier.clone())
            }
            _ => None,
        }
    }
}

#[async_trait]
impl AccountStore for FlakyStore {
    async fn find_profile(&self, identity_id: &str) -> Result<Option<Profile>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let failure = self.lookup_failures.lock().unwrap().pop_front();
        if let Some(error) = failure {
            return Err(error);
        }
        let barrier = self.take_barrier();
        let found = self.inner.find_profile(identity_id).await;
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        found
    }

    async fn insert_household(&self, household: NewHousehold) -> Result<Household, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let failure = self.household_failure.lock().unwrap().take();
        if let Some(error) = failure {
            return Err(error);
        }
        self.inner.insert_household(household).await
    }

    async fn insert_profile(&self, profile: NewProfile) -> Result<Profile, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let failure = self.profile_failure.lock().unwrap().take();
        if let Some(error) = failure {
            return Err(error);
        }
        self.inner.insert_profile(profile).await
    }

    async fn orphaned_households_for(
        &self,
        identity_id: &str,
    ) -> Result<Vec<Household>, StoreError> {
        self.inner.orphaned_households_for(identity_id).await
    }
}
