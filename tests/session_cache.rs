#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use std::sync::Arc;
use std::time::Duration;

use homebudget_lib::{
    account::Orchestrator,
    auth::{AuthProvider, MemoryAuth},
    model::{AUTH_NO_SESSION, STORE_UNAVAILABLE},
    session::{SessionManager, SessionSnapshot},
    store::StoreError,
    AppError,
};
use tokio::sync::{watch, Barrier};

use util::{count, memory_pool, FlakyStore};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    pool: sqlx::SqlitePool,
    store: Arc<FlakyStore>,
    auth: Arc<MemoryAuth>,
    manager: Arc<SessionManager>,
}

async fn harness() -> Harness {
    let pool = memory_pool().await;
    let store = FlakyStore::new(pool.clone());
    let auth = Arc::new(MemoryAuth::new(60_000, true));
    let orchestrator = Arc::new(Orchestrator::new(store.clone()));
    let provider: Arc<dyn AuthProvider> = auth.clone();
    let manager = Arc::new(SessionManager::new(provider, orchestrator));
    Harness {
        pool,
        store,
        auth,
        manager,
    }
}

async fn wait_until(
    rx: &mut watch::Receiver<SessionSnapshot>,
    f: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    tokio::time::timeout(WAIT, rx.wait_for(f))
        .await
        .expect("snapshot condition in time")
        .expect("cache alive")
        .clone()
}

#[tokio::test]
async fn no_session_settles_empty() {
    let h = harness().await;
    let handle = h.manager.clone().start().await;

    let snapshot = h.manager.cache().snapshot();
    assert_eq!(snapshot, SessionSnapshot::default());
    assert_eq!(h.store.lookups(), 0);
    handle.shutdown().await;
}

#[tokio::test]
async fn sign_in_bootstraps_and_sign_out_clears() {
    let h = harness().await;
    let handle = h.manager.clone().start().await;
    let mut rx = h.manager.cache().subscribe();

    let signed_up = h.auth.sign_up("carol@example.com", "hunter22").await.unwrap();
    let snapshot = wait_until(&mut rx, |s| s.profile.is_some()).await;

    let profile = snapshot.profile.clone().unwrap();
    assert_eq!(profile.id, signed_up.identity.id);
    assert_eq!(profile.full_name, "carol");
    assert!(snapshot.session_valid);
    assert!(!snapshot.loading);
    assert_eq!(snapshot.household_id(), profile.household_id.as_deref());
    assert_eq!(count(&h.pool, "user_profiles").await, 1);

    h.manager.sign_out().await.unwrap();
    let cleared = h.manager.cache().snapshot();
    assert_eq!(cleared.profile, None);
    assert_eq!(cleared.identity, None);

    handle.shutdown().await;
}

#[tokio::test]
async fn existing_session_is_applied_during_start() {
    let h = harness().await;
    h.auth.sign_up("dave@example.com", "hunter22").await.unwrap();

    let handle = h.manager.clone().start().await;
    let snapshot = h.manager.cache().snapshot();
    assert_eq!(snapshot.profile.map(|p| p.full_name), Some("dave".to_string()));
    assert!(!snapshot.loading);
    handle.shutdown().await;
}

#[tokio::test]
async fn refresh_with_cached_profile_is_lookup_only() {
    let h = harness().await;
    h.auth.sign_up("erin@example.com", "hunter22").await.unwrap();
    let handle = h.manager.clone().start().await;

    let writes = h.store.writes();
    let lookups = h.store.lookups();
    let refreshed = h.manager.refresh_profile().await.expect("profile");
    assert_eq!(refreshed.full_name, "erin");
    assert_eq!(h.store.writes(), writes);
    assert_eq!(h.store.lookups(), lookups + 1);
    handle.shutdown().await;
}

#[tokio::test]
async fn refresh_after_failed_bootstrap_runs_it_again() {
    let h = harness().await;
    h.auth.sign_up("frank@example.com", "hunter22").await.unwrap();
    h.store
        .fail_next_lookup(StoreError::Unavailable("pool timed out".into()));

    let handle = h.manager.clone().start().await;
    let snapshot = h.manager.cache().snapshot();
    assert_eq!(snapshot.profile, None);
    let failure = snapshot.last_failure.expect("failure cached");
    assert!(failure.is_retryable());
    assert!(snapshot
        .last_error
        .expect("error cached")
        .has_code(STORE_UNAVAILABLE));

    let profile = h.manager.refresh_profile().await.expect("profile");
    assert_eq!(profile.full_name, "frank");
    let snapshot = h.manager.cache().snapshot();
    assert_eq!(snapshot.last_failure, None);
    assert_eq!(snapshot.profile, Some(profile));
    handle.shutdown().await;
}

#[tokio::test]
async fn expired_session_counts_as_signed_out() {
    let h = harness().await;
    h.auth.sign_up("gina@example.com", "hunter22").await.unwrap();
    h.auth.expire_session();

    let handle = h.manager.clone().start().await;
    let snapshot = h.manager.cache().snapshot();
    assert_eq!(snapshot.identity, None);
    assert_eq!(snapshot.profile, None);
    assert_eq!(h.store.lookups(), 0);
    handle.shutdown().await;
}

#[tokio::test]
async fn session_read_error_is_cached_not_raised() {
    let h = harness().await;
    h.auth
        .fail_next_session_read(AppError::new(AUTH_NO_SESSION, "auth backend offline"));

    let handle = h.manager.clone().start().await;
    let snapshot = h.manager.cache().snapshot();
    assert_eq!(snapshot.identity, None);
    assert_eq!(
        snapshot.last_error.map(|e| e.code().to_string()),
        Some(AUTH_NO_SESSION.to_string())
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn sign_out_event_from_provider_clears_cache() {
    let h = harness().await;
    h.auth.sign_up("hana@example.com", "hunter22").await.unwrap();
    let handle = h.manager.clone().start().await;
    let mut rx = h.manager.cache().subscribe();
    assert!(h.manager.cache().snapshot().profile.is_some());

    h.auth.sign_out().await.unwrap();
    let snapshot = wait_until(&mut rx, |s| s.identity.is_none()).await;
    assert_eq!(snapshot.profile, None);
    handle.shutdown().await;
}

#[tokio::test]
async fn token_refresh_keeps_cached_profile_without_lookup() {
    let h = harness().await;
    h.auth.sign_up("ines@example.com", "hunter22").await.unwrap();
    let handle = h.manager.clone().start().await;
    let before = h.manager.cache().snapshot();
    assert!(before.profile.is_some());
    let lookups = h.store.lookups();

    let mut rx = h.manager.cache().subscribe();
    let refreshed = h.auth.refresh_session().await.unwrap();
    assert_eq!(refreshed.identity, before.identity.clone().unwrap());
    tokio::time::timeout(WAIT, rx.changed())
        .await
        .expect("transition applied")
        .expect("cache alive");
    // Shutdown waits for the transition in flight to finish.
    handle.shutdown().await;

    let after = h.manager.cache().snapshot();
    assert_eq!(after.profile, before.profile);
    assert!(after.session_valid);
    assert!(!after.loading);
    assert_eq!(h.store.lookups(), lookups);
}

#[tokio::test]
async fn bootstrap_result_after_sign_out_is_discarded() {
    let h = harness().await;
    h.auth.sign_up("jude@example.com", "hunter22").await.unwrap();
    h.store
        .fail_next_lookup(StoreError::Unavailable("pool timed out".into()));
    let handle = h.manager.clone().start().await;
    // Only this test drives the cache from here on.
    handle.shutdown().await;
    assert!(h.manager.cache().snapshot().identity.is_some());
    assert_eq!(h.manager.cache().snapshot().profile, None);

    let barrier = Arc::new(Barrier::new(2));
    h.store.hold_lookups(barrier.clone(), 1);
    let lookups = h.store.lookups();
    let manager = h.manager.clone();
    let refresh = tokio::spawn(async move { manager.refresh_profile().await });

    tokio::time::timeout(WAIT, async {
        while h.store.lookups() == lookups {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("bootstrap lookup started");

    h.manager.sign_out().await.unwrap();
    barrier.wait().await;
    let profile = refresh.await.unwrap().expect("bootstrap still completes");
    assert_eq!(profile.full_name, "jude");
    assert_eq!(count(&h.pool, "user_profiles").await, 1);

    assert_eq!(h.manager.cache().snapshot(), SessionSnapshot::default());
}
