//! Session/profile cache for one session context.
//!
//! The cache is written only by [`SessionManager`]: by its auth transition
//! handler and by the bootstrap result it applies. Everything else reads
//! snapshots or watches for changes, and asks for a refresh through
//! [`SessionManager::refresh_profile`].

use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    account::{find_profile, BootstrapFailure, BootstrapOutcome, LookupResult, Orchestrator},
    auth::{AuthEvent, AuthProvider},
    identity::{IdentityReader, IdentityTransition},
    model::{Identity, Profile},
    AppError, AppResult,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub identity: Option<Identity>,
    pub session_valid: bool,
    pub profile: Option<Profile>,
    pub loading: bool,
    pub last_error: Option<AppError>,
    pub last_failure: Option<BootstrapFailure>,
}

impl SessionSnapshot {
    fn loading() -> Self {
        Self {
            loading: true,
            ..Self::default()
        }
    }

    pub fn household_id(&self) -> Option<&str> {
        self.profile.as_ref().and_then(|p| p.household_id.as_deref())
    }
}

/// Read side of the cache.
pub struct SessionCache {
    tx: watch::Sender<SessionSnapshot>,
}

impl SessionCache {
    fn new() -> Self {
        let (tx, _) = watch::channel(SessionSnapshot::loading());
        Self { tx }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }

    fn update(&self, f: impl FnOnce(&mut SessionSnapshot)) {
        self.tx.send_modify(f);
    }
}

pub struct SessionManager {
    auth: Arc<dyn AuthProvider>,
    reader: IdentityReader,
    orchestrator: Arc<Orchestrator>,
    cache: Arc<SessionCache>,
}

impl SessionManager {
    pub fn new(auth: Arc<dyn AuthProvider>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            reader: IdentityReader::new(auth.clone()),
            auth,
            orchestrator,
            cache: Arc::new(SessionCache::new()),
        }
    }

    pub fn cache(&self) -> Arc<SessionCache> {
        self.cache.clone()
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Subscribes to auth changes, applies the current session, then keeps
    /// applying transitions on a background task until the handle is shut
    /// down or dropped.
    pub async fn start(self: Arc<Self>) -> SessionHandle {
        let mut transitions = self.reader.subscribe();

        let read = self.reader.current_identity().await;
        self.apply(IdentityTransition {
            event: AuthEvent::InitialSession,
            identity: read.identity,
            session_valid: read.session_valid,
        })
        .await;
        if let Some(error) = read.error {
            self.cache.update(|s| s.last_error = Some(error));
        }

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let manager = Arc::clone(&self);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    next = transitions.next() => match next {
                        Some(transition) => manager.apply(transition).await,
                        None => break,
                    },
                }
            }
            transitions.cancel();
            debug!(target: "homebudget", event = "session_listener_stopped");
        });

        SessionHandle {
            stop: Some(stop_tx),
            task: Some(task),
        }
    }

    async fn apply(&self, transition: IdentityTransition) {
        info!(
            target: "homebudget",
            event = "session_transition",
            auth_event = ?transition.event,
            identity_id = transition.identity.as_ref().map(|i| i.id.as_str()),
            session_valid = transition.session_valid
        );

        let identity = match transition.identity {
            Some(identity) if transition.session_valid => identity,
            _ => {
                self.cache.update(|s| {
                    *s = SessionSnapshot::default();
                });
                return;
            }
        };

        let has_profile = self
            .cache
            .snapshot()
            .profile
            .map(|p| p.id == identity.id)
            .unwrap_or(false);
        self.cache.update(|s| {
            s.identity = Some(identity.clone());
            s.session_valid = true;
            if !has_profile {
                s.profile = None;
            }
        });

        if has_profile {
            self.cache.update(|s| s.loading = false);
            return;
        }
        self.bootstrap(&identity).await;
    }

    async fn bootstrap(&self, identity: &Identity) -> Option<Profile> {
        self.cache.update(|s| s.loading = true);
        let outcome = self.orchestrator.ensure_account_bootstrapped(identity).await;
        let profile = outcome.profile().cloned();
        self.cache.update(|s| {
            // A sign-out may have landed while the bootstrap was suspended.
            if s.identity.as_ref().map(|i| i.id.as_str()) != Some(identity.id.as_str()) {
                return;
            }
            s.loading = false;
            match outcome {
                BootstrapOutcome::Failed(failure) => {
                    s.profile = None;
                    s.last_error = Some(failure.error.clone());
                    s.last_failure = Some(failure);
                }
                other => {
                    s.profile = other.into_profile();
                    s.last_error = None;
                    s.last_failure = None;
                }
            }
        });
        profile
    }

    /// Re-reads the cached profile. With a profile cached this is lookup
    /// only; with none cached it runs the full bootstrap.
    pub async fn refresh_profile(&self) -> Option<Profile> {
        let snapshot = self.cache.snapshot();
        let identity = snapshot.identity?;

        if snapshot.profile.is_none() {
            return self.bootstrap(&identity).await;
        }

        match find_profile(self.orchestrator.store().as_ref(), &identity.id).await {
            LookupResult::Found(profile) => {
                self.cache.update(|s| {
                    s.profile = Some(profile.clone());
                    s.last_error = None;
                });
                Some(profile)
            }
            LookupResult::NotFound => {
                warn!(
                    target: "homebudget",
                    event = "cached_profile_missing",
                    identity_id = %identity.id
                );
                self.cache.update(|s| s.profile = None);
                None
            }
            LookupResult::Error(err) => {
                self.cache.update(|s| s.last_error = Some(err));
                snapshot.profile
            }
        }
    }

    pub async fn sign_out(&self) -> AppResult<()> {
        self.auth.sign_out().await?;
        self.cache.update(|s| {
            *s = SessionSnapshot::default();
        });
        Ok(())
    }
}

/// Owns the transition listener. Dropping it aborts the listener.
pub struct SessionHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
