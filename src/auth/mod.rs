//! Auth collaborator boundary.
//!
//! The auth service owns identities and sessions. The rest of the crate only
//! reads them: the current session, a code-for-session exchange used by the
//! email confirmation callback, and a feed of state transitions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::{model::Session, AppResult};

pub mod memory;

pub use memory::MemoryAuth;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// One auth state transition: the event plus the session after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn current_session(&self) -> AppResult<Option<Session>>;

    async fn exchange_code_for_session(&self, code: &str) -> AppResult<Session>;

    async fn sign_out(&self) -> AppResult<()>;

    fn subscribe(&self) -> AuthSubscription;
}

/// Cancellable feed of [`AuthChange`]s. Dropping it unsubscribes.
pub struct AuthSubscription {
    rx: Option<broadcast::Receiver<AuthChange>>,
}

impl AuthSubscription {
    pub fn new(rx: broadcast::Receiver<AuthChange>) -> Self {
        Self { rx: Some(rx) }
    }

    /// Next change, or `None` once cancelled or the provider is gone.
    /// A lagging receiver skips the overwritten changes and keeps going.
    pub async fn next(&mut self) -> Option<AuthChange> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(change) => return Some(change),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target: "homebudget", event = "auth_subscription_lagged", skipped);
                }
                Err(RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    pub fn cancel(&mut self) {
        self.rx = None;
    }

    pub fn is_active(&self) -> bool {
        self.rx.is_some()
    }
}
