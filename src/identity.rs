use std::sync::Arc;

use tracing::warn;

use crate::{
    auth::{AuthEvent, AuthProvider, AuthSubscription},
    model::{Identity, Session},
    time::now_ms,
    AppError,
};

/// Result of reading the current identity. Collaborator failures land in
/// `error` with `identity` cleared; they are never returned as `Err`.
#[derive(Debug, Clone, Default)]
pub struct IdentityRead {
    pub identity: Option<Identity>,
    pub session_valid: bool,
    pub error: Option<AppError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityTransition {
    pub event: AuthEvent,
    pub identity: Option<Identity>,
    pub session_valid: bool,
}

fn identity_of(session: Option<&Session>) -> (Option<Identity>, bool) {
    match session {
        Some(session) => (Some(session.identity.clone()), session.is_valid_at(now_ms())),
        None => (None, false),
    }
}

/// Reads identity and session validity from the auth collaborator.
#[derive(Clone)]
pub struct IdentityReader {
    auth: Arc<dyn AuthProvider>,
}

impl IdentityReader {
    pub fn new(auth: Arc<dyn AuthProvider>) -> Self {
        Self { auth }
    }

    pub async fn current_identity(&self) -> IdentityRead {
        match self.auth.current_session().await {
            Ok(session) => {
                let (identity, session_valid) = identity_of(session.as_ref());
                // An expired session does not identify anyone.
                IdentityRead {
                    identity: identity.filter(|_| session_valid),
                    session_valid,
                    error: None,
                }
            }
            Err(error) => {
                warn!(
                    target: "homebudget",
                    event = "identity_read_failed",
                    code = error.code(),
                    error = %error
                );
                IdentityRead {
                    identity: None,
                    session_valid: false,
                    error: Some(error),
                }
            }
        }
    }

    pub fn subscribe(&self) -> IdentityTransitions {
        IdentityTransitions {
            inner: self.auth.subscribe(),
        }
    }
}

/// Cancellable stream of identity transitions derived from auth changes.
pub struct IdentityTransitions {
    inner: AuthSubscription,
}

impl IdentityTransitions {
    pub async fn next(&mut self) -> Option<IdentityTransition> {
        let change = self.inner.next().await?;
        let (identity, session_valid) = identity_of(change.session.as_ref());
        Some(IdentityTransition {
            event: change.event,
            identity,
            session_valid,
        })
    }

    pub fn cancel(&mut self) {
        self.inner.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryAuth;
    use crate::auth::memory::DEFAULT_SESSION_TTL_MS;

    #[tokio::test]
    async fn no_session_reads_as_none_without_error() {
        let reader = IdentityReader::new(Arc::new(MemoryAuth::default()));
        let read = reader.current_identity().await;
        assert!(read.identity.is_none());
        assert!(!read.session_valid);
        assert!(read.error.is_none());
    }

    #[tokio::test]
    async fn collaborator_error_is_surfaced_not_thrown() {
        let auth = Arc::new(MemoryAuth::default());
        auth.fail_next_session_read(AppError::new("AUTH/UNAVAILABLE", "down"));
        let reader = IdentityReader::new(auth);

        let read = reader.current_identity().await;
        assert!(read.identity.is_none());
        assert_eq!(read.error.map(|e| e.code), Some("AUTH/UNAVAILABLE".to_string()));
    }

    #[tokio::test]
    async fn expired_session_has_no_identity() {
        let auth = Arc::new(MemoryAuth::new(DEFAULT_SESSION_TTL_MS, true));
        auth.sign_up("dana@example.com", "hunter22").await.expect("sign up");
        let reader = IdentityReader::new(auth.clone());
        assert!(reader.current_identity().await.identity.is_some());

        auth.expire_session();
        let read = reader.current_identity().await;
        assert!(read.identity.is_none());
        assert!(!read.session_valid);
    }

    #[tokio::test]
    async fn transitions_carry_identity() {
        let auth = Arc::new(MemoryAuth::new(DEFAULT_SESSION_TTL_MS, true));
        let reader = IdentityReader::new(auth.clone());
        let mut transitions = reader.subscribe();

        let signed_up = auth.sign_up("erin@example.com", "hunter22").await.expect("sign up");
        let transition = transitions.next().await.expect("transition");
        assert_eq!(transition.event, AuthEvent::SignedIn);
        assert_eq!(transition.identity, Some(signed_up.identity));
        assert!(transition.session_valid);
    }
}
