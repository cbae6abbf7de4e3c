use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tracing::info;

use super::{AuthChange, AuthEvent, AuthProvider, AuthSubscription};
use crate::{
    id::{new_token, new_uuid_v7},
    model::{
        Identity, Session, AUTH_EMAIL_NOT_CONFIRMED, AUTH_EMAIL_TAKEN, AUTH_INVALID_CODE,
        AUTH_INVALID_CREDENTIALS, AUTH_MISSING_CODE, AUTH_NO_SESSION, MIN_PASSWORD_LEN,
        VALIDATION_EMAIL, VALIDATION_PASSWORD,
    },
    time::now_ms,
    AppError, AppResult,
};

pub const DEFAULT_SESSION_TTL_MS: i64 = 60 * 60 * 1000;
const CHANGE_FEED_CAPACITY: usize = 64;

struct UserRecord {
    identity: Identity,
    salt: String,
    password_hash: String,
    confirmed: bool,
}

#[derive(Default)]
struct AuthState {
    users_by_email: HashMap<String, UserRecord>,
    pending_codes: HashMap<String, String>,
    current: Option<Session>,
    session_error: Option<AppError>,
}

/// Outcome of [`MemoryAuth::sign_up`]. With auto-confirm on, a session is
/// issued immediately; otherwise a confirmation code is.
#[derive(Debug, Clone)]
pub struct SignUp {
    pub identity: Identity,
    pub confirmation_code: Option<String>,
    pub session: Option<Session>,
}

/// In-process auth service with password accounts, email confirmation codes
/// and a broadcast change feed.
pub struct MemoryAuth {
    state: Mutex<AuthState>,
    changes: broadcast::Sender<AuthChange>,
    session_ttl_ms: i64,
    auto_confirm: bool,
}

impl Default for MemoryAuth {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL_MS, false)
    }
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn normalize_email(email: &str) -> AppResult<String> {
    let trimmed = email.trim().to_lowercase();
    match trimmed.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(trimmed),
        _ => Err(AppError::new(VALIDATION_EMAIL, "Enter a valid email address.")
            .with_context("email", email.to_string())),
    }
}

impl MemoryAuth {
    pub fn new(session_ttl_ms: i64, auto_confirm: bool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            state: Mutex::new(AuthState::default()),
            changes,
            session_ttl_ms,
            auto_confirm,
        }
    }

    fn lock(&self) -> MutexGuard<'_, AuthState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, event: AuthEvent, session: Option<Session>) {
        // No subscribers is fine.
        let _ = self.changes.send(AuthChange { event, session });
    }

    fn issue_session(&self, state: &mut AuthState, identity: Identity) -> Session {
        let session = Session {
            access_token: new_token(),
            identity,
            expires_at: now_ms() + self.session_ttl_ms,
        };
        state.current = Some(session.clone());
        session
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> AppResult<SignUp> {
        let email = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::new(
                VALIDATION_PASSWORD,
                format!("Password must be at least {MIN_PASSWORD_LEN} characters long"),
            ));
        }

        let signed_up = {
            let mut state = self.lock();
            if state.users_by_email.contains_key(&email) {
                return Err(AppError::new(
                    AUTH_EMAIL_TAKEN,
                    "An account with that email already exists.",
                ));
            }
            let identity = Identity::new(new_uuid_v7(), Some(&email));
            let salt = new_token();
            state.users_by_email.insert(
                email.clone(),
                UserRecord {
                    identity: identity.clone(),
                    password_hash: hash_password(&salt, password),
                    salt,
                    confirmed: self.auto_confirm,
                },
            );

            if self.auto_confirm {
                let session = self.issue_session(&mut state, identity.clone());
                SignUp {
                    identity,
                    confirmation_code: None,
                    session: Some(session),
                }
            } else {
                let code = new_token();
                state.pending_codes.insert(code.clone(), email.clone());
                SignUp {
                    identity,
                    confirmation_code: Some(code),
                    session: None,
                }
            }
        };

        info!(
            target: "homebudget",
            event = "auth_sign_up",
            identity_id = %signed_up.identity.id,
            confirmed = signed_up.session.is_some()
        );
        if let Some(session) = &signed_up.session {
            self.publish(AuthEvent::SignedIn, Some(session.clone()));
        }
        Ok(signed_up)
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> AppResult<Session> {
        let email = normalize_email(email)?;
        let session = {
            let mut state = self.lock();
            let identity = match state.users_by_email.get(&email) {
                Some(user) if user.password_hash == hash_password(&user.salt, password) => {
                    if !user.confirmed {
                        return Err(AppError::new(
                            AUTH_EMAIL_NOT_CONFIRMED,
                            "Please confirm your email before logging in.",
                        ));
                    }
                    user.identity.clone()
                }
                _ => {
                    return Err(AppError::new(
                        AUTH_INVALID_CREDENTIALS,
                        "Invalid email or password.",
                    ))
                }
            };
            self.issue_session(&mut state, identity)
        };
        self.publish(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    /// Replaces the access token and extends expiry.
    pub async fn refresh_session(&self) -> AppResult<Session> {
        let session = {
            let mut state = self.lock();
            let identity = match &state.current {
                Some(current) => current.identity.clone(),
                None => return Err(AppError::new(AUTH_NO_SESSION, "No active session.")),
            };
            self.issue_session(&mut state, identity)
        };
        self.publish(AuthEvent::TokenRefreshed, Some(session.clone()));
        Ok(session)
    }

    /// Marks the current session as already expired.
    pub fn expire_session(&self) {
        let mut state = self.lock();
        if let Some(session) = state.current.as_mut() {
            session.expires_at = now_ms() - 1;
        }
    }

    /// The next `current_session` call fails with `error`.
    pub fn fail_next_session_read(&self, error: AppError) {
        self.lock().session_error = Some(error);
    }
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    async fn current_session(&self) -> AppResult<Option<Session>> {
        let mut state = self.lock();
        if let Some(error) = state.session_error.take() {
            return Err(error);
        }
        Ok(state.current.clone())
    }

    async fn exchange_code_for_session(&self, code: &str) -> AppResult<Session> {
        let code = code.trim();
        if code.is_empty() {
            return Err(AppError::new(
                AUTH_MISSING_CODE,
                "No authentication code found",
            ));
        }
        let session = {
            let mut state = self.lock();
            let email = state.pending_codes.remove(code).ok_or_else(|| {
                AppError::new(AUTH_INVALID_CODE, "Authentication failed")
                    .with_context("reason", "unknown or used confirmation code")
            })?;
            let identity = match state.users_by_email.get_mut(&email) {
                Some(user) => {
                    user.confirmed = true;
                    user.identity.clone()
                }
                None => return Err(AppError::new(AUTH_INVALID_CODE, "Authentication failed")),
            };
            self.issue_session(&mut state, identity)
        };
        info!(
            target: "homebudget",
            event = "auth_code_exchanged",
            identity_id = %session.identity.id
        );
        self.publish(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> AppResult<()> {
        let had_session = self.lock().current.take().is_some();
        if had_session {
            self.publish(AuthEvent::SignedOut, None);
        }
        Ok(())
    }

    fn subscribe(&self) -> AuthSubscription {
        AuthSubscription::new(self.changes.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_up_requires_confirmation_then_code_signs_in() {
        let auth = MemoryAuth::default();
        let mut changes = auth.subscribe();

        let signed_up = auth
            .sign_up("Alice@Example.com", "secret1")
            .await
            .expect("sign up");
        assert_eq!(signed_up.identity.email.as_deref(), Some("alice@example.com"));
        assert!(signed_up.session.is_none());

        let err = auth
            .sign_in_with_password("alice@example.com", "secret1")
            .await
            .expect_err("unconfirmed");
        assert_eq!(err.code(), AUTH_EMAIL_NOT_CONFIRMED);

        let code = signed_up.confirmation_code.expect("code issued");
        let session = auth.exchange_code_for_session(&code).await.expect("exchange");
        assert_eq!(session.identity, signed_up.identity);

        let change = changes.next().await.expect("change published");
        assert_eq!(change.event, AuthEvent::SignedIn);

        let reused = auth
            .exchange_code_for_session(&code)
            .await
            .expect_err("codes are single use");
        assert_eq!(reused.code(), AUTH_INVALID_CODE);
    }

    #[tokio::test]
    async fn rejects_short_password_and_bad_email() {
        let auth = MemoryAuth::default();
        let err = auth.sign_up("a@b.c", "12345").await.expect_err("short");
        assert_eq!(err.code(), VALIDATION_PASSWORD);
        let err = auth.sign_up("not-an-email", "123456").await.expect_err("email");
        assert_eq!(err.code(), VALIDATION_EMAIL);
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials() {
        let auth = MemoryAuth::new(DEFAULT_SESSION_TTL_MS, true);
        auth.sign_up("bob@example.com", "hunter22").await.expect("sign up");
        let err = auth
            .sign_in_with_password("bob@example.com", "hunter23")
            .await
            .expect_err("wrong password");
        assert_eq!(err.code(), AUTH_INVALID_CREDENTIALS);
    }

    #[tokio::test]
    async fn sign_out_publishes_and_clears() {
        let auth = MemoryAuth::new(DEFAULT_SESSION_TTL_MS, true);
        auth.sign_up("carol@example.com", "hunter22").await.expect("sign up");
        let mut changes = auth.subscribe();
        auth.sign_out().await.expect("sign out");

        let change = changes.next().await.expect("signed out");
        assert_eq!(change.event, AuthEvent::SignedOut);
        assert!(change.session.is_none());
        assert!(auth.current_session().await.expect("read").is_none());
    }

    #[tokio::test]
    async fn cancelled_subscription_yields_nothing() {
        let auth = MemoryAuth::default();
        let mut changes = auth.subscribe();
        changes.cancel();
        assert!(!changes.is_active());
        assert!(changes.next().await.is_none());
    }
}
