use std::time::Duration;

use serde_json::json;

use crate::{
    account::{BootstrapFailure, BootstrapOutcome, Orchestrator},
    account_logging::LogScope,
    auth::AuthProvider,
    model::{Profile, AUTH_MISSING_CODE},
    AppError,
};

pub const LOGIN_ROUTE: &str = "/login";
pub const DASHBOARD_ROUTE: &str = "/dashboard";
pub const MISSING_CODE_DELAY: Duration = Duration::from_secs(2);
pub const FAILURE_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackResult {
    Ready(Profile),
    MissingCode,
    AuthFailed(AppError),
    SetupFailed(BootstrapFailure),
}

/// What the confirmation page should show and where it should go next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackOutcome {
    pub status: String,
    pub redirect_to: &'static str,
    pub delay: Duration,
    pub result: CallbackResult,
}

impl CallbackOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self.result, CallbackResult::Ready(_))
    }
}

/// Email confirmation callback: exchange the code for a session, then make
/// sure the account is bootstrapped. A missing code returns before either
/// collaborator is contacted.
pub async fn handle_confirmation_callback(
    auth: &dyn AuthProvider,
    orchestrator: &Orchestrator,
    code: Option<&str>,
) -> CallbackOutcome {
    let scope = LogScope::new("auth", "confirmation_callback", None, None);

    let code = match code.map(str::trim) {
        Some(code) if !code.is_empty() => code,
        _ => {
            scope.fail(
                None,
                &AppError::new(AUTH_MISSING_CODE, "No authentication code found"),
            );
            return CallbackOutcome {
                status: "No authentication code found".to_string(),
                redirect_to: LOGIN_ROUTE,
                delay: MISSING_CODE_DELAY,
                result: CallbackResult::MissingCode,
            };
        }
    };

    let session = match auth.exchange_code_for_session(code).await {
        Ok(session) => session,
        Err(err) => {
            scope.fail(None, &err);
            return CallbackOutcome {
                status: "Authentication failed".to_string(),
                redirect_to: LOGIN_ROUTE,
                delay: FAILURE_DELAY,
                result: CallbackResult::AuthFailed(err),
            };
        }
    };

    let outcome = orchestrator
        .ensure_account_bootstrapped(&session.identity)
        .await;
    let label = outcome.label();
    match outcome {
        BootstrapOutcome::Failed(failure) => CallbackOutcome {
            status: failure.user_message(),
            redirect_to: LOGIN_ROUTE,
            delay: FAILURE_DELAY,
            result: CallbackResult::SetupFailed(failure),
        },
        BootstrapOutcome::AlreadyExists(profile) | BootstrapOutcome::Created { profile, .. } => {
            scope.success(
                profile.household_id.as_deref(),
                json!({ "identity_id": session.identity.id, "bootstrap": label }),
            );
            CallbackOutcome {
                status: "Success! Redirecting to dashboard...".to_string(),
                redirect_to: DASHBOARD_ROUTE,
                delay: Duration::ZERO,
                result: CallbackResult::Ready(profile),
            }
        }
    }
}
