//! The "ensure profile exists" state machine.
//!
//! ```text
//! Idle -> LookingUp -> Found ----------------------------------> Done
//!                   -> NotFound -> CreatingHousehold -> CreatingProfile -> Done
//!                   -> Error -> Failed(lookup)    |                  |
//!                                    Failed(household)        DuplicateKey -> LookingUp (once)
//!                                                             other error  -> Failed(profile)
//! ```
//!
//! Steps are strictly sequential. Runs on one [`Orchestrator`] are serialized;
//! runs on different orchestrators sharing a store race, and the profile
//! primary key decides the winner. The loser re-reads the winner's profile
//! and leaves its own household orphaned.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;

use super::lookup::{find_profile, LookupResult};
use super::provision::{create_household, create_profile, ProvisionError};
use crate::{
    account_logging::LogScope,
    model::{
        Household, Identity, NewProfile, Profile, ACCOUNT_HOUSEHOLD_FAILED, ACCOUNT_LOOKUP_FAILED,
        ACCOUNT_PARTIAL_SETUP, STORE_DUPLICATE_KEY, STORE_UNAVAILABLE,
    },
    store::AccountStore,
    AppError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapStage {
    Lookup,
    Household,
    Profile,
}

impl BootstrapStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootstrapStage::Lookup => "lookup",
            BootstrapStage::Household => "household",
            BootstrapStage::Profile => "profile",
        }
    }
}

impl std::fmt::Display for BootstrapStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapState {
    Idle,
    LookingUp,
    CreatingHousehold,
    CreatingProfile { household_id: String },
    Done,
    Failed(BootstrapStage),
}

impl BootstrapState {
    /// Interim status a caller can show while the run is suspended.
    pub fn status_message(&self) -> &'static str {
        match self {
            BootstrapState::Idle => "",
            BootstrapState::LookingUp => "Checking your account...",
            BootstrapState::CreatingHousehold => "Setting up your account...",
            BootstrapState::CreatingProfile { .. } => "Creating your profile...",
            BootstrapState::Done => "Success! Redirecting to dashboard...",
            BootstrapState::Failed(BootstrapStage::Lookup) => "Account lookup failed",
            BootstrapState::Failed(BootstrapStage::Household) => "Household setup failed",
            BootstrapState::Failed(BootstrapStage::Profile) => "Profile setup failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connectivity or availability; retrying later may succeed.
    Transient,
    /// Household written, profile not. Needs operator follow-up.
    PartialSetup,
    Store,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapFailure {
    pub stage: BootstrapStage,
    pub kind: FailureKind,
    pub error: AppError,
    pub orphaned_household_id: Option<String>,
}

impl BootstrapFailure {
    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Transient
    }

    pub fn user_message(&self) -> String {
        match (self.stage, self.kind) {
            (_, FailureKind::PartialSetup) => {
                "Profile setup failed. Please contact support so we can finish setting up your account."
                    .to_string()
            }
            (stage, FailureKind::Transient) => format!(
                "{}. The service is temporarily unavailable, please try again.",
                BootstrapState::Failed(stage).status_message()
            ),
            (stage, FailureKind::Store) => format!(
                "{}. Please try again.",
                BootstrapState::Failed(stage).status_message()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BootstrapOutcome {
    AlreadyExists(Profile),
    Created { profile: Profile, household: Household },
    Failed(BootstrapFailure),
}

impl BootstrapOutcome {
    pub fn profile(&self) -> Option<&Profile> {
        match self {
            BootstrapOutcome::AlreadyExists(profile) => Some(profile),
            BootstrapOutcome::Created { profile, .. } => Some(profile),
            BootstrapOutcome::Failed(_) => None,
        }
    }

    pub fn into_profile(self) -> Option<Profile> {
        match self {
            BootstrapOutcome::AlreadyExists(profile) => Some(profile),
            BootstrapOutcome::Created { profile, .. } => Some(profile),
            BootstrapOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&BootstrapFailure> {
        match self {
            BootstrapOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BootstrapOutcome::AlreadyExists(_) => "already_exists",
            BootstrapOutcome::Created { .. } => "created",
            BootstrapOutcome::Failed(_) => "failed",
        }
    }
}

fn kind_for(error: &AppError) -> FailureKind {
    if error.has_code(STORE_UNAVAILABLE) {
        FailureKind::Transient
    } else {
        FailureKind::Store
    }
}

/// Runs account bootstrap for one session context.
pub struct Orchestrator {
    store: Arc<dyn AccountStore>,
    in_flight: tokio::sync::Mutex<()>,
    state_tx: watch::Sender<BootstrapState>,
    history: Mutex<Vec<BootstrapState>>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        let (state_tx, _) = watch::channel(BootstrapState::Idle);
        Self {
            store,
            in_flight: tokio::sync::Mutex::new(()),
            state_tx,
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    pub fn state(&self) -> BootstrapState {
        self.state_tx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<BootstrapState> {
        self.state_tx.subscribe()
    }

    /// States visited by the most recent run, `Idle` first.
    pub fn last_run_states(&self) -> Vec<BootstrapState> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn enter(&self, state: BootstrapState) {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(state.clone());
        self.state_tx.send_replace(state);
    }

    fn fail(
        &self,
        scope: &LogScope,
        stage: BootstrapStage,
        kind: FailureKind,
        error: AppError,
        orphaned_household_id: Option<String>,
    ) -> BootstrapOutcome {
        self.enter(BootstrapState::Failed(stage));
        scope.fail(orphaned_household_id.as_deref(), &error);
        BootstrapOutcome::Failed(BootstrapFailure {
            stage,
            kind,
            error,
            orphaned_household_id,
        })
    }

    /// Looks the profile up and, only on a confirmed miss, provisions a
    /// household and a profile. Never retries on its own; calling again after
    /// a failure starts over at the lookup.
    pub async fn ensure_account_bootstrapped(&self, identity: &Identity) -> BootstrapOutcome {
        let _in_flight = self.in_flight.lock().await;
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.enter(BootstrapState::Idle);

        let scope = LogScope::new(
            "account",
            "ensure_account_bootstrapped",
            Some(identity.id.clone()),
            None,
        );
        let store = self.store.as_ref();

        self.enter(BootstrapState::LookingUp);
        match find_profile(store, &identity.id).await {
            LookupResult::Found(profile) => {
                self.enter(BootstrapState::Done);
                scope.success(
                    profile.household_id.as_deref(),
                    json!({ "outcome": "already_exists" }),
                );
                return BootstrapOutcome::AlreadyExists(profile);
            }
            LookupResult::NotFound => {}
            LookupResult::Error(err) => {
                let kind = kind_for(&err);
                let error = AppError::new(ACCOUNT_LOOKUP_FAILED, "Account lookup failed")
                    .with_cause(err);
                return self.fail(&scope, BootstrapStage::Lookup, kind, error, None);
            }
        }

        self.enter(BootstrapState::CreatingHousehold);
        let household = match create_household(store, identity).await {
            Ok(household) => household,
            Err(err) => {
                let kind = kind_for(&err);
                let error = AppError::new(ACCOUNT_HOUSEHOLD_FAILED, "Household setup failed")
                    .with_cause(err);
                return self.fail(&scope, BootstrapStage::Household, kind, error, None);
            }
        };
        scope.step(json!({ "stage": "household_created", "household_id": household.id }));

        self.enter(BootstrapState::CreatingProfile {
            household_id: household.id.clone(),
        });
        match create_profile(store, NewProfile::for_owner(identity, &household.id)).await {
            Ok(profile) => {
                self.enter(BootstrapState::Done);
                scope.success(Some(&household.id), json!({ "outcome": "created" }));
                BootstrapOutcome::Created { profile, household }
            }
            Err(ProvisionError::DuplicateKey { .. }) => {
                scope.warn(
                    Some(&household.id),
                    json!({
                        "stage": "profile_race_lost",
                        "orphaned_household_id": household.id,
                    }),
                );
                self.resolve_lost_race(&scope, identity, household).await
            }
            Err(ProvisionError::Store(err)) => {
                let error = AppError::new(ACCOUNT_PARTIAL_SETUP, "Profile setup failed")
                    .with_context("household_id", household.id.clone())
                    .with_cause(err);
                self.fail(
                    &scope,
                    BootstrapStage::Profile,
                    FailureKind::PartialSetup,
                    error,
                    Some(household.id),
                )
            }
        }
    }

    async fn resolve_lost_race(
        &self,
        scope: &LogScope,
        identity: &Identity,
        household: Household,
    ) -> BootstrapOutcome {
        self.enter(BootstrapState::LookingUp);
        match find_profile(self.store.as_ref(), &identity.id).await {
            LookupResult::Found(profile) => {
                self.enter(BootstrapState::Done);
                scope.success(
                    profile.household_id.as_deref(),
                    json!({
                        "outcome": "already_exists",
                        "orphaned_household_id": household.id,
                    }),
                );
                BootstrapOutcome::AlreadyExists(profile)
            }
            LookupResult::NotFound => {
                let error = AppError::new(STORE_DUPLICATE_KEY, "Profile setup failed")
                    .with_context("reason", "duplicate key reported but no profile found")
                    .with_context("household_id", household.id.clone());
                self.fail(
                    scope,
                    BootstrapStage::Profile,
                    FailureKind::Store,
                    error,
                    Some(household.id),
                )
            }
            LookupResult::Error(err) => {
                let kind = kind_for(&err);
                let error = AppError::new(ACCOUNT_LOOKUP_FAILED, "Account lookup failed")
                    .with_context("household_id", household.id.clone())
                    .with_cause(err);
                self.fail(scope, BootstrapStage::Lookup, kind, error, Some(household.id))
            }
        }
    }
}
