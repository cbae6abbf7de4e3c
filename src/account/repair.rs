use serde::Serialize;
use serde_json::json;

use super::bootstrap::{BootstrapOutcome, Orchestrator};
use super::lookup::{find_profile, LookupResult};
use super::provision::{create_profile, ProvisionError};
use crate::{
    account_logging::LogScope,
    model::{Household, Identity, NewProfile, Profile, ACCOUNT_PROFILE_FAILED},
    AppError, AppResult,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "repair", rename_all = "snake_case")]
pub enum RepairOutcome {
    /// The identity already has a profile; nothing was written.
    AlreadyHealthy(Profile),
    /// A profile was attached to a household this identity created earlier
    /// whose profile insert had failed.
    Reattached { profile: Profile, household: Household },
    /// No orphan to reuse; ran the regular bootstrap.
    Bootstrapped(BootstrapOutcome),
}

/// Manual repair for accounts left without a profile. Unlike bootstrap, this
/// reuses the oldest orphaned household created by the same identity.
pub async fn repair_account(
    orchestrator: &Orchestrator,
    identity: &Identity,
) -> AppResult<RepairOutcome> {
    let scope = LogScope::new("account", "repair_account", Some(identity.id.clone()), None);
    let store = orchestrator.store().as_ref();

    match find_profile(store, &identity.id).await {
        LookupResult::Found(profile) => {
            scope.success(
                profile.household_id.as_deref(),
                json!({ "outcome": "already_healthy" }),
            );
            return Ok(RepairOutcome::AlreadyHealthy(profile));
        }
        LookupResult::NotFound => {}
        LookupResult::Error(err) => {
            scope.fail(None, &err);
            return Err(err);
        }
    }

    let orphans = store
        .orphaned_households_for(&identity.id)
        .await
        .map_err(AppError::from)?;
    let Some(household) = orphans.into_iter().next() else {
        scope.step(json!({ "stage": "no_orphan", "action": "bootstrap" }));
        let outcome = orchestrator.ensure_account_bootstrapped(identity).await;
        scope.success(
            outcome.profile().and_then(|p| p.household_id.as_deref()),
            json!({ "outcome": "bootstrapped", "bootstrap": outcome.label() }),
        );
        return Ok(RepairOutcome::Bootstrapped(outcome));
    };

    match create_profile(store, NewProfile::for_owner(identity, &household.id)).await {
        Ok(profile) => {
            scope.success(Some(&household.id), json!({ "outcome": "reattached" }));
            Ok(RepairOutcome::Reattached { profile, household })
        }
        Err(ProvisionError::DuplicateKey { .. }) => match find_profile(store, &identity.id).await {
            LookupResult::Found(profile) => Ok(RepairOutcome::AlreadyHealthy(profile)),
            LookupResult::NotFound => Err(AppError::new(
                ACCOUNT_PROFILE_FAILED,
                "Profile setup failed",
            )
            .with_context("household_id", household.id)),
            LookupResult::Error(err) => Err(err),
        },
        Err(ProvisionError::Store(err)) => {
            let error = AppError::new(ACCOUNT_PROFILE_FAILED, "Profile setup failed")
                .with_context("household_id", household.id.clone())
                .with_cause(err);
            scope.fail(Some(&household.id), &error);
            Err(error)
        }
    }
}
