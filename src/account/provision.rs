use thiserror::Error;

use crate::{
    model::{Household, Identity, NewHousehold, NewProfile, Profile, FALLBACK_HOUSEHOLD_NAME},
    store::{AccountStore, StoreError},
    AppError, AppResult,
};

/// `"<local-part>'s Household"`, or the static fallback without a usable email.
pub fn household_name_for(identity: &Identity) -> String {
    match identity.email_local_part() {
        Some(local) => format!("{local}'s Household"),
        None => FALLBACK_HOUSEHOLD_NAME.to_string(),
    }
}

/// Creates a household owned by `identity`. Not idempotent: each call inserts
/// a new row.
pub async fn create_household(store: &dyn AccountStore, identity: &Identity) -> AppResult<Household> {
    store
        .insert_household(NewHousehold {
            name: household_name_for(identity),
            created_by: Some(identity.id.clone()),
        })
        .await
        .map_err(|err| AppError::from(err).with_context("identity_id", identity.id.clone()))
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("a profile already exists for {identity_id}")]
    DuplicateKey { identity_id: String },
    #[error(transparent)]
    Store(AppError),
}

pub async fn create_profile(
    store: &dyn AccountStore,
    profile: NewProfile,
) -> Result<Profile, ProvisionError> {
    let identity_id = profile.id.clone();
    store.insert_profile(profile).await.map_err(|err| match err {
        StoreError::DuplicateKey { .. } => ProvisionError::DuplicateKey { identity_id },
        other => ProvisionError::Store(
            AppError::from(other).with_context("identity_id", identity_id),
        ),
    })
}
