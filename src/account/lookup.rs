use tracing::debug;

use crate::{model::Profile, store::AccountStore, AppError};

/// Profile lookup result. `NotFound` is an expected outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    Found(Profile),
    NotFound,
    Error(AppError),
}

pub async fn find_profile(store: &dyn AccountStore, identity_id: &str) -> LookupResult {
    match store.find_profile(identity_id).await {
        Ok(Some(profile)) => LookupResult::Found(profile),
        Ok(None) => {
            debug!(target: "homebudget", event = "profile_not_found", identity_id);
            LookupResult::NotFound
        }
        Err(err) => LookupResult::Error(
            AppError::from(err).with_context("identity_id", identity_id.to_string()),
        ),
    }
}
