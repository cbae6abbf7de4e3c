//! Account bootstrap: make sure an authenticated identity has a profile and
//! a household.

pub mod bootstrap;
pub mod lookup;
pub mod provision;
pub mod repair;

pub use bootstrap::{
    BootstrapFailure, BootstrapOutcome, BootstrapStage, BootstrapState, FailureKind, Orchestrator,
};
pub use lookup::{find_profile, LookupResult};
pub use provision::{create_household, create_profile, household_name_for, ProvisionError};
pub use repair::{repair_account, RepairOutcome};
