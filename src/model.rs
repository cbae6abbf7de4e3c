use serde::{Deserialize, Serialize};

pub const ACCOUNT_PROFILE_NOT_FOUND: &str = "ACCOUNT/PROFILE_NOT_FOUND";
pub const ACCOUNT_PARTIAL_SETUP: &str = "ACCOUNT/PARTIAL_SETUP";
pub const ACCOUNT_LOOKUP_FAILED: &str = "ACCOUNT/LOOKUP_FAILED";
pub const ACCOUNT_HOUSEHOLD_FAILED: &str = "ACCOUNT/HOUSEHOLD_FAILED";
pub const ACCOUNT_PROFILE_FAILED: &str = "ACCOUNT/PROFILE_FAILED";

pub const STORE_DUPLICATE_KEY: &str = "STORE/DUPLICATE_KEY";
pub const STORE_UNAVAILABLE: &str = "STORE/UNAVAILABLE";
pub const STORE_DECODE: &str = "STORE/DECODE";
pub const STORE_FAILURE: &str = "STORE/FAILURE";

pub const AUTH_MISSING_CODE: &str = "AUTH/MISSING_CODE";
pub const AUTH_INVALID_CODE: &str = "AUTH/INVALID_CODE";
pub const AUTH_INVALID_CREDENTIALS: &str = "AUTH/INVALID_CREDENTIALS";
pub const AUTH_EMAIL_TAKEN: &str = "AUTH/EMAIL_TAKEN";
pub const AUTH_NO_SESSION: &str = "AUTH/NO_SESSION";
pub const AUTH_EMAIL_NOT_CONFIRMED: &str = "AUTH/EMAIL_NOT_CONFIRMED";

pub const VALIDATION_EMAIL: &str = "VALIDATION/EMAIL";
pub const VALIDATION_PASSWORD: &str = "VALIDATION/PASSWORD";

pub const DEFAULT_ROLE: &str = "admin";
pub const FALLBACK_DISPLAY_NAME: &str = "User";
pub const FALLBACK_HOUSEHOLD_NAME: &str = "User's Household";
pub const MIN_PASSWORD_LEN: usize = 6;

/// The authenticated principal as issued by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>, email: Option<&str>) -> Self {
        Self {
            id: id.into(),
            email: email.map(str::to_owned),
        }
    }

    /// The part of the email before `@`, when there is a non-blank one.
    pub fn email_local_part(&self) -> Option<&str> {
        let email = self.email.as_deref()?;
        let local = email.split('@').next().unwrap_or_default().trim();
        if local.is_empty() {
            None
        } else {
            Some(local)
        }
    }

    pub fn display_name(&self) -> String {
        self.email_local_part()
            .unwrap_or(FALLBACK_DISPLAY_NAME)
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub identity: Identity,
    pub expires_at: i64,
}

impl Session {
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Household {
    pub id: String,
    pub name: String,
    pub created_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Profile {
    pub id: String,
    pub household_id: Option<String>,
    pub full_name: String,
    pub role: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHousehold {
    pub name: String,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProfile {
    pub id: String,
    pub household_id: String,
    pub full_name: String,
    pub role: String,
    pub email: Option<String>,
}

impl NewProfile {
    /// Self-registration defaults: admin role, name from the email local part.
    pub fn for_owner(identity: &Identity, household_id: &str) -> Self {
        Self {
            id: identity.id.clone(),
            household_id: household_id.to_string(),
            full_name: identity.display_name(),
            role: DEFAULT_ROLE.to_string(),
            email: identity.email.clone(),
        }
    }
}

/// A household with no profile pointing at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanedHousehold {
    pub household: Household,
}
