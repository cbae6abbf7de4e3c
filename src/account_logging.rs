use std::collections::HashMap;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::AppError;

fn context_to_json(context: &HashMap<String, String>) -> Option<Value> {
    if context.is_empty() {
        None
    } else {
        let mut map = Map::with_capacity(context.len());
        for (key, value) in context {
            map.insert(key.clone(), Value::String(value.clone()));
        }
        Some(Value::Object(map))
    }
}

/// Errors the user caused rather than the system; logged at warn.
pub fn is_user_error(code: &str) -> bool {
    code.starts_with("VALIDATION/")
        || code.starts_with("INCOME/INVALID")
        || code == crate::model::AUTH_MISSING_CODE
        || code == crate::model::AUTH_INVALID_CODE
        || code == crate::model::AUTH_INVALID_CREDENTIALS
        || code == crate::model::AUTH_EMAIL_TAKEN
}

fn wrap_details(value: Value) -> Value {
    if value.is_object() {
        value
    } else {
        json!({ "value": value })
    }
}

/// Timed log scope for one account or income command.
pub struct LogScope {
    area: &'static str,
    cmd: &'static str,
    identity_id: Option<String>,
    household_id: Option<String>,
    start: Instant,
}

impl LogScope {
    pub fn new(
        area: &'static str,
        cmd: &'static str,
        identity_id: Option<String>,
        household_id: Option<String>,
    ) -> Self {
        let scope = Self {
            area,
            cmd,
            identity_id,
            household_id,
            start: Instant::now(),
        };
        debug!(
            target: "homebudget",
            area = scope.area,
            cmd = scope.cmd,
            identity_id = scope.identity_id.as_deref(),
            household_id = scope.household_id.as_deref(),
            details = %json!({ "stage": "enter" })
        );
        scope
    }

    fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn resolved_household<'a>(&'a self, override_id: Option<&'a str>) -> Option<&'a str> {
        override_id.or(self.household_id.as_deref())
    }

    pub fn step(&self, details: Value) {
        debug!(
            target: "homebudget",
            area = self.area,
            cmd = self.cmd,
            identity_id = self.identity_id.as_deref(),
            household_id = self.household_id.as_deref(),
            details = %wrap_details(details)
        );
    }

    pub fn success(&self, household_id: Option<&str>, details: Value) {
        info!(
            target: "homebudget",
            area = self.area,
            cmd = self.cmd,
            identity_id = self.identity_id.as_deref(),
            household_id = self.resolved_household(household_id),
            duration_ms = self.elapsed_ms(),
            details = %wrap_details(details)
        );
    }

    pub fn warn(&self, household_id: Option<&str>, details: Value) {
        warn!(
            target: "homebudget",
            area = self.area,
            cmd = self.cmd,
            identity_id = self.identity_id.as_deref(),
            household_id = self.resolved_household(household_id),
            duration_ms = self.elapsed_ms(),
            details = %wrap_details(details)
        );
    }

    pub fn fail(&self, household_id: Option<&str>, err: &AppError) {
        let mut map = Map::new();
        map.insert("code".into(), Value::String(err.code().to_string()));
        map.insert("message".into(), Value::String(err.message().to_string()));
        if let Some(context) = context_to_json(err.context()) {
            map.insert("context".into(), context);
        }
        if let Some(cause) = err.cause() {
            map.insert("cause".into(), Value::String(cause.to_string()));
        }

        if is_user_error(err.code()) {
            self.warn(household_id, Value::Object(map));
            return;
        }

        let details = Value::Object(map);
        error!(
            target: "homebudget",
            area = self.area,
            cmd = self.cmd,
            identity_id = self.identity_id.as_deref(),
            household_id = self.resolved_household(household_id),
            duration_ms = self.elapsed_ms(),
            details = %details
        );
    }
}
