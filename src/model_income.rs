use serde::{Deserialize, Serialize};

pub const INCOME_INVALID_KIND: &str = "INCOME/INVALID_KIND";
pub const INCOME_INVALID_FREQUENCY: &str = "INCOME/INVALID_FREQUENCY";
pub const INCOME_INVALID_AMOUNT: &str = "INCOME/INVALID_AMOUNT";
pub const INCOME_INVALID_DATE: &str = "INCOME/INVALID_DATE";
pub const INCOME_INVALID_NAME: &str = "INCOME/INVALID_NAME";
pub const INCOME_SOURCE_NOT_FOUND: &str = "INCOME/SOURCE_NOT_FOUND";
pub const INCOME_DECODE_ERROR: &str = "INCOME/DECODE";

pub const VALIDATION_HOUSEHOLD_MISMATCH: &str = "VALIDATION/HOUSEHOLD_MISMATCH";
pub const VALIDATION_PROFILE_MISSING: &str = "VALIDATION/PROFILE_NOT_FOUND";

pub const INCOME_KINDS: &[&str] = &[
    "salary",
    "freelance",
    "business",
    "investment",
    "rental",
    "other",
];
pub const INCOME_FREQUENCIES: &[&str] = &["weekly", "bi-weekly", "monthly", "quarterly", "yearly"];

pub const RECENT_ENTRY_MONTHS: u32 = 3;
pub const RECENT_ENTRY_LIMIT: i64 = 5;
pub const MAX_NAME_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IncomeSource {
    pub id: String,
    pub household_id: String,
    pub user_id: String,
    pub name: String,
    pub kind: String,
    pub is_recurring: bool,
    pub frequency: Option<String>,
    pub amount_cents: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IncomeEntry {
    pub id: String,
    pub income_source_id: String,
    pub amount_cents: i64,
    pub date: String,
    pub description: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomeSourceInput {
    #[serde(alias = "householdId")]
    pub household_id: String,
    #[serde(alias = "userId")]
    pub user_id: String,
    pub name: String,
    #[serde(alias = "type")]
    pub kind: String,
    #[serde(default = "default_recurring", alias = "isRecurring")]
    pub is_recurring: bool,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default, alias = "amountCents")]
    pub amount_cents: Option<i64>,
}

fn default_recurring() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomeEntryInput {
    #[serde(alias = "incomeSourceId")]
    pub income_source_id: String,
    #[serde(alias = "amountCents")]
    pub amount_cents: i64,
    pub date: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A source with the entries shown on its card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct IncomeSourceSummary {
    #[serde(flatten)]
    pub source: IncomeSource,
    pub recent_entries: Vec<IncomeEntry>,
    pub monthly_total_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct IncomeOverview {
    pub sources: Vec<IncomeSourceSummary>,
    pub monthly_total_cents: i64,
    pub yearly_projected_cents: i64,
}

impl IncomeOverview {
    pub fn from_sources(sources: Vec<IncomeSourceSummary>) -> Self {
        let monthly_total_cents: i64 = sources.iter().map(|s| s.monthly_total_cents).sum();
        Self {
            sources,
            monthly_total_cents,
            yearly_projected_cents: monthly_total_cents.saturating_mul(12),
        }
    }
}
