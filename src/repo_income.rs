use futures::FutureExt;
use serde_json::json;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::{
    account_logging::LogScope,
    db::run_in_tx,
    id::new_uuid_v7,
    model_income::{
        IncomeEntryInput, IncomeOverview, IncomeSourceInput, IncomeSourceSummary,
        INCOME_DECODE_ERROR, INCOME_FREQUENCIES, INCOME_INVALID_AMOUNT, INCOME_INVALID_DATE,
        INCOME_INVALID_FREQUENCY, INCOME_INVALID_KIND, INCOME_INVALID_NAME, INCOME_KINDS,
        INCOME_SOURCE_NOT_FOUND, MAX_NAME_CHARS, RECENT_ENTRY_LIMIT, RECENT_ENTRY_MONTHS,
        VALIDATION_HOUSEHOLD_MISMATCH, VALIDATION_PROFILE_MISSING,
    },
    time::{month_key, months_back, now_ms, parse_day},
    AppError, AppResult,
};

pub use crate::model_income::{IncomeEntry, IncomeSource};

const SOURCE_COLUMNS: &str =
    "id, household_id, user_id, name, kind, is_recurring, frequency, amount_cents, created_at";
const ENTRY_COLUMNS: &str = "id, income_source_id, amount_cents, date, description, created_at";

fn decode_error(err: sqlx::Error, what: &str) -> AppError {
    AppError::new(INCOME_DECODE_ERROR, format!("Invalid {what} row"))
        .with_context("error", err.to_string())
}

fn deserialize_source(row: SqliteRow) -> AppResult<IncomeSource> {
    let is_recurring: i64 = row
        .try_get("is_recurring")
        .map_err(|err| decode_error(err, "income source"))?;
    let get = |column: &str| -> AppResult<String> {
        row.try_get(column)
            .map_err(|err| decode_error(err, "income source"))
    };
    Ok(IncomeSource {
        id: get("id")?,
        household_id: get("household_id")?,
        user_id: get("user_id")?,
        name: get("name")?,
        kind: get("kind")?,
        is_recurring: is_recurring != 0,
        frequency: row.try_get("frequency").ok().flatten(),
        amount_cents: row.try_get("amount_cents").ok().flatten(),
        created_at: row
            .try_get("created_at")
            .map_err(|err| decode_error(err, "income source"))?,
    })
}

fn deserialize_entry(row: SqliteRow) -> AppResult<IncomeEntry> {
    let map = |err| decode_error(err, "income entry");
    Ok(IncomeEntry {
        id: row.try_get("id").map_err(map)?,
        income_source_id: row.try_get("income_source_id").map_err(map)?,
        amount_cents: row.try_get("amount_cents").map_err(map)?,
        date: row.try_get("date").map_err(map)?,
        description: row.try_get("description").ok().flatten(),
        created_at: row.try_get("created_at").map_err(map)?,
    })
}

fn validate_name(name: &str) -> AppResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::new(
            INCOME_INVALID_NAME,
            "Income sources need a name.",
        ));
    }
    if trimmed.chars().count() > MAX_NAME_CHARS {
        return Err(AppError::new(
            INCOME_INVALID_NAME,
            "Income source names are limited to 120 characters.",
        )
        .with_context("length", trimmed.chars().count().to_string()));
    }
    Ok(trimmed.to_string())
}

fn validate_kind(kind: &str) -> AppResult<()> {
    if INCOME_KINDS.contains(&kind) {
        Ok(())
    } else {
        Err(
            AppError::new(INCOME_INVALID_KIND, "Income type not recognised.")
                .with_context("kind", kind.to_string()),
        )
    }
}

/// Recurring sources need a known frequency; one-off sources never store one.
fn resolve_frequency(is_recurring: bool, frequency: Option<String>) -> AppResult<Option<String>> {
    if !is_recurring {
        return Ok(None);
    }
    match frequency {
        Some(value) if INCOME_FREQUENCIES.contains(&value.as_str()) => Ok(Some(value)),
        Some(value) => Err(AppError::new(
            INCOME_INVALID_FREQUENCY,
            "Payment frequency not recognised.",
        )
        .with_context("frequency", value)),
        None => Err(AppError::new(
            INCOME_INVALID_FREQUENCY,
            "Recurring income needs a payment frequency.",
        )),
    }
}

fn validate_expected_amount(amount_cents: Option<i64>) -> AppResult<()> {
    match amount_cents {
        Some(amount) if amount < 0 => Err(AppError::new(
            INCOME_INVALID_AMOUNT,
            "Expected amount cannot be negative.",
        )
        .with_context("amount_cents", amount.to_string())),
        _ => Ok(()),
    }
}

fn validate_entry_amount(amount_cents: i64) -> AppResult<()> {
    if amount_cents > 0 {
        Ok(())
    } else {
        Err(
            AppError::new(INCOME_INVALID_AMOUNT, "Amount must be greater than zero.")
                .with_context("amount_cents", amount_cents.to_string()),
        )
    }
}

fn validate_date(date: &str) -> AppResult<String> {
    parse_day(date.trim())
        .map(|day| day.format("%Y-%m-%d").to_string())
        .ok_or_else(|| {
            AppError::new(INCOME_INVALID_DATE, "Dates must use YYYY-MM-DD.")
                .with_context("date", date.to_string())
        })
}

async fn ensure_profile_in_household(
    pool: &SqlitePool,
    household_id: &str,
    user_id: &str,
) -> AppResult<()> {
    let found: Option<Option<String>> =
        sqlx::query_scalar("SELECT household_id FROM user_profiles WHERE id = ?")
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    match found {
        Some(Some(found)) if found == household_id => Ok(()),
        Some(found) => Err(AppError::new(
            VALIDATION_HOUSEHOLD_MISMATCH,
            "Profile belongs to a different household.",
        )
        .with_context("expected", household_id.to_string())
        .with_context("actual", found.unwrap_or_default())
        .with_context("user_id", user_id.to_string())),
        None => Err(
            AppError::new(VALIDATION_PROFILE_MISSING, "Profile record not found.")
                .with_context("user_id", user_id.to_string()),
        ),
    }
}

fn source_not_found(id: &str) -> AppError {
    AppError::new(INCOME_SOURCE_NOT_FOUND, "Income source not found.")
        .with_context("id", id.to_string())
}

pub async fn income_source_get(pool: &SqlitePool, id: &str) -> AppResult<IncomeSource> {
    let row = sqlx::query(&format!(
        "SELECT {SOURCE_COLUMNS} FROM income_sources WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    match row {
        Some(row) => deserialize_source(row),
        None => Err(source_not_found(id)),
    }
}

pub async fn income_source_create(
    pool: &SqlitePool,
    input: IncomeSourceInput,
) -> AppResult<IncomeSource> {
    let scope = LogScope::new(
        "income",
        "income_source_create",
        Some(input.user_id.clone()),
        Some(input.household_id.clone()),
    );
    let result = create_source(pool, input).await;
    match &result {
        Ok(source) => scope.success(None, json!({ "id": source.id, "kind": source.kind })),
        Err(err) => scope.fail(None, err),
    }
    result
}

async fn create_source(pool: &SqlitePool, input: IncomeSourceInput) -> AppResult<IncomeSource> {
    let IncomeSourceInput {
        household_id,
        user_id,
        name,
        kind,
        is_recurring,
        frequency,
        amount_cents,
    } = input;

    let name = validate_name(&name)?;
    validate_kind(&kind)?;
    let frequency = resolve_frequency(is_recurring, frequency)?;
    validate_expected_amount(amount_cents)?;
    ensure_profile_in_household(pool, &household_id, &user_id).await?;

    let source = IncomeSource {
        id: new_uuid_v7(),
        household_id,
        user_id,
        name,
        kind,
        is_recurring,
        frequency,
        amount_cents,
        created_at: now_ms(),
    };

    sqlx::query(
        "INSERT INTO income_sources \
         (id, household_id, user_id, name, kind, is_recurring, frequency, amount_cents, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(&source.id)
    .bind(&source.household_id)
    .bind(&source.user_id)
    .bind(&source.name)
    .bind(&source.kind)
    .bind(if source.is_recurring { 1 } else { 0 })
    .bind(&source.frequency)
    .bind(source.amount_cents)
    .bind(source.created_at)
    .execute(pool)
    .await?;

    Ok(source)
}

/// Deletes a source together with its entries.
pub async fn income_source_delete(pool: &SqlitePool, id: &str) -> AppResult<()> {
    let scope = LogScope::new("income", "income_source_delete", None, None);
    let owned_id = id.to_string();

    let result: AppResult<u64> = run_in_tx(pool, |tx| {
        async move {
            let entries = sqlx::query("DELETE FROM income_entries WHERE income_source_id = ?")
                .bind(&owned_id)
                .execute(&mut **tx)
                .await?
                .rows_affected();
            let deleted = sqlx::query("DELETE FROM income_sources WHERE id = ?")
                .bind(&owned_id)
                .execute(&mut **tx)
                .await?
                .rows_affected();
            if deleted == 0 {
                return Err(source_not_found(&owned_id));
            }
            Ok(entries)
        }
        .boxed()
    })
    .await;

    match result {
        Ok(entries) => {
            scope.success(None, json!({ "id": id, "entries_deleted": entries }));
            Ok(())
        }
        Err(err) => {
            scope.fail(None, &err);
            Err(err)
        }
    }
}

pub async fn income_entry_add(pool: &SqlitePool, input: IncomeEntryInput) -> AppResult<IncomeEntry> {
    let scope = LogScope::new("income", "income_entry_add", None, None);
    let result = add_entry(pool, input).await;
    match &result {
        Ok(entry) => scope.success(
            None,
            json!({ "id": entry.id, "income_source_id": entry.income_source_id }),
        ),
        Err(err) => scope.fail(None, err),
    }
    result
}

async fn add_entry(pool: &SqlitePool, input: IncomeEntryInput) -> AppResult<IncomeEntry> {
    validate_entry_amount(input.amount_cents)?;
    let date = validate_date(&input.date)?;
    income_source_get(pool, &input.income_source_id).await?;

    let entry = IncomeEntry {
        id: new_uuid_v7(),
        income_source_id: input.income_source_id,
        amount_cents: input.amount_cents,
        date,
        description: input
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
        created_at: now_ms(),
    };

    sqlx::query(
        "INSERT INTO income_entries (id, income_source_id, amount_cents, date, description, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(&entry.id)
    .bind(&entry.income_source_id)
    .bind(entry.amount_cents)
    .bind(&entry.date)
    .bind(&entry.description)
    .bind(entry.created_at)
    .execute(pool)
    .await?;

    Ok(entry)
}

pub async fn income_sources_list(pool: &SqlitePool, household_id: &str) -> AppResult<IncomeOverview> {
    income_sources_list_at(pool, household_id, now_ms()).await
}

/// Sources for a household, newest first, each with its entries from the
/// last three months (at most five) and the total for the month of `now`.
pub async fn income_sources_list_at(
    pool: &SqlitePool,
    household_id: &str,
    now: i64,
) -> AppResult<IncomeOverview> {
    let rows = sqlx::query(&format!(
        "SELECT {SOURCE_COLUMNS} FROM income_sources WHERE household_id = ? \
         ORDER BY created_at DESC, id DESC"
    ))
    .bind(household_id)
    .fetch_all(pool)
    .await?;

    let since = months_back(now, RECENT_ENTRY_MONTHS)
        .format("%Y-%m-%d")
        .to_string();
    let month = month_key(now);

    let mut summaries = Vec::with_capacity(rows.len());
    for row in rows {
        let source = deserialize_source(row)?;

        let recent_entries = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM income_entries \
             WHERE income_source_id = ? AND date >= ? \
             ORDER BY date DESC, created_at DESC LIMIT ?"
        ))
        .bind(&source.id)
        .bind(&since)
        .bind(RECENT_ENTRY_LIMIT)
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(deserialize_entry)
        .collect::<AppResult<Vec<_>>>()?;

        let monthly_total_cents: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM income_entries \
             WHERE income_source_id = ? AND substr(date, 1, 7) = ?",
        )
        .bind(&source.id)
        .bind(&month)
        .fetch_one(pool)
        .await?;

        summaries.push(IncomeSourceSummary {
            source,
            recent_entries,
            monthly_total_cents,
        });
    }

    Ok(IncomeOverview::from_sources(summaries))
}
