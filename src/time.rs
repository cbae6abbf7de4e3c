use chrono::{DateTime, Months, NaiveDate, Utc};

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn to_date(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// `YYYY-MM` for the month containing `ms`.
pub fn month_key(ms: i64) -> String {
    to_date(ms).format("%Y-%m").to_string()
}

/// First calendar day still inside the trailing window of `months` months.
pub fn months_back(ms: i64, months: u32) -> NaiveDate {
    let today = to_date(ms).date_naive();
    today
        .checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDate::MIN)
}

pub fn parse_day(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_reasonable() {
        let a = now_ms();
        assert!(a > 1_500_000_000_000);
        assert!(a < 4_100_000_000_000);
    }

    #[test]
    fn month_key_formats_year_and_month() {
        // 2024-03-15T00:00:00Z
        assert_eq!(month_key(1_710_460_800_000), "2024-03");
    }

    #[test]
    fn months_back_clamps_to_month_end() {
        // 2024-05-31T00:00:00Z
        let back = months_back(1_717_113_600_000, 3);
        assert_eq!(back, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    #[test]
    fn parse_day_rejects_bad_input() {
        assert!(parse_day("2024-02-30").is_none());
        assert!(parse_day("yesterday").is_none());
        assert_eq!(parse_day("2024-02-29"), NaiveDate::from_ymd_opt(2024, 2, 29));
    }
}
