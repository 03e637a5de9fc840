//! Row-decoding helpers shared by the stores.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::any::AnyRow;
use sqlx::Row;

use crate::error::StoreError;

pub(crate) fn to_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn to_ts_opt(dt: &Option<DateTime<Utc>>) -> Option<String> {
    dt.as_ref().map(to_ts)
}

pub(crate) fn parse_ts(raw: &str, col: &'static str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::Timestamp(raw.to_string(), col))
}

pub(crate) fn ts(row: &AnyRow, col: &'static str) -> Result<DateTime<Utc>, StoreError> {
    let raw: String = row.try_get(col)?;
    parse_ts(&raw, col)
}

pub(crate) fn ts_opt(row: &AnyRow, col: &'static str) -> Result<Option<DateTime<Utc>>, StoreError> {
    let raw: Option<String> = row.try_get(col)?;
    raw.map(|s| parse_ts(&s, col)).transpose()
}

pub(crate) fn json_col<T: DeserializeOwned>(
    row: &AnyRow,
    col: &'static str,
) -> Result<T, StoreError> {
    let raw: String = row.try_get(col)?;
    Ok(serde_json::from_str(&raw)?)
}

pub(crate) fn json_str<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    Ok(serde_json::to_string(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_roundtrip() {
        let now = Utc::now();
        let parsed = parse_ts(&to_ts(&now), "t").unwrap();
        assert_eq!(parsed.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn bad_timestamp_is_reported_with_column() {
        let err = parse_ts("not-a-date", "created_at").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("created_at"));
        assert!(msg.contains("not-a-date"));
    }
}
