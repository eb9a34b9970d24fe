#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Query contracts for the hosted eviction statistics backend.
//!
//! The backend exposes table-like resources keyed by (feature id, period)
//! and a region-level resource keyed by period. Responses arrive as JSON
//! rows; this crate decodes them into explicit types instead of passing
//! loosely shaped objects around.

use eviction_map_time_models::Period;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumString};

/// Column names shared by every statistics resource.
pub const FILING_COUNT_COLUMN: &str = "filing_count";
/// Rate column name.
pub const FILING_RATE_COLUMN: &str = "filing_rate";

/// Errors decoding a backend row.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowError {
    /// The row is not a JSON object.
    #[error("row is not an object: {row}")]
    NotAnObject {
        /// The offending row, rendered as JSON.
        row: String,
    },

    /// A required column is absent or null.
    #[error("missing column '{column}'")]
    MissingColumn {
        /// Column name.
        column: String,
    },

    /// A column holds a value of the wrong type or range.
    #[error("invalid value for column '{column}': {value}")]
    InvalidValue {
        /// Column name.
        column: String,
        /// The offending value, rendered as JSON.
        value: String,
    },
}

/// Unit the backend stores `filing_rate` in.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RateUnit {
    /// `0.012` means 1.2%.
    Fraction,
    /// `1.2` means 1.2%.
    #[default]
    Percent,
}

impl RateUnit {
    /// Converts a raw backend rate to a percentage.
    #[must_use]
    pub fn to_percent(self, raw: f64) -> f64 {
        match self {
            Self::Fraction => raw * 100.0,
            Self::Percent => raw,
        }
    }
}

/// Hosted backend connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the hosted database (e.g. `https://xyz.supabase.co`).
    pub url: String,
    /// Public API key sent as `apikey` and bearer token.
    #[serde(default)]
    pub api_key: String,
    /// Resource listing the distinct periods that have data.
    pub periods_resource: String,
    /// Region-level resource with per-period totals.
    pub region_resource: String,
    /// Name of the period column in every resource.
    #[serde(default = "default_period_column")]
    pub period_column: String,
    /// Unit of `filing_rate` as stored by the backend.
    #[serde(default)]
    pub rate_unit: RateUnit,
    /// Rows requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_period_column() -> String {
    "month".to_string()
}

const fn default_page_size() -> u32 {
    1000
}

/// Period predicate applied to a statistics query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeriodFilter {
    /// Exactly one period.
    Equals(Period),
    /// Any of a set of periods.
    In(Vec<Period>),
}

impl PeriodFilter {
    /// Renders the predicate as a `PostgREST` operator value, e.g.
    /// `eq.2020-01-01` or `in.(2020-01-01,2020-02-01)`.
    #[must_use]
    pub fn to_operator(&self) -> String {
        match self {
            Self::Equals(period) => format!("eq.{}", period.api_key()),
            Self::In(periods) => {
                let keys = periods
                    .iter()
                    .map(|p| p.api_key())
                    .collect::<Vec<_>>()
                    .join(",");
                format!("in.({keys})")
            }
        }
    }

    /// Periods covered by the predicate.
    #[must_use]
    pub fn periods(&self) -> Vec<Period> {
        match self {
            Self::Equals(period) => vec![*period],
            Self::In(periods) => periods.clone(),
        }
    }
}

/// One (feature, period) statistics row. `filing_rate` is in the
/// backend's [`RateUnit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureStatRow {
    /// Geography-specific feature identifier.
    pub feature_id: String,
    /// Period of the row.
    pub period: Period,
    /// Number of eviction filings.
    pub filing_count: u64,
    /// Raw filing rate.
    pub filing_rate: f64,
}

impl FeatureStatRow {
    /// Decodes a JSON row.
    ///
    /// # Errors
    ///
    /// Returns [`RowError`] if the row is not an object, a column is
    /// missing, or a value is malformed or negative.
    pub fn from_json(row: &Value, id_column: &str, period_column: &str) -> Result<Self, RowError> {
        let obj = as_object(row)?;
        Ok(Self {
            feature_id: id_value(obj, id_column)?,
            period: period_value(obj, period_column)?,
            filing_count: count_value(obj, FILING_COUNT_COLUMN)?,
            filing_rate: rate_value(obj, FILING_RATE_COLUMN)?.unwrap_or(0.0),
        })
    }
}

/// One region-level (all features) row for a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionTotalRow {
    /// Period of the row.
    pub period: Period,
    /// Total eviction filings in the region.
    pub filing_count: u64,
    /// Region-wide raw filing rate, if published.
    pub filing_rate: Option<f64>,
}

impl RegionTotalRow {
    /// Decodes a JSON row.
    ///
    /// # Errors
    ///
    /// Returns [`RowError`] if the row is not an object, a column is
    /// missing, or a value is malformed or negative.
    pub fn from_json(row: &Value, period_column: &str) -> Result<Self, RowError> {
        let obj = as_object(row)?;
        Ok(Self {
            period: period_value(obj, period_column)?,
            filing_count: count_value(obj, FILING_COUNT_COLUMN)?,
            filing_rate: rate_value(obj, FILING_RATE_COLUMN)?,
        })
    }
}

/// Decodes one row of the distinct-periods listing into its raw key.
///
/// Keys stay strings here; the time index owns parsing and recovery.
///
/// # Errors
///
/// Returns [`RowError`] if the row lacks the period column.
pub fn period_key_from_json(row: &Value, period_column: &str) -> Result<String, RowError> {
    let obj = as_object(row)?;
    match obj.get(period_column) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Null) | None => Err(missing(period_column)),
        Some(other) => Err(invalid(period_column, other)),
    }
}

type Object = serde_json::Map<String, Value>;

fn as_object(row: &Value) -> Result<&Object, RowError> {
    row.as_object().ok_or_else(|| RowError::NotAnObject {
        row: row.to_string(),
    })
}

fn missing(column: &str) -> RowError {
    RowError::MissingColumn {
        column: column.to_string(),
    }
}

fn invalid(column: &str, value: &Value) -> RowError {
    RowError::InvalidValue {
        column: column.to_string(),
        value: value.to_string(),
    }
}

/// Ids are strings in some geographies and numbers in others (e.g. tract
/// GEOIDs stored as bigint).
fn id_value(obj: &Object, column: &str) -> Result<String, RowError> {
    match obj.get(column) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Null) | None => Err(missing(column)),
        Some(other) => Err(invalid(column, other)),
    }
}

fn period_value(obj: &Object, column: &str) -> Result<Period, RowError> {
    match obj.get(column) {
        Some(value @ Value::String(s)) => s.parse().map_err(|_| invalid(column, value)),
        Some(Value::Null) | None => Err(missing(column)),
        Some(other) => Err(invalid(column, other)),
    }
}

/// Counts may be serialized as numbers or, for `numeric` columns, strings.
fn count_value(obj: &Object, column: &str) -> Result<u64, RowError> {
    match obj.get(column) {
        Some(value @ Value::Number(n)) => n
            .as_u64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                    .map(|f| {
                        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                        let whole = f as u64;
                        whole
                    })
            })
            .ok_or_else(|| invalid(column, value)),
        Some(value @ Value::String(s)) => s.trim().parse().map_err(|_| invalid(column, value)),
        Some(Value::Null) | None => Err(missing(column)),
        Some(other) => Err(invalid(column, other)),
    }
}

/// A null rate means "not published" and decodes to `None`.
fn rate_value(obj: &Object, column: &str) -> Result<Option<f64>, RowError> {
    let rate = match obj.get(column) {
        Some(value @ Value::Number(n)) => n.as_f64().ok_or_else(|| invalid(column, value))?,
        Some(value @ Value::String(s)) => {
            s.trim().parse::<f64>().map_err(|_| invalid(column, value))?
        }
        Some(Value::Null) | None => return Ok(None),
        Some(other) => return Err(invalid(column, other)),
    };

    if !rate.is_finite() || rate < 0.0 {
        return Err(invalid(column, &Value::from(rate)));
    }
    Ok(Some(rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(year: i32, month: u32) -> Period {
        Period::new(year, month).unwrap()
    }

    #[test]
    fn filter_renders_postgrest_operators() {
        assert_eq!(
            PeriodFilter::Equals(p(2020, 1)).to_operator(),
            "eq.2020-01-01"
        );
        assert_eq!(
            PeriodFilter::In(vec![p(2020, 1), p(2020, 2)]).to_operator(),
            "in.(2020-01-01,2020-02-01)"
        );
    }

    #[test]
    fn decodes_feature_row_with_numeric_id() {
        let row = json!({"geoid": 42_001_000_100_u64, "month": "2020-01-01", "filing_count": 5, "filing_rate": 1.2});
        let decoded = FeatureStatRow::from_json(&row, "geoid", "month").unwrap();
        assert_eq!(decoded.feature_id, "42001000100");
        assert_eq!(decoded.period, p(2020, 1));
        assert_eq!(decoded.filing_count, 5);
        assert!((decoded.filing_rate - 1.2).abs() < f64::EPSILON);
    }

    #[test]
    fn decodes_string_counts_and_null_rate() {
        let row = json!({"zone": "Z1", "month": "2020-3", "filing_count": "12", "filing_rate": null});
        let decoded = FeatureStatRow::from_json(&row, "zone", "month").unwrap();
        assert_eq!(decoded.filing_count, 12);
        assert!(decoded.filing_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_negative_and_missing_values() {
        let negative = json!({"id": "T1", "month": "2020-01", "filing_count": -1, "filing_rate": 0.1});
        assert!(matches!(
            FeatureStatRow::from_json(&negative, "id", "month"),
            Err(RowError::InvalidValue { .. })
        ));

        let negative_rate = json!({"id": "T1", "month": "2020-01", "filing_count": 1, "filing_rate": -0.1});
        assert!(FeatureStatRow::from_json(&negative_rate, "id", "month").is_err());

        let no_id = json!({"month": "2020-01", "filing_count": 1});
        assert_eq!(
            FeatureStatRow::from_json(&no_id, "id", "month"),
            Err(RowError::MissingColumn {
                column: "id".to_string()
            })
        );

        assert!(matches!(
            FeatureStatRow::from_json(&json!([1, 2]), "id", "month"),
            Err(RowError::NotAnObject { .. })
        ));
    }

    #[test]
    fn decodes_region_row() {
        let row = json!({"month": "2021-07-01", "filing_count": 1500.0, "filing_rate": 0.021});
        let decoded = RegionTotalRow::from_json(&row, "month").unwrap();
        assert_eq!(decoded.period, p(2021, 7));
        assert_eq!(decoded.filing_count, 1500);
        assert_eq!(decoded.filing_rate, Some(0.021));
    }

    #[test]
    fn rate_unit_converts_to_percent() {
        assert!((RateUnit::Fraction.to_percent(0.012) - 1.2).abs() < 1e-9);
        assert!((RateUnit::Percent.to_percent(1.2) - 1.2).abs() < 1e-9);
    }

    #[test]
    fn period_listing_keeps_raw_keys() {
        assert_eq!(
            period_key_from_json(&json!({"month": "2020-9"}), "month").unwrap(),
            "2020-9"
        );
        assert!(period_key_from_json(&json!({"month": 202_009}), "month").is_err());
    }
}
