#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Year-month period types for the eviction map time axis.
//!
//! A [`Period`] is a single calendar month. Periods are always compared
//! through their integer sort key (`year * 100 + month`), never through
//! their string form, so inputs like `"2020-9"` and `"2020-10"` order
//! correctly regardless of zero padding.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Errors produced when constructing or parsing a [`Period`] or
/// [`PeriodRange`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeriodError {
    /// Month outside `1..=12`.
    #[error("invalid month {month}: expected 1-12")]
    InvalidMonth {
        /// The rejected month value.
        month: u32,
    },

    /// The key string could not be parsed.
    #[error("invalid period key '{key}'")]
    InvalidKey {
        /// The rejected input.
        key: String,
    },

    /// Range start is after range end.
    #[error("range start {start} is after range end {end}")]
    InvertedRange {
        /// Requested start.
        start: Period,
        /// Requested end.
        end: Period,
    },
}

/// A calendar year-month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    year: i32,
    month: u8,
}

impl Period {
    /// Creates a period, validating that `month` is in `1..=12`.
    ///
    /// # Errors
    ///
    /// Returns [`PeriodError::InvalidMonth`] if the month is out of range.
    pub fn new(year: i32, month: u32) -> Result<Self, PeriodError> {
        match u8::try_from(month) {
            Ok(m @ 1..=12) => Ok(Self { year, month: m }),
            _ => Err(PeriodError::InvalidMonth { month }),
        }
    }

    /// Calendar year.
    #[must_use]
    pub const fn year(self) -> i32 {
        self.year
    }

    /// Calendar month, `1..=12`.
    #[must_use]
    pub const fn month(self) -> u32 {
        self.month as u32
    }

    /// Integer ordering key: `year * 100 + month`.
    #[must_use]
    pub const fn sort_key(self) -> i64 {
        self.year as i64 * 100 + self.month as i64
    }

    /// Canonical zero-padded key, e.g. `"2020-01"`.
    #[must_use]
    pub fn key(self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }

    /// Key used by the hosted backend's date-typed period column, e.g.
    /// `"2020-01-01"`.
    #[must_use]
    pub fn api_key(self) -> String {
        format!("{:04}-{:02}-01", self.year, self.month)
    }

    /// Full month name, e.g. `"January"`.
    #[must_use]
    pub fn month_name(self) -> &'static str {
        chrono::Month::try_from(self.month).map_or("Unknown", |m| m.name())
    }

    /// Human-readable label, e.g. `"January 2020"`.
    #[must_use]
    pub fn label(self) -> String {
        format!("{} {}", self.month_name(), self.year)
    }

    /// Abbreviated label, e.g. `"Jan 2020"`.
    #[must_use]
    pub fn short_label(self) -> String {
        let name = self.month_name();
        format!("{} {}", &name[..3.min(name.len())], self.year)
    }

    /// The following month.
    #[must_use]
    pub const fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// The preceding month.
    #[must_use]
    pub const fn prev(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }
}

impl Ord for Period {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for Period {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Parses `YYYY-M`, `YYYY-MM`, `YYYY-MM-DD` (day ignored) and `YYYY/MM`.
impl FromStr for Period {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PeriodError::InvalidKey { key: s.to_string() };
        let trimmed = s.trim();

        let mut parts = trimmed.split(['-', '/']);
        let year = parts
            .next()
            .filter(|y| !y.is_empty() && y.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|y| y.parse::<i32>().ok())
            .ok_or_else(invalid)?;
        let month = parts
            .next()
            .filter(|m| !m.is_empty() && m.len() <= 2 && m.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|m| m.parse::<u32>().ok())
            .ok_or_else(invalid)?;

        // Date-typed columns come back as YYYY-MM-DD; the day is irrelevant
        // but must still look like a day.
        if let Some(day) = parts.next() {
            let day_ok = !day.is_empty()
                && day.len() <= 2
                && day.bytes().all(|b| b.is_ascii_digit())
                && parts.next().is_none();
            if !day_ok {
                return Err(invalid());
            }
        }

        Self::new(year, month)
    }
}

impl TryFrom<String> for Period {
    type Error = PeriodError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(value: Period) -> Self {
        value.key()
    }
}

/// A closed interval of periods, `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPeriodRange")]
pub struct PeriodRange {
    start: Period,
    end: Period,
}

#[derive(Deserialize)]
struct RawPeriodRange {
    start: Period,
    end: Period,
}

impl TryFrom<RawPeriodRange> for PeriodRange {
    type Error = PeriodError;

    fn try_from(raw: RawPeriodRange) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl PeriodRange {
    /// Creates a closed range.
    ///
    /// # Errors
    ///
    /// Returns [`PeriodError::InvertedRange`] if `start > end`.
    pub fn new(start: Period, end: Period) -> Result<Self, PeriodError> {
        if start > end {
            return Err(PeriodError::InvertedRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// First month of the range.
    #[must_use]
    pub const fn start(self) -> Period {
        self.start
    }

    /// Last month of the range.
    #[must_use]
    pub const fn end(self) -> Period {
        self.end
    }

    /// Number of months in the range (always at least 1).
    #[must_use]
    pub fn len(self) -> usize {
        let months = (i64::from(self.end.year) - i64::from(self.start.year)) * 12
            + i64::from(self.end.month)
            - i64::from(self.start.month)
            + 1;
        usize::try_from(months).unwrap_or(0)
    }

    /// Always `false`; a range holds at least one month.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        false
    }

    /// Whether `period` lies within the range (inclusive).
    #[must_use]
    pub fn contains(self, period: Period) -> bool {
        self.start <= period && period <= self.end
    }

    /// Every month in the range, ascending.
    #[must_use]
    pub fn months(self) -> Vec<Period> {
        let mut out = Vec::with_capacity(self.len());
        let mut current = self.start;
        while current <= self.end {
            out.push(current);
            current = current.next();
        }
        out
    }

    /// Label like `"Jan 2020 - Mar 2020"`.
    #[must_use]
    pub fn label(self) -> String {
        format!("{} - {}", self.start.short_label(), self.end.short_label())
    }
}

/// The time selection driving what data is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeCursor {
    /// One month.
    Single {
        /// The selected month.
        period: Period,
    },
    /// A closed range of months.
    Range {
        /// The selected range.
        range: PeriodRange,
    },
}

impl TimeCursor {
    /// Whether this is a range cursor.
    #[must_use]
    pub const fn is_range(self) -> bool {
        matches!(self, Self::Range { .. })
    }

    /// All months the cursor covers, ascending.
    #[must_use]
    pub fn periods(self) -> Vec<Period> {
        match self {
            Self::Single { period } => vec![period],
            Self::Range { range } => range.months(),
        }
    }

    /// Label shown next to the time slider.
    #[must_use]
    pub fn label(self) -> String {
        match self {
            Self::Single { period } => period.label(),
            Self::Range { range } => range.label(),
        }
    }

    /// Whether the cursor covers `period`.
    #[must_use]
    pub fn contains(self, period: Period) -> bool {
        match self {
            Self::Single { period: p } => p == period,
            Self::Range { range } => range.contains(period),
        }
    }
}
