#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Ordered index of the year-month periods that have eviction data.
//!
//! The [`TimeIndex`] is the single source of truth for which periods exist
//! and in what order. The time slider position is an index into it, and
//! every conversion between slider position, period key and display label
//! goes through it. It is built once at startup and never mutated.

use std::collections::BTreeSet;

use eviction_map_time_models::{Period, PeriodRange, TimeCursor};
use serde::Serialize;

/// Strictly increasing, duplicate-free sequence of periods.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeIndex {
    periods: Vec<Period>,
    synthesized: bool,
}

impl TimeIndex {
    /// Builds the index from raw period keys as listed by the backend.
    ///
    /// Keys are parsed leniently (`"2020-3"`, `"2020-03"`, `"2020-03-01"`),
    /// deduplicated and sorted by `year * 100 + month`, then filtered to
    /// `[bound_start, bound_end]` where given. Unparsable keys are skipped.
    ///
    /// If no key parses (including an empty listing) and both bounds are
    /// given, the index is synthesized as the contiguous monthly range
    /// between the bounds and flagged via [`Self::is_synthesized`].
    #[must_use]
    pub fn build<I, S>(raw_keys: I, bound_start: Option<Period>, bound_end: Option<Period>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = BTreeSet::new();
        let mut skipped = 0usize;

        for key in raw_keys {
            match key.as_ref().parse::<Period>() {
                Ok(period) => {
                    parsed.insert(period);
                }
                Err(e) => {
                    skipped += 1;
                    log::warn!("Skipping period key: {e}");
                }
            }
        }

        if parsed.is_empty() {
            return match (bound_start, bound_end) {
                (Some(start), Some(end)) => match PeriodRange::new(start, end) {
                    Ok(range) => {
                        log::warn!(
                            "No usable period keys ({skipped} skipped); synthesizing {}",
                            range.label()
                        );
                        Self::synthesize(range)
                    }
                    Err(e) => {
                        log::error!("Cannot synthesize fallback periods: {e}");
                        Self::default()
                    }
                },
                _ => {
                    log::warn!("No usable period keys and no fallback bounds configured");
                    Self::default()
                }
            };
        }

        let periods = parsed
            .into_iter()
            .filter(|p| bound_start.is_none_or(|start| *p >= start))
            .filter(|p| bound_end.is_none_or(|end| *p <= end))
            .collect::<Vec<_>>();

        log::debug!(
            "Built time index with {} periods ({skipped} keys skipped)",
            periods.len()
        );

        Self {
            periods,
            synthesized: false,
        }
    }

    /// Contiguous monthly index covering `range`.
    #[must_use]
    pub fn synthesize(range: PeriodRange) -> Self {
        Self {
            periods: range.months(),
            synthesized: true,
        }
    }

    /// Whether this index came from the fallback path rather than from
    /// the backend's listing.
    #[must_use]
    pub const fn is_synthesized(&self) -> bool {
        self.synthesized
    }

    /// Number of periods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.periods.len()
    }

    /// Whether there are no periods at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    /// All periods, ascending.
    #[must_use]
    pub fn periods(&self) -> &[Period] {
        &self.periods
    }

    /// Earliest period.
    #[must_use]
    pub fn first(&self) -> Option<Period> {
        self.periods.first().copied()
    }

    /// Most recent period.
    #[must_use]
    pub fn last(&self) -> Option<Period> {
        self.periods.last().copied()
    }

    /// Bounds-checked lookup of the period at a slider position.
    #[must_use]
    pub fn period_at(&self, index: usize) -> Option<Period> {
        self.periods.get(index).copied()
    }

    /// Slider position of `period`, if present.
    #[must_use]
    pub fn index_of(&self, period: Period) -> Option<usize> {
        self.periods.binary_search(&period).ok()
    }

    /// Initial slider position: the preferred period if present, else the
    /// most recent period, else 0.
    #[must_use]
    pub fn default_index(&self, preferred: Option<Period>) -> usize {
        preferred
            .and_then(|p| self.index_of(p))
            .unwrap_or_else(|| self.periods.len().saturating_sub(1))
    }

    /// `"MonthName YYYY"`.
    #[must_use]
    pub fn label(period: Period) -> String {
        period.label()
    }

    /// `"Mon YYYY"`.
    #[must_use]
    pub fn short_label(period: Period) -> String {
        period.short_label()
    }

    /// Single-month cursor for a slider position.
    #[must_use]
    pub fn cursor_for_index(&self, index: usize) -> Option<TimeCursor> {
        self.period_at(index)
            .map(|period| TimeCursor::Single { period })
    }

    /// Range cursor for two slider positions, `start <= end`.
    #[must_use]
    pub fn cursor_for_range(&self, start: usize, end: usize) -> Option<TimeCursor> {
        let range = PeriodRange::new(self.period_at(start)?, self.period_at(end)?).ok()?;
        Some(TimeCursor::Range { range })
    }

    /// Periods of the index that fall inside `cursor`, ascending.
    ///
    /// Used for range queries so that months missing from the backend's
    /// listing are never requested.
    #[must_use]
    pub fn periods_in(&self, cursor: TimeCursor) -> Vec<Period> {
        self.periods
            .iter()
            .copied()
            .filter(|p| cursor.contains(*p))
            .collect()
    }
}
