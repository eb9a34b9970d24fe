#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory eviction statistics for the active cursor and geography.
//!
//! The [`DataStore`] is the single place a view asks "what number do I
//! draw for feature X". Its contents are replaced wholesale on every load
//! and cleared on a failed load, so it never holds one period's data under
//! another period's label.
//!
//! Loading is split in three steps so that concurrent loads resolve with
//! last-cursor-wins semantics: [`DataStore::begin`] tags the request,
//! [`DataStore::fetch`] performs the query without borrowing the store,
//! and [`DataStore::apply`] commits the result only if no newer request
//! has been started since.

use std::collections::BTreeMap;
use std::io::Write;

use eviction_map_backend::{BackendError, EvictionBackend};
use eviction_map_backend_models::{FeatureStatRow, PeriodFilter, RateUnit};
use eviction_map_geography_models::{DisplayMode, FeatureValue, Geography, GeographyProfile};
use eviction_map_time_models::{Period, TimeCursor};
use serde::Serialize;

/// Errors that can occur while loading or exporting statistics.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend query failed.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// The profile passed to [`DataStore::fetch`] is for another geography
    /// than the ticket.
    #[error("Profile for {profile} used to load {ticket} data")]
    GeographyMismatch {
        /// Geography of the ticket.
        ticket: Geography,
        /// Geography of the profile.
        profile: Geography,
    },

    /// CSV export failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Writing the export failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Identifies one load request. Only the most recently issued ticket can
/// be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
    cursor: TimeCursor,
    geography: Geography,
    listed: Option<Vec<Period>>,
}

impl LoadTicket {
    /// Cursor the request was issued for.
    #[must_use]
    pub const fn cursor(&self) -> TimeCursor {
        self.cursor
    }

    /// Geography the request was issued for.
    #[must_use]
    pub const fn geography(&self) -> Geography {
        self.geography
    }

    /// Monotonic request number.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Restricts a range ticket to the months the time index lists, so
    /// months the backend never published are not queried.
    #[must_use]
    pub fn within(mut self, listed: Vec<Period>) -> Self {
        self.listed = Some(listed);
        self
    }

    /// Months the ticket queries, ascending.
    #[must_use]
    pub fn periods(&self) -> Vec<Period> {
        match (self.cursor, &self.listed) {
            (TimeCursor::Single { period }, _) => vec![period],
            (TimeCursor::Range { range }, Some(listed)) => listed
                .iter()
                .copied()
                .filter(|p| range.contains(*p))
                .collect(),
            (TimeCursor::Range { range }, None) => range.months(),
        }
    }

    /// Backend predicate for the ticket's cursor.
    #[must_use]
    pub fn filter(&self) -> PeriodFilter {
        match self.cursor {
            TimeCursor::Single { period } => PeriodFilter::Equals(period),
            TimeCursor::Range { .. } => PeriodFilter::In(self.periods()),
        }
    }
}

/// Per-feature values fetched for a ticket, not yet applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedStats {
    values: BTreeMap<String, FeatureValue>,
    rows: usize,
}

impl FetchedStats {
    /// Folds backend rows into per-feature values.
    ///
    /// Counts are summed across periods; the rate is the mean of the
    /// monthly rates present, converted to a percentage. For a single
    /// period this is simply the row's count and rate.
    #[must_use]
    pub fn from_rows(rows: &[FeatureStatRow], unit: RateUnit) -> Self {
        let mut sums: BTreeMap<String, (u64, f64, u32)> = BTreeMap::new();

        for row in rows {
            let entry = sums.entry(row.feature_id.clone()).or_default();
            entry.0 = entry.0.saturating_add(row.filing_count);
            entry.1 += unit.to_percent(row.filing_rate);
            entry.2 += 1;
        }

        let values = sums
            .into_iter()
            .map(|(id, (count, rate_sum, months))| {
                let rate = if months == 0 {
                    0.0
                } else {
                    rate_sum / f64::from(months)
                };
                (id, FeatureValue::new(count, rate))
            })
            .collect();

        Self {
            values,
            rows: rows.len(),
        }
    }

    /// Number of backend rows folded in.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Number of distinct features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no feature has data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// What [`DataStore::apply`] did with a fetched result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The result replaced the store contents.
    Applied,
    /// A newer request was issued; the result was dropped untouched.
    Discarded,
}

/// Region-level total for the loaded cursor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionTotal {
    /// Total filings across the region.
    pub filing_count: u64,
    /// Region-wide rate in percent, if published.
    pub filing_rate: Option<f64>,
}

/// Cursor and geography of the data currently held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedKey {
    /// Cursor the data was loaded for.
    pub cursor: TimeCursor,
    /// Geography the data was loaded for.
    pub geography: Geography,
}

/// Per-feature eviction statistics plus the active display mode.
#[derive(Debug, Clone, Default)]
pub struct DataStore {
    values: BTreeMap<String, FeatureValue>,
    mode: DisplayMode,
    loaded: Option<LoadedKey>,
    region_total: Option<RegionTotal>,
    generation: u64,
}

impl DataStore {
    /// Creates an empty store in the given mode.
    #[must_use]
    pub fn new(mode: DisplayMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Sets the display mode. Stored values are untouched; callers redraw
    /// dependent views themselves.
    pub const fn set_mode(&mut self, mode: DisplayMode) {
        self.mode = mode;
    }

    /// Active display mode.
    #[must_use]
    pub const fn mode(&self) -> DisplayMode {
        self.mode
    }

    /// Cursor and geography of the held data, `None` when empty after a
    /// failure or before the first load.
    #[must_use]
    pub const fn loaded(&self) -> Option<LoadedKey> {
        self.loaded
    }

    /// Number of features with data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no feature has data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value for a feature; unknown features are zero.
    #[must_use]
    pub fn get(&self, feature_id: &str) -> FeatureValue {
        self.values.get(feature_id).copied().unwrap_or_default()
    }

    /// All held values keyed by feature id.
    #[must_use]
    pub const fn values(&self) -> &BTreeMap<String, FeatureValue> {
        &self.values
    }

    /// Value to draw for a feature under the active mode; 0 if unknown.
    #[must_use]
    pub fn value_for(&self, feature_id: &str) -> f64 {
        self.mode.value(self.get(feature_id))
    }

    /// Sum of the active field over every held feature.
    #[must_use]
    pub fn feature_sum(&self) -> f64 {
        self.values.values().map(|v| self.mode.value(*v)).sum()
    }

    /// Headline total.
    ///
    /// Single-month data sums the active field over the feature map. Range
    /// data uses the region-level total, which is authoritative there;
    /// the feature sum is only used when no region total was recorded.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn aggregate(&self) -> f64 {
        match self.loaded.map(|l| l.cursor) {
            Some(TimeCursor::Range { .. }) => match self.region_total {
                Some(total) => match self.mode {
                    DisplayMode::Count => total.filing_count as f64,
                    DisplayMode::Rate => total.filing_rate.unwrap_or_else(|| self.feature_sum()),
                },
                None => {
                    log::warn!("No region total for range data; summing features instead");
                    self.feature_sum()
                }
            },
            _ => self.feature_sum(),
        }
    }

    /// Records the region-level total for the held data.
    pub const fn set_region_total(&mut self, total: Option<RegionTotal>) {
        self.region_total = total;
    }

    /// Region-level total, if recorded.
    #[must_use]
    pub const fn region_total(&self) -> Option<RegionTotal> {
        self.region_total
    }

    /// Starts a load; any ticket issued earlier becomes stale.
    pub const fn begin(&mut self, cursor: TimeCursor, geography: Geography) -> LoadTicket {
        self.generation += 1;
        LoadTicket {
            generation: self.generation,
            cursor,
            geography,
            listed: None,
        }
    }

    /// Whether `ticket` is still the most recent request.
    #[must_use]
    pub const fn is_current(&self, ticket: &LoadTicket) -> bool {
        ticket.generation == self.generation
    }

    /// Issues exactly one backend query for `ticket`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the profile does not match the ticket's
    /// geography or the backend query fails.
    pub async fn fetch(
        backend: &dyn EvictionBackend,
        ticket: &LoadTicket,
        profile: &GeographyProfile,
    ) -> Result<FetchedStats, StoreError> {
        if profile.geography != ticket.geography {
            return Err(StoreError::GeographyMismatch {
                ticket: ticket.geography,
                profile: profile.geography,
            });
        }

        let rows = backend
            .feature_stats(&profile.resource, &profile.id_column, &ticket.filter())
            .await?;
        Ok(FetchedStats::from_rows(&rows, backend.rate_unit()))
    }

    /// Commits a fetched result if `ticket` is still current.
    ///
    /// A stale ticket is discarded without touching the store. A current
    /// ticket's failure clears the store and returns the error.
    ///
    /// # Errors
    ///
    /// Returns the fetch error when a current ticket failed.
    pub fn apply(
        &mut self,
        ticket: &LoadTicket,
        result: Result<FetchedStats, StoreError>,
    ) -> Result<ApplyOutcome, StoreError> {
        if !self.is_current(ticket) {
            log::debug!(
                "Discarding stale load #{} for {} (current is #{})",
                ticket.generation,
                ticket.cursor.label(),
                self.generation
            );
            return Ok(ApplyOutcome::Discarded);
        }

        match result {
            Ok(fetched) => {
                log::debug!(
                    "Applied {} features ({} rows) for {} / {}",
                    fetched.values.len(),
                    fetched.rows,
                    ticket.cursor.label(),
                    ticket.geography
                );
                self.values = fetched.values;
                self.loaded = Some(LoadedKey {
                    cursor: ticket.cursor,
                    geography: ticket.geography,
                });
                self.region_total = None;
                Ok(ApplyOutcome::Applied)
            }
            Err(e) => {
                self.clear();
                Err(e)
            }
        }
    }

    /// Sequential load: begin, fetch and apply in one call.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails; the store is then empty.
    pub async fn load(
        &mut self,
        backend: &dyn EvictionBackend,
        cursor: TimeCursor,
        profile: &GeographyProfile,
    ) -> Result<ApplyOutcome, StoreError> {
        let ticket = self.begin(cursor, profile.geography);
        let result = Self::fetch(backend, &ticket, profile).await;
        self.apply(&ticket, result)
    }

    /// Drops all held data.
    pub fn clear(&mut self) {
        self.values.clear();
        self.loaded = None;
        self.region_total = None;
    }

    /// Writes `feature_id,filing_count,filing_rate` rows, sorted by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if writing fails.
    pub fn export_csv<W: Write>(&self, writer: W) -> Result<(), StoreError> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(["feature_id", "filing_count", "filing_rate"])?;
        for (id, value) in &self.values {
            csv.write_record([
                id.as_str(),
                &value.filing_count.to_string(),
                &format!("{:.4}", value.filing_rate),
            ])?;
        }
        csv.flush()?;
        Ok(())
    }
}
