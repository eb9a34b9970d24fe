//! The view synchronizer state machine.
//!
//! Every user action is a [`Transition`]. Executing one happens in three
//! steps so that the UI boundary never holds the synchronizer across a
//! network round trip:
//!
//! 1. [`ViewSynchronizer::begin`] validates the transition against the
//!    latest requested state and tags it, without touching the view.
//! 2. [`PendingTransition::resolve`] runs every backend query the
//!    transition needs concurrently.
//! 3. [`ViewSynchronizer::apply`] commits the result all-or-nothing, or
//!    discards it if a newer transition has been started since.
//!
//! [`ViewSynchronizer::transition`] runs the three steps in sequence.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use eviction_map_backend::EvictionBackend;
use eviction_map_backend_models::{FeatureStatRow, PeriodFilter, RateUnit, RegionTotalRow};
use eviction_map_geography::{BoundarySet, ColorScale, join};
use eviction_map_geography_models::{DisplayMode, Geography, GeographyProfile};
use eviction_map_store::{DataStore, FetchedStats, LoadTicket, LoadedKey, RegionTotal};
use eviction_map_time_models::{Period, TimeCursor};
use futures::future::{try_join_all, try_join3};
use serde::Serialize;

use crate::{AppContext, SyncError, TrendPlacement, TrendView, ViewSnapshot};

/// Slider state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CursorState {
    /// One month selected by a single thumb.
    SingleMonth {
        /// Slider position.
        index: usize,
    },
    /// A closed range selected by two thumbs.
    Range {
        /// Position of the start thumb.
        start: usize,
        /// Position of the end thumb.
        end: usize,
    },
}

impl CursorState {
    /// Whether this is the range state.
    #[must_use]
    pub const fn is_range(self) -> bool {
        matches!(self, Self::Range { .. })
    }
}

/// A user action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Move the single-month thumb.
    SetIndex(usize),
    /// Move the range thumbs.
    SetRange {
        /// Start position.
        start: usize,
        /// End position, `>= start`.
        end: usize,
    },
    /// Switch to range mode. Forces count mode.
    EnterRange {
        /// Start position.
        start: usize,
        /// End position, `>= start`.
        end: usize,
    },
    /// Leave range mode. Restores the mode active before entering.
    ExitRange {
        /// Single-month position to return to.
        index: usize,
    },
    /// Change the display mode.
    SetMode(DisplayMode),
    /// Change the geography; closes open trend charts.
    SetGeography(Geography),
    /// Reload the current state from the backend.
    Refresh,
    /// Open a trend chart, replacing any in the same placement.
    OpenTrend {
        /// Semantic feature id.
        feature_id: String,
        /// Where to show the chart.
        placement: TrendPlacement,
    },
    /// Close the trend chart in a placement.
    CloseTrend {
        /// Placement to close.
        placement: TrendPlacement,
    },
}

/// What [`ViewSynchronizer::apply`] did.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The view was updated.
    Applied(Box<ViewSnapshot>),
    /// A newer transition was started; the result was dropped.
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ViewState {
    cursor: CursorState,
    mode: DisplayMode,
    mode_before_range: Option<DisplayMode>,
    geography: Geography,
    trends: BTreeMap<TrendPlacement, String>,
}

/// A validated transition whose backend queries have not run yet.
pub struct PendingTransition {
    generation: u64,
    target: ViewState,
    cursor: TimeCursor,
    ticket: Option<LoadTicket>,
    profile: GeographyProfile,
    boundaries: Arc<BoundarySet>,
    backend: Arc<dyn EvictionBackend>,
    guard: AbandonGuard,
}

impl std::fmt::Debug for PendingTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTransition")
            .field("generation", &self.generation)
            .field("cursor", &self.cursor)
            .field("ticket", &self.ticket)
            .finish_non_exhaustive()
    }
}

/// Records the generation of a transition dropped before it was applied,
/// so the next [`ViewSynchronizer::begin`] can drop its intent.
#[derive(Debug)]
struct AbandonGuard {
    generation: u64,
    abandoned: Arc<AtomicU64>,
    armed: bool,
}

impl AbandonGuard {
    const fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.armed {
            self.abandoned.fetch_max(self.generation, Ordering::SeqCst);
        }
    }
}

struct Fetched {
    stats: Option<FetchedStats>,
    region: Option<RegionTotal>,
    series: Vec<Vec<FeatureStatRow>>,
}

/// A transition whose backend queries have completed.
pub struct ResolvedTransition {
    pending: PendingTransition,
    result: Result<Fetched, SyncError>,
}

impl std::fmt::Debug for ResolvedTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedTransition")
            .field("pending", &self.pending)
            .field("failed", &self.result.is_err())
            .finish()
    }
}

impl PendingTransition {
    /// Cursor the transition targets.
    #[must_use]
    pub const fn cursor(&self) -> TimeCursor {
        self.cursor
    }

    /// Whether per-feature statistics will be queried.
    #[must_use]
    pub const fn needs_load(&self) -> bool {
        self.ticket.is_some()
    }

    /// Runs feature statistics, region totals and every open trend's
    /// series concurrently. Failures are carried to
    /// [`ViewSynchronizer::apply`].
    pub async fn resolve(self) -> ResolvedTransition {
        let backend = self.backend.as_ref();
        let profile = &self.profile;

        let stats = async {
            match &self.ticket {
                Some(ticket) => DataStore::fetch(backend, ticket, profile)
                    .await
                    .map(Some)
                    .map_err(SyncError::from),
                None => Ok(None),
            }
        };

        let region = async {
            match &self.ticket {
                Some(ticket) if self.cursor.is_range() => {
                    let periods = ticket.periods();
                    backend
                        .region_totals(&ticket.filter())
                        .await
                        .map(|rows| region_total(&rows, &periods))
                        .map_err(SyncError::from)
                }
                _ => Ok(None),
            }
        };

        let series = try_join_all(self.target.trends.values().map(|feature_id| async move {
            backend
                .feature_series(&profile.resource, &profile.id_column, feature_id)
                .await
                .map_err(SyncError::from)
        }));

        let result = try_join3(stats, region, series)
            .await
            .map(|(stats, region, series)| Fetched {
                stats,
                region,
                series,
            });

        ResolvedTransition {
            pending: self,
            result,
        }
    }
}

/// Region total over `periods`, or `None` unless the rows cover every
/// one of them. The headline then falls back to the feature sum.
fn region_total(rows: &[RegionTotalRow], periods: &[Period]) -> Option<RegionTotal> {
    let covered = rows.iter().map(|r| r.period).collect::<BTreeSet<_>>();
    let missing = periods.iter().filter(|p| !covered.contains(p)).count();
    if missing > 0 {
        log::warn!(
            "Region totals missing for {missing} of {} months; using the feature sum",
            periods.len()
        );
        return None;
    }

    Some(RegionTotal {
        filing_count: rows
            .iter()
            .filter(|r| periods.contains(&r.period))
            .map(|r| r.filing_count)
            .sum(),
        filing_rate: None,
    })
}

/// Orchestrates the data store, geometry join, color scale and trend
/// charts around a shared time cursor.
pub struct ViewSynchronizer {
    ctx: Arc<AppContext>,
    store: DataStore,
    committed: ViewState,
    requested: ViewState,
    generation: u64,
    abandoned: Arc<AtomicU64>,
    snapshot: Option<ViewSnapshot>,
    last_error: Option<String>,
}

impl ViewSynchronizer {
    /// Creates a synchronizer at the default slider position. Nothing is
    /// loaded until the first transition (normally [`Transition::Refresh`]).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoPeriods`] if the time index is empty.
    pub fn new(ctx: Arc<AppContext>) -> Result<Self, SyncError> {
        if ctx.index().is_empty() {
            return Err(SyncError::NoPeriods);
        }

        let config = ctx.config();
        let state = ViewState {
            cursor: CursorState::SingleMonth {
                index: ctx.index().default_index(config.periods.preferred),
            },
            mode: config.default_mode,
            mode_before_range: None,
            geography: config.default_geography,
            trends: BTreeMap::new(),
        };

        Ok(Self {
            store: DataStore::new(state.mode),
            committed: state.clone(),
            requested: state,
            generation: 0,
            abandoned: Arc::new(AtomicU64::new(0)),
            snapshot: None,
            last_error: None,
            ctx,
        })
    }

    /// Shared context.
    #[must_use]
    pub const fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// Committed slider state.
    #[must_use]
    pub const fn state(&self) -> CursorState {
        self.committed.cursor
    }

    /// Committed display mode.
    #[must_use]
    pub const fn mode(&self) -> DisplayMode {
        self.committed.mode
    }

    /// Committed geography.
    #[must_use]
    pub const fn geography(&self) -> Geography {
        self.committed.geography
    }

    /// Committed cursor.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidTransition`] if the slider state is out
    /// of the index's bounds, which cannot happen for committed state.
    pub fn cursor(&self) -> Result<TimeCursor, SyncError> {
        self.cursor_for(self.committed.cursor)
    }

    /// The data store.
    #[must_use]
    pub const fn store(&self) -> &DataStore {
        &self.store
    }

    /// Last good view, if any transition has succeeded yet.
    #[must_use]
    pub const fn snapshot(&self) -> Option<&ViewSnapshot> {
        self.snapshot.as_ref()
    }

    /// Message of the most recent failed transition, cleared on success.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Exports the loaded per-feature values as CSV.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] if writing fails.
    pub fn export_csv<W: Write>(&self, writer: W) -> Result<(), SyncError> {
        Ok(self.store.export_csv(writer)?)
    }

    fn cursor_for(&self, state: CursorState) -> Result<TimeCursor, SyncError> {
        let index = self.ctx.index();
        match state {
            CursorState::SingleMonth { index: i } => index.cursor_for_index(i).ok_or_else(|| {
                SyncError::invalid(format!(
                    "slider index {i} is outside 0..{}",
                    index.len()
                ))
            }),
            CursorState::Range { start, end } => {
                if start > end {
                    return Err(SyncError::invalid(format!(
                        "range start {start} is after end {end}"
                    )));
                }
                index.cursor_for_range(start, end).ok_or_else(|| {
                    SyncError::invalid(format!(
                        "range {start}..={end} is outside 0..{}",
                        index.len()
                    ))
                })
            }
        }
    }

    fn next_state(&self, transition: Transition) -> Result<(ViewState, bool), SyncError> {
        let mut target = self.requested.clone();
        let mut force_load = false;

        match transition {
            Transition::SetIndex(index) => {
                if target.cursor.is_range() {
                    return Err(SyncError::invalid(
                        "slider index can only be set in single-month mode",
                    ));
                }
                target.cursor = CursorState::SingleMonth { index };
            }
            Transition::SetRange { start, end } => {
                if !target.cursor.is_range() {
                    return Err(SyncError::invalid("range can only be set in range mode"));
                }
                target.cursor = CursorState::Range { start, end };
            }
            Transition::EnterRange { start, end } => {
                if target.cursor.is_range() {
                    return Err(SyncError::invalid("already in range mode"));
                }
                target.cursor = CursorState::Range { start, end };
                target.mode_before_range = Some(target.mode);
                target.mode = DisplayMode::Count;
            }
            Transition::ExitRange { index } => {
                if !target.cursor.is_range() {
                    return Err(SyncError::invalid("not in range mode"));
                }
                target.cursor = CursorState::SingleMonth { index };
                target.mode = target.mode_before_range.take().unwrap_or(target.mode);
            }
            Transition::SetMode(mode) => {
                if target.cursor.is_range() && mode == DisplayMode::Rate {
                    return Err(SyncError::invalid(
                        "rate is only defined per month and cannot be shown for a range",
                    ));
                }
                target.mode = mode;
            }
            Transition::SetGeography(geography) => {
                self.ctx.profile(geography)?;
                if geography != target.geography {
                    target.trends.clear();
                }
                target.geography = geography;
            }
            Transition::Refresh => force_load = true,
            Transition::OpenTrend {
                feature_id,
                placement,
            } => {
                let feature_id = feature_id.trim();
                if feature_id.is_empty() {
                    return Err(SyncError::invalid("feature id is empty"));
                }
                target.trends.insert(placement, feature_id.to_string());
            }
            Transition::CloseTrend { placement } => {
                target.trends.remove(&placement);
            }
        }

        Ok((target, force_load))
    }

    /// Validates `transition` and tags it as the newest request.
    ///
    /// Validation and boundary loading happen here, before any backend
    /// query, so rejected input never reaches the data store.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the transition is invalid in the current
    /// state or the target geography's boundaries cannot be loaded.
    pub fn begin(&mut self, transition: Transition) -> Result<PendingTransition, SyncError> {
        log::debug!("Beginning {transition:?}");

        if self.generation > 0 && self.abandoned.load(Ordering::SeqCst) == self.generation {
            log::debug!(
                "Transition #{} was dropped before it was applied; reverting to the committed state",
                self.generation
            );
            self.requested = self.committed.clone();
        }

        let (target, force_load) = self.next_state(transition)?;
        let cursor = self.cursor_for(target.cursor)?;
        let profile = self.ctx.profile(target.geography)?.clone();
        let boundaries = self.ctx.boundaries(target.geography)?;

        let loaded = LoadedKey {
            cursor,
            geography: target.geography,
        };
        let ticket = (force_load || self.store.loaded() != Some(loaded)).then(|| {
            self.store
                .begin(cursor, target.geography)
                .within(self.ctx.index().periods_in(cursor))
        });

        self.generation += 1;
        self.requested = target.clone();

        Ok(PendingTransition {
            generation: self.generation,
            target,
            cursor,
            ticket,
            profile,
            boundaries,
            backend: self.ctx.backend().clone(),
            guard: AbandonGuard {
                generation: self.generation,
                abandoned: self.abandoned.clone(),
                armed: true,
            },
        })
    }

    /// Commits a resolved transition.
    ///
    /// Results of superseded transitions are discarded untouched. On
    /// failure the data store is cleared, the previous snapshot is kept
    /// with the error attached, and the requested state falls back to the
    /// committed one.
    ///
    /// # Errors
    ///
    /// Returns the transition's [`SyncError`] if it failed.
    pub fn apply(&mut self, resolved: ResolvedTransition) -> Result<TransitionOutcome, SyncError> {
        let ResolvedTransition {
            mut pending,
            result,
        } = resolved;
        pending.guard.disarm();

        if pending.generation != self.generation {
            log::debug!(
                "Discarding superseded transition #{} for {} (current is #{})",
                pending.generation,
                pending.cursor.label(),
                self.generation
            );
            return Ok(TransitionOutcome::Discarded);
        }

        let fetched = match result {
            Ok(fetched) => fetched,
            Err(e) => return Err(self.fail(e)),
        };

        let mut staged = self.store.clone();
        if let (Some(ticket), Some(stats)) = (&pending.ticket, fetched.stats) {
            staged.apply(ticket, Ok(stats))?;
            staged.set_region_total(fetched.region);
        }
        staged.set_mode(pending.target.mode);

        match self.render(&staged, &pending, &fetched.series) {
            Ok(snapshot) => {
                self.store = staged;
                self.committed = pending.target;
                self.last_error = None;
                self.snapshot = Some(snapshot.clone());
                log::info!(
                    "View updated: {} / {} / {}",
                    snapshot.month_label,
                    snapshot.geography,
                    snapshot.mode
                );
                Ok(TransitionOutcome::Applied(Box::new(snapshot)))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Runs `begin`, `resolve` and `apply` in sequence.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the transition is invalid or fails.
    pub async fn transition(
        &mut self,
        transition: Transition,
    ) -> Result<TransitionOutcome, SyncError> {
        let pending = self.begin(transition)?;
        let resolved = pending.resolve().await;
        self.apply(resolved)
    }

    fn fail(&mut self, error: SyncError) -> SyncError {
        log::error!("View transition failed: {error}");
        self.store.clear();
        self.requested = self.committed.clone();

        let message = error.to_string();
        if let Some(snapshot) = &mut self.snapshot {
            snapshot.error = Some(message.clone());
        }
        self.last_error = Some(message);
        error
    }

    fn render(
        &self,
        staged: &DataStore,
        pending: &PendingTransition,
        series: &[Vec<FeatureStatRow>],
    ) -> Result<ViewSnapshot, SyncError> {
        let target = &pending.target;
        let config = self.ctx.config();

        let joined = join(&pending.boundaries, staged)?;
        let scale = ColorScale::new(&pending.profile, target.mode, &config.palette)?;

        if pending.cursor.is_range()
            && let Some(region) = staged.region_total()
        {
            let feature_sum = staged.values().values().map(|v| v.filing_count).sum::<u64>();
            if feature_sum != region.filing_count {
                log::debug!(
                    "Range total mismatch for {}: region {} vs features {feature_sum}; showing region",
                    pending.cursor.label(),
                    region.filing_count
                );
            }
        }

        let unit: RateUnit = pending.backend.rate_unit();
        let trends = target
            .trends
            .iter()
            .zip(series)
            .map(|((placement, feature_id), rows)| {
                TrendView::build(
                    *placement,
                    feature_id,
                    rows,
                    target.mode,
                    unit,
                    pending.cursor,
                    self.ctx.index(),
                )
            })
            .collect();

        Ok(ViewSnapshot {
            state: target.cursor,
            cursor: pending.cursor,
            mode: target.mode,
            geography: target.geography,
            month_label: pending.cursor.label(),
            legend_title: target.mode.title().to_string(),
            legend: scale.legend(),
            paint: scale.paint_expression(),
            headline_total: staged.aggregate(),
            trends,
            degraded: self.ctx.is_degraded(),
            loading: false,
            error: None,
            map: Arc::new(joined),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use eviction_map_backend::BackendError;
    use eviction_map_config::DashboardConfig;
    use eviction_map_time::TimeIndex;
    use eviction_map_time_models::Period;
    use tokio::sync::oneshot;

    use super::*;
    use crate::TrendMarker;

    const TRACTS: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"GEOID": "T1"}, "geometry": null},
            {"type": "Feature", "properties": {"GEOID": "T2"}, "geometry": null}
        ]
    }"#;

    const HEXES: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"hex_id": "H1"}, "geometry": null}
        ]
    }"#;

    fn p(year: i32, month: u32) -> Period {
        Period::new(year, month).unwrap()
    }

    #[derive(Default)]
    struct FakeBackend {
        rows: Vec<FeatureStatRow>,
        region: Vec<RegionTotalRow>,
        fail_stats: AtomicBool,
        stats_calls: AtomicUsize,
        series_calls: AtomicUsize,
        gates: Mutex<HashMap<Period, oneshot::Receiver<()>>>,
    }

    impl FakeBackend {
        fn with_rows(rows: Vec<FeatureStatRow>) -> Self {
            Self {
                rows,
                ..Self::default()
            }
        }

        /// Holds queries for `period` until the returned sender fires.
        fn gate(&self, period: Period) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            self.gates.lock().unwrap().insert(period, rx);
            tx
        }
    }

    #[async_trait]
    impl EvictionBackend for FakeBackend {
        async fn distinct_periods(&self) -> Result<Vec<String>, BackendError> {
            Ok(vec!["2020-1".into(), "2020-2".into(), "2020-3".into()])
        }

        async fn feature_stats(
            &self,
            resource: &str,
            _id_column: &str,
            filter: &PeriodFilter,
        ) -> Result<Vec<FeatureStatRow>, BackendError> {
            self.stats_calls.fetch_add(1, Ordering::SeqCst);
            let wanted = filter.periods();

            let gate = wanted
                .first()
                .and_then(|period| self.gates.lock().unwrap().remove(period));
            if let Some(gate) = gate {
                let _ = gate.await;
            }

            if self.fail_stats.load(Ordering::SeqCst) {
                return Err(BackendError::Request {
                    message: "backend down".to_string(),
                });
            }
            Ok(self
                .rows
                .iter()
                .filter(|r| wanted.contains(&r.period))
                .filter(|r| (resource == "hexagon_monthly") == r.feature_id.starts_with('H'))
                .cloned()
                .collect())
        }

        async fn feature_series(
            &self,
            _resource: &str,
            _id_column: &str,
            feature_id: &str,
        ) -> Result<Vec<FeatureStatRow>, BackendError> {
            self.series_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .rows
                .iter()
                .filter(|r| r.feature_id == feature_id)
                .cloned()
                .collect())
        }

        async fn region_totals(
            &self,
            filter: &PeriodFilter,
        ) -> Result<Vec<RegionTotalRow>, BackendError> {
            let wanted = filter.periods();
            Ok(self
                .region
                .iter()
                .filter(|r| wanted.contains(&r.period))
                .cloned()
                .collect())
        }
    }

    fn row(id: &str, period: Period, count: u64, rate: f64) -> FeatureStatRow {
        FeatureStatRow {
            feature_id: id.to_string(),
            period,
            filing_count: count,
            filing_rate: rate,
        }
    }

    fn rows() -> Vec<FeatureStatRow> {
        vec![
            row("T1", p(2020, 1), 5, 1.2),
            row("T2", p(2020, 1), 1, 0.4),
            row("T1", p(2020, 2), 7, 1.5),
            row("T1", p(2020, 3), 2, 0.3),
            row("H1", p(2020, 3), 4, 0.9),
        ]
    }

    async fn synchronizer(backend: Arc<FakeBackend>) -> ViewSynchronizer {
        let config = DashboardConfig::embedded().unwrap();
        let ctx = AppContext::bootstrap(config, backend).await.unwrap();
        ctx.insert_boundaries(
            BoundarySet::parse(Geography::Tract, TRACTS, "GEOID", "tracts").unwrap(),
        );
        ctx.insert_boundaries(
            BoundarySet::parse(Geography::Hexagon, HEXES, "hex_id", "hexes").unwrap(),
        );
        ViewSynchronizer::new(Arc::new(ctx)).unwrap()
    }

    fn applied(outcome: TransitionOutcome) -> ViewSnapshot {
        match outcome {
            TransitionOutcome::Applied(snapshot) => *snapshot,
            TransitionOutcome::Discarded => panic!("transition was discarded"),
        }
    }

    #[tokio::test]
    async fn starts_on_latest_period_and_loads_on_refresh() {
        let backend = Arc::new(FakeBackend::with_rows(rows()));
        let mut sync = synchronizer(backend.clone()).await;

        assert_eq!(sync.state(), CursorState::SingleMonth { index: 2 });
        assert!(sync.snapshot().is_none());

        let view = applied(sync.transition(Transition::Refresh).await.unwrap());
        assert_eq!(view.month_label, "March 2020");
        assert!((view.headline_total - 2.0).abs() < f64::EPSILON);
        assert!(!view.degraded);
        assert_eq!(backend.stats_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn set_index_reloads_and_rejoins() {
        let backend = Arc::new(FakeBackend::with_rows(rows()));
        let mut sync = synchronizer(backend).await;
        sync.transition(Transition::Refresh).await.unwrap();

        let view = applied(sync.transition(Transition::SetIndex(0)).await.unwrap());
        assert_eq!(view.month_label, "January 2020");
        assert!((view.headline_total - 6.0).abs() < f64::EPSILON);
        assert_eq!(
            view.map.collection.features[1].property("filing_count"),
            Some(&serde_json::Value::from(1))
        );
    }

    #[tokio::test]
    async fn entering_range_forces_count_and_exit_restores_rate() {
        let backend = Arc::new(FakeBackend::with_rows(rows()));
        let mut sync = synchronizer(backend).await;
        sync.transition(Transition::Refresh).await.unwrap();
        sync.transition(Transition::SetMode(DisplayMode::Rate))
            .await
            .unwrap();
        assert_eq!(sync.mode(), DisplayMode::Rate);

        let view = applied(
            sync.transition(Transition::EnterRange { start: 0, end: 2 })
                .await
                .unwrap(),
        );
        assert_eq!(view.mode, DisplayMode::Count, "range mode must show counts");
        assert_eq!(view.month_label, "Jan 2020 - Mar 2020");
        assert_eq!(sync.store().get("T1").filing_count, 14);

        let view = applied(
            sync.transition(Transition::ExitRange { index: 1 })
                .await
                .unwrap(),
        );
        assert_eq!(view.mode, DisplayMode::Rate, "prior mode must be restored");
        assert_eq!(view.month_label, "February 2020");
    }

    #[tokio::test]
    async fn rate_is_rejected_in_range_mode() {
        let backend = Arc::new(FakeBackend::with_rows(rows()));
        let mut sync = synchronizer(backend).await;
        sync.transition(Transition::EnterRange { start: 0, end: 1 })
            .await
            .unwrap();

        let err = sync.begin(Transition::SetMode(DisplayMode::Rate)).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(sync.mode(), DisplayMode::Count);
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_store() {
        let backend = Arc::new(FakeBackend::with_rows(rows()));
        let mut sync = synchronizer(backend.clone()).await;
        sync.transition(Transition::Refresh).await.unwrap();
        let calls = backend.stats_calls.load(Ordering::SeqCst);

        assert!(sync.begin(Transition::SetIndex(3)).unwrap_err().is_validation());
        assert!(sync
            .begin(Transition::SetRange { start: 0, end: 1 })
            .unwrap_err()
            .is_validation());
        assert!(sync
            .begin(Transition::EnterRange { start: 2, end: 0 })
            .unwrap_err()
            .is_validation());
        assert!(sync
            .begin(Transition::ExitRange { index: 0 })
            .unwrap_err()
            .is_validation());

        assert_eq!(backend.stats_calls.load(Ordering::SeqCst), calls);
        assert_eq!(sync.state(), CursorState::SingleMonth { index: 2 });
    }

    #[tokio::test]
    async fn mode_switch_rejoins_without_reloading() {
        let backend = Arc::new(FakeBackend::with_rows(rows()));
        let mut sync = synchronizer(backend.clone()).await;
        sync.transition(Transition::SetIndex(0)).await.unwrap();
        let before = sync.store().values().clone();
        let calls = backend.stats_calls.load(Ordering::SeqCst);

        let view = applied(
            sync.transition(Transition::SetMode(DisplayMode::Rate))
                .await
                .unwrap(),
        );

        assert_eq!(backend.stats_calls.load(Ordering::SeqCst), calls);
        assert_eq!(sync.store().values(), &before);
        assert_eq!(
            view.map.collection.features[0].property("display_value"),
            Some(&serde_json::Value::from(1.2))
        );
        assert_eq!(view.legend_title, DisplayMode::Rate.title());
    }

    #[tokio::test]
    async fn superseded_load_is_discarded() {
        let backend = Arc::new(FakeBackend::with_rows(rows()));
        let mut sync = synchronizer(backend.clone()).await;
        sync.transition(Transition::Refresh).await.unwrap();

        let release_jan = backend.gate(p(2020, 1));
        let slow = sync.begin(Transition::SetIndex(0)).unwrap();
        let slow = tokio::spawn(slow.resolve());

        let fast = sync.begin(Transition::SetIndex(1)).unwrap();
        let fast = fast.resolve().await;
        applied(sync.apply(fast).unwrap());

        release_jan.send(()).unwrap();
        let slow = slow.await.unwrap();
        assert!(matches!(
            sync.apply(slow).unwrap(),
            TransitionOutcome::Discarded
        ));

        assert_eq!(sync.state(), CursorState::SingleMonth { index: 1 });
        assert_eq!(sync.store().get("T1").filing_count, 7);
        assert_eq!(sync.snapshot().unwrap().month_label, "February 2020");
    }

    #[tokio::test]
    async fn failed_load_keeps_last_good_view() {
        let backend = Arc::new(FakeBackend::with_rows(rows()));
        let mut sync = synchronizer(backend.clone()).await;
        sync.transition(Transition::SetIndex(0)).await.unwrap();

        backend.fail_stats.store(true, Ordering::SeqCst);
        let err = sync.transition(Transition::SetIndex(1)).await.unwrap_err();
        assert!(err.is_load_failure());

        let snapshot = sync.snapshot().unwrap();
        assert_eq!(snapshot.month_label, "January 2020");
        assert!(snapshot.error.is_some());
        assert_eq!(sync.state(), CursorState::SingleMonth { index: 0 });
        assert!(sync.store().is_empty(), "failed load must not leave stale data");

        backend.fail_stats.store(false, Ordering::SeqCst);
        let view = applied(sync.transition(Transition::SetIndex(1)).await.unwrap());
        assert_eq!(view.error, None);
        assert_eq!(sync.last_error(), None);
    }

    #[tokio::test]
    async fn trends_follow_cursor_and_mode() {
        let backend = Arc::new(FakeBackend::with_rows(rows()));
        let mut sync = synchronizer(backend.clone()).await;
        sync.transition(Transition::SetIndex(0)).await.unwrap();

        let view = applied(
            sync.transition(Transition::OpenTrend {
                feature_id: "T1".to_string(),
                placement: TrendPlacement::Popup,
            })
            .await
            .unwrap(),
        );
        assert_eq!(view.trends.len(), 1);
        assert_eq!(view.trends[0].points.len(), 3);
        assert_eq!(view.trends[0].marker, TrendMarker::Period { period: p(2020, 1) });

        let view = applied(sync.transition(Transition::SetIndex(2)).await.unwrap());
        assert_eq!(view.trends[0].marker, TrendMarker::Period { period: p(2020, 3) });
        assert_eq!(backend.series_calls.load(Ordering::SeqCst), 2);

        let view = applied(
            sync.transition(Transition::CloseTrend {
                placement: TrendPlacement::Popup,
            })
            .await
            .unwrap(),
        );
        assert!(view.trends.is_empty());
    }

    #[tokio::test]
    async fn geography_switch_reloads_and_closes_trends() {
        let backend = Arc::new(FakeBackend::with_rows(rows()));
        let mut sync = synchronizer(backend).await;
        sync.transition(Transition::OpenTrend {
            feature_id: "T1".to_string(),
            placement: TrendPlacement::Drawer,
        })
        .await
        .unwrap();

        let view = applied(
            sync.transition(Transition::SetGeography(Geography::Hexagon))
                .await
                .unwrap(),
        );
        assert_eq!(view.geography, Geography::Hexagon);
        assert!(view.trends.is_empty());
        assert_eq!(view.map.surrogate_ids, ["H1".to_string()]);
        assert_eq!(sync.store().get("H1").filing_count, 4);
    }

    #[tokio::test]
    async fn missing_boundary_file_is_fatal_for_that_geography() {
        let backend = Arc::new(FakeBackend::with_rows(rows()));
        let mut sync = synchronizer(backend).await;
        sync.transition(Transition::Refresh).await.unwrap();

        let err = sync
            .begin(Transition::SetGeography(Geography::SchoolZone))
            .unwrap_err();
        assert!(matches!(err, SyncError::Geography(_)));
        assert_eq!(sync.geography(), Geography::Tract);
    }

    #[tokio::test]
    async fn range_headline_uses_region_total() {
        let mut backend = FakeBackend::with_rows(rows());
        backend.region = vec![
            RegionTotalRow {
                period: p(2020, 1),
                filing_count: 10,
                filing_rate: None,
            },
            RegionTotalRow {
                period: p(2020, 2),
                filing_count: 20,
                filing_rate: None,
            },
        ];
        let mut sync = synchronizer(Arc::new(backend)).await;

        let view = applied(
            sync.transition(Transition::EnterRange { start: 0, end: 1 })
                .await
                .unwrap(),
        );
        assert!((view.headline_total - 30.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn range_headline_falls_back_to_feature_sum_without_region_rows() {
        let backend = Arc::new(FakeBackend::with_rows(rows()));
        let mut sync = synchronizer(backend).await;

        let view = applied(
            sync.transition(Transition::EnterRange { start: 0, end: 2 })
                .await
                .unwrap(),
        );
        assert_eq!(sync.store().region_total(), None);
        assert!(
            (view.headline_total - 15.0).abs() < f64::EPSILON,
            "headline {} should match the feature sum",
            view.headline_total
        );
    }

    #[tokio::test]
    async fn range_headline_ignores_region_rows_missing_a_month() {
        let mut backend = FakeBackend::with_rows(rows());
        backend.region = vec![
            RegionTotalRow {
                period: p(2020, 1),
                filing_count: 10,
                filing_rate: None,
            },
            RegionTotalRow {
                period: p(2020, 2),
                filing_count: 20,
                filing_rate: None,
            },
        ];
        let mut sync = synchronizer(Arc::new(backend)).await;

        let view = applied(
            sync.transition(Transition::EnterRange { start: 0, end: 2 })
                .await
                .unwrap(),
        );
        assert_eq!(sync.store().region_total(), None);
        assert!((view.headline_total - 15.0).abs() < f64::EPSILON);

        let view = applied(
            sync.transition(Transition::SetRange { start: 0, end: 1 })
                .await
                .unwrap(),
        );
        assert!((view.headline_total - 30.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn dropped_transition_does_not_leak_into_validation() {
        let backend = Arc::new(FakeBackend::with_rows(rows()));
        let mut sync = synchronizer(backend).await;
        sync.transition(Transition::Refresh).await.unwrap();
        assert_eq!(sync.state(), CursorState::SingleMonth { index: 2 });

        let abandoned = sync.begin(Transition::EnterRange { start: 0, end: 2 }).unwrap();
        drop(abandoned);

        let view = applied(sync.transition(Transition::SetIndex(1)).await.unwrap());
        assert_eq!(view.month_label, "February 2020");
        assert_eq!(sync.state(), CursorState::SingleMonth { index: 1 });
    }

    #[tokio::test]
    async fn dropped_resolved_transition_is_also_reverted() {
        let backend = Arc::new(FakeBackend::with_rows(rows()));
        let mut sync = synchronizer(backend).await;
        sync.transition(Transition::Refresh).await.unwrap();

        let resolved = sync
            .begin(Transition::EnterRange { start: 0, end: 1 })
            .unwrap()
            .resolve()
            .await;
        drop(resolved);

        let view = applied(
            sync.transition(Transition::SetMode(DisplayMode::Rate))
                .await
                .unwrap(),
        );
        assert_eq!(view.state, CursorState::SingleMonth { index: 2 });
        assert_eq!(view.mode, DisplayMode::Rate);
    }

    #[tokio::test]
    async fn unreachable_backend_degrades_to_synthesized_index() {
        struct Down;

        #[async_trait]
        impl EvictionBackend for Down {
            async fn distinct_periods(&self) -> Result<Vec<String>, BackendError> {
                Err(BackendError::Request {
                    message: "offline".to_string(),
                })
            }

            async fn feature_stats(
                &self,
                _resource: &str,
                _id_column: &str,
                _filter: &PeriodFilter,
            ) -> Result<Vec<FeatureStatRow>, BackendError> {
                Ok(Vec::new())
            }

            async fn feature_series(
                &self,
                _resource: &str,
                _id_column: &str,
                _feature_id: &str,
            ) -> Result<Vec<FeatureStatRow>, BackendError> {
                Ok(Vec::new())
            }

            async fn region_totals(
                &self,
                _filter: &PeriodFilter,
            ) -> Result<Vec<RegionTotalRow>, BackendError> {
                Ok(Vec::new())
            }
        }

        let config = DashboardConfig::embedded().unwrap();
        let bounds = config.periods.range().unwrap();
        let ctx = AppContext::bootstrap(config, Arc::new(Down)).await.unwrap();

        assert!(ctx.is_degraded());
        assert_eq!(ctx.index(), &TimeIndex::synthesize(bounds));
        assert_eq!(ctx.index().len(), 60);
    }
}
