//! Application context shared by every view.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use eviction_map_backend::EvictionBackend;
use eviction_map_config::DashboardConfig;
use eviction_map_geography::BoundarySet;
use eviction_map_geography_models::{Geography, GeographyProfile};
use eviction_map_time::TimeIndex;

use crate::SyncError;

/// Configuration, backend, time index and boundary cache.
///
/// Built once at startup and immutable afterwards apart from the boundary
/// cache, which fills lazily as geographies are first selected.
pub struct AppContext {
    config: DashboardConfig,
    backend: Arc<dyn EvictionBackend>,
    index: TimeIndex,
    boundaries: Mutex<BTreeMap<Geography, Arc<BoundarySet>>>,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl AppContext {
    /// Builds the time index from the backend's period listing.
    ///
    /// If the backend is unreachable, or lists nothing inside the
    /// configured bounds, the index is synthesized from the bounds and the
    /// dashboard runs in degraded mode.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Period`] if the configured bounds are inverted.
    pub async fn bootstrap(
        config: DashboardConfig,
        backend: Arc<dyn EvictionBackend>,
    ) -> Result<Self, SyncError> {
        let bounds = config.periods.range()?;

        let index = match backend.distinct_periods().await {
            Ok(keys) => {
                let index = TimeIndex::build(&keys, Some(bounds.start()), Some(bounds.end()));
                if index.is_empty() {
                    log::warn!(
                        "Backend listed {} periods, none within {}; using the configured range",
                        keys.len(),
                        bounds.label()
                    );
                    TimeIndex::synthesize(bounds)
                } else {
                    index
                }
            }
            Err(e) => {
                log::error!("Failed to list available periods: {e}");
                TimeIndex::synthesize(bounds)
            }
        };

        if index.is_synthesized() {
            log::warn!(
                "Running in degraded mode with a synthesized index of {} months",
                index.len()
            );
        } else {
            log::info!(
                "Time index: {} periods from {} to {}",
                index.len(),
                index.first().map(TimeIndex::label).unwrap_or_default(),
                index.last().map(TimeIndex::label).unwrap_or_default()
            );
        }

        Ok(Self::new(config, backend, index))
    }

    /// Creates a context from parts.
    #[must_use]
    pub fn new(config: DashboardConfig, backend: Arc<dyn EvictionBackend>, index: TimeIndex) -> Self {
        Self {
            config,
            backend,
            index,
            boundaries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Dashboard configuration.
    #[must_use]
    pub const fn config(&self) -> &DashboardConfig {
        &self.config
    }

    /// Data backend.
    #[must_use]
    pub const fn backend(&self) -> &Arc<dyn EvictionBackend> {
        &self.backend
    }

    /// Session time index.
    #[must_use]
    pub const fn index(&self) -> &TimeIndex {
        &self.index
    }

    /// Whether the index was synthesized.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.index.is_synthesized()
    }

    /// Profile for `geography`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownGeography`] if none is configured.
    pub fn profile(&self, geography: Geography) -> Result<&GeographyProfile, SyncError> {
        self.config
            .profile(geography)
            .ok_or(SyncError::UnknownGeography { geography })
    }

    /// Boundaries for `geography`, loaded from disk on first use.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if no profile is configured or the boundary
    /// file cannot be loaded.
    pub fn boundaries(&self, geography: Geography) -> Result<Arc<BoundarySet>, SyncError> {
        if let Some(cached) = self.cache().get(&geography) {
            return Ok(cached.clone());
        }

        let profile = self.profile(geography)?;
        let set = Arc::new(BoundarySet::load(
            geography,
            &profile.boundary_path,
            &profile.id_property,
        )?);
        self.cache().insert(geography, set.clone());
        Ok(set)
    }

    /// Caches already-loaded boundaries.
    pub fn insert_boundaries(&self, set: BoundarySet) {
        self.cache().insert(set.geography(), Arc::new(set));
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, BTreeMap<Geography, Arc<BoundarySet>>> {
        self.boundaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
