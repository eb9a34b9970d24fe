#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Time-cursor and display-mode orchestration.
//!
//! The [`ViewSynchronizer`] owns the data store and reacts to explicit
//! [`Transition`]s: it loads data for the new cursor, joins it onto the
//! active geography, recomputes the color scale and refreshes every open
//! trend chart. A transition either fully succeeds, producing a new
//! [`ViewSnapshot`], or leaves the previous snapshot in place with an
//! error attached.
//!
//! Shared, read-mostly state (configuration, backend, time index and
//! boundary cache) lives in an [`AppContext`] passed in at construction.

pub mod context;
pub mod debounce;
pub mod loading;
pub mod synchronizer;
pub mod view;

pub use context::AppContext;
pub use debounce::Debouncer;
pub use loading::LoadingIndicator;
pub use synchronizer::{
    CursorState, PendingTransition, ResolvedTransition, Transition, TransitionOutcome,
    ViewSynchronizer,
};
pub use view::{TrendMarker, TrendPlacement, TrendPoint, TrendView, ViewSnapshot};

use eviction_map_backend::BackendError;
use eviction_map_geography::GeographyError;
use eviction_map_geography_models::Geography;
use eviction_map_store::StoreError;
use eviction_map_time_models::PeriodError;

/// Errors that can occur while driving the view.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The transition is not valid in the current state.
    #[error("Invalid transition: {message}")]
    InvalidTransition {
        /// Description of what was rejected.
        message: String,
    },

    /// The time index is empty.
    #[error("No periods available")]
    NoPeriods,

    /// No profile is configured for the geography.
    #[error("No profile configured for geography '{geography}'")]
    UnknownGeography {
        /// The geography.
        geography: Geography,
    },

    /// Configured period bounds are invalid.
    #[error("Invalid period bounds: {0}")]
    Period(#[from] PeriodError),

    /// Boundary loading, joining or styling failed.
    #[error(transparent)]
    Geography(#[from] GeographyError),

    /// Loading per-feature statistics failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A region total or trend series query failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl SyncError {
    /// Whether the error was caused by user input rather than by I/O.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. } | Self::UnknownGeography { .. }
        )
    }

    /// Whether the error came from the data backend.
    #[must_use]
    pub const fn is_load_failure(&self) -> bool {
        matches!(
            self,
            Self::Backend(_) | Self::Store(StoreError::Backend(_))
        )
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidTransition {
            message: message.into(),
        }
    }
}
