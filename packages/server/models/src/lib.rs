#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the eviction map server.
//!
//! These types are serialized to JSON for the REST API the dashboard page
//! drives. View snapshots are serialized directly from the synchronizer;
//! everything else the page sends or receives is defined here.

use eviction_map_geography_models::{DisplayMode, Geography};
use eviction_map_time_models::Period;
use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    /// Whether the server is healthy.
    pub healthy: bool,
    /// Server version.
    pub version: String,
    /// Whether the period list was synthesized because the backend was
    /// unreachable at startup.
    pub degraded: bool,
}

/// One slider position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPeriod {
    /// Slider position.
    pub index: usize,
    /// Canonical key (`"2020-01"`).
    pub key: String,
    /// Key used in backend queries (`"2020-01-01"`).
    pub api_key: String,
    /// `"January 2020"`.
    pub label: String,
    /// `"Jan 2020"`.
    pub short_label: String,
}

impl ApiPeriod {
    /// Describes `period` at slider position `index`.
    #[must_use]
    pub fn new(index: usize, period: Period) -> Self {
        Self {
            index,
            key: period.key(),
            api_key: period.api_key(),
            label: period.label(),
            short_label: period.short_label(),
        }
    }
}

/// The slider's periods.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPeriods {
    /// Every period, oldest first.
    pub periods: Vec<ApiPeriod>,
    /// Initial slider position.
    pub default_index: usize,
    /// Whether the list was synthesized from the configured bounds.
    pub synthesized: bool,
}

/// `POST /api/cursor/index` and `POST /api/cursor/exit-range` body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRequest {
    /// Slider position.
    pub index: usize,
}

/// `POST /api/cursor/range` and `POST /api/cursor/enter-range` body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeRequest {
    /// Start position.
    pub start: usize,
    /// End position.
    pub end: usize,
}

/// `POST /api/mode` body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeRequest {
    /// Requested display mode.
    pub mode: DisplayMode,
}

/// `POST /api/geography` body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeographyRequest {
    /// Requested geography.
    pub geography: Geography,
}

/// `POST /api/trends` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendRequest {
    /// Semantic id of the feature to chart.
    pub feature_id: String,
    /// `"popup"` or `"drawer"`; defaults to the popup.
    #[serde(default)]
    pub placement: Option<String>,
}

/// Response for a debounced request that a newer one replaced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSuperseded {
    /// Always `true`.
    pub superseded: bool,
}
