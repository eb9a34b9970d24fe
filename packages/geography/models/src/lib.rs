#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geography and per-feature value types.
//!
//! A [`Geography`] is one spatial partitioning scheme (census tracts,
//! school zones, hexagons). Each has a [`GeographyProfile`] describing
//! where its boundary file lives, which feature property is the join key,
//! which backend resource holds its statistics, and its color
//! breakpoints.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Supported spatial partitioning schemes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Geography {
    /// Census tracts.
    Tract,
    /// School attendance zones.
    SchoolZone,
    /// Hexagonal grid cells.
    Hexagon,
}

impl Geography {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Tract, Self::SchoolZone, Self::Hexagon]
    }
}

/// Which value drives map coloring, legend text and chart y-axes.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DisplayMode {
    /// Number of eviction filings.
    #[default]
    Count,
    /// Filings as a percentage of renter households.
    Rate,
}

impl DisplayMode {
    /// Projects a feature value onto this mode.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn value(self, value: FeatureValue) -> f64 {
        match self {
            Self::Count => value.filing_count as f64,
            Self::Rate => value.filing_rate,
        }
    }

    /// Axis and legend title.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Count => "Eviction filings",
            Self::Rate => "Eviction filing rate (%)",
        }
    }
}

/// Eviction statistics for one feature.
///
/// `filing_rate` is always a percentage (`1.2` means 1.2%).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureValue {
    /// Number of eviction filings.
    pub filing_count: u64,
    /// Filings per renter household, as a percentage.
    pub filing_rate: f64,
}

impl FeatureValue {
    /// Creates a feature value.
    #[must_use]
    pub const fn new(filing_count: u64, filing_rate: f64) -> Self {
        Self {
            filing_count,
            filing_rate,
        }
    }
}

/// Static description of one geography.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeographyProfile {
    /// Which geography this profile describes.
    pub geography: Geography,
    /// Display name (e.g. `"Census tracts"`).
    pub name: String,
    /// Path to the boundary `GeoJSON` `FeatureCollection`.
    pub boundary_path: PathBuf,
    /// Feature property holding the join key.
    pub id_property: String,
    /// Backend resource (table or view) holding this geography's rows.
    pub resource: String,
    /// Column in `resource` holding the join key.
    pub id_column: String,
    /// Ascending color breakpoints used in count mode.
    pub count_breakpoints: Vec<f64>,
    /// Ascending color breakpoints used in rate mode (percent).
    pub rate_breakpoints: Vec<f64>,
}

impl GeographyProfile {
    /// Breakpoints for the given display mode.
    #[must_use]
    pub fn breakpoints(&self, mode: DisplayMode) -> &[f64] {
        match mode {
            DisplayMode::Count => &self.count_breakpoints,
            DisplayMode::Rate => &self.rate_breakpoints,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geography_string_roundtrip() {
        for geography in Geography::all() {
            let s = geography.to_string();
            assert_eq!(s.parse::<Geography>().unwrap(), *geography);
        }
        assert_eq!(Geography::SchoolZone.as_ref(), "school_zone");
        assert!("county".parse::<Geography>().is_err());
    }

    #[test]
    fn mode_projects_fields() {
        let value = FeatureValue::new(5, 1.2);
        assert!((DisplayMode::Count.value(value) - 5.0).abs() < f64::EPSILON);
        assert!((DisplayMode::Rate.value(value) - 1.2).abs() < f64::EPSILON);
        assert_eq!(DisplayMode::default(), DisplayMode::Count);
    }

    #[test]
    fn mode_serde_is_snake_case() {
        assert_eq!(
            serde_json::to_string(&DisplayMode::Rate).unwrap(),
            "\"rate\""
        );
        assert_eq!(
            serde_json::from_str::<Geography>("\"hexagon\"").unwrap(),
            Geography::Hexagon
        );
    }
}
