#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Boundary geometry for the eviction choropleth.
//!
//! Loads one `GeoJSON` `FeatureCollection` per geography, joins the data
//! store's per-feature values onto it, and derives the color scale that
//! the rendering surface applies to the joined `display_value` property.

pub mod boundary;
pub mod join;
pub mod scale;

pub use boundary::BoundarySet;
pub use join::{DISPLAY_VALUE_PROPERTY, JoinedFeatures, join};
pub use scale::{ColorScale, LegendEntry};

use eviction_map_geography_models::Geography;
use thiserror::Error;

/// Errors that can occur while loading, joining or styling geometry.
#[derive(Debug, Error)]
pub enum GeographyError {
    /// The boundary file could not be read.
    #[error("Failed to read boundary file {path}: {source}")]
    Io {
        /// Path of the boundary file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The boundary file is not valid `GeoJSON`.
    #[error("Invalid GeoJSON in {path}: {message}")]
    Parse {
        /// Path of the boundary file.
        path: String,
        /// Parser message.
        message: String,
    },

    /// The boundary file is valid `GeoJSON` but not a `FeatureCollection`.
    #[error("{path} is not a GeoJSON FeatureCollection")]
    NotFeatureCollection {
        /// Path of the boundary file.
        path: String,
    },

    /// A feature lacks a usable join key.
    #[error("Feature {index} in {path} has no usable '{property}' property")]
    MissingId {
        /// Path of the boundary file.
        path: String,
        /// Position of the feature in the collection.
        index: usize,
        /// Expected id property.
        property: String,
    },

    /// Data for one geography was joined onto another geography's
    /// boundaries.
    #[error("Cannot join {data} data onto {boundaries} boundaries")]
    GeographyMismatch {
        /// Geography of the boundaries.
        boundaries: Geography,
        /// Geography of the loaded data.
        data: Geography,
    },

    /// Breakpoints and palette do not describe a usable scale.
    #[error("Invalid color scale: {message}")]
    Scale {
        /// Description of what went wrong.
        message: String,
    },
}
