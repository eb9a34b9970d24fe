//! Geometry join: data store values onto boundary feature properties.

use eviction_map_store::DataStore;
use geojson::{FeatureCollection, feature::Id};
use serde_json::Value;

use crate::{BoundarySet, GeographyError};

/// Property holding the raw filing count.
pub const COUNT_PROPERTY: &str = "filing_count";
/// Property holding the raw filing rate (percent).
pub const RATE_PROPERTY: &str = "filing_rate";
/// Property holding the mode-dependent value the paint expression reads.
pub const DISPLAY_VALUE_PROPERTY: &str = "display_value";

/// An annotated copy of a boundary collection.
///
/// Each feature's numeric `id` is its position in the collection; the
/// `surrogate_ids` vector maps it back to the semantic join key.
#[derive(Debug, Clone)]
pub struct JoinedFeatures {
    /// Features carrying count, rate and display value properties.
    pub collection: FeatureCollection,
    /// Semantic id of each feature, indexed by surrogate id.
    pub surrogate_ids: Vec<String>,
}

impl JoinedFeatures {
    /// Semantic id for a surrogate id.
    #[must_use]
    pub fn semantic_id(&self, surrogate: u64) -> Option<&str> {
        usize::try_from(surrogate)
            .ok()
            .and_then(|i| self.surrogate_ids.get(i))
            .map(String::as_str)
    }

    /// Surrogate id for a semantic id.
    #[must_use]
    pub fn surrogate_id(&self, feature_id: &str) -> Option<u64> {
        self.surrogate_ids
            .iter()
            .position(|id| id == feature_id)
            .and_then(|i| u64::try_from(i).ok())
    }
}

/// Joins `store` onto `boundaries`.
///
/// Features without data get zeros. The surrogate ids are rebuilt on
/// every call.
///
/// # Errors
///
/// Returns [`GeographyError::GeographyMismatch`] if the store holds data
/// for another geography.
pub fn join(boundaries: &BoundarySet, store: &DataStore) -> Result<JoinedFeatures, GeographyError> {
    if let Some(loaded) = store.loaded()
        && loaded.geography != boundaries.geography()
    {
        return Err(GeographyError::GeographyMismatch {
            boundaries: boundaries.geography(),
            data: loaded.geography,
        });
    }

    let mut collection = boundaries.collection().clone();
    let mode = store.mode();
    let mut matched = 0usize;

    for (index, (feature, feature_id)) in collection
        .features
        .iter_mut()
        .zip(boundaries.ids())
        .enumerate()
    {
        let value = store.get(feature_id);
        if store.values().contains_key(feature_id) {
            matched += 1;
        }

        feature.set_property(COUNT_PROPERTY, value.filing_count);
        feature.set_property(RATE_PROPERTY, value.filing_rate);
        feature.set_property(DISPLAY_VALUE_PROPERTY, Value::from(mode.value(value)));
        feature.id = Some(Id::Number(index.into()));
    }

    if matched < store.len() {
        log::warn!(
            "{} {} features with data have no boundary",
            store.len() - matched,
            boundaries.geography()
        );
    }

    log::debug!(
        "Joined {matched}/{} {} features in {mode} mode",
        boundaries.len(),
        boundaries.geography()
    );

    Ok(JoinedFeatures {
        collection,
        surrogate_ids: boundaries.ids().to_vec(),
    })
}
