//! Boundary `FeatureCollection` loading.

use std::path::Path;

use eviction_map_geography_models::Geography;
use geojson::{FeatureCollection, GeoJson};

use crate::GeographyError;

/// The boundary features of one geography, with each feature's join key
/// extracted up front.
#[derive(Debug, Clone)]
pub struct BoundarySet {
    geography: Geography,
    id_property: String,
    collection: FeatureCollection,
    ids: Vec<String>,
}

impl BoundarySet {
    /// Reads and validates the boundary file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`GeographyError`] if the file is missing, is not a
    /// `FeatureCollection`, or any feature lacks `id_property`.
    pub fn load(
        geography: Geography,
        path: &Path,
        id_property: &str,
    ) -> Result<Self, GeographyError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| GeographyError::Io {
            path: display.clone(),
            source,
        })?;

        let set = Self::parse(geography, &text, id_property, &display)?;
        log::info!(
            "Loaded {} {geography} boundaries from {display}",
            set.ids.len()
        );
        Ok(set)
    }

    /// Parses boundary `GeoJSON` text. `origin` names the source in errors.
    ///
    /// # Errors
    ///
    /// Returns [`GeographyError`] if the text is not a `FeatureCollection`
    /// or any feature lacks `id_property`.
    pub fn parse(
        geography: Geography,
        text: &str,
        id_property: &str,
        origin: &str,
    ) -> Result<Self, GeographyError> {
        let geojson: GeoJson = text.parse().map_err(|e: geojson::Error| GeographyError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;

        let GeoJson::FeatureCollection(collection) = geojson else {
            return Err(GeographyError::NotFeatureCollection {
                path: origin.to_string(),
            });
        };

        let ids = collection
            .features
            .iter()
            .enumerate()
            .map(|(index, feature)| {
                feature
                    .property(id_property)
                    .and_then(id_from_json)
                    .ok_or_else(|| GeographyError::MissingId {
                        path: origin.to_string(),
                        index,
                        property: id_property.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            geography,
            id_property: id_property.to_string(),
            collection,
            ids,
        })
    }

    /// Geography these boundaries belong to.
    #[must_use]
    pub const fn geography(&self) -> Geography {
        self.geography
    }

    /// Feature property holding the join key.
    #[must_use]
    pub fn id_property(&self) -> &str {
        &self.id_property
    }

    /// The unmodified boundary features.
    #[must_use]
    pub const fn collection(&self) -> &FeatureCollection {
        &self.collection
    }

    /// Join key of every feature, in collection order.
    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Number of features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the collection has no features.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Boundary files store ids as strings or numbers; both join as strings.
fn id_from_json(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACTS: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"GEOID": "T1"}, "geometry": null},
            {"type": "Feature", "properties": {"GEOID": 42}, "geometry": null}
        ]
    }"#;

    #[test]
    fn extracts_string_and_numeric_ids() {
        let set = BoundarySet::parse(Geography::Tract, TRACTS, "GEOID", "inline").unwrap();
        assert_eq!(set.ids(), ["T1".to_string(), "42".to_string()]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.geography(), Geography::Tract);
    }

    #[test]
    fn missing_id_property_is_fatal() {
        let err = BoundarySet::parse(Geography::Tract, TRACTS, "zone_id", "inline").unwrap_err();
        assert!(
            matches!(err, GeographyError::MissingId { index: 0, .. }),
            "expected MissingId, got {err:?}"
        );
    }

    #[test]
    fn rejects_non_collections() {
        let point = r#"{"type": "Point", "coordinates": [0.0, 0.0]}"#;
        assert!(matches!(
            BoundarySet::parse(Geography::Hexagon, point, "id", "inline"),
            Err(GeographyError::NotFeatureCollection { .. })
        ));
        assert!(matches!(
            BoundarySet::parse(Geography::Hexagon, "not json", "id", "inline"),
            Err(GeographyError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = BoundarySet::load(
            Geography::SchoolZone,
            Path::new("/nonexistent/school_zones.geojson"),
            "zone_id",
        )
        .unwrap_err();
        assert!(matches!(err, GeographyError::Io { .. }));
    }
}
