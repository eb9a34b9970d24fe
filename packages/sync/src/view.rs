//! Rendered view state handed to the UI boundary.

use std::sync::Arc;

use eviction_map_backend_models::{FeatureStatRow, RateUnit};
use eviction_map_geography::{JoinedFeatures, LegendEntry};
use eviction_map_geography_models::{DisplayMode, FeatureValue, Geography};
use eviction_map_time::TimeIndex;
use eviction_map_time_models::{Period, TimeCursor};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::CursorState;

/// Where a per-feature trend chart is shown.
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
pub enum TrendPlacement {
    /// Floating popup pinned to the feature on the map.
    Popup,
    /// Side drawer.
    Drawer,
}

/// Vertical marker showing the cursor on a trend chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrendMarker {
    /// Line at one month.
    Period {
        /// Marked month.
        period: Period,
    },
    /// Shaded band over a range.
    Span {
        /// First marked month.
        start: Period,
        /// Last marked month.
        end: Period,
    },
}

impl From<TimeCursor> for TrendMarker {
    fn from(cursor: TimeCursor) -> Self {
        match cursor {
            TimeCursor::Single { period } => Self::Period { period },
            TimeCursor::Range { range } => Self::Span {
                start: range.start(),
                end: range.end(),
            },
        }
    }
}

/// One point of a trend chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    /// Month of the point.
    pub period: Period,
    /// Axis label (`"Jan 2020"`).
    pub label: String,
    /// Value under the active display mode.
    pub value: f64,
}

/// Time series chart for one feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendView {
    /// Where the chart is shown.
    pub placement: TrendPlacement,
    /// Semantic id of the charted feature.
    pub feature_id: String,
    /// Y-axis title.
    pub y_title: String,
    /// Points in period order, limited to the time index.
    pub points: Vec<TrendPoint>,
    /// Cursor marker.
    pub marker: TrendMarker,
}

impl TrendView {
    /// Builds a chart from a feature's series rows.
    #[must_use]
    pub fn build(
        placement: TrendPlacement,
        feature_id: &str,
        rows: &[FeatureStatRow],
        mode: DisplayMode,
        unit: RateUnit,
        cursor: TimeCursor,
        index: &TimeIndex,
    ) -> Self {
        let mut points = rows
            .iter()
            .filter(|row| index.index_of(row.period).is_some())
            .map(|row| TrendPoint {
                period: row.period,
                label: TimeIndex::short_label(row.period),
                value: mode.value(FeatureValue::new(
                    row.filing_count,
                    unit.to_percent(row.filing_rate),
                )),
            })
            .collect::<Vec<_>>();
        points.sort_by_key(|p| p.period);
        points.dedup_by_key(|p| p.period);

        Self {
            placement,
            feature_id: feature_id.to_string(),
            y_title: mode.title().to_string(),
            points,
            marker: cursor.into(),
        }
    }
}

/// Everything the UI needs to draw the current state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSnapshot {
    /// Slider state.
    pub state: CursorState,
    /// Periods selected by the slider.
    pub cursor: TimeCursor,
    /// Active display mode.
    pub mode: DisplayMode,
    /// Active geography.
    pub geography: Geography,
    /// Label shown next to the slider.
    pub month_label: String,
    /// Legend heading.
    pub legend_title: String,
    /// Legend rows.
    pub legend: Vec<LegendEntry>,
    /// Fill color expression for the map layer.
    pub paint: serde_json::Value,
    /// Headline total for the cursor.
    pub headline_total: f64,
    /// Open trend charts.
    pub trends: Vec<TrendView>,
    /// Whether the time index was synthesized because the backend was
    /// unreachable at startup.
    pub degraded: bool,
    /// Whether a slow operation is in flight.
    pub loading: bool,
    /// Last transition error, if the view is stale because of it.
    pub error: Option<String>,
    /// Annotated boundary features.
    #[serde(skip)]
    pub map: Arc<JoinedFeatures>,
}

#[cfg(test)]
mod tests {
    use eviction_map_time_models::PeriodRange;

    use super::*;

    fn p(year: i32, month: u32) -> Period {
        Period::new(year, month).unwrap()
    }

    fn row(period: Period, count: u64, rate: f64) -> FeatureStatRow {
        FeatureStatRow {
            feature_id: "T1".to_string(),
            period,
            filing_count: count,
            filing_rate: rate,
        }
    }

    #[test]
    fn trend_points_follow_mode_and_index() {
        let index = TimeIndex::build(["2020-01", "2020-02"], None, None);
        let rows = vec![
            row(p(2020, 2), 3, 0.02),
            row(p(2020, 1), 5, 0.01),
            row(p(2019, 12), 9, 0.09),
        ];
        let cursor = TimeCursor::Single { period: p(2020, 2) };

        let view = TrendView::build(
            TrendPlacement::Drawer,
            "T1",
            &rows,
            DisplayMode::Rate,
            RateUnit::Fraction,
            cursor,
            &index,
        );

        let values: Vec<_> = view.points.iter().map(|pt| pt.value).collect();
        assert_eq!(view.points.len(), 2, "periods outside the index are dropped");
        assert!((values[0] - 1.0).abs() < 1e-9);
        assert!((values[1] - 2.0).abs() < 1e-9);
        assert_eq!(view.points[0].label, "Jan 2020");
        assert_eq!(view.marker, TrendMarker::Period { period: p(2020, 2) });
        assert_eq!(view.y_title, DisplayMode::Rate.title());
    }

    #[test]
    fn range_cursor_marks_a_span() {
        let range = PeriodRange::new(p(2020, 1), p(2020, 3)).unwrap();
        assert_eq!(
            TrendMarker::from(TimeCursor::Range { range }),
            TrendMarker::Span {
                start: p(2020, 1),
                end: p(2020, 3)
            }
        );
    }

    #[test]
    fn placement_parses_from_path_segment() {
        assert_eq!(
            "popup".parse::<TrendPlacement>().unwrap(),
            TrendPlacement::Popup
        );
        assert!("sidebar".parse::<TrendPlacement>().is_err());
    }
}
