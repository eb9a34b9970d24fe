//! Choropleth color scale and legend.

use eviction_map_geography_models::{DisplayMode, GeographyProfile};
use serde::Serialize;
use serde_json::{Value, json};

use crate::{DISPLAY_VALUE_PROPERTY, GeographyError};

/// One legend row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegendEntry {
    /// Human-readable bucket range.
    pub label: String,
    /// Fill color for the bucket.
    pub color: String,
    /// Inclusive lower bound; `None` for the first bucket.
    pub lower: Option<f64>,
    /// Exclusive upper bound; `None` for the last bucket.
    pub upper: Option<f64>,
}

/// Step scale for one (geography, mode) pair.
///
/// `n` ascending breakpoints split values into `n + 1` buckets: below the
/// first breakpoint, between consecutive breakpoints, and at or above the
/// last one. Bucket `i` uses `palette[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorScale {
    mode: DisplayMode,
    breakpoints: Vec<f64>,
    colors: Vec<String>,
}

impl ColorScale {
    /// Builds the scale for `profile` in `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`GeographyError::Scale`] if the breakpoints are empty, not
    /// strictly increasing, or outnumber the palette.
    pub fn new(
        profile: &GeographyProfile,
        mode: DisplayMode,
        palette: &[String],
    ) -> Result<Self, GeographyError> {
        let breakpoints = profile.breakpoints(mode).to_vec();

        if breakpoints.is_empty() {
            return Err(GeographyError::Scale {
                message: format!("{} has no {mode} breakpoints", profile.geography),
            });
        }
        if breakpoints.windows(2).any(|w| w[0] >= w[1]) {
            return Err(GeographyError::Scale {
                message: format!(
                    "{} {mode} breakpoints are not strictly increasing",
                    profile.geography
                ),
            });
        }
        if palette.len() < breakpoints.len() + 1 {
            return Err(GeographyError::Scale {
                message: format!(
                    "{} {mode} breakpoints need {} colors, palette has {}",
                    profile.geography,
                    breakpoints.len() + 1,
                    palette.len()
                ),
            });
        }

        let colors = palette[..=breakpoints.len()].to_vec();
        Ok(Self {
            mode,
            breakpoints,
            colors,
        })
    }

    /// Mode the scale was built for.
    #[must_use]
    pub const fn mode(&self) -> DisplayMode {
        self.mode
    }

    /// Breakpoints in ascending order.
    #[must_use]
    pub fn breakpoints(&self) -> &[f64] {
        &self.breakpoints
    }

    /// Bucket index for `value`.
    #[must_use]
    pub fn bucket(&self, value: f64) -> usize {
        self.breakpoints.partition_point(|b| *b <= value)
    }

    /// Fill color for `value`.
    #[must_use]
    pub fn color_for(&self, value: f64) -> &str {
        &self.colors[self.bucket(value)]
    }

    /// Legend rows, lowest bucket first.
    #[must_use]
    pub fn legend(&self) -> Vec<LegendEntry> {
        self.colors
            .iter()
            .enumerate()
            .map(|(i, color)| {
                let lower = i.checked_sub(1).map(|j| self.breakpoints[j]);
                let upper = self.breakpoints.get(i).copied();
                let label = match (lower, upper) {
                    (None, Some(upper)) => format!("< {}", self.format(upper)),
                    (Some(lower), Some(upper)) => {
                        format!("{} - {}", self.format(lower), self.format(upper))
                    }
                    (Some(lower), None) => format!("{}+", self.format(lower)),
                    (None, None) => String::new(),
                };
                LegendEntry {
                    label,
                    color: color.clone(),
                    lower,
                    upper,
                }
            })
            .collect()
    }

    /// `MapLibre` `step` expression over the joined display value.
    #[must_use]
    pub fn paint_expression(&self) -> Value {
        let mut expr = vec![
            json!("step"),
            json!(["get", DISPLAY_VALUE_PROPERTY]),
            json!(self.colors[0]),
        ];
        for (breakpoint, color) in self.breakpoints.iter().zip(&self.colors[1..]) {
            expr.push(json!(breakpoint));
            expr.push(json!(color));
        }
        Value::Array(expr)
    }

    fn format(&self, value: f64) -> String {
        let number = if value.fract().abs() < f64::EPSILON {
            format!("{value:.0}")
        } else {
            let s = format!("{value:.2}");
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        };
        match self.mode {
            DisplayMode::Count => number,
            DisplayMode::Rate => format!("{number}%"),
        }
    }
}
