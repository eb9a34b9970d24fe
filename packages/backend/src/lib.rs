#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Client for the hosted eviction statistics backend.
//!
//! The dashboard never talks to the backend directly; it goes through the
//! [`EvictionBackend`] trait so that the view synchronizer can be driven
//! by any implementation. [`RestBackend`] is the production one: a
//! `PostgREST`-style hosted database queried over HTTPS.

pub mod retry;

use std::time::Duration;

use async_trait::async_trait;
use eviction_map_backend_models::{
    BackendConfig, FeatureStatRow, PeriodFilter, RateUnit, RegionTotalRow, RowError,
    period_key_from_json,
};

/// Errors that can occur while querying the backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Status code.
        status: u16,
        /// Request URL.
        url: String,
    },

    /// Response body was not JSON.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Response rows did not match the query contract.
    #[error("Unexpected response shape: {0}")]
    Shape(#[from] RowError),

    /// Anything else that prevented the request from completing.
    #[error("Request error: {message}")]
    Request {
        /// Description of what went wrong.
        message: String,
    },
}

/// Query contract the dashboard needs from its data backend.
#[async_trait]
pub trait EvictionBackend: Send + Sync {
    /// Raw keys of every period that has data, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the listing cannot be fetched.
    async fn distinct_periods(&self) -> Result<Vec<String>, BackendError>;

    /// Per-feature rows of `resource` matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the query fails or rows are malformed.
    async fn feature_stats(
        &self,
        resource: &str,
        id_column: &str,
        filter: &PeriodFilter,
    ) -> Result<Vec<FeatureStatRow>, BackendError>;

    /// Every period's row for a single feature, used by trend charts.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the query fails or rows are malformed.
    async fn feature_series(
        &self,
        resource: &str,
        id_column: &str,
        feature_id: &str,
    ) -> Result<Vec<FeatureStatRow>, BackendError>;

    /// Region-level totals for the periods matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the query fails or rows are malformed.
    async fn region_totals(&self, filter: &PeriodFilter)
    -> Result<Vec<RegionTotalRow>, BackendError>;

    /// Unit of `filing_rate` in the rows this backend returns.
    fn rate_unit(&self) -> RateUnit {
        RateUnit::Percent
    }
}

/// Per-request timeout for backend calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// `PostgREST`-style hosted database client.
pub struct RestBackend {
    client: reqwest::Client,
    config: BackendConfig,
}

impl RestBackend {
    /// Creates a client for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Http`] if the HTTP client cannot be built.
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, config })
    }

    /// Connection settings in use.
    #[must_use]
    pub const fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn resource_url(&self, resource: &str) -> String {
        format!(
            "{}/rest/v1/{resource}",
            self.config.url.trim_end_matches('/')
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.config.api_key.is_empty() {
            request
        } else {
            request
                .header("apikey", &self.config.api_key)
                .bearer_auth(&self.config.api_key)
        }
    }

    /// Fetches every row of `resource` matching `params`, following offset
    /// pagination until a short page is returned.
    async fn fetch_all(
        &self,
        resource: &str,
        params: &[(String, String)],
    ) -> Result<Vec<serde_json::Value>, BackendError> {
        let url = self.resource_url(resource);
        let page_size = self.config.page_size.max(1);
        let mut rows = Vec::new();
        let mut offset = 0u64;

        loop {
            let mut page_params = params.to_vec();
            page_params.push(("limit".to_string(), page_size.to_string()));
            page_params.push(("offset".to_string(), offset.to_string()));

            let body = retry::send_json(|| {
                self.authorize(self.client.get(&url).query(&page_params))
            })
            .await?;

            let serde_json::Value::Array(page) = body else {
                return Err(BackendError::Request {
                    message: format!("expected a JSON array from {resource}"),
                });
            };

            let fetched = page.len();
            rows.extend(page);
            log::debug!("{resource}: fetched {fetched} rows at offset {offset}");

            if fetched < page_size as usize {
                break;
            }
            offset += u64::from(page_size);
        }

        Ok(rows)
    }

    fn stats_select(&self, id_column: &str) -> String {
        format!(
            "{id_column},{},filing_count,filing_rate",
            self.config.period_column
        )
    }
}

#[async_trait]
impl EvictionBackend for RestBackend {
    async fn distinct_periods(&self) -> Result<Vec<String>, BackendError> {
        let period_column = &self.config.period_column;
        let params = vec![
            ("select".to_string(), period_column.clone()),
            ("order".to_string(), format!("{period_column}.asc")),
        ];
        let rows = self
            .fetch_all(&self.config.periods_resource, &params)
            .await?;

        rows.iter()
            .map(|row| period_key_from_json(row, period_column).map_err(BackendError::from))
            .collect()
    }

    async fn feature_stats(
        &self,
        resource: &str,
        id_column: &str,
        filter: &PeriodFilter,
    ) -> Result<Vec<FeatureStatRow>, BackendError> {
        let period_column = &self.config.period_column;
        let params = vec![
            ("select".to_string(), self.stats_select(id_column)),
            (period_column.clone(), filter.to_operator()),
            (
                "order".to_string(),
                format!("{id_column}.asc,{period_column}.asc"),
            ),
        ];
        let rows = self.fetch_all(resource, &params).await?;
        log::info!(
            "Fetched {} rows from {resource} for {}",
            rows.len(),
            filter.to_operator()
        );

        rows.iter()
            .map(|row| {
                FeatureStatRow::from_json(row, id_column, period_column).map_err(BackendError::from)
            })
            .collect()
    }

    async fn feature_series(
        &self,
        resource: &str,
        id_column: &str,
        feature_id: &str,
    ) -> Result<Vec<FeatureStatRow>, BackendError> {
        let period_column = &self.config.period_column;
        let params = vec![
            ("select".to_string(), self.stats_select(id_column)),
            (id_column.to_string(), format!("eq.{feature_id}")),
            ("order".to_string(), format!("{period_column}.asc")),
        ];
        let rows = self.fetch_all(resource, &params).await?;

        rows.iter()
            .map(|row| {
                FeatureStatRow::from_json(row, id_column, period_column).map_err(BackendError::from)
            })
            .collect()
    }

    async fn region_totals(
        &self,
        filter: &PeriodFilter,
    ) -> Result<Vec<RegionTotalRow>, BackendError> {
        let period_column = &self.config.period_column;
        let params = vec![
            (
                "select".to_string(),
                format!("{period_column},filing_count,filing_rate"),
            ),
            (period_column.clone(), filter.to_operator()),
            ("order".to_string(), format!("{period_column}.asc")),
        ];
        let rows = self
            .fetch_all(&self.config.region_resource, &params)
            .await?;

        rows.iter()
            .map(|row| RegionTotalRow::from_json(row, period_column).map_err(BackendError::from))
            .collect()
    }

    fn rate_unit(&self) -> RateUnit {
        self.config.rate_unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BackendConfig {
        BackendConfig {
            url: "https://example.supabase.co/".to_string(),
            api_key: String::new(),
            periods_resource: "available_months".to_string(),
            region_resource: "region_monthly".to_string(),
            period_column: "month".to_string(),
            rate_unit: RateUnit::Fraction,
            page_size: 1000,
        }
    }

    #[test]
    fn resource_url_trims_trailing_slash() {
        let backend = RestBackend::new(config()).unwrap();
        assert_eq!(
            backend.resource_url("tract_monthly"),
            "https://example.supabase.co/rest/v1/tract_monthly"
        );
    }

    #[test]
    fn select_lists_contract_columns() {
        let backend = RestBackend::new(config()).unwrap();
        assert_eq!(
            backend.stats_select("geoid"),
            "geoid,month,filing_count,filing_rate"
        );
    }

    #[test]
    fn rate_unit_comes_from_config() {
        let backend = RestBackend::new(config()).unwrap();
        assert_eq!(backend.rate_unit(), RateUnit::Fraction);
    }

    #[tokio::test]
    async fn unreachable_backend_errors_instead_of_panicking() {
        let mut cfg = config();
        cfg.url = "http://127.0.0.1:9".to_string();
        let backend = RestBackend::new(cfg).unwrap();
        assert!(backend.distinct_periods().await.is_err());
    }
}
