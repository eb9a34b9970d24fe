//! HTTP handler functions for the eviction map API.

use actix_web::{HttpResponse, http::header, web};
use eviction_map_server_models::{
    ApiHealth, ApiPeriod, ApiPeriods, ApiSuperseded, GeographyRequest, IndexRequest, ModeRequest,
    RangeRequest, TrendRequest,
};
use eviction_map_sync::{SyncError, Transition, TransitionOutcome, TrendPlacement, ViewSnapshot};

use crate::AppState;

/// `GET /api/health`
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let degraded = state.sync().context().is_degraded();
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        degraded,
    })
}

/// `GET /api/periods`
///
/// Lists the slider's periods with every key and label representation.
pub async fn periods(state: web::Data<AppState>) -> HttpResponse {
    let ctx = state.sync().context().clone();
    let index = ctx.index();

    HttpResponse::Ok().json(ApiPeriods {
        periods: index
            .periods()
            .iter()
            .enumerate()
            .map(|(i, period)| ApiPeriod::new(i, *period))
            .collect(),
        default_index: index.default_index(ctx.config().periods.preferred),
        synthesized: index.is_synthesized(),
    })
}

/// `GET /api/view`
///
/// Returns the current view snapshot.
pub async fn view(state: web::Data<AppState>) -> HttpResponse {
    match current_view(&state) {
        Some(snapshot) => HttpResponse::Ok().json(snapshot),
        None => not_loaded(&state),
    }
}

/// `GET /api/map`
///
/// Returns the annotated boundary `FeatureCollection` of the current view.
pub async fn map(state: web::Data<AppState>) -> HttpResponse {
    let map = state.sync().snapshot().map(|s| s.map.clone());
    match map {
        Some(map) => HttpResponse::Ok().json(&map.collection),
        None => not_loaded(&state),
    }
}

/// `GET /api/export.csv`
///
/// Downloads the loaded per-feature values. Answers `503` while the store
/// holds nothing, including after a failed load that left the last good
/// view on screen.
pub async fn export_csv(state: web::Data<AppState>) -> HttpResponse {
    let mut body = Vec::new();
    let exported = {
        let sync = state.sync();
        if sync.store().loaded().is_none() {
            drop(sync);
            return not_loaded(&state);
        }
        let filename = sync.cursor().map_or_else(
            |_| format!("evictions-{}.csv", sync.geography()),
            |cursor| {
                let key = cursor
                    .periods()
                    .first()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                let suffix = if cursor.is_range() { "-range" } else { "" };
                format!("evictions-{}-{key}{suffix}.csv", sync.geography())
            },
        );
        sync.export_csv(&mut body).map(|()| filename)
    };

    match exported {
        Ok(filename) => HttpResponse::Ok()
            .content_type("text/csv")
            .insert_header((
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ))
            .body(body),
        Err(e) => {
            log::error!("Failed to export CSV: {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to export CSV"
            }))
        }
    }
}

/// `POST /api/cursor/index`
///
/// Moves the single-month slider. Debounced: a request superseded by a
/// newer slider request within the window answers `202`.
pub async fn set_index(state: web::Data<AppState>, body: web::Json<IndexRequest>) -> HttpResponse {
    let Some(request) = state.debouncer.settle(body.into_inner()).await else {
        return superseded();
    };
    run_transition(&state, Transition::SetIndex(request.index)).await
}

/// `POST /api/cursor/range`
///
/// Moves the range slider thumbs. Debounced like `cursor/index`.
pub async fn set_range(state: web::Data<AppState>, body: web::Json<RangeRequest>) -> HttpResponse {
    let Some(request) = state.debouncer.settle(body.into_inner()).await else {
        return superseded();
    };
    run_transition(
        &state,
        Transition::SetRange {
            start: request.start,
            end: request.end,
        },
    )
    .await
}

/// `POST /api/cursor/enter-range`
pub async fn enter_range(
    state: web::Data<AppState>,
    body: web::Json<RangeRequest>,
) -> HttpResponse {
    run_transition(
        &state,
        Transition::EnterRange {
            start: body.start,
            end: body.end,
        },
    )
    .await
}

/// `POST /api/cursor/exit-range`
pub async fn exit_range(state: web::Data<AppState>, body: web::Json<IndexRequest>) -> HttpResponse {
    run_transition(&state, Transition::ExitRange { index: body.index }).await
}

/// `POST /api/mode`
pub async fn set_mode(state: web::Data<AppState>, body: web::Json<ModeRequest>) -> HttpResponse {
    run_transition(&state, Transition::SetMode(body.mode)).await
}

/// `POST /api/geography`
pub async fn set_geography(
    state: web::Data<AppState>,
    body: web::Json<GeographyRequest>,
) -> HttpResponse {
    run_transition(&state, Transition::SetGeography(body.geography)).await
}

/// `POST /api/refresh`
pub async fn refresh(state: web::Data<AppState>) -> HttpResponse {
    run_transition(&state, Transition::Refresh).await
}

/// `POST /api/trends`
///
/// Opens a trend chart for one feature.
pub async fn open_trend(state: web::Data<AppState>, body: web::Json<TrendRequest>) -> HttpResponse {
    let TrendRequest {
        feature_id,
        placement,
    } = body.into_inner();

    let placement = match placement.as_deref().map(str::parse::<TrendPlacement>) {
        None => TrendPlacement::Popup,
        Some(Ok(placement)) => placement,
        Some(Err(_)) => return bad_placement(placement.as_deref().unwrap_or_default()),
    };

    run_transition(
        &state,
        Transition::OpenTrend {
            feature_id,
            placement,
        },
    )
    .await
}

/// `DELETE /api/trends/{placement}`
pub async fn close_trend(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let Ok(placement) = path.parse::<TrendPlacement>() else {
        return bad_placement(&path);
    };
    run_transition(&state, Transition::CloseTrend { placement }).await
}

/// Begins the transition under the lock, resolves it without the lock
/// (raising the loading flag if slow), then applies it under the lock.
async fn run_transition(state: &AppState, transition: Transition) -> HttpResponse {
    let begun = state.sync().begin(transition);
    let pending = match begun {
        Ok(pending) => pending,
        Err(e) => return error_response(state, &e),
    };

    let resolved = state.loading.track(pending.resolve()).await;
    let applied = state.sync().apply(resolved);

    match applied {
        Ok(TransitionOutcome::Applied(mut snapshot)) => {
            snapshot.loading = state.loading.is_loading();
            HttpResponse::Ok().json(snapshot)
        }
        Ok(TransitionOutcome::Discarded) => superseded(),
        Err(e) => error_response(state, &e),
    }
}

fn current_view(state: &AppState) -> Option<ViewSnapshot> {
    let mut snapshot = state.sync().snapshot().cloned()?;
    snapshot.loading = state.loading.is_loading();
    Some(snapshot)
}

/// Validation errors answer `400`. Load failures answer `502` together
/// with the retained last good view.
fn error_response(state: &AppState, error: &SyncError) -> HttpResponse {
    if error.is_validation() {
        log::warn!("Rejected transition: {error}");
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": error.to_string()
        }));
    }

    log::error!("Transition failed: {error}");
    let body = serde_json::json!({
        "error": error.to_string(),
        "view": current_view(state),
    });

    if error.is_load_failure() {
        HttpResponse::BadGateway().json(body)
    } else {
        HttpResponse::InternalServerError().json(body)
    }
}

fn not_loaded(state: &AppState) -> HttpResponse {
    let error = state
        .sync()
        .last_error()
        .map_or_else(|| "View not loaded yet".to_string(), ToString::to_string);
    HttpResponse::ServiceUnavailable().json(serde_json::json!({ "error": error }))
}

fn superseded() -> HttpResponse {
    HttpResponse::Accepted().json(ApiSuperseded { superseded: true })
}

fn bad_placement(placement: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({
        "error": format!("Unknown trend placement '{placement}'")
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{App, http::StatusCode, test};
    use async_trait::async_trait;
    use eviction_map_backend::{BackendError, EvictionBackend};
    use eviction_map_backend_models::{FeatureStatRow, PeriodFilter, RegionTotalRow};
    use eviction_map_config::{DashboardConfig, Timing};
    use eviction_map_geography::BoundarySet;
    use eviction_map_geography_models::Geography;
    use eviction_map_sync::{AppContext, ViewSynchronizer};
    use eviction_map_time_models::Period;

    use super::*;

    struct FakeBackend;

    #[async_trait]
    impl EvictionBackend for FakeBackend {
        async fn distinct_periods(&self) -> Result<Vec<String>, BackendError> {
            Ok(vec!["2020-01-01".into(), "2020-02-01".into()])
        }

        async fn feature_stats(
            &self,
            _resource: &str,
            _id_column: &str,
            filter: &PeriodFilter,
        ) -> Result<Vec<FeatureStatRow>, BackendError> {
            Ok(filter
                .periods()
                .into_iter()
                .map(|period| FeatureStatRow {
                    feature_id: "T1".to_string(),
                    period,
                    filing_count: 3,
                    filing_rate: 0.8,
                })
                .collect())
        }

        async fn feature_series(
            &self,
            _resource: &str,
            _id_column: &str,
            _feature_id: &str,
        ) -> Result<Vec<FeatureStatRow>, BackendError> {
            Ok(Vec::new())
        }

        async fn region_totals(
            &self,
            _filter: &PeriodFilter,
        ) -> Result<Vec<RegionTotalRow>, BackendError> {
            Ok(Vec::new())
        }
    }

    async fn state() -> web::Data<AppState> {
        build_state(true).await
    }

    async fn build_state(initial_load: bool) -> web::Data<AppState> {
        let config = DashboardConfig::embedded().unwrap();
        let ctx = AppContext::bootstrap(config, Arc::new(FakeBackend))
            .await
            .unwrap();
        ctx.insert_boundaries(
            BoundarySet::parse(
                Geography::Tract,
                r#"{"type": "FeatureCollection", "features": [
                    {"type": "Feature", "properties": {"GEOID": "T1"}, "geometry": null}
                ]}"#,
                "GEOID",
                "tracts",
            )
            .unwrap(),
        );
        let mut sync = ViewSynchronizer::new(Arc::new(ctx)).unwrap();
        if initial_load {
            sync.transition(Transition::Refresh).await.unwrap();
        }

        web::Data::new(AppState::new(
            sync,
            Timing {
                debounce_ms: 0,
                loading_delay_ms: 300,
            },
        ))
    }

    #[actix_web::test]
    async fn periods_lists_slider_positions() {
        let app = test::init_service(
            App::new()
                .app_data(state().await)
                .configure(crate::configure_api),
        )
        .await;

        let body: ApiPeriods = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/periods").to_request(),
        )
        .await;

        assert_eq!(body.periods.len(), 2);
        assert_eq!(body.periods[0].key, Period::new(2020, 1).unwrap().key());
        assert_eq!(body.default_index, 1);
        assert!(!body.synthesized);
    }

    #[actix_web::test]
    async fn rate_in_range_mode_is_a_bad_request() {
        let app = test::init_service(
            App::new()
                .app_data(state().await)
                .configure(crate::configure_api),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/cursor/enter-range")
                .set_json(RangeRequest { start: 0, end: 1 })
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/mode")
                .set_json(serde_json::json!({"mode": "rate"}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn index_change_returns_new_view() {
        let app = test::init_service(
            App::new()
                .app_data(state().await)
                .configure(crate::configure_api),
        )
        .await;

        let body: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post()
                .uri("/api/cursor/index")
                .set_json(IndexRequest { index: 0 })
                .to_request(),
        )
        .await;

        assert_eq!(body["monthLabel"], "January 2020");
        assert_eq!(body["mode"], "count");
        assert_eq!(body["headlineTotal"], 3.0);
    }

    #[actix_web::test]
    async fn unknown_trend_placement_is_rejected() {
        let app = test::init_service(
            App::new()
                .app_data(state().await)
                .configure(crate::configure_api),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::delete()
                .uri("/api/trends/sidebar")
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn export_is_csv() {
        let app = test::init_service(
            App::new()
                .app_data(state().await)
                .configure(crate::configure_api),
        )
        .await;

        let body = test::call_and_read_body(
            &app,
            test::TestRequest::get().uri("/api/export.csv").to_request(),
        )
        .await;
        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            "feature_id,filing_count,filing_rate\nT1,3,0.8000\n"
        );
    }

    #[actix_web::test]
    async fn export_without_loaded_data_is_unavailable() {
        let app = test::init_service(
            App::new()
                .app_data(build_state(false).await)
                .configure(crate::configure_api),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/export.csv").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
