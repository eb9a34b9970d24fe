#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web server for the eviction filings dashboard.
//!
//! Serves the dashboard page from `app/dist` and the JSON API it drives.
//! Every control on the page maps to one endpoint, and every endpoint maps
//! to one view transition; the response is the resulting view snapshot.

mod handlers;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use actix_cors::Cors;
use actix_files::Files;
use actix_web::{App, HttpServer, middleware, web};
use eviction_map_backend::RestBackend;
use eviction_map_config::Timing;
use eviction_map_sync::{AppContext, Debouncer, LoadingIndicator, Transition, ViewSynchronizer};

/// Shared application state.
pub struct AppState {
    /// The view synchronizer. Never locked across an `.await`.
    pub sync: Mutex<ViewSynchronizer>,
    /// Quiescence window for slider-driven requests.
    pub debouncer: Debouncer,
    /// Delayed loading flag reported in view snapshots.
    pub loading: LoadingIndicator,
}

impl AppState {
    /// Wraps a synchronizer with the configured timing.
    #[must_use]
    pub fn new(sync: ViewSynchronizer, timing: Timing) -> Self {
        Self {
            sync: Mutex::new(sync),
            debouncer: Debouncer::new(timing.debounce()),
            loading: LoadingIndicator::new(timing.loading_delay()),
        }
    }

    /// Locks the synchronizer. A poisoned lock is recovered since every
    /// transition leaves the synchronizer consistent.
    pub fn sync(&self) -> MutexGuard<'_, ViewSynchronizer> {
        self.sync.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registers the `/api` routes.
pub fn configure_api(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/periods", web::get().to(handlers::periods))
            .route("/view", web::get().to(handlers::view))
            .route("/map", web::get().to(handlers::map))
            .route("/export.csv", web::get().to(handlers::export_csv))
            .route("/cursor/index", web::post().to(handlers::set_index))
            .route("/cursor/range", web::post().to(handlers::set_range))
            .route("/cursor/enter-range", web::post().to(handlers::enter_range))
            .route("/cursor/exit-range", web::post().to(handlers::exit_range))
            .route("/mode", web::post().to(handlers::set_mode))
            .route("/geography", web::post().to(handlers::set_geography))
            .route("/refresh", web::post().to(handlers::refresh))
            .route("/trends", web::post().to(handlers::open_trend))
            .route("/trends/{placement}", web::delete().to(handlers::close_trend)),
    );
}

fn startup_error(e: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::other(e.to_string())
}

/// Starts the dashboard server.
///
/// Loads configuration, builds the time index from the backend (falling
/// back to the configured range if it is unreachable), performs the
/// initial load, and starts the Actix-Web HTTP server. This is a regular
/// async function; the caller provides the runtime (e.g. via
/// `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the configuration is invalid,
/// the HTTP server fails to bind, or it encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    log::info!("Loading configuration...");
    let config = eviction_map_config::load_from_env().map_err(startup_error)?;
    let timing = config.timing;

    log::info!("Connecting to backend at {}...", config.backend.url);
    let backend = RestBackend::new(config.backend.clone()).map_err(startup_error)?;
    let ctx = AppContext::bootstrap(config, Arc::new(backend))
        .await
        .map_err(startup_error)?;

    let mut sync = ViewSynchronizer::new(Arc::new(ctx)).map_err(startup_error)?;
    log::info!("Loading initial view...");
    if let Err(e) = sync.transition(Transition::Refresh).await {
        log::error!("Initial load failed, the page will show an error: {e}");
    }

    let state = web::Data::new(AppState::new(sync, timing));

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure_api)
            // Serve frontend static files (production)
            .service(Files::new("/", "app/dist").index_file("index.html"))
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
