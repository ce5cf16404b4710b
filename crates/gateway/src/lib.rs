//! HTTP gateway for the library reservation system.
//!
//! Fronts the catalog, reservation and rating services, runs the reservation
//! sagas, and exposes breaker health and Prometheus metrics. Structured
//! logging goes through `tracing`.

pub mod config;
pub mod error;
pub mod extract;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use resilience::BreakerRegistry;
use saga::{
    CatalogService, InMemoryCatalogService, InMemoryRatingService, InMemoryReservationStore,
    InMemoryTransport, RatingService, ReservationOrchestrator, ReservationStore, RetryDispatcher,
    RetryTransport,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub orchestrator: Arc<ReservationOrchestrator>,
    pub catalog: Arc<dyn CatalogService>,
    pub rating: Arc<dyn RatingService>,
    pub breakers: Arc<BreakerRegistry>,
}

impl AppState {
    /// Wires the orchestrator over the given services and retry transport.
    pub fn new(
        catalog: Arc<dyn CatalogService>,
        reservations: Arc<dyn ReservationStore>,
        rating: Arc<dyn RatingService>,
        transport: Arc<dyn RetryTransport>,
        breakers: Arc<BreakerRegistry>,
    ) -> Self {
        let orchestrator = ReservationOrchestrator::new(
            Arc::clone(&catalog),
            reservations,
            Arc::clone(&rating),
            RetryDispatcher::new(transport),
        );
        Self {
            orchestrator: Arc::new(orchestrator),
            catalog,
            rating,
            breakers,
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/manage/health", get(routes::health::check))
        .route(
            "/api/v1/reservations",
            post(routes::reservations::create).get(routes::reservations::list),
        )
        .route(
            "/api/v1/reservations/{id}/return",
            post(routes::reservations::return_book),
        )
        .route("/api/v1/rating", get(routes::rating::get))
        .route("/api/v1/libraries", get(routes::libraries::list))
        .route("/api/v1/libraries/{id}/books", get(routes::libraries::books))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// In-memory services behind a default [`AppState`].
#[derive(Clone)]
pub struct InMemoryServices {
    pub catalog: Arc<InMemoryCatalogService>,
    pub reservations: Arc<InMemoryReservationStore>,
    pub rating: Arc<InMemoryRatingService>,
    pub transport: Arc<InMemoryTransport>,
}

/// Creates application state over in-memory services, with a recording
/// retry transport so tests can inspect what was queued.
pub fn create_default_state() -> (Arc<AppState>, InMemoryServices) {
    let services = InMemoryServices {
        catalog: Arc::new(InMemoryCatalogService::new()),
        reservations: Arc::new(InMemoryReservationStore::new()),
        rating: Arc::new(InMemoryRatingService::new()),
        transport: Arc::new(InMemoryTransport::recording()),
    };
    let state = AppState::new(
        services.catalog.clone(),
        services.reservations.clone(),
        services.rating.clone(),
        services.transport.clone(),
        Arc::new(BreakerRegistry::default()),
    );
    (Arc::new(state), services)
}
