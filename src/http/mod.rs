//! JSON-over-HTTP surface for the reservation lifecycle.

mod auth;
mod dto;
mod error;
mod handlers;

pub use auth::Caller;
pub use dto::{AvailabilityView, ReservationView};
pub use error::ApiError;

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::accounts::AccountAuth;
use crate::manager::ReservationManager;
use crate::observability::{HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ReservationManager>,
    pub accounts: Arc<dyn AccountAuth>,
}

pub fn router(state: AppState, max_in_flight: usize) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/reservations/hold", post(handlers::create_hold))
        .route("/reservations/my", get(handlers::my_reservations))
        .route("/reservations/{id}", get(handlers::get_reservation))
        .route("/reservations/{id}/confirm", post(handlers::confirm))
        .route("/reservations/{id}/cancel", post(handlers::cancel))
        .route("/courts/{court_id}/availability", get(handlers::availability))
        .layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(max_in_flight))
        .with_state(state)
}

/// Per-route request count and latency, labelled by the matched route template.
async fn track_metrics(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let started = Instant::now();
    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(HTTP_REQUESTS_TOTAL, "route" => route.clone(), "status" => status).increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION_SECONDS, "route" => route)
        .record(started.elapsed().as_secs_f64());
    response
}
