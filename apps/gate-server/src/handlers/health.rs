//! Health check endpoint.

use actix_web::{HttpResponse, web};
use bulwark_shared::dto::{AnomalyCounts, HealthResponse};

use crate::state::AppState;

/// Health check endpoint - returns server status and degraded-mode counters.
///
/// GET /api/health
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let stats = state.anomalies.snapshot();

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: state.store_backend.to_string(),
        anomalies: AnomalyCounts {
            fail_open_total: stats.fail_open_total,
            fail_closed_total: stats.fail_closed_total,
            suppressed_total: stats.suppressed_total,
        },
    };

    HttpResponse::Ok().json(response)
}
