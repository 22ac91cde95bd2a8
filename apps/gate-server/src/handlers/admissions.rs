//! Pre-call admission.

use actix_web::{HttpResponse, web};
use bulwark_core::ports::GenerationRequest;
use bulwark_shared::dto::{AdmissionRequest, AdmissionResponse};

use crate::middleware::error::{AppError, AppResult};
use crate::middleware::identity::ClientIdentity;
use crate::state::AppState;

/// POST /api/admissions
///
/// Runs challenge, window and spend checks. The body is optional; without
/// an explicit `estimated_cost_usd` the price comes from the estimator.
pub async fn admit(
    state: web::Data<AppState>,
    ClientIdentity(identity): ClientIdentity,
    body: Option<web::Json<AdmissionRequest>>,
) -> AppResult<HttpResponse> {
    let req = body.map(web::Json::into_inner).unwrap_or_default();

    let estimated_cost_usd = match req.estimated_cost_usd {
        Some(cost) if cost.is_finite() && cost >= 0.0 => cost,
        Some(_) => {
            return Err(AppError::BadRequest(
                "estimated_cost_usd must be a non-negative number".to_string(),
            ));
        }
        None => state.estimator.estimate(&GenerationRequest {
            prompt: req.prompt.unwrap_or_default(),
            max_output_tokens: req.max_output_tokens,
        }),
    };

    let ticket = state.gate.admit(&identity, estimated_cost_usd).await?;

    if ticket.degraded {
        tracing::debug!(identity = %ticket.identity, "Admitted with checks skipped");
    }

    Ok(HttpResponse::Ok().json(AdmissionResponse {
        stable_key: ticket.stable_key,
        estimated_cost_usd: ticket.estimated_cost_usd,
        receipt: ticket.cost_receipt,
        degraded: ticket.degraded,
    }))
}
