//! Post-call cost reporting and ledger reads.

use actix_web::{HttpResponse, web};
use bulwark_core::ports::TokenUsage;
use bulwark_shared::dto::{CostReport, LedgerResponse};

use crate::middleware::error::{AppError, AppResult};
use crate::middleware::identity::ClientIdentity;
use crate::state::AppState;

/// POST /api/costs
///
/// Always 202: recording is best effort and never fails the caller.
pub async fn report(
    state: web::Data<AppState>,
    ClientIdentity(identity): ClientIdentity,
    body: web::Json<CostReport>,
) -> HttpResponse {
    let report = body.into_inner();

    let amount = match (report.actual_cost_usd, report.input_tokens, report.output_tokens) {
        (Some(cost), _, _) => Some(cost),
        (None, None, None) => None,
        (None, input, output) => Some(state.estimator.actual(&TokenUsage {
            input_tokens: input.unwrap_or(0),
            output_tokens: output.unwrap_or(0),
        })),
    };

    match amount {
        Some(cost) if cost.is_finite() && cost >= 0.0 => {
            state
                .gate
                .settle(&identity, report.receipt.as_deref(), cost)
                .await
        }
        _ => tracing::debug!(identity = %identity.full(), "Cost report without usable amount"),
    }

    HttpResponse::Accepted().finish()
}

/// GET /api/costs
pub async fn ledger(
    state: web::Data<AppState>,
    ClientIdentity(identity): ClientIdentity,
) -> AppResult<HttpResponse> {
    let stable_key = identity.stable_key();
    if stable_key.is_empty() {
        return Err(AppError::BadRequest("Missing client identity".to_string()));
    }

    let snapshot = state.gate.ledger_snapshot(stable_key).await?;

    Ok(HttpResponse::Ok().json(LedgerResponse {
        stable_key: stable_key.to_string(),
        burst_total_usd: snapshot.burst_total_usd,
        day_total_usd: snapshot.day_total_usd,
        throttled_for_seconds: snapshot.throttled_for_secs,
    }))
}
