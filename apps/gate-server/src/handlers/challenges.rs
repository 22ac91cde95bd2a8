//! Challenge issuance.

use actix_web::{HttpResponse, web};
use bulwark_shared::dto::ChallengeResponse;

use crate::middleware::error::{AppError, AppResult};
use crate::middleware::identity::ClientIdentity;
use crate::state::AppState;

/// POST /api/challenges
pub async fn issue(
    state: web::Data<AppState>,
    ClientIdentity(identity): ClientIdentity,
) -> AppResult<HttpResponse> {
    let stable_key = identity.stable_key();
    if stable_key.is_empty() {
        return Err(AppError::BadRequest("Missing client identity".to_string()));
    }

    let grant = state.gate.issue_challenge(stable_key).await?;

    Ok(HttpResponse::Created().json(ChallengeResponse {
        challenge_id: grant.challenge_id,
        expires_in_seconds: grant.expires_in.as_secs(),
    }))
}
