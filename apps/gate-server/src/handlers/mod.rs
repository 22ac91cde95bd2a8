//! HTTP handlers and route configuration.

mod admissions;
mod challenges;
mod costs;
mod health;

use actix_web::middleware::Condition;
use actix_web::web;

use crate::middleware::global_admission::GlobalAdmission;
use crate::state::AppState;

/// Configure all application routes.
pub fn configure_routes(state: &AppState) -> impl FnOnce(&mut web::ServiceConfig) + use<> {
    let global = Condition::new(
        state.global_admission,
        GlobalAdmission::new(state.gate.clone()),
    );

    move |cfg: &mut web::ServiceConfig| {
        cfg.service(
            web::scope("/api")
                .wrap(global)
                // Public routes
                .route("/health", web::get().to(health::health_check))
                // Gate routes
                .route("/challenges", web::post().to(challenges::issue))
                .route("/admissions", web::post().to(admissions::admit))
                .service(
                    web::resource("/costs")
                        .route(web::post().to(costs::report))
                        .route(web::get().to(costs::ledger)),
                ),
        );
    }
}

#[cfg(test)]
mod tests {
    use actix_web::{App, http::StatusCode, test, web};
    use bulwark_core::GuardSettings;
    use bulwark_core::settings::WindowLimit;
    use bulwark_shared::dto::{AdmissionResponse, ChallengeResponse, HealthResponse, LedgerResponse};
    use serde_json::{Value, json};

    use super::configure_routes;
    use crate::middleware::identity::{CHALLENGE_HEADER, FINGERPRINT_HEADER};
    use crate::state::AppState;

    macro_rules! app {
        ($state:expr) => {{
            let state = $state;
            test::init_service(
                App::new()
                    .app_data(web::Data::new(state.clone()))
                    .configure(configure_routes(&state)),
            )
            .await
        }};
    }

    macro_rules! issue {
        ($app:expr, $fingerprint:expr) => {{
            let req = test::TestRequest::post()
                .uri("/api/challenges")
                .insert_header((FINGERPRINT_HEADER, $fingerprint))
                .to_request();
            let resp = test::call_service($app, req).await;
            assert_eq!(resp.status(), StatusCode::CREATED);
            let body: ChallengeResponse = test::read_body_json(resp).await;
            body
        }};
    }

    #[actix_web::test]
    async fn test_health_reports_store() {
        let app = app!(AppState::in_memory(GuardSettings::default()));

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: HealthResponse = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body.status, "ok");
        assert_eq!(body.store, "memory");
        assert_eq!(body.anomalies.fail_open_total, 0);
    }

    #[actix_web::test]
    async fn test_challenge_then_admission() {
        let app = app!(AppState::in_memory(GuardSettings::default()));
        let challenge = issue!(&app, "device-hash");
        assert!(challenge.expires_in_seconds > 0);

        let admit = || {
            test::TestRequest::post()
                .uri("/api/admissions")
                .insert_header((FINGERPRINT_HEADER, "device-hash"))
                .insert_header((CHALLENGE_HEADER, challenge.challenge_id.as_str()))
                .set_json(json!({ "estimated_cost_usd": 0.01 }))
                .to_request()
        };

        let resp = test::call_service(&app, admit()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: AdmissionResponse = test::read_body_json(resp).await;
        assert_eq!(body.stable_key, "device-hash");
        assert!(!body.degraded);
        assert!(body.receipt.is_some());

        // Single use
        let resp = test::call_service(&app, admit()).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(resp.headers().get("Retry-After").is_none());
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "challenge_invalid");
    }

    #[actix_web::test]
    async fn test_fingerprint_without_challenge_is_forbidden() {
        let app = app!(AppState::in_memory(GuardSettings::default()));

        let req = test::TestRequest::post()
            .uri("/api/admissions")
            .insert_header((FINGERPRINT_HEADER, "device-hash"))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn test_second_issue_inside_cooldown_is_rate_limited() {
        let app = app!(AppState::in_memory(GuardSettings::default()));
        let challenge = issue!(&app, "device-hash");

        let req = test::TestRequest::post()
            .uri("/api/admissions")
            .insert_header((FINGERPRINT_HEADER, "device-hash"))
            .insert_header((CHALLENGE_HEADER, challenge.challenge_id.as_str()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::post()
            .uri("/api/challenges")
            .insert_header((FINGERPRINT_HEADER, "device-hash"))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(resp.headers().get("Retry-After").is_some());
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "rate_limited");
        assert!(body["retry_after_seconds"].as_u64().unwrap() >= 1);
    }

    #[actix_web::test]
    async fn test_cost_report_updates_ledger() {
        let app = app!(AppState::in_memory(GuardSettings::default()));

        let req = test::TestRequest::post()
            .uri("/api/costs")
            .insert_header((FINGERPRINT_HEADER, "device-hash"))
            .insert_header((CHALLENGE_HEADER, "c1"))
            .set_json(json!({ "actual_cost_usd": 0.25 }))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::ACCEPTED
        );

        let req = test::TestRequest::get()
            .uri("/api/costs")
            .insert_header((FINGERPRINT_HEADER, "device-hash"))
            .to_request();
        let body: LedgerResponse = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body.stable_key, "device-hash");
        assert!((body.burst_total_usd - 0.25).abs() < 1e-9);
        assert!((body.day_total_usd - 0.25).abs() < 1e-9);
        assert!(body.throttled_for_seconds.is_none());
    }

    #[actix_web::test]
    async fn test_cost_report_with_receipt_replaces_its_estimate() {
        let app = app!(AppState::in_memory(GuardSettings::default()));

        let mut receipts = Vec::new();
        for _ in 0..2 {
            let req = test::TestRequest::post()
                .uri("/api/admissions")
                .peer_addr("203.0.113.5:4000".parse().unwrap())
                .set_json(json!({ "estimated_cost_usd": 0.01 }))
                .to_request();
            let body: AdmissionResponse = test::call_and_read_body_json(&app, req).await;
            receipts.push(body.receipt.unwrap());
        }
        assert_ne!(receipts[0], receipts[1]);

        let req = test::TestRequest::post()
            .uri("/api/costs")
            .peer_addr("203.0.113.5:4000".parse().unwrap())
            .set_json(json!({ "receipt": receipts[0], "actual_cost_usd": 0.0 }))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::ACCEPTED
        );

        let req = test::TestRequest::get()
            .uri("/api/costs")
            .peer_addr("203.0.113.5:4000".parse().unwrap())
            .to_request();
        let body: LedgerResponse = test::call_and_read_body_json(&app, req).await;
        assert!((body.day_total_usd - 0.01).abs() < 1e-9);
    }

    #[actix_web::test]
    async fn test_negative_estimate_is_bad_request() {
        let app = app!(AppState::in_memory(GuardSettings::default()));
        let challenge = issue!(&app, "device-hash");

        let req = test::TestRequest::post()
            .uri("/api/admissions")
            .insert_header((FINGERPRINT_HEADER, "device-hash"))
            .insert_header((CHALLENGE_HEADER, challenge.challenge_id.as_str()))
            .set_json(json!({ "estimated_cost_usd": -1.0 }))
            .to_request();

        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[actix_web::test]
    async fn test_global_ceiling_rejects_and_exempts_health() {
        let mut settings = GuardSettings::default();
        settings.admission.global_windows = vec![WindowLimit::new(60, 2)];
        let app = app!(AppState::in_memory(settings));

        for _ in 0..2 {
            let req = test::TestRequest::get()
                .uri("/api/costs")
                .insert_header((FINGERPRINT_HEADER, "device-hash"))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        }

        let req = test::TestRequest::get()
            .uri("/api/costs")
            .insert_header((FINGERPRINT_HEADER, "other-device"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

        let req = test::TestRequest::get().uri("/api/health").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }
}
