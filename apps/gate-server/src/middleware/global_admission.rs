//! System-wide admission middleware.

use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

use actix_web::{
    Error, ResponseError,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};
use bulwark_core::GuardError;
use bulwark_core::services::Gatekeeper;

use crate::middleware::error::AppError;
use crate::middleware::identity::client_identity;

/// Paths that bypass the global check.
const EXEMPT_PATHS: &[&str] = &["/api/health"];

/// Runs the non-deduplicated global window ahead of the handlers.
/// Store failures follow the admission failure policy.
pub struct GlobalAdmission {
    gate: Arc<Gatekeeper>,
}

impl GlobalAdmission {
    pub fn new(gate: Arc<Gatekeeper>) -> Self {
        Self { gate }
    }
}

impl<S, B> Transform<S, ServiceRequest> for GlobalAdmission
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = GlobalAdmissionService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(GlobalAdmissionService {
            service: Rc::new(service),
            gate: self.gate.clone(),
        }))
    }
}

pub struct GlobalAdmissionService<S> {
    service: Rc<S>,
    gate: Arc<Gatekeeper>,
}

impl<S, B> Service<ServiceRequest> for GlobalAdmissionService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let gate = self.gate.clone();

        Box::pin(async move {
            if EXEMPT_PATHS.contains(&req.path()) {
                return service.call(req).await.map(|res| res.map_into_left_body());
            }

            let key = match client_identity(req.request()) {
                Ok(identity) => identity.full().to_string(),
                Err(_) => req
                    .connection_info()
                    .realip_remote_addr()
                    .unwrap_or("unknown")
                    .to_string(),
            };

            match gate.admit_global(&key).await {
                Ok(()) => {}
                Err(GuardError::Rejected(rejection)) => {
                    tracing::warn!(key = %key, "Global admission ceiling reached");
                    let response = AppError::Rejected(rejection).error_response();
                    return Ok(req.into_response(response).map_into_right_body());
                }
                Err(e) => {
                    let response = AppError::from(e).error_response();
                    return Ok(req.into_response(response).map_into_right_body());
                }
            }

            let res = service.call(req).await?;
            Ok(res.map_into_left_body())
        })
    }
}
