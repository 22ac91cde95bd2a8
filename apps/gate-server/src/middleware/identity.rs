//! Client identity extraction.

use std::future::{Ready, ready};

use actix_web::{FromRequest, HttpRequest, dev::Payload};
use bulwark_core::Identity;
use bulwark_core::identity::{FINGERPRINT_PREFIX, SEPARATOR};

use crate::middleware::error::AppError;

pub const FINGERPRINT_HEADER: &str = "X-Client-Fingerprint";
pub const CHALLENGE_HEADER: &str = "X-Challenge-Id";

/// The caller's gate identity.
///
/// - fingerprint + challenge headers: `fp:<challenge>:<fingerprint>`
/// - fingerprint alone: `fp:<fingerprint>`, whose stable key is the
///   fingerprint; good for issuance, refused by admission
/// - neither: the real client address, verbatim
#[derive(Debug, Clone)]
pub struct ClientIdentity(pub Identity);

fn header<'a>(req: &'a HttpRequest, name: &str) -> Result<Option<&'a str>, AppError> {
    let Some(value) = req.headers().get(name) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| AppError::BadRequest(format!("{name} is not valid text")))?
        .trim();
    if value.contains(SEPARATOR) {
        return Err(AppError::BadRequest(format!(
            "{name} must not contain '{SEPARATOR}'"
        )));
    }
    Ok((!value.is_empty()).then_some(value))
}

pub fn client_identity(req: &HttpRequest) -> Result<Identity, AppError> {
    let fingerprint = header(req, FINGERPRINT_HEADER)?;
    let challenge = header(req, CHALLENGE_HEADER)?;

    let identity = match (fingerprint, challenge) {
        (Some(fingerprint), Some(challenge)) => Identity::fingerprint(challenge, fingerprint),
        (Some(fingerprint), None) => Identity::parse(format!("{FINGERPRINT_PREFIX}{fingerprint}")),
        (None, _) => Identity::parse(
            req.connection_info()
                .realip_remote_addr()
                .unwrap_or("unknown")
                .to_string(),
        ),
    };

    Ok(identity)
}

impl FromRequest for ClientIdentity {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(client_identity(req).map(ClientIdentity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_fingerprint_with_challenge() {
        let req = TestRequest::default()
            .insert_header((FINGERPRINT_HEADER, "device-hash"))
            .insert_header((CHALLENGE_HEADER, "c1"))
            .to_http_request();

        let identity = client_identity(&req).unwrap();
        assert_eq!(identity.full(), "fp:c1:device-hash");
        assert_eq!(identity.stable_key(), "device-hash");
        assert_eq!(identity.challenge_id(), Some("c1"));
    }

    #[test]
    fn test_fingerprint_alone_keeps_stable_key() {
        let req = TestRequest::default()
            .insert_header((FINGERPRINT_HEADER, "device-hash"))
            .to_http_request();

        let identity = client_identity(&req).unwrap();
        assert_eq!(identity.stable_key(), "device-hash");
        assert!(identity.is_fingerprint());
        assert_eq!(identity.challenge_id(), None);
    }

    #[test]
    fn test_address_is_used_verbatim() {
        let req = TestRequest::default()
            .insert_header(("X-Forwarded-For", "2001:db8::7"))
            .to_http_request();

        let identity = client_identity(&req).unwrap();
        assert_eq!(identity.stable_key(), "2001:db8::7");
    }

    #[test]
    fn test_separator_in_header_is_rejected() {
        let req = TestRequest::default()
            .insert_header((FINGERPRINT_HEADER, "a:b"))
            .to_http_request();

        assert!(matches!(client_identity(&req), Err(AppError::BadRequest(_))));
    }
}
