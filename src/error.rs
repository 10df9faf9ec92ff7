//! Error taxonomy for the relay and its mapping onto HTTP responses.

use crate::keys::KeyLoadError;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Every way a proxied or signing request can fail.
///
/// Variants are grouped by who is at fault: the caller's envelope, the secret
/// store, the key material it returned, or the upstream server.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The inbound verb was not POST.
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// A required control header was absent or empty.
    #[error("No {0} header specified")]
    MissingHeader(&'static str),

    /// The target URL could not be parsed.
    #[error("Bad url: {0}")]
    BadUrl(String),

    /// The target method is not a valid HTTP method token.
    #[error("Bad method: {0}")]
    BadMethod(String),

    /// Only one half of a client certificate/key pair was supplied.
    #[error("target-cert and target-key must be supplied together")]
    IdentityPairing,

    /// The inbound body could not be read, or exceeded the size limit.
    #[error("Error reading body: {0}")]
    Body(String),

    /// The requested signature algorithm is not recognized.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The key loader failed. Backend detail stays out of the response body.
    #[error("Error loading key")]
    KeyLoad(#[source] KeyLoadError),

    /// PEM decoding, container or pairing failure.
    #[error("{0}")]
    KeyMaterial(String),

    /// The signer rejected the key or payload.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// The outbound call failed before a response arrived.
    #[error("{0}")]
    Upstream(String),
}

impl RelayError {
    /// Status code returned to the inbound caller.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<KeyLoadError> for RelayError {
    fn from(err: KeyLoadError) -> Self {
        Self::KeyLoad(err)
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}
