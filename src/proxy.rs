//! Outbound call execution.
//!
//! Every proxied request gets its own reqwest client: the TLS identity and the
//! redirect policy are per request, so there is no connection pool to share.
//! Bodies are streamed in both directions.

use crate::error::RelayError;
use crate::headers::is_hop_by_hop;
use crate::tls::{client_config, TlsIdentity};
use crate::translate::ProxyEnvelope;
use axum::body::{Body, HttpBody};
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::Response;
use futures::TryStreamExt;
use reqwest::redirect::Policy;
use reqwest::Client;
use std::error::Error as StdError;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Redirect hops followed before the last response is returned as-is.
const MAX_REDIRECTS: usize = 10;

/// Relay-wide settings for the outbound leg.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamSettings {
    /// Deadline for the whole outbound exchange, body included.
    pub timeout: Duration,
    /// Verify upstream server certificates against the webpki roots.
    pub verify_tls: bool,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            verify_tls: false,
        }
    }
}

/// Send the outbound request described by `envelope` and relay the answer.
///
/// `content_length` is the inbound request's declared length, if any. It is
/// passed on so the upstream sees a sized body rather than a chunked one. A
/// zero length, or no length on an already finished body, sends no body.
pub async fn execute(
    envelope: ProxyEnvelope,
    identity: Option<TlsIdentity>,
    body: Body,
    content_length: Option<HeaderValue>,
    settings: &UpstreamSettings,
) -> Result<Response, RelayError> {
    let client = build_client(identity, envelope.follow_redirects, settings)?;

    let mut request = client.request(envelope.method.clone(), envelope.url.clone());
    let mut headers = envelope.headers;
    match content_length {
        Some(len) if len == "0" => {}
        None if body.is_end_stream() => {}
        Some(len) => {
            headers.insert(CONTENT_LENGTH, len);
            request = request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }
        None => {
            request = request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }
    }

    let started = Instant::now();
    let upstream = request.headers(headers).send().await.map_err(|err| {
        let text = error_text(&err);
        error!(url = %envelope.url, "Upstream request failed: {}", text);
        RelayError::Upstream(text)
    })?;

    debug!(
        method = %envelope.method,
        url = %envelope.url,
        final_url = %upstream.url(),
        status = upstream.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "upstream responded"
    );

    Ok(relay_response(&envelope.method, upstream))
}

fn build_client(
    identity: Option<TlsIdentity>,
    follow_redirects: bool,
    settings: &UpstreamSettings,
) -> Result<Client, RelayError> {
    let tls = client_config(identity, settings.verify_tls)?;
    let policy = if follow_redirects {
        Policy::limited(MAX_REDIRECTS)
    } else {
        Policy::none()
    };

    Client::builder()
        .use_preconfigured_tls(tls)
        .redirect(policy)
        .timeout(settings.timeout)
        .no_proxy()
        .build()
        .map_err(|err| RelayError::Upstream(format!("failed to build upstream client: {err}")))
}

/// Copy status and end-to-end headers, and stream the body through.
///
/// Answers that carry no body (to `HEAD`, 1xx, 204, 304) are relayed with an
/// empty body and without the upstream `Content-Length`, which describes a
/// body the inbound connection will never see.
fn relay_response(method: &Method, upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let bodiless = *method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED;

    let mut headers = HeaderMap::with_capacity(upstream.headers().len());
    for (name, value) in upstream.headers() {
        if is_hop_by_hop(name.as_str()) || (bodiless && *name == CONTENT_LENGTH) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let body = if bodiless {
        Body::empty()
    } else {
        // Once the status line is out, a failing body can only be logged.
        let stream = upstream
            .bytes_stream()
            .inspect_err(|err| warn!("Upstream body stream aborted: {}", error_text(err)));
        Body::from_stream(stream)
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// `err` followed by its sources, e.g.
/// `error sending request for url (..): client error (Connect): connection refused`.
fn error_text(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !text.contains(&cause_text) {
            text.push_str(": ");
            text.push_str(&cause_text);
        }
        source = cause.source();
    }
    text
}
