//! Inbound control headers to outbound request description.

use crate::error::RelayError;
use crate::headers::{
    is_hop_by_hop, FORWARD_PREFIX, TARGET_CERT, TARGET_FOLLOW_REDIRECTS, TARGET_KEY,
    TARGET_METHOD, TARGET_URL,
};
use axum::http::header::HeaderName;
use axum::http::{HeaderMap, Method};
use reqwest::Url;
use tracing::debug;

/// Everything the executor needs to know about the outbound call, except the
/// body and the resolved TLS identity.
#[derive(Debug, Clone)]
pub struct ProxyEnvelope {
    pub method: Method,
    pub url: Url,
    pub follow_redirects: bool,
    pub cert_ref: String,
    pub key_ref: String,
    pub headers: HeaderMap,
}

/// Read the envelope out of an inbound request's method and headers.
///
/// Fails without side effects; no key is loaded and nothing is sent.
pub fn translate(method: &Method, inbound: &HeaderMap) -> Result<ProxyEnvelope, RelayError> {
    if *method != Method::POST {
        return Err(RelayError::MethodNotAllowed);
    }

    let url = header_str(inbound, TARGET_URL).ok_or(RelayError::MissingHeader(TARGET_URL))?;
    let url = Url::parse(url).map_err(|e| RelayError::BadUrl(format!("{url}: {e}")))?;

    let target_method =
        header_str(inbound, TARGET_METHOD).ok_or(RelayError::MissingHeader(TARGET_METHOD))?;
    let target_method = Method::from_bytes(target_method.as_bytes())
        .map_err(|_| RelayError::BadMethod(target_method.to_string()))?;

    let follow_redirects = header_str(inbound, TARGET_FOLLOW_REDIRECTS)
        .and_then(parse_bool)
        .unwrap_or(true);

    let envelope = ProxyEnvelope {
        method: target_method,
        url,
        follow_redirects,
        cert_ref: header_str(inbound, TARGET_CERT).unwrap_or_default().to_string(),
        key_ref: header_str(inbound, TARGET_KEY).unwrap_or_default().to_string(),
        headers: forwarded_headers(inbound),
    };

    debug!(
        method = %envelope.method,
        url = %envelope.url,
        follow_redirects = envelope.follow_redirects,
        forwarded = envelope.headers.len(),
        "translated envelope"
    );

    Ok(envelope)
}

/// Collect the prefixed headers under their unprefixed names.
///
/// `HeaderMap` names are already lowercase, so the prefix match is
/// case-insensitive. Values under one name keep their inbound order.
pub fn forwarded_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut outbound = HeaderMap::new();

    for (name, value) in inbound {
        let Some(stripped) = name.as_str().strip_prefix(FORWARD_PREFIX) else {
            continue;
        };
        if stripped.is_empty() || is_hop_by_hop(stripped) {
            continue;
        }
        let Ok(stripped) = HeaderName::from_bytes(stripped.as_bytes()) else {
            continue;
        };
        outbound.append(stripped, value.clone());
    }

    outbound
}

/// Non-empty, visible-ASCII header value.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// The spellings accepted for booleans: `1 t T TRUE true True` and
/// `0 f F FALSE false False`. Anything else is `None`.
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn envelope_headers(extra: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(TARGET_URL, HeaderValue::from_static("https://example.test/echo"));
        headers.insert(TARGET_METHOD, HeaderValue::from_static("GET"));
        for (name, value) in extra {
            headers.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        headers
    }

    #[test]
    fn test_minimal_envelope() {
        let envelope = translate(&Method::POST, &envelope_headers(&[])).unwrap();
        assert_eq!(envelope.method, Method::GET);
        assert_eq!(envelope.url.as_str(), "https://example.test/echo");
        assert!(envelope.follow_redirects);
        assert!(envelope.cert_ref.is_empty());
        assert!(envelope.key_ref.is_empty());
        assert!(envelope.headers.is_empty());
    }

    #[test]
    fn test_only_post_is_accepted() {
        for method in [Method::GET, Method::PUT, Method::DELETE] {
            assert!(matches!(
                translate(&method, &envelope_headers(&[])),
                Err(RelayError::MethodNotAllowed)
            ));
        }
    }

    #[test]
    fn test_missing_required_headers() {
        let mut headers = envelope_headers(&[]);
        headers.remove(TARGET_URL);
        assert!(matches!(
            translate(&Method::POST, &headers),
            Err(RelayError::MissingHeader(TARGET_URL))
        ));

        let mut headers = envelope_headers(&[]);
        headers.remove(TARGET_METHOD);
        assert!(matches!(
            translate(&Method::POST, &headers),
            Err(RelayError::MissingHeader(TARGET_METHOD))
        ));

        let mut headers = envelope_headers(&[]);
        headers.insert(TARGET_URL, HeaderValue::from_static(""));
        assert!(matches!(
            translate(&Method::POST, &headers),
            Err(RelayError::MissingHeader(TARGET_URL))
        ));
    }

    #[test]
    fn test_bad_url_and_method() {
        let mut headers = envelope_headers(&[]);
        headers.insert(TARGET_URL, HeaderValue::from_static("not a url"));
        assert!(matches!(
            translate(&Method::POST, &headers),
            Err(RelayError::BadUrl(_))
        ));

        let mut headers = envelope_headers(&[]);
        headers.insert(TARGET_METHOD, HeaderValue::from_static("GE(T"));
        assert!(matches!(
            translate(&Method::POST, &headers),
            Err(RelayError::BadMethod(_))
        ));
    }

    #[test]
    fn test_redirect_flag_defaults_to_follow() {
        for (value, expected) in [
            ("false", false),
            ("0", false),
            ("F", false),
            ("true", true),
            ("1", true),
            ("yes", true),
            ("no", true),
            ("nope", true),
            ("fALSE", true),
        ] {
            let headers = envelope_headers(&[(TARGET_FOLLOW_REDIRECTS, value)]);
            let envelope = translate(&Method::POST, &headers).unwrap();
            assert_eq!(envelope.follow_redirects, expected, "value {value:?}");
        }
    }

    #[test]
    fn test_identity_refs_are_carried() {
        let headers = envelope_headers(&[(TARGET_CERT, "client-cert"), (TARGET_KEY, "client-key")]);
        let envelope = translate(&Method::POST, &headers).unwrap();
        assert_eq!(envelope.cert_ref, "client-cert");
        assert_eq!(envelope.key_ref, "client-key");
    }

    #[test]
    fn test_forward_prefix_allow_list() {
        let headers = envelope_headers(&[
            ("Forward-Prefix-Accept", "application/json"),
            ("forward-prefix-x-trace", "one"),
            ("FORWARD-PREFIX-X-TRACE", "two"),
            ("forward-prefix-x-trace", "three"),
            ("forward-prefix-connection", "close"),
            ("forward-prefix-", "empty"),
            ("authorization", "Bearer inbound"),
            ("x-other", "dropped"),
        ]);
        let envelope = translate(&Method::POST, &headers).unwrap();
        let out = &envelope.headers;

        assert_eq!(out.get("accept").unwrap(), "application/json");
        let traces: Vec<_> = out.get_all("x-trace").iter().collect();
        assert_eq!(traces, ["one", "two", "three"]);

        assert_eq!(out.keys_len(), 2);
        assert!(!out.contains_key("authorization"));
        assert!(!out.contains_key("x-other"));
        assert!(!out.contains_key("connection"));
        assert!(!out.contains_key(TARGET_URL));
        assert!(!out.contains_key(TARGET_METHOD));
    }
}
