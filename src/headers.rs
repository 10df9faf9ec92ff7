//! Control header names of the relay's wire contract.

/// Absolute URL of the outbound request.
pub const TARGET_URL: &str = "target-url";
/// Method of the outbound request.
pub const TARGET_METHOD: &str = "target-method";
/// Whether the outbound call follows redirects. Defaults to true.
pub const TARGET_FOLLOW_REDIRECTS: &str = "target-follow-redirects";
/// Key reference of the client certificate.
pub const TARGET_CERT: &str = "target-cert";
/// Key reference of the client private key, or of the signing key on `/sign`.
pub const TARGET_KEY: &str = "target-key";
/// Signature algorithm for `/sign`.
pub const SIGN_ALGORITHM: &str = "sign-algorithm";
/// Inbound headers carrying this prefix are forwarded without it.
pub const FORWARD_PREFIX: &str = "forward-prefix-";

/// Connection-scoped headers that never cross the relay in either direction.
pub fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
