//! Header-driven forwarding proxy with per-request mTLS client identities.
//!
//! Callers describe an outbound HTTP call entirely in control headers: the
//! target URL and method, the redirect policy, which inbound headers to pass
//! on, and optionally the names of a client certificate and private key. The
//! relay resolves those names through a [`keys::KeyLoader`], performs the call
//! with that identity, and streams the upstream response back unchanged.
//!
//! A second endpoint, `/sign`, signs the request body with a named RSA key.
//!
//! ## Example Flow
//!
//! ```text
//! POST /                       target-url: https://partner.example/v1/echo
//!                              target-method: GET
//!                              target-cert: partner-client-cert
//!                              target-key: partner-client-key
//!                              forward-prefix-Accept: application/json
//!
//! -> GET https://partner.example/v1/echo   (mTLS as partner-client-cert)
//!    Accept: application/json
//! ```

pub mod config;
pub mod error;
pub mod headers;
pub mod keys;
pub mod proxy;
pub mod server;
pub mod sign;
pub mod tls;
pub mod translate;

pub use config::Settings;
pub use error::RelayError;
pub use server::{router, run_server, AppState};
