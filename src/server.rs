//! HTTP surface: the proxy catch-all and `/sign`.

use crate::config::Settings;
use crate::error::RelayError;
use crate::headers::{SIGN_ALGORITHM, TARGET_KEY};
use crate::keys::KeyLoader;
use crate::proxy::{execute, UpstreamSettings};
use crate::sign::SigningService;
use crate::tls::build_identity;
use crate::translate::translate;
use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Request, State};
use axum::http::header::CONTENT_LENGTH;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared, read-only state of the running relay.
#[derive(Clone)]
pub struct AppState {
    loader: Arc<dyn KeyLoader>,
    signer: SigningService,
    upstream: UpstreamSettings,
}

impl AppState {
    pub fn new(loader: Arc<dyn KeyLoader>, upstream: UpstreamSettings) -> Self {
        Self {
            signer: SigningService::new(loader.clone()),
            loader,
            upstream,
        }
    }
}

/// Build the router. `/sign` signs; every other path proxies.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sign", post(sign_handler).fallback(method_not_allowed))
        .route("/", post(proxy_handler).fallback(method_not_allowed))
        .route("/{*path}", post(proxy_handler).fallback(method_not_allowed))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn run_server(settings: Settings) -> Result<()> {
    let loader = settings.key_loader()?;
    let state = AppState::new(loader, settings.upstream());

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Relay listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

async fn proxy_handler(State(state): State<AppState>, request: Request) -> Response {
    match relay(&state, request).await {
        Ok(response) => response,
        Err(err) => failure("proxy", err),
    }
}

async fn relay(state: &AppState, request: Request) -> Result<Response, RelayError> {
    let (parts, body) = request.into_parts();

    let envelope = translate(&parts.method, &parts.headers)?;
    let identity =
        build_identity(state.loader.as_ref(), &envelope.cert_ref, &envelope.key_ref).await?;
    let content_length = parts.headers.get(CONTENT_LENGTH).cloned();

    execute(envelope, identity, body, content_length, &state.upstream).await
}

async fn sign_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => return failure("sign", RelayError::Body(rejection.body_text())),
    };
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    match state
        .signer
        .sign(header(TARGET_KEY), header(SIGN_ALGORITHM), &body)
        .await
    {
        Ok(signature) => signature.into_response(),
        Err(err) => failure("sign", err),
    }
}

async fn method_not_allowed() -> Response {
    RelayError::MethodNotAllowed.into_response()
}

fn failure(route: &str, err: RelayError) -> Response {
    match &err {
        RelayError::Upstream(_) => error!(route, "{}", err),
        RelayError::KeyLoad(source) => warn!(route, "{}: {}", err, source),
        _ => warn!(route, "{}", err),
    }
    err.into_response()
}
