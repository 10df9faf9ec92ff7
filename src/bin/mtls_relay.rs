//! mTLS relay binary.
//!
//! Run with:
//! ```bash
//! KEY_SOURCE=file KEY_DIR=./keys mtls-relay --port 8080
//! ```

use anyhow::Result;
use clap::Parser;
use mtls_relay::{run_server, Settings};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mtls_relay=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::parse();

    info!("Starting mTLS relay");
    info!("  Port: {}", settings.port);
    info!("  Key source: {:?}", settings.key_source);
    if let Some(project) = &settings.project_id {
        info!("  Project: {}", project);
    }
    info!("  Upstream timeout: {}s", settings.upstream_timeout_secs);
    if !settings.verify_upstream_tls {
        warn!("Upstream server certificates are NOT verified");
    }

    run_server(settings).await
}
