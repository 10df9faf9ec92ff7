//! Process configuration, read from flags or the environment.

use crate::keys::{FsKeyLoader, GcpSecretManager, KeyLoader};
use crate::proxy::UpstreamSettings;
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 60;

/// Where named key material comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KeySource {
    /// Google Cloud Secret Manager, latest version of each secret.
    Gcp,
    /// Files under `--key-dir`.
    File,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "mtls-relay", author, version, about)]
pub struct Settings {
    /// Port to listen on (all interfaces)
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Backend used to resolve certificate and key references
    #[arg(long, env = "KEY_SOURCE", value_enum, default_value_t = KeySource::Gcp)]
    pub key_source: KeySource,

    /// Secret Manager project id
    #[arg(long, env = "PROJECT_ID")]
    pub project_id: Option<String>,

    /// Static bearer token for Secret Manager. Without it a token is fetched
    /// from the metadata server for every load.
    #[arg(long, env = "GCP_ACCESS_TOKEN", hide_env_values = true)]
    pub gcp_access_token: Option<String>,

    /// Root directory for the file key source
    #[arg(long, env = "KEY_DIR", default_value = ".")]
    pub key_dir: PathBuf,

    /// Timeout for each outbound call, in seconds
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = DEFAULT_UPSTREAM_TIMEOUT_SECS)]
    pub upstream_timeout_secs: u64,

    /// Verify upstream server certificates
    #[arg(long, env = "VERIFY_UPSTREAM_TLS")]
    pub verify_upstream_tls: bool,
}

impl Settings {
    /// Build the configured key loader.
    pub fn key_loader(&self) -> Result<Arc<dyn KeyLoader>> {
        let loader: Arc<dyn KeyLoader> = match self.key_source {
            KeySource::Gcp => {
                let project = self
                    .project_id
                    .as_deref()
                    .filter(|p| !p.is_empty())
                    .context("PROJECT_ID is required when KEY_SOURCE is gcp")?;
                let manager = GcpSecretManager::new(project, self.gcp_access_token.clone())
                    .context("Failed to build Secret Manager client")?;
                Arc::new(manager)
            }
            KeySource::File => Arc::new(FsKeyLoader::new(self.key_dir.clone())),
        };
        Ok(loader)
    }

    pub fn upstream(&self) -> UpstreamSettings {
        UpstreamSettings {
            timeout: Duration::from_secs(self.upstream_timeout_secs),
            verify_tls: self.verify_upstream_tls,
        }
    }
}
