//! Google Secret Manager key source.
//!
//! Talks to the Secret Manager REST API and always reads the `latest`
//! version of the named secret. The bearer token is either supplied in
//! configuration or fetched from the metadata server of the instance the
//! relay runs on (Cloud Run, GCE, GKE).

use super::{KeyLoadError, KeyLoader};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const SECRET_MANAGER_ENDPOINT: &str = "https://secretmanager.googleapis.com/v1";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Deserialize)]
struct AccessSecretVersionResponse {
    payload: Option<SecretPayload>,
}

#[derive(Deserialize)]
struct SecretPayload {
    data: Option<String>,
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
}

/// Secret Manager backed [`KeyLoader`].
#[derive(Debug, Clone)]
pub struct GcpSecretManager {
    project: String,
    access_token: Option<String>,
    secret_endpoint: String,
    token_url: String,
    client: Client,
}

impl GcpSecretManager {
    /// Create a loader for `project`. Without a static `access_token`, a token
    /// is requested from the metadata server on every load.
    pub fn new(project: impl Into<String>, access_token: Option<String>) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            project: project.into(),
            access_token: access_token.filter(|t| !t.trim().is_empty()),
            secret_endpoint: SECRET_MANAGER_ENDPOINT.to_string(),
            token_url: METADATA_TOKEN_URL.to_string(),
            client,
        })
    }

    /// Point the loader at other API and token endpoints (emulators, tests).
    pub fn with_endpoints(
        mut self,
        secret_endpoint: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        self.secret_endpoint = secret_endpoint.into();
        self.token_url = token_url.into();
        self
    }

    fn latest_version_url(&self, name: &str) -> String {
        format!(
            "{}/projects/{}/secrets/{}/versions/latest:access",
            self.secret_endpoint.trim_end_matches('/'),
            self.project,
            name
        )
    }

    async fn bearer(&self) -> Result<String, KeyLoadError> {
        if let Some(token) = &self.access_token {
            return Ok(format!("Bearer {token}"));
        }

        let response = self
            .client
            .get(&self.token_url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|err| KeyLoadError::Unavailable(format!("metadata token request: {err}")))?;

        if !response.status().is_success() {
            return Err(KeyLoadError::Unavailable(format!(
                "metadata token request failed: {}",
                response.status()
            )));
        }

        let token: MetadataToken = response
            .json()
            .await
            .map_err(|err| KeyLoadError::Unavailable(format!("metadata token decode: {err}")))?;
        Ok(format!("Bearer {}", token.access_token))
    }
}

#[async_trait]
impl KeyLoader for GcpSecretManager {
    async fn load(&self, name: &str) -> Result<Vec<u8>, KeyLoadError> {
        let url = self.latest_version_url(name);
        debug!("Accessing secret {}", url);

        let response = self
            .client
            .get(&url)
            .header("Authorization", self.bearer().await?)
            .send()
            .await
            .map_err(|err| KeyLoadError::Unavailable(format!("access {name}: {err}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(KeyLoadError::NotFound(name.to_string())),
            status if status.is_success() => {
                let parsed: AccessSecretVersionResponse = response.json().await.map_err(|err| {
                    KeyLoadError::Unavailable(format!("decode access response for {name}: {err}"))
                })?;
                let data = parsed
                    .payload
                    .and_then(|payload| payload.data)
                    .ok_or_else(|| {
                        KeyLoadError::Unavailable(format!("secret {name} has no payload data"))
                    })?;
                STANDARD.decode(data).map_err(|err| {
                    KeyLoadError::Unavailable(format!("base64 decode of {name} failed: {err}"))
                })
            }
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(KeyLoadError::Unavailable(format!(
                    "access {name} failed: {status} {text}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::HeaderMap;
    use axum::routing::get;
    use axum::{Json, Router};
    use tokio::net::TcpListener;

    #[derive(serde::Serialize)]
    struct Payload {
        payload: PayloadData,
    }

    #[derive(serde::Serialize)]
    struct PayloadData {
        data: String,
    }

    #[derive(serde::Serialize)]
    struct Token {
        access_token: &'static str,
    }

    async fn access(
        Path((project, rest)): Path<(String, String)>,
        headers: HeaderMap,
    ) -> Result<Json<Payload>, StatusCode> {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if project != "proj" || auth != "Bearer meta-token" {
            return Err(StatusCode::FORBIDDEN);
        }
        match rest.as_str() {
            "signing-key/versions/latest:access" => Ok(Json(Payload {
                payload: PayloadData {
                    data: STANDARD.encode("PEM"),
                },
            })),
            _ => Err(StatusCode::NOT_FOUND),
        }
    }

    async fn token(headers: HeaderMap) -> Result<Json<Token>, StatusCode> {
        match headers.get("metadata-flavor").and_then(|v| v.to_str().ok()) {
            Some("Google") => Ok(Json(Token {
                access_token: "meta-token",
            })),
            _ => Err(StatusCode::FORBIDDEN),
        }
    }

    async fn fake_google() -> String {
        let app = Router::new()
            .route("/v1/projects/{project}/secrets/{*rest}", get(access))
            .route("/token", get(token));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        format!("http://{addr}")
    }

    #[test]
    fn test_latest_version_url() {
        let loader = GcpSecretManager::new("my-project", None).unwrap();
        assert_eq!(
            loader.latest_version_url("tls-key"),
            "https://secretmanager.googleapis.com/v1/projects/my-project/secrets/tls-key/versions/latest:access"
        );
    }

    #[tokio::test]
    async fn test_load_via_metadata_token() {
        let base = fake_google().await;
        let loader = GcpSecretManager::new("proj", None)
            .unwrap()
            .with_endpoints(format!("{base}/v1"), format!("{base}/token"));

        assert_eq!(loader.load("signing-key").await.unwrap(), b"PEM");
        assert!(matches!(
            loader.load("absent").await,
            Err(KeyLoadError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejected_token_is_unavailable() {
        let base = fake_google().await;
        let loader = GcpSecretManager::new("proj", Some("wrong".into()))
            .unwrap()
            .with_endpoints(format!("{base}/v1"), format!("{base}/token"));

        assert!(matches!(
            loader.load("signing-key").await,
            Err(KeyLoadError::Unavailable(_))
        ));
    }
}
