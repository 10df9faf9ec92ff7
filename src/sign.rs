//! RSA signatures over caller-supplied payloads.
//!
//! The signing key is named by the caller and fetched through the
//! [`KeyLoader`] for every request; nothing is cached. Signatures are returned
//! base64url-encoded without padding (the JWS encoding), which callers decode
//! verbatim.

use crate::error::RelayError;
use crate::headers::{SIGN_ALGORITHM, TARGET_KEY};
use crate::keys::KeyLoader;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, PrivateKeyInfo};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Signer};
use rsa::{pkcs1v15, pss, RsaPrivateKey};
use rustls_pemfile::Item;
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Supported signature schemes, both over SHA-256.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignAlgorithm {
    /// RSASSA-PKCS1-v1_5. Deterministic.
    Rs256,
    /// RSASSA-PSS with MGF1-SHA-256 and a 32 byte salt. Randomized.
    Ps256,
}

impl FromStr for SignAlgorithm {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rs256" => Ok(Self::Rs256),
            "ps256" => Ok(Self::Ps256),
            _ => Err(RelayError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for SignAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rs256 => f.write_str("rs256"),
            Self::Ps256 => f.write_str("ps256"),
        }
    }
}

/// Parse the first PEM block of `pem` as an RSA private key.
///
/// Accepts `RSA PRIVATE KEY` (PKCS#1) and `PRIVATE KEY` (PKCS#8, RSA only).
/// Any other first block is rejected, even when a key follows it.
pub fn parse_private_key(pem: &[u8]) -> Result<RsaPrivateKey, RelayError> {
    let label = first_pem_label(pem);
    if !matches!(label.as_deref(), Some("RSA PRIVATE KEY" | "PRIVATE KEY")) {
        warn!("Unsupported key type: {:?}", label);
        return Err(RelayError::KeyMaterial("failed to parse PEM private key".into()));
    }

    let item = rustls_pemfile::read_one_from_slice(pem)
        .map_err(|e| RelayError::KeyMaterial(format!("failed to parse PEM private key: {e:?}")))?
        .map(|(item, _rest)| item)
        .ok_or_else(|| RelayError::KeyMaterial("failed to parse PEM private key".into()))?;

    match item {
        Item::Pkcs1Key(der) => RsaPrivateKey::from_pkcs1_der(der.secret_pkcs1_der())
            .map_err(|e| RelayError::KeyMaterial(format!("invalid PKCS#1 private key: {e}"))),
        Item::Pkcs8Key(der) => {
            let der = der.secret_pkcs8_der();
            let info = PrivateKeyInfo::try_from(der)
                .map_err(|e| RelayError::KeyMaterial(format!("invalid PKCS#8 private key: {e}")))?;
            if info.algorithm.oid != rsa::pkcs1::ALGORITHM_OID {
                return Err(RelayError::KeyMaterial("key is not an RSA key".into()));
            }
            RsaPrivateKey::from_pkcs8_der(der)
                .map_err(|e| RelayError::KeyMaterial(format!("invalid PKCS#8 private key: {e}")))
        }
        _ => Err(RelayError::KeyMaterial("failed to parse PEM private key".into())),
    }
}

/// Label of the first `-----BEGIN <label>-----` line.
fn first_pem_label(pem: &[u8]) -> Option<String> {
    const BEGIN: &str = "-----BEGIN ";

    let text = String::from_utf8_lossy(pem);
    let start = text.find(BEGIN)? + BEGIN.len();
    let len = text[start..].find("-----")?;
    Some(text[start..start + len].to_string())
}

/// Sign `payload` with `key` and return the encoded signature.
pub fn sign(
    key: RsaPrivateKey,
    payload: &[u8],
    algorithm: SignAlgorithm,
) -> Result<String, RelayError> {
    let signature = match algorithm {
        SignAlgorithm::Rs256 => pkcs1v15::SigningKey::<Sha256>::new(key)
            .try_sign(payload)
            .map_err(|e| RelayError::Signing(e.to_string()))?
            .to_vec(),
        SignAlgorithm::Ps256 => pss::BlindedSigningKey::<Sha256>::new(key)
            .try_sign_with_rng(&mut rsa::rand_core::OsRng, payload)
            .map_err(|e| RelayError::Signing(e.to_string()))?
            .to_vec(),
    };

    Ok(URL_SAFE_NO_PAD.encode(signature))
}

/// The `/sign` operation: validate, load, parse, sign.
#[derive(Clone)]
pub struct SigningService {
    loader: Arc<dyn KeyLoader>,
}

impl SigningService {
    pub fn new(loader: Arc<dyn KeyLoader>) -> Self {
        Self { loader }
    }

    /// `algorithm` and `key_ref` are the raw header values; `None` or empty
    /// means the header was absent. The algorithm is validated before the
    /// key loader is consulted.
    pub async fn sign(
        &self,
        key_ref: Option<&str>,
        algorithm: Option<&str>,
        payload: &[u8],
    ) -> Result<String, RelayError> {
        let algorithm: SignAlgorithm = algorithm
            .filter(|a| !a.is_empty())
            .ok_or(RelayError::MissingHeader(SIGN_ALGORITHM))?
            .parse()?;
        let key_ref = key_ref
            .filter(|k| !k.is_empty())
            .ok_or(RelayError::MissingHeader(TARGET_KEY))?;

        let pem = self.loader.load(key_ref).await.map_err(|err| {
            warn!("Loading signing key {} failed: {}", key_ref, err);
            RelayError::from(err)
        })?;
        let key = parse_private_key(&pem)?;

        debug!(%algorithm, key = key_ref, bytes = payload.len(), "signing payload");
        sign(key, payload, algorithm)
    }
}
