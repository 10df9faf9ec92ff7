//! Per-request TLS client identities for the outbound leg.
//!
//! A caller may name a certificate and a private key (both key references
//! resolved through the [`KeyLoader`]). The pair is parsed and turned into a
//! rustls client configuration that presents it to the upstream server.
//!
//! Upstream server certificates are NOT verified unless the relay is started
//! with `--verify-upstream-tls`. Targets are chosen by the operators who call
//! the relay, and many of them sit behind private CAs or self-signed
//! certificates. Handshake signatures are still checked.

use crate::error::RelayError;
use crate::keys::KeyLoader;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use tracing::debug;

/// A client certificate chain with its private key.
#[derive(Debug)]
pub struct TlsIdentity {
    pub certs: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl TlsIdentity {
    /// Parse a PEM certificate chain and a PEM private key (PKCS#1, PKCS#8 or SEC1).
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, RelayError> {
        let certs = rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RelayError::KeyMaterial(format!("failed to parse certificate: {e}")))?;
        if certs.is_empty() {
            return Err(RelayError::KeyMaterial(
                "no certificate found in target-cert".into(),
            ));
        }

        let key = rustls_pemfile::private_key(&mut &key_pem[..])
            .map_err(|e| RelayError::KeyMaterial(format!("failed to parse private key: {e}")))?
            .ok_or_else(|| RelayError::KeyMaterial("no private key found in target-key".into()))?;

        Ok(Self { certs, key })
    }
}

/// Resolve the caller's identity references.
///
/// Both empty means no client certificate. Exactly one empty is rejected
/// before the key loader is called.
pub async fn build_identity(
    loader: &dyn KeyLoader,
    cert_ref: &str,
    key_ref: &str,
) -> Result<Option<TlsIdentity>, RelayError> {
    match (cert_ref.is_empty(), key_ref.is_empty()) {
        (true, true) => return Ok(None),
        (false, false) => {}
        _ => return Err(RelayError::IdentityPairing),
    }

    debug!("Loading client identity cert={} key={}", cert_ref, key_ref);
    let cert_pem = loader.load(cert_ref).await?;
    let key_pem = loader.load(key_ref).await?;

    TlsIdentity::from_pem(&cert_pem, &key_pem).map(Some)
}

/// Build the rustls configuration for one outbound call.
pub fn client_config(
    identity: Option<TlsIdentity>,
    verify_upstream: bool,
) -> Result<ClientConfig, RelayError> {
    let provider = Arc::new(ring::default_provider());

    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| RelayError::KeyMaterial(format!("TLS configuration error: {e}")))?;

    let builder = if verify_upstream {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(root_store)
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
    };

    let mut config = match identity {
        Some(TlsIdentity { certs, key }) => builder
            .with_client_auth_cert(certs, key)
            .map_err(|e| RelayError::KeyMaterial(format!("invalid client identity: {e}")))?,
        None => builder.with_no_client_auth(),
    };

    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

/// Accepts any server certificate chain and name, but still requires the
/// server to prove possession of the presented key.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
