//! Pinned-key TLS for the login server.
//!
//! The login server presents a self-signed certificate, so the usual root
//! store is no use.  Instead the end-entity certificate must carry a known
//! public key; anything else fails the TLS handshake before a single
//! credential byte is written.  Handshake signatures are still checked with
//! the provider's algorithms.

use std::io;
use std::sync::Arc;

use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{
    aws_lc_rs, verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, Error as TlsError, SignatureScheme,
};
use tracing::warn;

/// Accepts exactly the certificates whose DER encoding embeds `pinned`.
#[derive(Debug)]
pub struct PinnedKeyVerifier {
    pinned: Vec<u8>,
    algs: WebPkiSupportedAlgorithms,
}

impl PinnedKeyVerifier {
    pub fn new(pinned: Vec<u8>) -> Self {
        Self { pinned, algs: aws_lc_rs::default_provider().signature_verification_algorithms }
    }

    fn matches(&self, cert: &[u8]) -> bool {
        !self.pinned.is_empty() && cert.windows(self.pinned.len()).any(|w| w == self.pinned)
    }
}

impl ServerCertVerifier for PinnedKeyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        if self.matches(end_entity.as_ref()) {
            Ok(ServerCertVerified::assertion())
        } else {
            warn!("login server certificate does not carry the pinned key");
            Err(TlsError::InvalidCertificate(CertificateError::ApplicationVerificationFailure))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        verify_tls12_signature(message, cert, dss, &self.algs)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        verify_tls13_signature(message, cert, dss, &self.algs)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algs.supported_schemes()
    }
}

/// Client configuration that trusts only the pinned key.
pub fn client_config(pinned: &[u8]) -> Arc<ClientConfig> {
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(PinnedKeyVerifier::new(pinned.to_vec())))
        .with_no_client_auth();
    Arc::new(config)
}

/// Whether a failed TLS connect was caused by the pin check.
pub fn is_pin_mismatch(err: &io::Error) -> bool {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<TlsError>())
        .is_some_and(|e| {
            matches!(
                e,
                TlsError::InvalidCertificate(CertificateError::ApplicationVerificationFailure)
            )
        })
}

/// Decode a hex string (whitespace and `:` separators allowed).
pub fn parse_hex(s: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = s
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b':')
        .collect();
    if digits.is_empty() || digits.len() % 2 != 0 {
        return None;
    }
    digits
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            Some((hi * 16 + lo) as u8)
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
