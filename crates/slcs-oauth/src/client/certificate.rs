//! Key pairs and PKCS#10 certificate signing requests.
//!
//! Certificate tokens are obtained by sending a CSR with the token request;
//! the private key never leaves the client.

use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rsa::RsaPrivateKey;
use rsa::pkcs1v15::{Signature, SigningKey};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use sha2::Sha256;
use x509_cert::builder::{Builder, RequestBuilder};
use x509_cert::der::Encode;
use x509_cert::name::Name;

use crate::error::{ClientError, ClientResult};

/// The credential service sets the real subject, so the CSR carries a
/// placeholder.
const PLACEHOLDER_SUBJECT: &str = "CN=ignored-username";

/// A certificate signing request together with its private key.
pub struct CertificateRequest {
    der: Vec<u8>,
    private_key_pem: String,
}

impl CertificateRequest {
    /// Generate an RSA key pair of `key_bits` and a CSR signed with it.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::CertificateRequest`] if key generation,
    /// signing or encoding fails.
    pub fn generate(key_bits: usize) -> ClientResult<Self> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, key_bits).map_err(csr_error)?;

        let private_key_pem = private_key.to_pkcs8_pem(LineEnding::LF).map_err(csr_error)?.to_string();

        let subject = Name::from_str(PLACEHOLDER_SUBJECT).map_err(csr_error)?;
        let signing_key = SigningKey::<Sha256>::new(private_key);
        let request = RequestBuilder::new(subject, &signing_key)
            .map_err(csr_error)?
            .build::<Signature>()
            .map_err(csr_error)?;
        let der = request.to_der().map_err(csr_error)?;

        tracing::debug!(key_bits, csr_len = der.len(), "Generated certificate request");
        Ok(Self { der, private_key_pem })
    }

    /// [`generate`](Self::generate) on the blocking thread pool, keeping
    /// RSA key generation off the async workers.
    ///
    /// # Errors
    ///
    /// As [`generate`](Self::generate), or if the blocking task panics.
    pub async fn generate_blocking(key_bits: usize) -> ClientResult<Self> {
        tokio::task::spawn_blocking(move || Self::generate(key_bits))
            .await
            .map_err(|e| ClientError::CertificateRequest(format!("key generation task failed: {e}")))?
    }

    /// DER encoded PKCS#10 request.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Base64 of the DER request, as sent in a POST field.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.der)
    }

    /// PKCS#8 PEM private key.
    #[must_use]
    pub fn private_key_pem(&self) -> &str {
        &self.private_key_pem
    }

    /// Give up the request, keeping the private key.
    #[must_use]
    pub fn into_private_key_pem(self) -> String {
        self.private_key_pem
    }
}

impl std::fmt::Debug for CertificateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateRequest").field("der_len", &self.der.len()).finish()
    }
}

fn csr_error(e: impl std::fmt::Display) -> ClientError {
    ClientError::CertificateRequest(e.to_string())
}
