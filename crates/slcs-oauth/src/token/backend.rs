//! Credential backend used to turn certificate requests into certificates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::defaults;
use crate::error::BackendError;
use crate::registry::AuthorizationGrant;
use crate::request::OAuthRequest;

/// A certificate-issuing service.
#[async_trait]
pub trait CredentialBackend: Send + Sync {
    /// Log `identifier` on and have `certificate_request` (DER PKCS#10)
    /// signed. Returns the issued credentials, certificate first.
    async fn logon(
        &self,
        identifier: &str,
        shared_secret: Option<&str>,
        certificate_request: &[u8],
    ) -> Result<Vec<String>, BackendError>;
}

#[derive(Serialize)]
struct LogonRequest<'a> {
    username: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
    certificate_request: String,
}

#[derive(Deserialize)]
struct LogonResponse {
    #[serde(default)]
    credentials: Vec<String>,
}

/// Credential backend reached over HTTPS.
///
/// Sends `{"username", "password", "certificate_request"}` as JSON and
/// expects `{"credentials": [...]}` back.
#[derive(Debug, Clone)]
pub struct HttpCredentialBackend {
    client: Client,
    logon_url: String,
}

impl HttpCredentialBackend {
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails.
    pub fn new(logon_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(defaults::CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client, logon_url: logon_url.into() })
    }
}

#[async_trait]
impl CredentialBackend for HttpCredentialBackend {
    async fn logon(
        &self,
        identifier: &str,
        shared_secret: Option<&str>,
        certificate_request: &[u8],
    ) -> Result<Vec<String>, BackendError> {
        let body = LogonRequest {
            username: identifier,
            password: shared_secret,
            certificate_request: STANDARD.encode(certificate_request),
        };

        let response = self.client.post(&self.logon_url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Rejected { status: status.as_u16(), message });
        }

        let logon: LogonResponse = response.json().await?;
        Ok(logon.credentials)
    }
}

/// Obtains a certificate for the user behind a grant.
///
/// Shared by the certificate token generator and the `request_certificate`
/// endpoint.
#[derive(Clone)]
pub struct CertificateIssuer {
    backend: Option<Arc<dyn CredentialBackend>>,
    shared_secret: Option<String>,
    certificate_request_parameter: String,
    user_identifier_key: String,
}

impl CertificateIssuer {
    #[must_use]
    pub fn new(
        backend: Option<Arc<dyn CredentialBackend>>,
        shared_secret: Option<String>,
        certificate_request_parameter: impl Into<String>,
        user_identifier_key: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            shared_secret,
            certificate_request_parameter: certificate_request_parameter.into(),
            user_identifier_key: user_identifier_key.into(),
        }
    }

    #[must_use]
    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Issue a certificate for the certificate request POSTed with `request`.
    ///
    /// Returns `None` if anything is missing or the backend fails; the cause
    /// is logged.
    pub async fn issue(&self, grant: &AuthorizationGrant, request: &OAuthRequest) -> Option<String> {
        let Some(backend) = self.backend.as_ref() else {
            tracing::error!("Credential backend not configured");
            return None;
        };

        let Some(encoded) = request.form_param(&self.certificate_request_parameter) else {
            tracing::error!(
                parameter = %self.certificate_request_parameter,
                "Certificate request not found in POST parameters"
            );
            return None;
        };

        let certificate_request = match STANDARD.decode(encoded.trim()) {
            Ok(der) => der,
            Err(e) => {
                tracing::error!(error = %e, "Certificate request is not valid base64");
                return None;
            }
        };

        let Some(identifier) = grant.data(&self.user_identifier_key).filter(|id| !id.is_empty())
        else {
            tracing::error!("User identifier not stored with grant");
            return None;
        };

        let credentials = match backend
            .logon(identifier, self.shared_secret.as_deref(), &certificate_request)
            .await
        {
            Ok(credentials) => credentials,
            Err(e) => {
                tracing::error!(error = %e, user = identifier, "Credential backend logon failed");
                return None;
            }
        };

        let certificate = credentials.into_iter().next();
        if certificate.is_none() {
            tracing::error!(user = identifier, "Credential backend returned no credentials");
        }
        certificate
    }
}

impl std::fmt::Debug for CertificateIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateIssuer")
            .field("has_backend", &self.backend.is_some())
            .field("has_shared_secret", &self.shared_secret.is_some())
            .field("certificate_request_parameter", &self.certificate_request_parameter)
            .field("user_identifier_key", &self.user_identifier_key)
            .finish()
    }
}
