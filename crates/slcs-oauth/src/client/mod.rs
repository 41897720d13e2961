//! OAuth 2.0 client engine.
//!
//! Drives the authorization code flow from the client application's side:
//! - `call_with_access_token`: use the held token, or redirect the user to
//!   the authorization endpoint with a fresh `state`
//! - `call_with_access_token_redirected_back`: verify `state` and exchange
//!   the returned code
//! - `request_resource`: call a resource server with the bearer token
//!
//! The MyProxy variant sends a certificate request with the token request
//! and keeps the private key for the certificate it receives as token.

mod certificate;

use reqwest::{Client, header};
use serde::Deserialize;

pub use certificate::CertificateRequest;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::registry::random_token;
use crate::token::AUTHORIZATION_CODE_GRANT_TYPE;

/// Outcome of [`Oauth2Client::call_with_access_token`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenCall<R> {
    /// A token was held and the callback ran.
    Ready(R),
    /// No token yet: send the user agent here.
    Redirect(String),
}

/// Which token request the client makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientVariant {
    /// Plain authorization code exchange.
    #[default]
    Standard,
    /// Adds a certificate request; the token is a certificate.
    MyProxy,
}

/// Query parameters of the redirect back from the authorization server.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedirectParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl RedirectParams {
    /// Read the parameters from a redirect URL.
    ///
    /// # Errors
    ///
    /// Returns error if `url` is not a valid URL.
    pub fn from_url(url: &str) -> ClientResult<Self> {
        let url = url::Url::parse(url)?;
        let mut params = Self::default();
        for (name, value) in url.query_pairs() {
            let slot = match name.as_ref() {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        Ok(params)
    }
}

#[derive(Deserialize)]
struct TokenEndpointResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct CertificateResponse {
    certificate: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Client-side OAuth 2.0 state for one user session.
pub struct Oauth2Client {
    config: ClientConfig,
    variant: ClientVariant,
    http: Client,
    access_token: Option<String>,
    state: Option<String>,
    private_key_pem: Option<String>,
}

impl Oauth2Client {
    /// Create a client engine.
    ///
    /// # Errors
    ///
    /// Returns error if the TLS material is invalid or HTTP client
    /// initialization fails.
    pub fn new(config: ClientConfig, variant: ClientVariant) -> ClientResult<Self> {
        let mut builder = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout);

        if let Some(pem) = config.tls.client_identity_pem.as_deref() {
            builder = builder.identity(reqwest::Identity::from_pem(pem)?);
        }
        if let Some(pem) = config.tls.ca_certificate_pem.as_deref() {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(pem)?);
        }

        Ok(Self {
            config,
            variant,
            http: builder.build()?,
            access_token: None,
            state: None,
            private_key_pem: None,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn variant(&self) -> ClientVariant {
        self.variant
    }

    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Use a token obtained elsewhere.
    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = Some(token.into());
    }

    /// The `state` sent with the pending authorization request.
    #[must_use]
    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    /// Private key for the certificate obtained as token (MyProxy variant).
    #[must_use]
    pub fn private_key_pem(&self) -> Option<&str> {
        self.private_key_pem.as_deref()
    }

    /// The redirect URI registered for this client below `application_url`.
    #[must_use]
    pub fn make_redirect_uri(&self, application_url: &str) -> String {
        let redirect = join_url(&[
            application_url,
            &self.config.base_url_path,
            &self.config.redirect_uri,
        ]);
        tracing::debug!(application_url, redirect_uri = %redirect, "Constructed redirect URI");
        redirect
    }

    /// True if `url`, ignoring its query, is this client's redirect URI.
    #[must_use]
    pub fn is_redirect_uri(&self, application_url: &str, url: &str) -> bool {
        let path = url.split_once('?').map_or(url, |(path, _)| path);
        self.make_redirect_uri(application_url) == path
    }

    // ─── Authorization Request ───────────────────────────────────────────────

    /// Run `cb` with the held token, or start the authorization flow.
    pub fn call_with_access_token<R>(
        &mut self,
        scope: &str,
        application_url: &str,
        cb: impl FnOnce(&str) -> R,
    ) -> TokenCall<R> {
        if let Some(token) = self.access_token.as_deref() {
            tracing::debug!("Access token held");
            return TokenCall::Ready(cb(token));
        }

        let redirect_uri = self.make_redirect_uri(application_url);
        let state = random_token();

        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("redirect_uri", &redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("scope", scope)
            .finish();

        let endpoint = self.config.authorization_endpoint.trim_end_matches('?');
        let separator = if endpoint.contains('?') { '&' } else { '?' };
        let url = format!("{endpoint}{separator}{query}&state={state}");

        tracing::debug!(
            client_id = %self.config.client_id,
            scope,
            endpoint,
            "No access token held, redirecting for authorization"
        );
        self.state = Some(state);
        TokenCall::Redirect(url)
    }

    /// Handle the redirect back from the authorization server.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AccessTokenRetrieval`] if the server reported
    /// an error or `state` does not match, and any token exchange error.
    pub async fn call_with_access_token_redirected_back<R>(
        &mut self,
        params: &RedirectParams,
        application_url: &str,
        cb: impl FnOnce(&str) -> R,
    ) -> ClientResult<R> {
        if let Some(error) = params.error.as_deref() {
            tracing::error!(
                error,
                description = ?params.error_description,
                "Error from OAuth authorization server"
            );
            return Err(ClientError::retrieval(error, params.error_description.clone()));
        }

        if self.state.is_none() || params.state != self.state {
            tracing::error!("Redirect does not carry the expected state");
            return Err(ClientError::retrieval(
                "Inconsistent state",
                Some(
                    "State value incorrect implying request is not the result of legitimate \
                     OAuth redirection."
                        .to_string(),
                ),
            ));
        }

        let Some(code) = params.code.as_deref() else {
            return Err(ClientError::retrieval(
                "invalid_request",
                Some("No authorization code returned.".to_string()),
            ));
        };

        // Single use: a replayed redirect fails the check above.
        self.state.take();
        tracing::debug!("Valid redirect from OAuth authorization server");
        self.request_access_token(code, application_url, cb).await
    }

    // ─── Token Request ───────────────────────────────────────────────────────

    /// Exchange `code` for an access token and run `cb` with it.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, an OAuth error response, a
    /// response without a token, or a 5xx status.
    pub async fn request_access_token<R>(
        &mut self,
        code: &str,
        application_url: &str,
        cb: impl FnOnce(&str) -> R,
    ) -> ClientResult<R> {
        let mut form = vec![
            ("grant_type".to_string(), AUTHORIZATION_CODE_GRANT_TYPE.to_string()),
            ("code".to_string(), code.to_string()),
            ("redirect_uri".to_string(), self.make_redirect_uri(application_url)),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            form.push(("client_id".to_string(), self.config.client_id.clone()));
            form.push(("client_secret".to_string(), secret.to_string()));
        }

        let mut pending_key = None;
        if self.variant == ClientVariant::MyProxy {
            let request = CertificateRequest::generate_blocking(self.config.key_bits).await?;
            form.push((self.config.certificate_request_parameter.clone(), request.to_base64()));
            pending_key = Some(request.into_private_key_pem());
        }

        tracing::debug!(
            endpoint = %self.config.access_token_endpoint,
            variant = ?self.variant,
            "Requesting access token"
        );
        let response = self
            .http
            .post(&self.config.access_token_endpoint)
            .header(header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !(status.is_success() || status.is_client_error()) {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::UnexpectedStatus { status: status.as_u16(), message });
        }

        let body: TokenEndpointResponse = serde_json::from_slice(&response.bytes().await?)?;
        if let Some(error) = body.error {
            tracing::error!(%error, description = ?body.error_description, "Access token request error");
            return Err(ClientError::retrieval(error, body.error_description));
        }
        let Some(token) = body.access_token else {
            return Err(ClientError::retrieval(
                "invalid_request",
                Some("Error retrieving access token - no access token returned.".to_string()),
            ));
        };

        tracing::debug!("Access token received");
        if pending_key.is_some() {
            self.private_key_pem = pending_key;
        }
        let token = self.access_token.insert(token);
        Ok(cb(token.as_str()))
    }

    // ─── Resource Requests ───────────────────────────────────────────────────

    /// Call a resource server with the held token as `Authorization: Bearer`.
    ///
    /// Sends a POST with `form` when given, a GET otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if no token is held, or a transport
    /// error.
    pub async fn request_resource(
        &self,
        resource_url: &str,
        form: Option<&[(&str, &str)]>,
    ) -> ClientResult<reqwest::Response> {
        let Some(token) = self.access_token.as_deref() else {
            return Err(ClientError::Config(format!(
                "No access token set for request to resource {resource_url:?}"
            )));
        };

        let request = match form {
            Some(form) => self.http.post(resource_url).form(form),
            None => self.http.get(resource_url),
        };
        Ok(request.bearer_auth(token).send().await?)
    }

    /// Ask a resource server to issue a certificate for the token holder.
    ///
    /// Returns `(private_key_pem, certificate)`.
    ///
    /// # Errors
    ///
    /// Returns error if no token is held, the request fails, or the server
    /// reports an error.
    pub async fn request_certificate(&self, resource_url: &str) -> ClientResult<(String, String)> {
        let Some(token) = self.access_token.as_deref() else {
            return Err(ClientError::Config(format!(
                "No access token set for request to resource {resource_url:?}"
            )));
        };

        let csr = CertificateRequest::generate_blocking(self.config.key_bits).await?;
        let form = [
            ("access_token".to_string(), token.to_string()),
            (self.config.certificate_request_parameter.clone(), csr.to_base64()),
        ];

        let response = self.http.post(resource_url).form(&form).send().await?;
        let status = response.status();
        if status.is_server_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::UnexpectedStatus { status: status.as_u16(), message });
        }

        let body: CertificateResponse = serde_json::from_slice(&response.bytes().await?)?;
        if let Some(error) = body.error {
            return Err(ClientError::retrieval(error, body.error_description));
        }
        let Some(certificate) = body.certificate else {
            return Err(ClientError::retrieval(
                "invalid_request",
                Some("No certificate returned.".to_string()),
            ));
        };

        Ok((csr.into_private_key_pem(), certificate))
    }
}

impl std::fmt::Debug for Oauth2Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Oauth2Client")
            .field("config", &self.config)
            .field("variant", &self.variant)
            .field("has_access_token", &self.access_token.is_some())
            .field("pending_state", &self.state.is_some())
            .finish()
    }
}

/// Join URL parts with single slashes, skipping empty parts.
fn join_url(parts: &[&str]) -> String {
    let last = parts.len().saturating_sub(1);
    parts
        .iter()
        .enumerate()
        .map(|(n, part)| {
            let part = if n > 0 { part.trim_start_matches('/') } else { part };
            if n < last { part.trim_end_matches('/') } else { part }
        })
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Oauth2Client {
        let config = ClientConfig::for_testing("11", "https://as.example.org")
            .with_base_url_path("/app/");
        Oauth2Client::new(config, ClientVariant::Standard).unwrap()
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url(&["https://c/", "/app/", "/cb"]), "https://c/app/cb");
        assert_eq!(join_url(&["https://c", "", "oauth2/authz_callback"]), "https://c/oauth2/authz_callback");
        assert_eq!(join_url(&["https://c/", "/", "cb/"]), "https://c/cb/");
    }

    #[test]
    fn test_redirect_uri() {
        let client = client();
        assert_eq!(
            client.make_redirect_uri("https://client.example.org/"),
            "https://client.example.org/app/oauth2/authz_callback"
        );
        assert!(client.is_redirect_uri(
            "https://client.example.org",
            "https://client.example.org/app/oauth2/authz_callback?code=1&state=2"
        ));
        assert!(!client.is_redirect_uri("https://client.example.org", "https://client.example.org/app"));
    }

    #[test]
    fn test_call_without_token_redirects() {
        let mut client = client();
        let call = client.call_with_access_token("scope1 scope2", "https://client", |_| ());

        let TokenCall::Redirect(url) = call else {
            panic!("expected redirect");
        };
        let state = client.state().unwrap().to_string();
        assert_eq!(state.len(), 64);
        assert!(state.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(url.starts_with("https://as.example.org/authorize?redirect_uri="));
        assert!(url.contains(&format!("response_type=code&client_id=11&scope=scope1+scope2&state={state}")));
    }

    #[test]
    fn test_call_with_token_runs_callback() {
        let mut client = client();
        client.set_access_token("T1");
        let call = client.call_with_access_token("read", "https://client", str::len);
        assert_eq!(call, TokenCall::Ready(2));
        assert!(client.state().is_none());
    }

    #[test]
    fn test_endpoint_with_query_uses_ampersand() {
        let mut config = ClientConfig::for_testing("11", "https://as");
        config.authorization_endpoint = "https://as/authorize?tenant=x".into();
        let mut client = Oauth2Client::new(config, ClientVariant::Standard).unwrap();

        let TokenCall::Redirect(url) = client.call_with_access_token("", "https://c", |_| ()) else {
            panic!("expected redirect");
        };
        assert!(url.starts_with("https://as/authorize?tenant=x&redirect_uri="));
    }

    #[test]
    fn test_redirect_params_from_url() {
        let params = RedirectParams::from_url(
            "https://c/cb?error=access_denied&error_description=The+resource+owner+denied+the+request&state=s",
        )
        .unwrap();
        assert_eq!(params.error.as_deref(), Some("access_denied"));
        assert_eq!(params.error_description.as_deref(), Some("The resource owner denied the request"));
        assert_eq!(params.state.as_deref(), Some("s"));
        assert!(params.code.is_none());
    }

    #[tokio::test]
    async fn test_state_mismatch_is_rejected() {
        let mut client = client();
        let _ = client.call_with_access_token("read", "https://client", |_| ());

        let params = RedirectParams {
            code: Some("code".into()),
            state: Some("forged".into()),
            ..Default::default()
        };
        let err = client
            .call_with_access_token_redirected_back(&params, "https://client", |_| ())
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error(), Some("Inconsistent state"));
        assert!(client.access_token().is_none());
    }

    #[tokio::test]
    async fn test_request_resource_requires_token() {
        let err = client().request_resource("https://rs/data", None).await.unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }
}
