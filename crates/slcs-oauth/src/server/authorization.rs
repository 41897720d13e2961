//! The authorization server state machine.
//!
//! Every operation takes a transport-independent [`OAuthRequest`] and
//! returns either a protocol result or a [`RequestError`]; the HTTP layer
//! only maps results to responses.

use std::sync::Arc;

use url::Url;

use crate::authenticate::{Authenticator, CallerKind};
use crate::authorize::{AuthorizeRequest, Authorizer};
use crate::config::{ServerConfig, TokenType};
use crate::error::{ErrorCode, InternalError, OAuthError, RegisterError, RequestError};
use crate::register::{ClientRegister, ResourceRegister};
use crate::registry::{AccessToken, AccessTokenRegistry, AuthorizationGrantRegistry};
use crate::request::OAuthRequest;
use crate::token::{
    AccessTokenGenerator, AccessTokenRequest, CertificateIssuer, CredentialBackend, TokenResponse,
};

/// Authorization server: issues grants, exchanges them for tokens and
/// validates tokens for resource servers.
#[derive(Debug)]
pub struct AuthorizationServer {
    clients: Arc<ClientRegister>,
    resources: Arc<ResourceRegister>,
    client_authenticator: Authenticator,
    resource_authenticator: Authenticator,
    authorizer: Authorizer,
    generator: AccessTokenGenerator,
    issuer: CertificateIssuer,
    grants: AuthorizationGrantRegistry,
    tokens: AccessTokenRegistry,
    match_scope_to_client_dn: bool,
}

impl AuthorizationServer {
    /// Build a server from configuration, registers and an optional
    /// credential backend.
    #[must_use]
    pub fn new(
        config: &ServerConfig,
        clients: ClientRegister,
        resources: ResourceRegister,
        backend: Option<Arc<dyn CredentialBackend>>,
    ) -> Self {
        let client_authenticator = Authenticator::new(
            config.client_authentication_method,
            CallerKind::Client,
            clients.credentials(),
        );
        let resource_authenticator = Authenticator::new(
            config.resource_authentication_method,
            CallerKind::Resource,
            resources.credentials(),
        );

        let authorizer = Authorizer::StoringIdentifier {
            lifetime: config.authorization_grant_lifetime,
            user_identifier_key: config.user_identifier_grant_data_key.clone(),
        };

        let issuer = CertificateIssuer::new(
            backend,
            config.credential_backend_secret.clone(),
            config.certificate_request_parameter.clone(),
            config.user_identifier_grant_data_key.clone(),
        );

        let generator = match config.access_token_type {
            TokenType::Bearer => AccessTokenGenerator::bearer(config.access_token_lifetime),
            TokenType::Slcs => {
                if !issuer.has_backend() {
                    tracing::warn!("Certificate tokens configured without a credential backend");
                }
                AccessTokenGenerator::certificate(config.access_token_lifetime, issuer.clone())
            }
        };

        Self {
            clients: Arc::new(clients),
            resources: Arc::new(resources),
            client_authenticator,
            resource_authenticator,
            authorizer,
            generator,
            issuer,
            grants: AuthorizationGrantRegistry::new(
                config.grant_registry_ttl(),
                config.registry_max_capacity,
            ),
            tokens: AccessTokenRegistry::new(
                config.token_registry_ttl(),
                config.registry_max_capacity,
            ),
            match_scope_to_client_dn: config.match_scope_to_client_dn,
        }
    }

    /// Replace the authorizer (e.g. with [`Authorizer::Plain`]).
    #[must_use]
    pub fn with_authorizer(mut self, authorizer: Authorizer) -> Self {
        self.authorizer = authorizer;
        self
    }

    #[must_use]
    pub fn clients(&self) -> &ClientRegister {
        &self.clients
    }

    #[must_use]
    pub fn resources(&self) -> &ResourceRegister {
        &self.resources
    }

    #[must_use]
    pub fn grants(&self) -> &AuthorizationGrantRegistry {
        &self.grants
    }

    #[must_use]
    pub fn tokens(&self) -> &AccessTokenRegistry {
        &self.tokens
    }

    #[must_use]
    pub fn match_scope_to_client_dn(&self) -> bool {
        self.match_scope_to_client_dn
    }

    // ─── Authorization Endpoint ──────────────────────────────────────────────

    /// Fail fast for unknown clients before the user is asked anything.
    pub fn is_registered_client(&self, request: &OAuthRequest) -> Result<(), OAuthError> {
        let Some(client_id) = request.query_param("client_id").filter(|id| !id.is_empty()) else {
            return Err(OAuthError::invalid_request("Missing client_id parameter"));
        };
        self.clients
            .is_registered_client(client_id)
            .map_err(|e| OAuthError::new(ErrorCode::UnauthorizedClient, e.to_string()))
    }

    /// Handle an authorization request whose consent outcome is known.
    ///
    /// Returns the URL to redirect the user agent to: the client's redirect
    /// URI with either `code` or `error` and `error_description`, plus
    /// `state`. Errors found before the redirect URI is validated are
    /// returned as `Err`.
    pub async fn authorize(
        &self,
        request: &OAuthRequest,
        client_authorized: bool,
    ) -> Result<String, RequestError> {
        if !request.secure {
            return Err(OAuthError::invalid_request("Transport must be encrypted").into());
        }
        if let Some(name) = request.duplicate_query_param() {
            return Err(OAuthError::invalid_request(format!("Duplicate parameter: {name}")).into());
        }

        let auth_request = AuthorizeRequest::from_request(request)?;
        if auth_request.response_type != "code" {
            return Err(OAuthError::new(
                ErrorCode::UnsupportedResponseType,
                format!("Response type \"{}\" is not supported", auth_request.response_type),
            )
            .into());
        }

        let redirect_uri = self.valid_redirect_uri(&auth_request)?;
        let state = auth_request.state.as_deref();

        // The redirect URI is trusted from here on: protocol errors go back
        // to the client rather than to the user agent.
        if !client_authorized {
            tracing::info!(client_id = %auth_request.client_id, "User declined authorization");
            let denied = OAuthError::new(
                ErrorCode::AccessDenied,
                "The resource owner denied the request",
            );
            return Ok(error_redirect(redirect_uri, &denied, state)?);
        }

        let (grant, code) =
            match self.authorizer.generate_authorization_grant(&auth_request, request) {
                Ok(minted) => minted,
                Err(err) => return Ok(error_redirect(redirect_uri, &err, state)?),
            };
        if !self.grants.add_grant(Arc::new(grant)).await {
            return Err(InternalError::GrantCollision.into());
        }

        tracing::info!(
            client_id = %auth_request.client_id,
            scope = auth_request.scope(),
            "Issued authorization grant"
        );

        let mut url = parse_redirect_uri(redirect_uri)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("code", &code);
            if let Some(state) = state {
                query.append_pair("state", state);
            }
        }
        Ok(url.into())
    }

    fn valid_redirect_uri<'a>(&'a self, auth_request: &'a AuthorizeRequest) -> Result<&'a str, OAuthError> {
        let requested = auth_request.redirect_uri.as_deref();
        self.clients.is_valid_client(&auth_request.client_id, requested).map_err(|e| {
            let code = match e {
                RegisterError::UnknownClient(_) => ErrorCode::UnauthorizedClient,
                _ => ErrorCode::InvalidRequest,
            };
            OAuthError::new(code, e.to_string())
        })?;

        self.clients
            .effective_redirect_uri(&auth_request.client_id, requested)
            .ok_or_else(|| OAuthError::invalid_request(RegisterError::NoRedirectUri.to_string()))
    }

    // ─── Token Endpoint ──────────────────────────────────────────────────────

    /// Exchange an authorization code for an access token.
    ///
    /// A code can be redeemed once. A second redemption fails and
    /// invalidates the token issued by the first.
    pub async fn access_token(&self, request: &OAuthRequest) -> Result<TokenResponse, RequestError> {
        if !request.secure {
            return Err(OAuthError::invalid_request("Transport must be encrypted").into());
        }
        if request.method != axum::http::Method::POST {
            return Err(OAuthError::invalid_request("Access token request must use POST").into());
        }
        if let Some(name) = request.duplicate_form_param() {
            return Err(OAuthError::invalid_request(format!("Duplicate parameter: {name}")).into());
        }

        let authenticated_client = self.client_authenticator.authenticate(request)?;
        let token_request = AccessTokenRequest::from_request(request)?;

        let Ok(grant) = self.grants.get_grant(&token_request.code).await else {
            return Err(OAuthError::invalid_grant("Invalid authorization code").into());
        };

        if let Some(expected) = grant.redirect_uri.as_deref() {
            if token_request.redirect_uri.as_deref() != Some(expected) {
                return Err(OAuthError::invalid_grant("Invalid redirect URI").into());
            }
        }

        if grant.is_granted() {
            grant.revoke_issued_token();
            tracing::warn!(client_id = %grant.client_id, "Authorization code redeemed twice");
            return Err(
                OAuthError::invalid_grant("Token already granted for authorization grant").into()
            );
        }

        if grant.is_expired() {
            return Err(OAuthError::invalid_grant("Authorization grant expired").into());
        }

        if let Some(client_id) = authenticated_client.as_deref() {
            if client_id != grant.client_id {
                tracing::info!(%client_id, grant_client_id = %grant.client_id, "Client mismatch");
                return Err(OAuthError::invalid_grant("Token granted for different client").into());
            }
        }

        if !grant.claim() {
            grant.revoke_issued_token();
            tracing::warn!(client_id = %grant.client_id, "Concurrent redemption of authorization code");
            return Err(
                OAuthError::invalid_grant("Token already granted for authorization grant").into()
            );
        }

        let Some(token) = self.generator.get_access_token(&token_request, &grant, request).await
        else {
            grant.release();
            return Err(InternalError::TokenGeneration.into());
        };

        let token = Arc::new(token);
        if !self.tokens.add_token(Arc::clone(&token)).await {
            grant.release();
            return Err(InternalError::TokenCollision { client_id: grant.client_id.clone() }.into());
        }
        grant.attach_token(&token);

        tracing::info!(
            client_id = %grant.client_id,
            token_type = %token.token_type,
            "Issued access token"
        );
        Ok(TokenResponse::for_token(&token))
    }

    // ─── Token Validation ────────────────────────────────────────────────────

    /// Validate the token presented by a resource server.
    ///
    /// The resource authenticates itself, then passes `access_token` and an
    /// optional `scope` it requires.
    pub async fn check_token(&self, request: &OAuthRequest) -> Result<Arc<AccessToken>, OAuthError> {
        self.resource_authenticator.authenticate(request)?;
        let Some(token_id) = request.access_token() else {
            return Err(OAuthError::invalid_request("Missing access_token parameter"));
        };
        self.tokens.get_token(token_id, request.param("scope")).await
    }

    /// Look up the token presented with a resource request and check it
    /// covers `scope`.
    pub async fn get_registered_token(
        &self,
        request: &OAuthRequest,
        scope: Option<&str>,
    ) -> Result<Arc<AccessToken>, OAuthError> {
        let Some(token_id) = request.access_token() else {
            return Err(OAuthError::invalid_request("No access token supplied"));
        };
        self.tokens.get_token(token_id, scope).await
    }

    // ─── Certificate Requests ────────────────────────────────────────────────

    /// Issue a certificate for the user behind the presented token.
    ///
    /// The caller must present a TLS client certificate whose DN is
    /// registered for a resource, whatever resource authentication is
    /// configured. With
    /// `match_scope_to_client_dn` the token must have been granted that DN
    /// as scope.
    pub async fn request_certificate(&self, request: &OAuthRequest) -> Result<String, RequestError> {
        let Some(dn) = request.client_cert_dn.as_deref().filter(|dn| !dn.is_empty()) else {
            return Err(OAuthError::new(
                ErrorCode::InvalidResource,
                "A client certificate is required to request a certificate",
            )
            .into());
        };
        if self.resources.resource_for_dn(dn).is_none() {
            tracing::warn!(dn, "Certificate requested by an unregistered resource");
            return Err(OAuthError::new(
                ErrorCode::InvalidResource,
                format!("Certificate DN does not match that for any registered resource: {dn}"),
            )
            .into());
        }
        self.resource_authenticator.authenticate(request)?;

        let scope = if self.match_scope_to_client_dn {
            Some(crate::scope::scope_list_to_string(&[dn]))
        } else {
            request.param("scope").map(str::to_string)
        };
        let token = self.get_registered_token(request, scope.as_deref()).await?;

        if !self.issuer.has_backend() {
            return Err(InternalError::Misconfigured("no credential backend configured".into()).into());
        }

        let Some(certificate) = self.issuer.issue(&token.grant, request).await else {
            return Err(InternalError::CertificateIssuance.into());
        };

        tracing::info!(client_id = %token.grant.client_id, dn, "Issued certificate for resource");
        Ok(certificate)
    }
}

/// The client's redirect URI carrying `error`, `error_description` and
/// `state`.
fn error_redirect(
    redirect_uri: &str,
    error: &OAuthError,
    state: Option<&str>,
) -> Result<String, OAuthError> {
    let mut url = parse_redirect_uri(redirect_uri)?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("error", error.code.as_str());
        query.append_pair("error_description", &error.description);
        if let Some(state) = state {
            query.append_pair("state", state);
        }
    }
    Ok(url.into())
}

fn parse_redirect_uri(redirect_uri: &str) -> Result<Url, OAuthError> {
    Url::parse(redirect_uri).map_err(|e| {
        tracing::error!(redirect_uri, error = %e, "Registered redirect URI is not a valid URL");
        OAuthError::invalid_request("Redirect URI is not a valid URL")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::ClientRegistration;

    fn server() -> AuthorizationServer {
        let clients = ClientRegister::new([ClientRegistration {
            name: "Client 1".into(),
            id: "C1".into(),
            client_type: "confidential".into(),
            redirect_uris: vec!["https://cb/".into()],
            authentication_data: None,
            secret: None,
        }])
        .unwrap();
        AuthorizationServer::new(&ServerConfig::for_testing(), clients, ResourceRegister::default(), None)
    }

    fn authorize_request(query: &str) -> OAuthRequest {
        OAuthRequest::get(&format!("https://as/authorize?{query}")).with_remote_user("alice")
    }

    fn code_from(url: &str) -> String {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    #[tokio::test]
    async fn test_authorize_issues_code() {
        let server = server();
        let req = authorize_request("response_type=code&client_id=C1&scope=read&state=s1");
        let url = server.authorize(&req, true).await.unwrap();

        assert!(url.starts_with("https://cb/?code="));
        assert!(url.ends_with("&state=s1"));
        let code = code_from(&url);
        let grant = server.grants().get_grant(&code).await.unwrap();
        assert_eq!(grant.data("user_identifier"), Some("alice"));
        assert_eq!(grant.redirect_uri, None);
    }

    #[tokio::test]
    async fn test_authorize_denied_redirects_with_error() {
        let server = server();
        let req = authorize_request("response_type=code&client_id=C1&state=s1");
        let url = server.authorize(&req, false).await.unwrap();

        assert!(url.starts_with("https://cb/?error=access_denied"));
        assert!(url.contains("state=s1"));
        assert!(!url.contains("code="));
    }

    #[tokio::test]
    async fn test_authorize_validation_order() {
        let server = server();

        let insecure = OAuthRequest::get("http://as/authorize?response_type=code&client_id=C1");
        let err = server.authorize(&insecure, true).await.unwrap_err();
        assert_eq!(err.as_oauth().unwrap().code, ErrorCode::InvalidRequest);

        let dup = authorize_request("response_type=code&client_id=C1&client_id=C1");
        let err = server.authorize(&dup, true).await.unwrap_err();
        assert!(err.as_oauth().unwrap().description.contains("client_id"));

        let token = authorize_request("response_type=token&client_id=C1");
        let err = server.authorize(&token, true).await.unwrap_err();
        assert_eq!(err.as_oauth().unwrap().code, ErrorCode::UnsupportedResponseType);

        let unknown = authorize_request("response_type=code&client_id=C9");
        let err = server.authorize(&unknown, true).await.unwrap_err();
        assert_eq!(err.as_oauth().unwrap().code, ErrorCode::UnauthorizedClient);

        let bad_uri = authorize_request("response_type=code&client_id=C1&redirect_uri=https://evil/");
        let err = server.authorize(&bad_uri, true).await.unwrap_err();
        assert_eq!(err.as_oauth().unwrap().code, ErrorCode::InvalidRequest);
        assert_eq!(err.as_oauth().unwrap().description, "Redirect URI is not registered.");
    }

    #[tokio::test]
    async fn test_authorize_requires_user() {
        let server = server();
        let req = OAuthRequest::get("https://as/authorize?response_type=code&client_id=C1");
        let err = server.authorize(&req, true).await.unwrap_err();
        assert_eq!(err.as_oauth().unwrap().code, ErrorCode::ServerError);
    }

    #[test]
    fn test_is_registered_client() {
        let server = server();
        assert!(server.is_registered_client(&authorize_request("client_id=C1")).is_ok());
        let err = server.is_registered_client(&authorize_request("client_id=C2")).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnauthorizedClient);
        assert_eq!(err.description, "Client of id \"C2\" is not registered.");
    }

    #[tokio::test]
    async fn test_redirect_uri_recorded_must_match() {
        let server = server();
        let req = authorize_request("response_type=code&client_id=C1&redirect_uri=https://cb/");
        let code = code_from(&server.authorize(&req, true).await.unwrap());

        let token_req = OAuthRequest::post("https://as/access_token")
            .with_form([("grant_type", "authorization_code"), ("code", code.as_str())]);
        let err = server.access_token(&token_req).await.unwrap_err();
        assert_eq!(err.as_oauth().unwrap().description, "Invalid redirect URI");

        let token_req = OAuthRequest::post("https://as/access_token").with_form([
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", "https://cb/"),
        ]);
        let response = server.access_token(&token_req).await.unwrap();
        assert_eq!(response.token_type, "bearer");
        assert_eq!(response.expires_in, 86_400);
    }

    #[tokio::test]
    async fn test_access_token_requires_post_and_https() {
        let server = server();
        let get = OAuthRequest::get("https://as/access_token?grant_type=authorization_code&code=x");
        let err = server.access_token(&get).await.unwrap_err();
        assert_eq!(err.as_oauth().unwrap().code, ErrorCode::InvalidRequest);

        let insecure = OAuthRequest::post("http://as/access_token")
            .with_form([("grant_type", "authorization_code"), ("code", "x")]);
        let err = server.access_token(&insecure).await.unwrap_err();
        assert_eq!(err.as_oauth().unwrap().description, "Transport must be encrypted");
    }

    #[tokio::test]
    async fn test_request_certificate_requires_client_certificate() {
        let server = server();
        let req = OAuthRequest::post("https://as/request_certificate")
            .with_form([("access_token", "t")]);
        let err = server.request_certificate(&req).await.unwrap_err();
        assert_eq!(err.as_oauth().unwrap().code, ErrorCode::InvalidResource);
    }
}
