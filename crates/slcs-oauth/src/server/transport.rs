//! HTTP transport for the authorization server.
//!
//! Builds the axum router and converts inbound requests into
//! [`OAuthRequest`] values. The end user and the TLS client certificate DN
//! are taken from trusted headers set by the TLS-terminating front end.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{FromRequest, Request},
    http::{HeaderMap, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use regex::Regex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::authorization::AuthorizationServer;
use super::consent::{self, PendingConsent};
use super::handlers;
use crate::config::{ServerConfig, defaults};
use crate::register::ClientAuthorizationRegister;
use crate::registry::ExpiringRegistry;
use crate::request::OAuthRequest;

/// Largest request body accepted.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared state for HTTP handlers.
pub struct HttpState {
    pub server: Arc<AuthorizationServer>,
    pub consent: Arc<ClientAuthorizationRegister>,
    /// Consent forms rendered and awaiting submission, keyed by nonce.
    pub pending_consents: ExpiringRegistry<PendingConsent>,
    pub config: Arc<ServerConfig>,
    /// Compiled `resource_paths`, anchored at the start of the path.
    pub resource_paths: Vec<Regex>,
}

impl HttpState {
    /// # Errors
    ///
    /// Returns error if a resource path pattern is not a valid regex.
    pub fn new(
        server: Arc<AuthorizationServer>,
        consent: Arc<ClientAuthorizationRegister>,
        config: ServerConfig,
    ) -> Result<Self, regex::Error> {
        let resource_paths = config
            .resource_paths
            .iter()
            .map(|p| Regex::new(&format!("^(?:{p})")))
            .collect::<Result<Vec<_>, _>>()?;

        let pending_consents = ExpiringRegistry::new(
            "PendingConsentRegistry",
            defaults::CONSENT_FORM_LIFETIME,
            config.registry_max_capacity,
        );

        Ok(Self { server, consent, pending_consents, config: Arc::new(config), resource_paths })
    }

    /// Path of an OAuth endpoint below the configured base path.
    #[must_use]
    pub fn endpoint(&self, name: &str) -> String {
        format!("{}/{name}", self.config.base_path.trim_end_matches('/'))
    }

    #[must_use]
    pub fn is_resource_path(&self, path: &str) -> bool {
        self.resource_paths.iter().any(|re| re.is_match(path))
    }
}

impl std::fmt::Debug for HttpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpState")
            .field("config", &self.config)
            .field("resource_paths", &self.resource_paths.len())
            .finish()
    }
}

/// Create the HTTP router for the authorization server.
///
/// The consent pages are same-origin only and sit outside the CORS layer.
pub fn create_router(state: Arc<HttpState>) -> Router {
    let consent_pages = Router::new()
        .route(consent::AUTHORIZE_PATH, get(consent::handle_consent_form))
        .route(consent::SUBMIT_PATH, post(consent::handle_consent_submit));

    Router::new()
        .route("/health", get(health_check))
        .route(&state.endpoint("authorize"), get(handlers::handle_authorize))
        .route(&state.endpoint("access_token"), post(handlers::handle_access_token))
        .route(
            &state.endpoint("check_token"),
            get(handlers::handle_check_token).post(handlers::handle_check_token),
        )
        .route(&state.endpoint("request_certificate"), post(handlers::handle_request_certificate))
        .layer(CorsLayer::permissive())
        .merge(consent_pages)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "slcs-oauth",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ─── Request Adapter ─────────────────────────────────────────────────────────

impl FromRequest<Arc<HttpState>> for OAuthRequest {
    type Rejection = Response;

    async fn from_request(req: Request, state: &Arc<HttpState>) -> Result<Self, Self::Rejection> {
        let (parts, body) = req.into_parts();
        let body = read_body(body).await?;
        Ok(oauth_request(&parts, &body, &state.config))
    }
}

/// Buffer a request body, rejecting oversized ones.
pub(crate) async fn read_body(body: Body) -> Result<Bytes, Response> {
    axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response())
}

/// Build an [`OAuthRequest`] from request parts and a buffered body.
pub(crate) fn oauth_request(parts: &Parts, body: &[u8], config: &ServerConfig) -> OAuthRequest {
    let scheme = if is_secure(parts) { "https" } else { "http" };
    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.authority().map(|a| a.as_str()))
        .unwrap_or("localhost");
    let path_and_query = parts.uri.path_and_query().map_or("/", |p| p.as_str());
    let url = format!("{scheme}://{host}{path_and_query}");

    let mut request = OAuthRequest::new(parts.method.clone(), &url).with_secure(scheme == "https");
    request.headers = parts.headers.clone();

    if is_form(&parts.headers) {
        request.form = url::form_urlencoded::parse(body).into_owned().collect();
    }
    if let Some(user) = trusted_header(&parts.headers, &config.user_identifier_header) {
        request.remote_user = Some(user);
    }
    if let Some(dn) = trusted_header(&parts.headers, &config.client_cert_dn_header) {
        request.client_cert_dn = Some(dn);
    }
    request
}

fn is_secure(parts: &Parts) -> bool {
    let forwarded = parts
        .headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"));
    forwarded || parts.uri.scheme_str() == Some("https")
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"))
}

fn trusted_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_forwarded_proto_marks_secure() {
        let config = ServerConfig::for_testing();
        let p = parts(
            axum::http::Request::get("/authorize?client_id=C1")
                .header("host", "as.example.org")
                .header("x-forwarded-proto", "https"),
        );
        let req = oauth_request(&p, b"", &config);
        assert!(req.secure);
        assert_eq!(req.url, "https://as.example.org/authorize?client_id=C1");
        assert_eq!(req.application_url, "https://as.example.org");
        assert_eq!(req.query_param("client_id"), Some("C1"));

        let p = parts(axum::http::Request::get("/authorize").header("host", "as"));
        assert!(!oauth_request(&p, b"", &config).secure);
    }

    #[test]
    fn test_trusted_headers_and_form() {
        let config = ServerConfig::for_testing();
        let p = parts(
            axum::http::Request::post("/access_token")
                .header("host", "as")
                .header("content-type", "application/x-www-form-urlencoded")
                .header("x-remote-user", "alice")
                .header("x-ssl-client-s-dn", "/O=Example/CN=client"),
        );
        let req = oauth_request(&p, b"grant_type=authorization_code&code=a%2Bb", &config);
        assert_eq!(req.remote_user.as_deref(), Some("alice"));
        assert_eq!(req.client_cert_dn.as_deref(), Some("/O=Example/CN=client"));
        assert_eq!(req.form_param("code"), Some("a+b"));
    }

    #[test]
    fn test_form_ignored_without_content_type() {
        let config = ServerConfig::for_testing();
        let p = parts(axum::http::Request::post("/access_token").header("host", "as"));
        let req = oauth_request(&p, b"code=x", &config);
        assert!(req.form.is_empty());
    }

    #[test]
    fn test_resource_paths_anchor_at_start() {
        let server = Arc::new(AuthorizationServer::new(
            &ServerConfig::for_testing(),
            crate::register::ClientRegister::default(),
            crate::register::ResourceRegister::default(),
            None,
        ));
        let config =
            ServerConfig { resource_paths: vec!["/data/".into()], ..ServerConfig::for_testing() };
        let state = HttpState::new(server, Arc::default(), config).unwrap();

        assert!(state.is_resource_path("/data/file.nc"));
        assert!(!state.is_resource_path("/public/data/file.nc"));
        assert_eq!(state.endpoint("authorize"), "/authorize");
    }
}
