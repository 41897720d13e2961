//! Transport-independent view of an inbound HTTP request.
//!
//! The authorization server works on [`OAuthRequest`] values; the axum layer
//! builds them from real requests and tests build them directly.

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// An inbound request as seen by the OAuth engines.
#[derive(Debug, Clone)]
pub struct OAuthRequest {
    /// HTTP method.
    pub method: Method,

    /// True if the request arrived over TLS.
    pub secure: bool,

    /// Full request URL as seen by the user agent.
    pub url: String,

    /// Scheme and authority of the application (no trailing slash).
    pub application_url: String,

    /// Decoded query string parameters, in order.
    pub query: Vec<(String, String)>,

    /// Decoded form body parameters, in order.
    pub form: Vec<(String, String)>,

    /// Request headers.
    pub headers: HeaderMap,

    /// End user authenticated by the front end.
    pub remote_user: Option<String>,

    /// Subject DN of the TLS client certificate, as forwarded by the front end.
    pub client_cert_dn: Option<String>,
}

impl OAuthRequest {
    /// Create a request for `url` with the given method.
    ///
    /// The query string of `url` is decoded into [`OAuthRequest::query`] and
    /// the request is marked secure when the scheme is `https`.
    #[must_use]
    pub fn new(method: Method, url: &str) -> Self {
        let (application_url, query, secure) = match url::Url::parse(url) {
            Ok(parsed) => (
                parsed.origin().ascii_serialization(),
                parsed.query_pairs().into_owned().collect(),
                parsed.scheme() == "https",
            ),
            Err(_) => (String::new(), Vec::new(), false),
        };

        Self {
            method,
            secure,
            url: url.to_string(),
            application_url,
            query,
            form: Vec::new(),
            headers: HeaderMap::new(),
            remote_user: None,
            client_cert_dn: None,
        }
    }

    #[must_use]
    pub fn get(url: &str) -> Self {
        Self::new(Method::GET, url)
    }

    #[must_use]
    pub fn post(url: &str) -> Self {
        Self::new(Method::POST, url)
    }

    /// Replace the form body parameters.
    #[must_use]
    pub fn with_form<K: Into<String>, V: Into<String>>(
        mut self,
        form: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.form = form.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    /// Add a header; invalid names or values are ignored.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) =
            (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value))
        {
            self.headers.append(name, value);
        }
        self
    }

    #[must_use]
    pub fn with_remote_user(mut self, user: impl Into<String>) -> Self {
        self.remote_user = Some(user.into());
        self
    }

    #[must_use]
    pub fn with_client_cert_dn(mut self, dn: impl Into<String>) -> Self {
        self.client_cert_dn = Some(dn.into());
        self
    }

    /// Mark the transport as secure or not, independent of the URL scheme.
    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// First query string value for `name`.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        first(&self.query, name)
    }

    /// First form body value for `name`.
    #[must_use]
    pub fn form_param(&self, name: &str) -> Option<&str> {
        first(&self.form, name)
    }

    /// Query value for `name`, falling back to the form body.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query_param(name).or_else(|| self.form_param(name))
    }

    /// Name of the first query parameter that appears more than once.
    #[must_use]
    pub fn duplicate_query_param(&self) -> Option<&str> {
        duplicate(&self.query)
    }

    /// Name of the first form parameter that appears more than once.
    #[must_use]
    pub fn duplicate_form_param(&self) -> Option<&str> {
        duplicate(&self.form)
    }

    /// `(id, secret)` from a Basic `Authorization` header.
    #[must_use]
    pub fn basic_credentials(&self) -> Option<(String, String)> {
        let value = self.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let encoded = value.strip_prefix("Basic ")?;
        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (id, secret) = decoded.split_once(':')?;
        Some((id.to_string(), secret.to_string()))
    }

    /// Token from a `Bearer` `Authorization` header.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let (scheme, token) = value.split_once(' ')?;
        scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
    }

    /// Access token presented with the request: `Authorization: Bearer`
    /// header first, then an `access_token` parameter.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.bearer_token().or_else(|| self.param("access_token"))
    }
}

fn first<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
}

fn duplicate(params: &[(String, String)]) -> Option<&str> {
    params
        .iter()
        .enumerate()
        .find(|(i, (k, _))| params[..*i].iter().any(|(prev, _)| prev == k))
        .map(|(_, (k, _))| k.as_str())
}
