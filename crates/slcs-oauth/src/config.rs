//! Configuration for the authorization server and the client engine.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default settings.
pub mod defaults {
    use std::time::Duration;

    /// Access token lifetime (24 hours).
    pub const ACCESS_TOKEN_LIFETIME: Duration = Duration::from_secs(86_400);

    /// Authorization grant lifetime (10 minutes).
    pub const AUTHORIZATION_GRANT_LIFETIME: Duration = Duration::from_secs(600);

    /// Extra time registry entries are kept past the entity lifetime, so that
    /// expiry is reported from `expires_at` rather than as an unknown key.
    pub const REGISTRY_GRACE: Duration = Duration::from_secs(60);

    /// Maximum entries held per registry.
    pub const REGISTRY_MAX_CAPACITY: u64 = 100_000;

    /// POST field carrying the base64 certificate signing request.
    pub const CERTIFICATE_REQUEST_PARAMETER: &str = "certificate_request";

    /// Consent page the authorize endpoint redirects to.
    pub const CLIENT_AUTHORIZATION_URL: &str = "/client_authorization/authorize";

    /// Key of the end-user identifier in `AuthorizationGrant::additional_data`.
    pub const USER_IDENTIFIER_GRANT_DATA_KEY: &str = "user_identifier";

    /// Trusted header carrying the authenticated end user.
    pub const USER_IDENTIFIER_HEADER: &str = "x-remote-user";

    /// Trusted header carrying the TLS peer certificate subject DN.
    pub const CLIENT_CERT_DN_HEADER: &str = "x-ssl-client-s-dn";

    /// Token type for bearer tokens.
    pub const BEARER_TOKEN_TYPE: &str = "bearer";

    /// Token type for certificate tokens.
    pub const SLCS_TOKEN_TYPE: &str = "slcs";

    /// Outbound request timeout.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Outbound connection timeout.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// How long a rendered consent form can be submitted.
    pub const CONSENT_FORM_LIFETIME: Duration = Duration::from_secs(600);

    /// Fixed path segment the client engine is redirected back to.
    pub const REDIRECT_URI: &str = "oauth2/authz_callback";

    /// RSA modulus size for generated certificate request key pairs.
    pub const KEY_BITS: usize = 2048;
}

/// How a client or resource proves its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum AuthenticationMethod {
    /// No authentication (development and testing only)
    #[default]
    None,
    /// TLS client certificate DN matched against the register
    Certificate,
    /// id/secret via Basic auth or POST body
    Password,
}

/// Kind of access token the server issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TokenType {
    /// Random opaque string
    #[default]
    Bearer,
    /// Certificate obtained from the credential backend
    Slcs,
}

impl TokenType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bearer => defaults::BEARER_TOKEN_TYPE,
            Self::Slcs => defaults::SLCS_TOKEN_TYPE,
        }
    }
}

/// Authorization server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Path prefix for the OAuth endpoints (empty for the root).
    pub base_path: String,

    /// Lifetime of issued access tokens.
    pub access_token_lifetime: Duration,

    /// Kind of access token issued.
    pub access_token_type: TokenType,

    /// Lifetime of authorization grants.
    pub authorization_grant_lifetime: Duration,

    /// POST field carrying the base64 certificate request.
    pub certificate_request_parameter: String,

    /// Consent page URL, absolute or relative to the application URL.
    pub client_authorization_url: String,

    /// Client authentication at the token endpoint.
    pub client_authentication_method: AuthenticationMethod,

    /// Resource authentication at `check_token` and `request_certificate`.
    pub resource_authentication_method: AuthenticationMethod,

    /// Trusted header naming the authenticated end user.
    pub user_identifier_header: String,

    /// Trusted header carrying the client certificate DN.
    pub client_cert_dn_header: String,

    /// Key under which the user identifier is stored with a grant.
    pub user_identifier_grant_data_key: String,

    /// TOML file holding the client and resource registers.
    pub register_file: Option<PathBuf>,

    /// Credential backend `logon` endpoint (certificate tokens).
    pub credential_backend_url: Option<String>,

    /// Shared secret passed to the credential backend.
    pub credential_backend_secret: Option<String>,

    /// Timeout for credential backend calls.
    pub credential_backend_timeout: Duration,

    /// Use the client certificate DN as the required scope for resource requests.
    pub match_scope_to_client_dn: bool,

    /// Path patterns guarded by the resource filter.
    pub resource_paths: Vec<String>,

    /// Maximum entries per registry.
    pub registry_max_capacity: u64,
}

impl ServerConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base_path: String::new(),
            access_token_lifetime: defaults::ACCESS_TOKEN_LIFETIME,
            access_token_type: TokenType::Bearer,
            authorization_grant_lifetime: defaults::AUTHORIZATION_GRANT_LIFETIME,
            certificate_request_parameter: defaults::CERTIFICATE_REQUEST_PARAMETER.to_string(),
            client_authorization_url: defaults::CLIENT_AUTHORIZATION_URL.to_string(),
            client_authentication_method: AuthenticationMethod::Certificate,
            resource_authentication_method: AuthenticationMethod::None,
            user_identifier_header: defaults::USER_IDENTIFIER_HEADER.to_string(),
            client_cert_dn_header: defaults::CLIENT_CERT_DN_HEADER.to_string(),
            user_identifier_grant_data_key: defaults::USER_IDENTIFIER_GRANT_DATA_KEY.to_string(),
            register_file: None,
            credential_backend_url: None,
            credential_backend_secret: None,
            credential_backend_timeout: defaults::REQUEST_TIMEOUT,
            match_scope_to_client_dn: false,
            resource_paths: Vec::new(),
            registry_max_capacity: defaults::REGISTRY_MAX_CAPACITY,
        }
    }

    /// Create a test configuration: no client authentication, small registries.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            client_authentication_method: AuthenticationMethod::None,
            credential_backend_timeout: Duration::from_secs(5),
            registry_max_capacity: 1_000,
            ..Self::new()
        }
    }

    /// Registry TTL for grants.
    #[must_use]
    pub fn grant_registry_ttl(&self) -> Duration {
        self.authorization_grant_lifetime.saturating_add(defaults::REGISTRY_GRACE)
    }

    /// Registry TTL for access tokens.
    #[must_use]
    pub fn token_registry_ttl(&self) -> Duration {
        self.access_token_lifetime.saturating_add(defaults::REGISTRY_GRACE)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("base_path", &self.base_path)
            .field("access_token_type", &self.access_token_type)
            .field("access_token_lifetime", &self.access_token_lifetime)
            .field("authorization_grant_lifetime", &self.authorization_grant_lifetime)
            .field("client_authentication_method", &self.client_authentication_method)
            .field("resource_authentication_method", &self.resource_authentication_method)
            .field("register_file", &self.register_file)
            .field("credential_backend_url", &self.credential_backend_url)
            .field("match_scope_to_client_dn", &self.match_scope_to_client_dn)
            .finish()
    }
}

/// TLS material for outbound client connections.
#[derive(Clone, Default)]
pub struct TlsConfig {
    /// PEM bundle with the client certificate and private key.
    pub client_identity_pem: Option<Vec<u8>>,

    /// Additional trusted root certificate (PEM).
    pub ca_certificate_pem: Option<Vec<u8>>,
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("client_identity", &self.client_identity_pem.is_some())
            .field("ca_certificate", &self.ca_certificate_pem.is_some())
            .finish()
    }
}

/// Client engine configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// Client identifier registered with the authorization server.
    pub client_id: String,

    /// Client secret; sent with the token request when set.
    pub client_secret: Option<String>,

    /// Authorization endpoint URL.
    pub authorization_endpoint: String,

    /// Access token endpoint URL.
    pub access_token_endpoint: String,

    /// Path of the client application below its application URL.
    pub base_url_path: String,

    /// Redirect segment appended to the application URL and base path.
    pub redirect_uri: String,

    /// POST field used for the certificate request (certificate tokens).
    pub certificate_request_parameter: String,

    /// RSA key size for certificate requests.
    pub key_bits: usize,

    /// Request timeout.
    pub request_timeout: Duration,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// TLS settings for outbound calls.
    pub tls: TlsConfig,
}

impl ClientConfig {
    /// Create a configuration for the given client and endpoints.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        authorization_endpoint: impl Into<String>,
        access_token_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            authorization_endpoint: authorization_endpoint.into(),
            access_token_endpoint: access_token_endpoint.into(),
            base_url_path: String::new(),
            redirect_uri: defaults::REDIRECT_URI.to_string(),
            certificate_request_parameter: defaults::CERTIFICATE_REQUEST_PARAMETER.to_string(),
            key_bits: defaults::KEY_BITS,
            request_timeout: defaults::REQUEST_TIMEOUT,
            connect_timeout: defaults::CONNECT_TIMEOUT,
            tls: TlsConfig::default(),
        }
    }

    /// Create a test configuration pointing at a mock server.
    #[must_use]
    pub fn for_testing(client_id: &str, base_url: &str) -> Self {
        Self {
            key_bits: 1024,
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            ..Self::new(client_id, format!("{base_url}/authorize"), format!("{base_url}/access_token"))
        }
    }

    /// Set the client secret.
    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Set the base path of the client application.
    #[must_use]
    pub fn with_base_url_path(mut self, base_url_path: impl Into<String>) -> Self {
        self.base_url_path = base_url_path.into();
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("client_id", &self.client_id)
            .field("has_secret", &self.client_secret.is_some())
            .field("authorization_endpoint", &self.authorization_endpoint)
            .field("access_token_endpoint", &self.access_token_endpoint)
            .field("base_url_path", &self.base_url_path)
            .field("redirect_uri", &self.redirect_uri)
            .field("tls", &self.tls)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.access_token_lifetime, Duration::from_secs(86_400));
        assert_eq!(config.authorization_grant_lifetime, Duration::from_secs(600));
        assert_eq!(config.access_token_type.as_str(), "bearer");
        assert_eq!(config.certificate_request_parameter, "certificate_request");
        assert_eq!(config.client_authorization_url, "/client_authorization/authorize");
        assert_eq!(config.client_authentication_method, AuthenticationMethod::Certificate);
        assert_eq!(config.resource_authentication_method, AuthenticationMethod::None);
        assert!(config.base_path.is_empty());
    }

    #[test]
    fn test_registry_ttl_outlives_entity() {
        let config = ServerConfig::for_testing();
        assert!(config.grant_registry_ttl() > config.authorization_grant_lifetime);
        assert!(config.token_registry_ttl() > config.access_token_lifetime);
    }

    #[test]
    fn test_registry_ttl_saturates() {
        let config = ServerConfig {
            authorization_grant_lifetime: Duration::MAX,
            access_token_lifetime: Duration::MAX,
            ..ServerConfig::for_testing()
        };
        assert_eq!(config.grant_registry_ttl(), Duration::MAX);
        assert_eq!(config.token_registry_ttl(), Duration::MAX);
    }

    #[test]
    fn test_authentication_method_value_names() {
        use clap::ValueEnum;

        assert_eq!(
            AuthenticationMethod::from_str("certificate", true),
            Ok(AuthenticationMethod::Certificate)
        );
        assert_eq!(TokenType::from_str("slcs", false), Ok(TokenType::Slcs));
        assert!(AuthenticationMethod::from_str("kerberos", false).is_err());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = ClientConfig::new("c1", "https://as/authorize", "https://as/token")
            .with_secret("hunter2");
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));

        let mut server = ServerConfig::default();
        server.credential_backend_secret = Some("backend-secret".into());
        assert!(!format!("{server:?}").contains("backend-secret"));
    }
}
