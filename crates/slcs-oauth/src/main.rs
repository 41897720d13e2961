//! SLCS OAuth Server - Entry Point
//!
//! Serves the authorization endpoints over HTTP behind a TLS-terminating
//! front end that forwards the authenticated user and client certificate DN.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use slcs_oauth::config::{AuthenticationMethod, ServerConfig, TokenType};
use slcs_oauth::register::{ClientRegister, RegisterFile, ResourceRegister};
use slcs_oauth::server::OAuthService;
use slcs_oauth::token::{CredentialBackend, HttpCredentialBackend};

#[derive(Parser, Debug)]
#[command(name = "slcs-oauth-server")]
#[command(about = "OAuth 2.0 authorization server issuing bearer or certificate tokens")]
#[command(version)]
struct Cli {
    /// HTTP server port
    #[arg(long, default_value = "8000", env = "PORT")]
    port: u16,

    /// Path prefix of the OAuth endpoints
    #[arg(long, default_value = "", env = "OAUTH_BASE_PATH")]
    base_path: String,

    /// TOML file with the client and resource registers
    #[arg(long, env = "OAUTH_REGISTER_FILE")]
    register_file: Option<PathBuf>,

    /// Kind of access token issued
    #[arg(long, value_enum, default_value = "bearer", env = "OAUTH_ACCESS_TOKEN_TYPE")]
    access_token_type: TokenType,

    /// Access token lifetime in seconds
    #[arg(long, default_value = "86400", env = "OAUTH_ACCESS_TOKEN_LIFETIME")]
    access_token_lifetime: u64,

    /// Authorization grant lifetime in seconds
    #[arg(long, default_value = "600", env = "OAUTH_AUTHORIZATION_GRANT_LIFETIME")]
    authorization_grant_lifetime: u64,

    /// How clients authenticate at the token endpoint
    #[arg(long, value_enum, default_value = "certificate", env = "OAUTH_CLIENT_AUTHENTICATION")]
    client_authentication: AuthenticationMethod,

    /// How resource servers authenticate
    #[arg(long, value_enum, default_value = "none", env = "OAUTH_RESOURCE_AUTHENTICATION")]
    resource_authentication: AuthenticationMethod,

    /// Consent page URL, absolute or relative to the application URL
    #[arg(long, env = "OAUTH_CLIENT_AUTHORIZATION_URL")]
    client_authorization_url: Option<String>,

    /// Header carrying the authenticated user
    #[arg(long, env = "OAUTH_USER_IDENTIFIER_HEADER")]
    user_identifier_header: Option<String>,

    /// Header carrying the client certificate subject DN
    #[arg(long, env = "OAUTH_CLIENT_CERT_DN_HEADER")]
    client_cert_dn_header: Option<String>,

    /// Credential backend logon URL (certificate tokens)
    #[arg(long, env = "OAUTH_CREDENTIAL_BACKEND_URL")]
    credential_backend_url: Option<String>,

    /// Shared secret sent to the credential backend
    #[arg(long, env = "OAUTH_CREDENTIAL_BACKEND_SECRET", hide_env_values = true)]
    credential_backend_secret: Option<String>,

    /// Credential backend request timeout in seconds
    #[arg(long, default_value = "30", env = "OAUTH_CREDENTIAL_BACKEND_TIMEOUT")]
    credential_backend_timeout: u64,

    /// Require tokens for resource requests to be scoped to the client DN
    #[arg(long, env = "OAUTH_MATCH_SCOPE_TO_CLIENT_DN")]
    match_scope_to_client_dn: bool,

    /// Path pattern (regex) of protected resources; repeatable
    #[arg(long = "resource-path", env = "OAUTH_RESOURCE_PATHS", value_delimiter = ',')]
    resource_paths: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        let defaults = ServerConfig::default();
        ServerConfig {
            base_path: self.base_path.clone(),
            access_token_lifetime: Duration::from_secs(self.access_token_lifetime),
            access_token_type: self.access_token_type,
            authorization_grant_lifetime: Duration::from_secs(self.authorization_grant_lifetime),
            client_authorization_url: self
                .client_authorization_url
                .clone()
                .unwrap_or(defaults.client_authorization_url),
            client_authentication_method: self.client_authentication,
            resource_authentication_method: self.resource_authentication,
            user_identifier_header: self
                .user_identifier_header
                .clone()
                .unwrap_or(defaults.user_identifier_header),
            client_cert_dn_header: self
                .client_cert_dn_header
                .clone()
                .unwrap_or(defaults.client_cert_dn_header),
            register_file: self.register_file.clone(),
            credential_backend_url: self.credential_backend_url.clone(),
            credential_backend_secret: self.credential_backend_secret.clone(),
            credential_backend_timeout: Duration::from_secs(self.credential_backend_timeout),
            match_scope_to_client_dn: self.match_scope_to_client_dn,
            resource_paths: self.resource_paths.clone(),
            ..defaults
        }
    }
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        token_type = cli.access_token_type.as_str(),
        "Starting SLCS OAuth server"
    );

    let config = cli.server_config();

    let (clients, resources) = match config.register_file.as_deref() {
        Some(path) => RegisterFile::load(path)
            .and_then(RegisterFile::into_registers)
            .with_context(|| format!("loading register file {}", path.display()))?,
        None => {
            tracing::warn!("No register file given, no clients or resources are registered");
            (ClientRegister::default(), ResourceRegister::default())
        }
    };

    let backend: Option<Arc<dyn CredentialBackend>> = match config.credential_backend_url.as_deref() {
        Some(url) => {
            tracing::info!(url, "Using HTTP credential backend");
            Some(Arc::new(HttpCredentialBackend::new(url, config.credential_backend_timeout)?))
        }
        None => None,
    };

    let service = OAuthService::new(config, clients, resources, backend)?;
    service.run_http(cli.port).await
}
