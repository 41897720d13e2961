//! Authorization server and its HTTP transport.
//!
//! [`AuthorizationServer`] holds the protocol state machine; the remaining
//! modules expose it over axum:
//! - `handlers`: the OAuth endpoints
//! - `consent`: the user consent round trip
//! - `resource`: the bearer-token guard for protected application routes
//! - `transport`: router construction and request adaptation

pub mod authorization;
pub mod consent;
pub mod handlers;
pub mod resource;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;

pub use authorization::AuthorizationServer;
pub use transport::{HttpState, create_router};

use crate::config::ServerConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::register::{ClientAuthorizationRegister, ClientRegister, ResourceRegister};
use crate::token::CredentialBackend;

/// The authorization server wired to its HTTP endpoints.
pub struct OAuthService {
    state: Arc<HttpState>,
}

impl OAuthService {
    /// Create the service.
    ///
    /// # Errors
    ///
    /// Returns error if a configured resource path is not a valid regex.
    pub fn new(
        config: ServerConfig,
        clients: ClientRegister,
        resources: ResourceRegister,
        backend: Option<Arc<dyn CredentialBackend>>,
    ) -> ConfigResult<Self> {
        let server = Arc::new(AuthorizationServer::new(&config, clients, resources, backend));
        let consent = Arc::new(ClientAuthorizationRegister::new());
        let state = HttpState::new(server, consent, config)
            .map_err(|e| ConfigError::Invalid(format!("resource path: {e}")))?;
        Ok(Self { state: Arc::new(state) })
    }

    #[must_use]
    pub fn state(&self) -> &Arc<HttpState> {
        &self.state
    }

    /// OAuth endpoints only.
    #[must_use]
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    /// OAuth endpoints merged with `app`, whose resource paths are guarded.
    #[must_use]
    pub fn router_with_resources(&self, app: Router) -> Router {
        self.router().merge(resource::protect(app, Arc::clone(&self.state)))
    }

    /// Run the server in HTTP mode.
    ///
    /// # Errors
    ///
    /// Returns error on server failure.
    pub async fn run_http(self, port: u16) -> anyhow::Result<()> {
        let router = self.router();
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        tracing::info!(
            clients = self.state.server.clients().len(),
            resources = self.state.server.resources().len(),
            "HTTP server listening on http://{}",
            addr
        );

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

        tracing::info!("HTTP server shut down");
        Ok(())
    }
}

impl std::fmt::Debug for OAuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthService").field("state", &self.state).finish()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Received shutdown signal");
}
