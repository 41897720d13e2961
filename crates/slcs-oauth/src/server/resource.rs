//! Resource guard: bearer-token checking for protected application routes.
//!
//! Requests whose path matches one of the configured `resource_paths` must
//! carry a valid access token. The validated [`AccessToken`] is made
//! available to the wrapped handlers as a request extension.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
};

use super::handlers::token_error;
use super::transport::{HttpState, oauth_request, read_body};
use crate::error::{ErrorCode, OAuthError};
use crate::registry::AccessToken;
use crate::scope;

/// Wrap `app` so that its resource paths require an access token.
pub fn protect(app: Router, state: Arc<HttpState>) -> Router {
    app.layer(middleware::from_fn_with_state(state, guard_resource))
}

/// Middleware validating the access token of a resource request.
pub async fn guard_resource(
    State(state): State<Arc<HttpState>>,
    request: Request,
    next: Next,
) -> Response {
    if !state.is_resource_path(request.uri().path()) {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let body = match read_body(body).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    let oauth = oauth_request(&parts, &body, &state.config);

    let required_scope = if state.server.match_scope_to_client_dn() {
        let Some(dn) = oauth.client_cert_dn.as_deref() else {
            tracing::debug!(path = %parts.uri.path(), "Resource request without client certificate");
            let mut response = token_error(&OAuthError::new(
                ErrorCode::InvalidRequest,
                "Client certificate subject required to match with scope but none set",
            ));
            *response.status_mut() = StatusCode::UNAUTHORIZED;
            return response;
        };
        Some(scope::scope_list_to_string(&[dn]))
    } else {
        None
    };

    let token = match state.server.get_registered_token(&oauth, required_scope.as_deref()).await {
        Ok(token) => token,
        Err(e) => {
            tracing::debug!(error = %e, path = %parts.uri.path(), "Resource request refused");
            return token_error(&e);
        }
    };

    tracing::debug!(
        client_id = %token.grant.client_id,
        path = %parts.uri.path(),
        "Resource request authorized"
    );
    let mut request = Request::from_parts(parts, Body::from(body));
    request.extensions_mut().insert::<Arc<AccessToken>>(token);
    next.run(request).await
}
