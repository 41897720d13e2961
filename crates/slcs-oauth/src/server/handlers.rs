//! OAuth 2.0 endpoint handlers.
//!
//! Implements:
//! - RFC 6749 §4.1: Authorization Code Grant (authorize and token endpoints)
//! - Token validation for resource servers (`check_token`)
//! - Certificate issuance for resource servers (`request_certificate`)

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use url::Url;

use super::transport::HttpState;
use crate::error::{ErrorCode, InternalError, OAuthError, RequestError};
use crate::request::OAuthRequest;
use crate::scope;
use crate::token::TokenResponse;

// ─── Authorization Endpoint ──────────────────────────────────────────────────

/// `GET /authorize`
///
/// Requires an authenticated user. Sends the user to the consent page when
/// they have not yet decided on this client and scope.
pub async fn handle_authorize(State(state): State<Arc<HttpState>>, request: OAuthRequest) -> Response {
    // Stop immediately if the client is not registered.
    if let Err(e) = state.server.is_registered_client(&request) {
        tracing::debug!(error = %e, "Authorization request for unknown client");
        return text_error(&e);
    }

    let Some(user) = request.remote_user.as_deref() else {
        tracing::debug!("No authenticated user, authentication required");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let client_id = request.query_param("client_id").unwrap_or_default();
    let requested_scope = request.query_param("scope").unwrap_or_default();
    let decision =
        state.consent.is_client_authorized_by_user(user, client_id, requested_scope).await;

    let Some(client_authorized) = decision else {
        tracing::debug!(%client_id, %user, scope = requested_scope, "Client not yet authorized by user");
        return match consent_url(&state, &request, user) {
            Ok(url) => redirect(url),
            Err(e) => internal_error(&e),
        };
    };

    match state.server.authorize(&request, client_authorized).await {
        Ok(url) => redirect(url),
        Err(RequestError::OAuth(e)) => text_error(&e),
        Err(RequestError::Internal(e)) => internal_error(&e),
    }
}

/// Consent page URL carrying the pending request.
fn consent_url(state: &HttpState, request: &OAuthRequest, user: &str) -> Result<String, InternalError> {
    let configured = &state.config.client_authorization_url;
    let base = match Url::parse(configured) {
        Ok(absolute) => absolute,
        Err(_) => {
            let joined = format!(
                "{}/{}",
                request.application_url.trim_end_matches('/'),
                configured.trim_start_matches('/')
            );
            Url::parse(&joined).map_err(|e| {
                InternalError::Misconfigured(format!("client authorization URL {joined}: {e}"))
            })?
        }
    };

    let mut url = base;
    url.query_pairs_mut()
        .append_pair("client_id", request.query_param("client_id").unwrap_or_default())
        .append_pair("scope", request.query_param("scope").unwrap_or_default())
        .append_pair("user", user)
        .append_pair("original_url", &request.url);
    Ok(url.into())
}

// ─── Token Endpoint ──────────────────────────────────────────────────────────

/// `POST /access_token`
///
/// Exchange an authorization code for an access token.
pub async fn handle_access_token(
    State(state): State<Arc<HttpState>>,
    request: OAuthRequest,
) -> Response {
    match state.server.access_token(&request).await {
        Ok(response) => token_success(&response),
        Err(RequestError::OAuth(e)) => {
            tracing::debug!(error = %e, "Access token request refused");
            token_error(&e)
        }
        Err(RequestError::Internal(e)) => no_store(internal_error(&e)),
    }
}

// ─── Token Validation ────────────────────────────────────────────────────────

/// `GET|POST /check_token`
///
/// Called by resource servers to validate a token and learn who it is for.
pub async fn handle_check_token(
    State(state): State<Arc<HttpState>>,
    request: OAuthRequest,
) -> Response {
    let token = match state.server.check_token(&request).await {
        Ok(token) => token,
        Err(e) => return token_error(&e),
    };

    let mut body = serde_json::json!({
        "status": "valid",
        "client_id": token.grant.client_id,
        "token_type": token.token_type,
        "scope": scope::scope_list_to_string(&token.scope),
        "expires_in": token.expires_in(),
    });
    if let Some(user) = token.grant.data(&state.config.user_identifier_grant_data_key) {
        body["user_name"] = serde_json::Value::from(user);
    }

    no_store(Json(body).into_response())
}

// ─── Certificate Requests ────────────────────────────────────────────────────

/// `POST /request_certificate`
///
/// Issue a certificate for the user behind the presented token.
pub async fn handle_request_certificate(
    State(state): State<Arc<HttpState>>,
    request: OAuthRequest,
) -> Response {
    match state.server.request_certificate(&request).await {
        Ok(certificate) => no_store(
            Json(serde_json::json!({
                "status": "ok",
                "certificate": certificate
            }))
            .into_response(),
        ),
        Err(RequestError::OAuth(e)) => no_store(
            (
                status_for(e.code),
                Json(serde_json::json!({
                    "status": "error",
                    "error": e.code,
                    "error_description": e.description
                })),
            )
                .into_response(),
        ),
        Err(RequestError::Internal(e)) => no_store(internal_error(&e)),
    }
}

// ─── Responses ───────────────────────────────────────────────────────────────

/// HTTP status for a protocol error returned as JSON.
#[must_use]
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidClient | ErrorCode::InvalidResource | ErrorCode::InvalidToken => {
            StatusCode::UNAUTHORIZED
        }
        ErrorCode::InsufficientScope => StatusCode::FORBIDDEN,
        _ => StatusCode::BAD_REQUEST,
    }
}

/// Build a token response with required OAuth 2.0 cache headers (RFC 6749 §5.1).
fn token_success(response: &TokenResponse) -> Response {
    no_store(Json(response).into_response())
}

/// JSON error body with cache headers.
pub(crate) fn token_error(error: &OAuthError) -> Response {
    no_store(
        (
            status_for(error.code),
            Json(serde_json::json!({
                "error": error.code,
                "error_description": error.description
            })),
        )
            .into_response(),
    )
}

/// Plain-text error for requests that cannot be redirected back to the client.
fn text_error(error: &OAuthError) -> Response {
    tracing::info!(error = %error.code, description = %error.description, "Returning error");
    (
        StatusCode::BAD_REQUEST,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!("{}: {}", error.code, error.description),
    )
        .into_response()
}

/// Generic 500; the cause is logged only.
pub(crate) fn internal_error(error: &InternalError) -> Response {
    tracing::error!(error = %error, "Internal error handling OAuth request");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
}

pub(crate) fn redirect(url: String) -> Response {
    tracing::debug!(%url, "Redirecting");
    (StatusCode::FOUND, [(header::LOCATION, url)]).into_response()
}

pub(crate) fn no_store(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-store"));
    response
}
