//! Consent page: the user approves or denies a client's access request.
//!
//! `/authorize` sends the user here when no recorded decision covers the
//! requested scope. The decision is stored in the
//! [`ClientAuthorizationRegister`](crate::register::ClientAuthorizationRegister)
//! and the user is sent back to the original authorization request.
//!
//! Rendering the form records a [`PendingConsent`] under a random nonce
//! carried in a hidden field. A submission is only accepted with a nonce
//! issued to the same user, and the decision is recorded for the client and
//! scope that were shown, never for values taken from the POST body.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

use super::handlers::redirect;
use super::transport::HttpState;
use crate::register::ClientAuthorization;
use crate::registry::random_token;
use crate::request::OAuthRequest;

/// Consent form, the default `client_authorization_url`.
pub const AUTHORIZE_PATH: &str = "/client_authorization/authorize";

/// Target of the consent form.
pub const SUBMIT_PATH: &str = "/client_authorization/client_auth";

/// Hidden form field binding a submission to a rendered form.
pub const NONCE_FIELD: &str = "consent_nonce";

/// A consent form shown to a user and not yet submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConsent {
    pub user: String,
    pub client_id: String,
    pub scope: String,
    pub original_url: String,
}

/// `GET /client_authorization/authorize`
pub async fn handle_consent_form(
    State(state): State<Arc<HttpState>>,
    request: OAuthRequest,
) -> Response {
    let Some(user) = request.remote_user.as_deref() else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    if request.query_param("user").is_some_and(|u| u != user) {
        tracing::warn!(%user, "Consent requested on behalf of another user");
        return (StatusCode::FORBIDDEN, "Consent requested for a different user").into_response();
    }

    let client_id = request.query_param("client_id").unwrap_or_default();
    let scope = request.query_param("scope").unwrap_or_default();
    let original_url = match original_url(&request) {
        Ok(url) => url,
        Err(response) => return response,
    };
    let Some(client) = state.server.clients().get(client_id) else {
        return (StatusCode::BAD_REQUEST, format!("Client of id \"{client_id}\" is not registered."))
            .into_response();
    };

    if state.consent.is_client_authorized_by_user(user, client_id, scope).await.is_some() {
        return redirect(original_url.to_string());
    }

    let nonce = random_token();
    let pending = PendingConsent {
        user: user.to_string(),
        client_id: client_id.to_string(),
        scope: scope.to_string(),
        original_url: original_url.to_string(),
    };
    state.pending_consents.put(nonce.clone(), Arc::new(pending)).await;

    Html(render_consent_page(&client.name, client_id, scope, original_url, &nonce)).into_response()
}

/// `POST /client_authorization/client_auth`
pub async fn handle_consent_submit(
    State(state): State<Arc<HttpState>>,
    request: OAuthRequest,
) -> Response {
    let Some(user) = request.remote_user.as_deref() else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let pending = match request.form_param(NONCE_FIELD) {
        Some(nonce) => state.pending_consents.take(nonce).await.ok(),
        None => None,
    };
    let Some(pending) = pending else {
        tracing::warn!(%user, "Consent submitted without a matching consent form");
        return (StatusCode::BAD_REQUEST, "Consent form not found or expired").into_response();
    };
    if pending.user != user {
        tracing::warn!(%user, shown_to = %pending.user, "Consent submitted by another user");
        return (StatusCode::FORBIDDEN, "Consent form was shown to a different user")
            .into_response();
    }
    let mismatch = |name: &str, shown: &str| request.form_param(name).is_some_and(|v| v != shown);
    if mismatch("client_id", &pending.client_id) || mismatch("scope", &pending.scope) {
        tracing::warn!(%user, client_id = %pending.client_id, "Consent submission altered");
        return (StatusCode::BAD_REQUEST, "Consent submission does not match the form shown")
            .into_response();
    }

    let is_authorized =
        request.form_param("submit").is_some() && request.form_param("cancel").is_none();
    tracing::info!(
        %user,
        client_id = %pending.client_id,
        scope = %pending.scope,
        is_authorized,
        "Recording client authorization"
    );

    state
        .consent
        .add_client_authorization(ClientAuthorization::new(
            user,
            &pending.client_id,
            &pending.scope,
            is_authorized,
        ))
        .await;

    redirect(pending.original_url.clone())
}

/// The URL to return to, restricted to this application.
fn original_url(request: &OAuthRequest) -> Result<&str, Response> {
    let Some(url) = request.param("original_url") else {
        return Err((StatusCode::BAD_REQUEST, "Missing original_url parameter").into_response());
    };
    let same_origin = url::Url::parse(url)
        .is_ok_and(|parsed| parsed.origin().ascii_serialization() == request.application_url);
    if !same_origin {
        tracing::warn!(%url, "Refusing to return to a foreign URL");
        return Err((StatusCode::BAD_REQUEST, "Invalid original_url parameter").into_response());
    }
    Ok(url)
}

/// Render the consent page.
///
/// All parameters are HTML-escaped.
pub fn render_consent_page(
    client_name: &str,
    client_id: &str,
    scope: &str,
    original_url: &str,
    nonce: &str,
) -> String {
    let scope_html = if scope.is_empty() {
        "<li><em>no specific scope</em></li>".to_string()
    } else {
        crate::scope::scope_string_to_list(scope)
            .iter()
            .map(|s| format!("<li>{}</li>", html_escape(s)))
            .collect::<String>()
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
<title>Authorize access</title>
<style>
body {{ font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif; background: #f5f5f5; margin: 0; display: flex; justify-content: center; align-items: center; min-height: 100vh; }}
.card {{ background: #fff; border-radius: 8px; box-shadow: 0 2px 8px rgba(0,0,0,0.1); padding: 32px; max-width: 420px; width: 100%; }}
h1 {{ font-size: 20px; margin: 0 0 8px; color: #333; }}
.subtitle {{ color: #666; font-size: 14px; margin: 0 0 16px; }}
button {{ padding: 10px 16px; border: none; border-radius: 4px; font-size: 14px; font-weight: 500; cursor: pointer; margin-top: 16px; }}
button[name="submit"] {{ background: #4a90d9; color: #fff; }}
button[name="cancel"] {{ background: #ddd; color: #333; }}
</style>
</head>
<body>
<div class="card">
<h1>Authorize access</h1>
<p class="subtitle"><strong>{client_name}</strong> is requesting access to:</p>
<ul>{scope_html}</ul>
<form method="POST" action="{SUBMIT_PATH}">
<input type="hidden" name="client_id" value="{client_id}">
<input type="hidden" name="scope" value="{scope}">
<input type="hidden" name="original_url" value="{original_url}">
<input type="hidden" name="{NONCE_FIELD}" value="{nonce}">
<button type="submit" name="submit" value="Authorize">Authorize</button>
<button type="submit" name="cancel" value="Cancel">Deny</button>
</form>
</div>
</body>
</html>"#,
        client_name = html_escape(client_name),
        client_id = html_escape(client_id),
        scope = html_escape(scope),
        original_url = html_escape(original_url),
        nonce = html_escape(nonce),
    )
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(
            html_escape(r#"<script>alert("xss")</script>"#),
            "&lt;script&gt;alert(&quot;xss&quot;)&lt;/script&gt;"
        );
    }

    #[test]
    fn test_render_lists_scopes() {
        let html = render_consent_page(
            "Data Portal",
            "C1",
            "read write",
            "https://as/authorize?client_id=C1&scope=read+write",
            "n0nce",
        );
        assert!(html.contains("Data Portal"));
        assert!(html.contains(r#"name="consent_nonce" value="n0nce""#));
        assert!(html.contains("<li>read</li><li>write</li>"));
        assert!(html.contains(r#"value="https://as/authorize?client_id=C1&amp;scope=read+write""#));
        assert!(html.contains(SUBMIT_PATH));
    }

    #[test]
    fn test_render_without_scope() {
        let html = render_consent_page("<b>App</b>", "C1", "", "https://as/authorize", "n");
        assert!(html.contains("no specific scope"));
        assert!(html.contains("&lt;b&gt;App&lt;/b&gt;"));
    }

    #[test]
    fn test_original_url_must_be_local() {
        let request = OAuthRequest::get(
            "https://as.example.org/client_authorization/authorize?original_url=https%3A%2F%2Fevil.example%2F",
        );
        assert!(original_url(&request).is_err());

        let request = OAuthRequest::get(
            "https://as.example.org/client_authorization/authorize?original_url=https%3A%2F%2Fas.example.org.evil%2F",
        );
        assert!(original_url(&request).is_err());

        let request = OAuthRequest::get(
            "https://as.example.org/client_authorization/authorize?original_url=https%3A%2F%2Fas.example.org%2Fauthorize",
        );
        assert_eq!(original_url(&request).ok(), Some("https://as.example.org/authorize"));
    }
}
