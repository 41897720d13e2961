//! Authorization requests and grant minting.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::OAuthError;
use crate::registry::{AuthorizationGrant, random_token};
use crate::request::OAuthRequest;

/// Parameters of a request to the authorization endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeRequest {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
}

impl AuthorizeRequest {
    /// Read the authorization parameters from the query string.
    ///
    /// Fails with `invalid_request` if `response_type` or `client_id` is
    /// missing. The value of `response_type` is checked by the server.
    pub fn from_request(request: &OAuthRequest) -> Result<Self, OAuthError> {
        let required = |name: &str| {
            request
                .query_param(name)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| OAuthError::invalid_request(format!("Missing {name} parameter")))
        };
        let optional = |name: &str| request.query_param(name).map(str::to_string);

        Ok(Self {
            response_type: required("response_type")?,
            client_id: required("client_id")?,
            redirect_uri: optional("redirect_uri"),
            scope: optional("scope"),
            state: optional("state"),
        })
    }

    /// Requested scope, empty when none was given.
    #[must_use]
    pub fn scope(&self) -> &str {
        self.scope.as_deref().unwrap_or_default()
    }
}

/// Turns an approved authorization request into a single-use grant.
#[derive(Debug, Clone)]
pub enum Authorizer {
    /// Grant with no additional data.
    Plain { lifetime: Duration },

    /// Grant that records the authenticated end user under
    /// `user_identifier_key`, for certificate tokens issued later.
    StoringIdentifier { lifetime: Duration, user_identifier_key: String },
}

impl Authorizer {
    #[must_use]
    pub const fn lifetime(&self) -> Duration {
        match self {
            Self::Plain { lifetime } | Self::StoringIdentifier { lifetime, .. } => *lifetime,
        }
    }

    /// Mint a grant and its code.
    ///
    /// The storing variant fails with `server_error` when the request has no
    /// authenticated user.
    pub fn generate_authorization_grant(
        &self,
        auth_request: &AuthorizeRequest,
        request: &OAuthRequest,
    ) -> Result<(AuthorizationGrant, String), OAuthError> {
        let additional_data = match self {
            Self::Plain { .. } => HashMap::new(),
            Self::StoringIdentifier { user_identifier_key, .. } => {
                let Some(user) = request.remote_user.as_deref().filter(|u| !u.is_empty()) else {
                    tracing::error!("No user identifier available for authorization grant");
                    return Err(OAuthError::server_error(
                        "Authorization grant could not be created",
                    ));
                };
                HashMap::from([(user_identifier_key.clone(), user.to_string())])
            }
        };

        let code = random_token();
        let grant = AuthorizationGrant::new(
            code.clone(),
            auth_request.client_id.clone(),
            auth_request.redirect_uri.clone(),
            auth_request.scope().to_string(),
            additional_data,
            self.lifetime(),
        );
        Ok((grant, code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn auth_request() -> AuthorizeRequest {
        let req = OAuthRequest::get(
            "https://as/authorize?response_type=code&client_id=C1&scope=read+write&state=xyz",
        );
        AuthorizeRequest::from_request(&req).unwrap()
    }

    #[test]
    fn test_parse_authorize_request() {
        let parsed = auth_request();
        assert_eq!(parsed.response_type, "code");
        assert_eq!(parsed.client_id, "C1");
        assert_eq!(parsed.redirect_uri, None);
        assert_eq!(parsed.scope(), "read write");
        assert_eq!(parsed.state.as_deref(), Some("xyz"));
    }

    #[test]
    fn test_missing_required_parameters() {
        let req = OAuthRequest::get("https://as/authorize?client_id=C1");
        let err = AuthorizeRequest::from_request(&req).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
        assert!(err.description.contains("response_type"));

        let req = OAuthRequest::get("https://as/authorize?response_type=code&client_id=");
        let err = AuthorizeRequest::from_request(&req).unwrap_err();
        assert!(err.description.contains("client_id"));
    }

    #[test]
    fn test_plain_authorizer() {
        let authorizer = Authorizer::Plain { lifetime: Duration::from_secs(600) };
        let req = OAuthRequest::get("https://as/authorize");
        let (grant, code) = authorizer.generate_authorization_grant(&auth_request(), &req).unwrap();

        assert_eq!(code.len(), 64);
        assert!(code.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(grant.code, code);
        assert_eq!(grant.client_id, "C1");
        assert_eq!(grant.scope, "read write");
        assert!(grant.additional_data.is_empty());
        assert!(!grant.is_granted());
    }

    #[test]
    fn test_codes_are_unique() {
        let authorizer = Authorizer::Plain { lifetime: Duration::from_secs(600) };
        let req = OAuthRequest::get("https://as/authorize");
        let (_, first) = authorizer.generate_authorization_grant(&auth_request(), &req).unwrap();
        let (_, second) = authorizer.generate_authorization_grant(&auth_request(), &req).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_storing_identifier_authorizer() {
        let authorizer = Authorizer::StoringIdentifier {
            lifetime: Duration::from_secs(600),
            user_identifier_key: "user_identifier".into(),
        };

        let req = OAuthRequest::get("https://as/authorize").with_remote_user("alice");
        let (grant, _) = authorizer.generate_authorization_grant(&auth_request(), &req).unwrap();
        assert_eq!(grant.data("user_identifier"), Some("alice"));

        let req = OAuthRequest::get("https://as/authorize");
        let err = authorizer.generate_authorization_grant(&auth_request(), &req).unwrap_err();
        assert_eq!(err.code, ErrorCode::ServerError);
    }
}
