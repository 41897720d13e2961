use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use super::Credential;
use crate::error::{ConfigError, ConfigResult, RegisterError};

/// An entry in the client register.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientRegistration {
    pub name: String,
    pub id: String,
    #[serde(rename = "type")]
    pub client_type: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    pub authentication_data: Option<String>,
    pub secret: Option<String>,
}

impl std::fmt::Debug for ClientRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistration")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("client_type", &self.client_type)
            .field("redirect_uris", &self.redirect_uris)
            .field("authentication_data", &self.authentication_data)
            .finish()
    }
}

/// Registered OAuth clients, keyed by client id.
#[derive(Debug, Clone, Default)]
pub struct ClientRegister {
    clients: HashMap<String, ClientRegistration>,
}

impl ClientRegister {
    /// Build a register, rejecting duplicate client ids and certificate DNs.
    pub fn new(registrations: impl IntoIterator<Item = ClientRegistration>) -> ConfigResult<Self> {
        let mut clients = HashMap::new();
        let mut dns = HashSet::new();
        for registration in registrations {
            if let Some(dn) = registration.authentication_data.clone() {
                if !dns.insert(dn.clone()) {
                    return Err(ConfigError::Invalid(format!(
                        "client \"{}\" reuses certificate DN \"{dn}\"",
                        registration.id
                    )));
                }
            }
            let id = registration.id.clone();
            if clients.insert(id.clone(), registration).is_some() {
                return Err(ConfigError::Invalid(format!("duplicate client id \"{id}\"")));
            }
        }
        Ok(Self { clients })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    #[must_use]
    pub fn get(&self, client_id: &str) -> Option<&ClientRegistration> {
        self.clients.get(client_id)
    }

    pub fn is_registered_client(&self, client_id: &str) -> Result<(), RegisterError> {
        if self.clients.contains_key(client_id) {
            Ok(())
        } else {
            Err(RegisterError::UnknownClient(client_id.to_string()))
        }
    }

    /// Check the client exists and `redirect_uri` is one it registered.
    ///
    /// Without a `redirect_uri` the client must have exactly one registered.
    pub fn is_valid_client(
        &self,
        client_id: &str,
        redirect_uri: Option<&str>,
    ) -> Result<(), RegisterError> {
        let client = self
            .clients
            .get(client_id)
            .ok_or_else(|| RegisterError::UnknownClient(client_id.to_string()))?;

        match redirect_uri {
            None if client.redirect_uris.len() != 1 => Err(RegisterError::NoRedirectUri),
            Some(uri) if !client.redirect_uris.iter().any(|r| r == uri) => {
                Err(RegisterError::UnregisteredRedirectUri)
            }
            _ => Ok(()),
        }
    }

    /// Redirect URI to use for a request: the requested one, or the client's
    /// only registered URI.
    #[must_use]
    pub fn effective_redirect_uri<'a>(
        &'a self,
        client_id: &str,
        redirect_uri: Option<&'a str>,
    ) -> Option<&'a str> {
        redirect_uri.or_else(|| {
            let client = self.clients.get(client_id)?;
            match client.redirect_uris.as_slice() {
                [only] => Some(only.as_str()),
                _ => None,
            }
        })
    }

    /// Authentication material of every client.
    #[must_use]
    pub fn credentials(&self) -> Vec<Credential> {
        self.clients
            .values()
            .map(|c| Credential {
                id: c.id.clone(),
                secret: c.secret.clone(),
                authentication_data: c.authentication_data.clone(),
            })
            .collect()
    }
}
