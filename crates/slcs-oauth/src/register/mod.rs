//! Registers of known clients and resources, and of user consent decisions.
//!
//! Client and resource registers are loaded once from a TOML file and are
//! read-only afterwards:
//!
//! ```toml
//! [clients.portal]
//! name = "Data portal"
//! id = "portal-1"
//! type = "confidential"
//! redirect_uris = ["https://portal.example.org/oauth2/authz_callback"]
//! authentication_data = "/O=Example/CN=portal.example.org"
//!
//! [resources.slcs]
//! name = "Certificate service"
//! id = "slcs-1"
//! secret = "change-me"
//! ```

mod client;
mod consent;
mod resource;

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

pub use client::{ClientRegister, ClientRegistration};
pub use consent::{ClientAuthorization, ClientAuthorizationRegister};
pub use resource::{ResourceRegister, ResourceRegistration};

use crate::error::{ConfigError, ConfigResult};

/// Identity and authentication material of a registered client or resource.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub id: String,
    pub secret: Option<String>,
    /// Certificate subject DN.
    pub authentication_data: Option<String>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("has_secret", &self.secret.is_some())
            .field("authentication_data", &self.authentication_data)
            .finish()
    }
}

/// On-disk layout of the register file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterFile {
    #[serde(default)]
    pub clients: BTreeMap<String, ClientRegistration>,

    #[serde(default)]
    pub resources: BTreeMap<String, ResourceRegistration>,
}

impl RegisterFile {
    /// Read and parse a register file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Build the client and resource registers.
    pub fn into_registers(self) -> ConfigResult<(ClientRegister, ResourceRegister)> {
        let clients = ClientRegister::new(self.clients.into_values())?;
        let resources = ResourceRegister::new(self.resources.into_values())?;
        tracing::info!(
            clients = clients.len(),
            resources = resources.len(),
            "Loaded registers"
        );
        Ok((clients, resources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTER: &str = r#"
        [clients.portal]
        name = "Portal"
        id = "11"
        type = "confidential"
        redirect_uris = ["https://portal/cb"]
        authentication_data = "/O=Example/CN=portal"

        [resources.slcs]
        name = "SLCS"
        id = "r1"
        secret = "pw"
    "#;

    #[test]
    fn test_parse_register_file() {
        let file = RegisterFile::parse(REGISTER).unwrap();
        assert_eq!(file.clients.len(), 1);
        assert_eq!(file.resources["slcs"].secret.as_deref(), Some("pw"));

        let (clients, resources) = file.into_registers().unwrap();
        assert!(clients.is_registered_client("11").is_ok());
        assert!(resources.is_registered_resource("r1").is_ok());
    }

    #[test]
    fn test_empty_register_file() {
        let (clients, resources) = RegisterFile::parse("").unwrap().into_registers().unwrap();
        assert_eq!(clients.len(), 0);
        assert_eq!(resources.len(), 0);
    }

    #[test]
    fn test_malformed_register_file() {
        let err = RegisterFile::parse("[clients.portal]\nname = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let err = RegisterFile::parse("[unknown]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = RegisterFile::load(Path::new("/nonexistent/register.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_credential_debug_hides_secret() {
        let credential = Credential {
            id: "c".into(),
            secret: Some("hunter2".into()),
            authentication_data: None,
        };
        assert!(!format!("{credential:?}").contains("hunter2"));
    }
}
