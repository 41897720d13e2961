use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use super::Credential;
use crate::error::{ConfigError, ConfigResult, RegisterError};

/// An entry in the resource register.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceRegistration {
    pub name: String,
    pub id: String,
    pub secret: Option<String>,
    pub authentication_data: Option<String>,
}

impl std::fmt::Debug for ResourceRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistration")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("authentication_data", &self.authentication_data)
            .finish()
    }
}

/// Registered resource servers, keyed by resource id.
#[derive(Debug, Clone, Default)]
pub struct ResourceRegister {
    resources: HashMap<String, ResourceRegistration>,
}

impl ResourceRegister {
    pub fn new(
        registrations: impl IntoIterator<Item = ResourceRegistration>,
    ) -> ConfigResult<Self> {
        let mut resources = HashMap::new();
        let mut dns = HashSet::new();
        for registration in registrations {
            if let Some(dn) = registration.authentication_data.clone() {
                if !dns.insert(dn.clone()) {
                    return Err(ConfigError::Invalid(format!(
                        "resource \"{}\" reuses certificate DN \"{dn}\"",
                        registration.id
                    )));
                }
            }
            let id = registration.id.clone();
            if resources.insert(id.clone(), registration).is_some() {
                return Err(ConfigError::Invalid(format!("duplicate resource id \"{id}\"")));
            }
        }
        Ok(Self { resources })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn is_registered_resource(&self, resource_id: &str) -> Result<(), RegisterError> {
        if self.resources.contains_key(resource_id) {
            Ok(())
        } else {
            Err(RegisterError::UnknownResource(resource_id.to_string()))
        }
    }

    /// The resource whose certificate DN is `dn`.
    #[must_use]
    pub fn resource_for_dn(&self, dn: &str) -> Option<&ResourceRegistration> {
        self.resources.values().find(|r| r.authentication_data.as_deref() == Some(dn))
    }

    #[must_use]
    pub fn credentials(&self) -> Vec<Credential> {
        self.resources
            .values()
            .map(|r| Credential {
                id: r.id.clone(),
                secret: r.secret.clone(),
                authentication_data: r.authentication_data.clone(),
            })
            .collect()
    }
}
