//! Register file loading and client validation.

use std::path::PathBuf;

use slcs_oauth::error::{ConfigError, RegisterError};
use slcs_oauth::register::RegisterFile;

const REGISTER: &str = r#"
[clients.portal]
name = "Data portal"
id = "portal-1"
type = "confidential"
redirect_uris = ["https://portal.example.org/oauth2/authz_callback"]
authentication_data = "/O=Example/CN=portal.example.org"

[clients.multi]
name = "Multi"
id = "multi-1"
type = "confidential"
redirect_uris = ["https://a.example.org/cb", "https://b.example.org/cb"]
secret = "multi-secret"

[clients.bare]
name = "No redirect"
id = "bare-1"
type = "public"

[resources.slcs]
name = "Certificate service"
id = "slcs-1"
secret = "change-me"
authentication_data = "/O=Example/CN=slcs.example.org"
"#;

fn write_register(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("slcs-oauth-{}-{name}.toml", std::process::id()));
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_load_register_file() {
    let path = write_register("load", REGISTER);
    let (clients, resources) = RegisterFile::load(&path).unwrap().into_registers().unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(clients.len(), 3);
    assert_eq!(resources.len(), 1);
    assert_eq!(clients.get("portal-1").unwrap().name, "Data portal");
    assert_eq!(clients.get("bare-1").unwrap().client_type, "public");
    assert!(resources.is_registered_resource("slcs-1").is_ok());
    assert_eq!(
        resources.is_registered_resource("nope").unwrap_err(),
        RegisterError::UnknownResource("nope".into())
    );
}

#[test]
fn test_every_registered_redirect_uri_is_valid() {
    let (clients, _) = RegisterFile::parse(REGISTER).unwrap().into_registers().unwrap();

    for (client_id, uri) in [
        ("portal-1", "https://portal.example.org/oauth2/authz_callback"),
        ("multi-1", "https://a.example.org/cb"),
        ("multi-1", "https://b.example.org/cb"),
    ] {
        assert!(clients.is_valid_client(client_id, Some(uri)).is_ok(), "{client_id} {uri}");
        assert_eq!(clients.effective_redirect_uri(client_id, Some(uri)), Some(uri));
    }
}

#[test]
fn test_redirect_uri_rules() {
    let (clients, _) = RegisterFile::parse(REGISTER).unwrap().into_registers().unwrap();

    // A single registered URI may be omitted.
    assert!(clients.is_valid_client("portal-1", None).is_ok());
    assert_eq!(
        clients.effective_redirect_uri("portal-1", None),
        Some("https://portal.example.org/oauth2/authz_callback")
    );

    let err = clients.is_valid_client("multi-1", None).unwrap_err();
    assert_eq!(
        err.to_string(),
        "No redirect URI is registered for the client or specified in the request."
    );
    assert_eq!(clients.is_valid_client("bare-1", None).unwrap_err(), RegisterError::NoRedirectUri);

    let err = clients.is_valid_client("portal-1", Some("https://evil.example.org/")).unwrap_err();
    assert_eq!(err.to_string(), "Redirect URI is not registered.");

    let err = clients.is_valid_client("ghost", Some("https://a.example.org/cb")).unwrap_err();
    assert_eq!(err.to_string(), "Client of id \"ghost\" is not registered.");
}

#[test]
fn test_duplicate_ids_rejected() {
    let register = r#"
        [clients.one]
        name = "One"
        id = "same"
        type = "confidential"

        [clients.two]
        name = "Two"
        id = "same"
        type = "confidential"
    "#;
    let err = RegisterFile::parse(register).unwrap().into_registers().unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("same")));
}

#[test]
fn test_credentials_carry_authentication_material() {
    let (clients, resources) = RegisterFile::parse(REGISTER).unwrap().into_registers().unwrap();

    let credentials = clients.credentials();
    let portal = credentials.iter().find(|c| c.id == "portal-1").unwrap();
    assert_eq!(portal.authentication_data.as_deref(), Some("/O=Example/CN=portal.example.org"));
    let multi = credentials.iter().find(|c| c.id == "multi-1").unwrap();
    assert_eq!(multi.secret.as_deref(), Some("multi-secret"));

    let resource = &resources.credentials()[0];
    assert_eq!(resource.id, "slcs-1");
    assert_eq!(resource.secret.as_deref(), Some("change-me"));
}

#[test]
fn test_shared_certificate_dn_rejected() {
    let register = r#"
        [clients.one]
        name = "One"
        id = "one"
        type = "confidential"
        authentication_data = "/O=Example/CN=shared"

        [clients.two]
        name = "Two"
        id = "two"
        type = "confidential"
        authentication_data = "/O=Example/CN=shared"
    "#;
    let err = RegisterFile::parse(register).unwrap().into_registers().unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("/O=Example/CN=shared")));
}
