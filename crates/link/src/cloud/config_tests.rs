// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn parses_window_config_assignment() -> anyhow::Result<()> {
    let text = r#"window.CONFIG = {
        "keycloakLogin": true,
        "keycloak": { "url": "https://kc.example.com/", "realm": "iam", "clientId": "kaas" }
    };"#;
    let cfg = CloudConfig::parse("https://cloud.example.com/", text)?;
    assert_eq!(cfg.cloud_url, "https://cloud.example.com");
    assert_eq!(cfg.auth_mode, AuthMode::Sso);
    assert!(cfg.uses_sso());
    assert_eq!(cfg.issuer_route, "https://kc.example.com/auth/realms/iam/protocol/openid-connect");
    assert_eq!(cfg.client_id, "kaas");
    Ok(())
}

#[test]
fn keycloak_without_sso_is_password_mode() -> anyhow::Result<()> {
    let text = r#"{"keycloak": {"url": "https://kc", "realm": "iam", "clientId": "kaas"}}"#;
    let cfg = CloudConfig::parse("https://cloud", text)?;
    assert_eq!(cfg.auth_mode, AuthMode::Password);
    assert!(!cfg.uses_sso());
    Ok(())
}

#[test]
fn missing_keycloak_is_basic_auth() -> anyhow::Result<()> {
    let cfg = CloudConfig::parse("https://cloud", "window.CONFIG = {};")?;
    assert_eq!(cfg.auth_mode, AuthMode::Basic);
    Ok(())
}

#[test]
fn garbage_is_a_protocol_error() {
    let err = CloudConfig::parse("https://cloud", "not javascript").err();
    assert_eq!(err.map(|e| e.kind), Some(crate::error::ErrorKind::Protocol));
}
