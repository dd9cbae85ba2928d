// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote instance configuration served at `{cloudUrl}/config.js`.

use serde::Deserialize;

use crate::error::ApiError;

/// How the instance authenticates users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Browser-mediated OIDC authorization code flow.
    Sso,
    /// OIDC direct password grant against the instance's IDP.
    Password,
    /// No IDP configured. Not supported.
    Basic,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    #[serde(default)]
    keycloak_login: bool,
    #[serde(default)]
    keycloak: Option<RawKeycloak>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawKeycloak {
    url: String,
    realm: String,
    client_id: String,
}

/// Instance settings needed to talk to its identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudConfig {
    pub cloud_url: String,
    pub auth_mode: AuthMode,
    /// `{keycloak}/auth/realms/{realm}/protocol/openid-connect`; empty for basic auth.
    pub issuer_route: String,
    /// Instance-level OIDC client.
    pub client_id: String,
}

impl CloudConfig {
    pub fn uses_sso(&self) -> bool {
        self.auth_mode == AuthMode::Sso
    }

    /// Fetch and parse the instance configuration.
    pub async fn load(http: &reqwest::Client, cloud_url: &str) -> Result<Self, ApiError> {
        let cloud_url = cloud_url.trim_end_matches('/');
        let resp = http.get(format!("{cloud_url}/config.js")).send().await?;
        let status = resp.status().as_u16();
        if status == 401 {
            return Err(ApiError::unauthorized());
        }
        if !(200..300).contains(&status) {
            return Err(ApiError::transport(format!("loading instance config failed ({status})")));
        }
        let text = resp.text().await?;
        Self::parse(cloud_url, &text)
    }

    /// Parse a `config.js` body: a JSON object, optionally wrapped in
    /// `window.CONFIG = ...;`.
    pub fn parse(cloud_url: &str, text: &str) -> Result<Self, ApiError> {
        let start = text.find('{').ok_or_else(|| ApiError::protocol("config.js has no object"))?;
        let end = text.rfind('}').ok_or_else(|| ApiError::protocol("config.js has no object"))?;
        if end < start {
            return Err(ApiError::protocol("config.js has no object"));
        }
        let raw: RawConfig = serde_json::from_str(&text[start..=end])?;

        let cloud_url = cloud_url.trim_end_matches('/').to_owned();
        Ok(match raw.keycloak {
            Some(kc) => {
                let base = kc.url.trim_end_matches('/');
                Self {
                    cloud_url,
                    auth_mode: if raw.keycloak_login { AuthMode::Sso } else { AuthMode::Password },
                    issuer_route: format!(
                        "{base}/auth/realms/{realm}/protocol/openid-connect",
                        realm = kc.realm
                    ),
                    client_id: kc.client_id,
                }
            }
            None => Self {
                cloud_url,
                auth_mode: AuthMode::Basic,
                issuer_route: String::new(),
                client_id: String::new(),
            },
        })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
