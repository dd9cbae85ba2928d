// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OIDC protocol client for the instance's identity provider.
//!
//! Every call returns `Result<_, ApiError>`; transport and HTTP failures are
//! never panics. A 401 always surfaces as [`ApiError::unauthorized`].

use crate::cloud::config::{AuthMode, CloudConfig};
use crate::credential::access::{CredentialCell, TokenPayload};
use crate::error::ApiError;

/// Parameters for [`AuthClient::sso_auth_url`].
#[derive(Debug, Clone, Copy)]
pub struct AuthUrlRequest<'a> {
    /// Opaque value echoed back by the callback.
    pub state: &'a str,
    /// Overrides the instance client (cluster-scoped tokens).
    pub client_id: Option<&'a str>,
    /// Request `offline_access`.
    pub offline: bool,
}

/// Credentials exchanged at the token endpoint.
#[derive(Debug, Clone, Copy)]
pub enum TokenGrant<'a> {
    Password { username: &'a str, password: &'a str },
    AuthCode { code: &'a str, client_id: Option<&'a str>, offline: bool },
}

/// Stateless OIDC client bound to one instance.
#[derive(Debug, Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    uses_sso: bool,
    issuer_route: String,
    /// `{issuer_route}/auth`, the browser entry point.
    auth_endpoint: reqwest::Url,
    client_id: String,
    redirect_uri: String,
}

impl AuthClient {
    /// `redirect_uri` is used for both the authorization URL and the code
    /// exchange, which the IDP requires to match exactly.
    pub fn new(
        http: reqwest::Client,
        config: &CloudConfig,
        redirect_uri: impl Into<String>,
    ) -> Result<Self, ApiError> {
        if config.auth_mode == AuthMode::Basic {
            return Err(ApiError::policy("instance uses basic auth, which is not supported"));
        }
        if config.issuer_route.is_empty() || config.client_id.is_empty() {
            return Err(ApiError::validation("instance config has no OIDC issuer or client id"));
        }
        let auth_endpoint = reqwest::Url::parse(&format!("{}/auth", config.issuer_route))
            .map_err(|e| ApiError::validation(format!("invalid OIDC issuer route: {e}")))?;
        Ok(Self {
            http,
            uses_sso: config.uses_sso(),
            issuer_route: config.issuer_route.clone(),
            auth_endpoint,
            client_id: config.client_id.clone(),
            redirect_uri: redirect_uri.into(),
        })
    }

    pub fn uses_sso(&self) -> bool {
        self.uses_sso
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Build the authorization endpoint URL for the browser.
    pub fn sso_auth_url(&self, req: AuthUrlRequest<'_>) -> String {
        let scope = if req.offline { "openid offline_access" } else { "openid" };
        let mut url = self.auth_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("client_id", req.client_id.unwrap_or(&self.client_id))
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", scope)
            .append_pair("state", req.state);
        url.to_string()
    }

    /// Exchange a password or an authorization code for tokens.
    pub async fn get_token(&self, grant: TokenGrant<'_>) -> Result<TokenPayload, ApiError> {
        let form: Vec<(&str, &str)> = match grant {
            TokenGrant::Password { username, password } => {
                if self.uses_sso {
                    return Err(ApiError::policy("password grant is disabled on SSO instances"));
                }
                vec![
                    ("grant_type", "password"),
                    ("client_id", self.client_id.as_str()),
                    ("username", username),
                    ("password", password),
                    ("scope", "openid"),
                ]
            }
            TokenGrant::AuthCode { code, client_id, offline } => vec![
                ("grant_type", "authorization_code"),
                ("client_id", client_id.unwrap_or(&self.client_id)),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("scope", if offline { "openid offline_access" } else { "openid" }),
            ],
        };
        let body = self.post_form("token", &form, &[200]).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Refresh-token grant. `client_id` must be the client that issued the token.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        client_id: Option<&str>,
    ) -> Result<TokenPayload, ApiError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", client_id.unwrap_or(&self.client_id)),
            ("refresh_token", refresh_token),
        ];
        let body = self.post_form("token", &form, &[200]).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// End the IDP session behind `refresh_token`.
    pub async fn logout(&self, refresh_token: &str, client_id: Option<&str>) -> Result<(), ApiError> {
        let form = [
            ("client_id", client_id.unwrap_or(&self.client_id)),
            ("refresh_token", refresh_token),
        ];
        self.post_form("logout", &form, &[200, 204]).await?;
        Ok(())
    }

    /// Refresh the cell's id token if it expired. Fails with `Unauthorized`
    /// when the refresh token itself is gone or expired.
    pub async fn ensure_fresh(&self, cell: &CredentialCell) -> Result<(), ApiError> {
        let access = cell.snapshot();
        if access.is_refresh_token_expired() {
            return Err(ApiError::unauthorized());
        }
        if !access.is_token_expired() {
            return Ok(());
        }
        let Some(refresh) = access.refresh_token() else {
            return Err(ApiError::unauthorized());
        };
        tracing::debug!("id token expired, refreshing");
        let tokens = self.refresh_token(refresh, access.idp_client_id()).await?;
        cell.try_apply(|a| a.update_tokens(&tokens))
    }

    async fn post_form(
        &self,
        endpoint: &str,
        form: &[(&str, &str)],
        expected: &[u16],
    ) -> Result<Vec<u8>, ApiError> {
        let url = format!("{}/{endpoint}", self.issuer_route);
        let resp = self.http.post(&url).form(form).send().await?;
        let status = resp.status().as_u16();
        if status == 401 {
            return Err(ApiError::unauthorized());
        }
        if !expected.contains(&status) {
            let text = resp.text().await.unwrap_or_default();
            return Err(ApiError::transport(format!("{endpoint} request failed ({status}): {text}")));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

#[cfg(test)]
#[path = "oauth_tests.rs"]
mod tests;
