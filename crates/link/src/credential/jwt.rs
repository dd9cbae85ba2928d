// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unverified JWT payload decoding.
//!
//! Tokens come straight from the IDP over TLS and are only inspected for
//! display and filtering claims, so signatures are not checked here.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

use crate::error::ApiError;

/// Claims this crate reads from an id token.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdClaims {
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub iam_roles: Vec<String>,
    #[serde(default)]
    pub exp: Option<u64>,
}

/// Decode the payload segment of a JWT.
pub fn decode_claims(token: &str) -> Result<IdClaims, ApiError> {
    let payload = token
        .split('.')
        .nth(1)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::protocol("token is not a JWT"))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| ApiError::protocol(format!("invalid JWT payload encoding: {e}")))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Role claim granting `role` on `namespace`: `m:kaas:<namespace>@<role>`.
fn namespace_role(namespace: &str, role: &str) -> String {
    format!("m:kaas:{namespace}@{role}")
}

impl IdClaims {
    /// Whether the roles grant reader or writer access to `namespace`.
    pub fn can_read_namespace(&self, namespace: &str) -> bool {
        let reader = namespace_role(namespace, "reader");
        let writer = namespace_role(namespace, "writer");
        self.iam_roles.iter().any(|r| *r == reader || *r == writer)
    }
}

#[cfg(test)]
#[path = "jwt_tests.rs"]
mod tests;
