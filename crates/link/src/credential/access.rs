// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token aggregate for the instance session and the cell that owns it.
//!
//! `AuthAccess` is a plain value: every mutation goes through
//! [`CredentialCell::apply`] (or [`CredentialCell::try_apply`]), which diffs the
//! value before and after and only publishes a new version when it changed.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::ApiError;

/// Expiry recorded for refresh tokens the IDP reports as non-expiring
/// (`refresh_expires_in == 0`, e.g. offline tokens).
pub const NO_EXPIRY: u64 = u64::MAX;

/// Token endpoint response, or a rehydrated payload carrying absolute expiries.
///
/// Absolute expiries win over relative ones so a payload restored from
/// storage is not re-based on the current time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_expires_in: Option<u64>,
    /// Absolute id token expiry, epoch millis.
    #[serde(default, rename = "expiresAt", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// Absolute refresh token expiry, epoch millis.
    #[serde(default, rename = "refreshExpiresAt", skip_serializing_if = "Option::is_none")]
    pub refresh_expires_at: Option<u64>,
}

/// Credentials for one identity against one OIDC client.
///
/// Token and expiry always travel in pairs: a token is never stored without
/// its expiry instant and vice versa.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthAccess {
    #[serde(default)]
    id_token: Option<String>,
    /// Epoch millis.
    #[serde(default)]
    id_token_expires_at: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Epoch millis.
    #[serde(default)]
    refresh_token_expires_at: Option<u64>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    idp_client_id: Option<String>,
    #[serde(default)]
    uses_sso: Option<bool>,
}

fn normalize(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl AuthAccess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a token payload (e.g. tokens carried by a deep link).
    pub fn from_tokens(payload: &TokenPayload) -> Result<Self, ApiError> {
        let mut access = Self::new();
        access.update_tokens(payload)?;
        Ok(access)
    }

    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }

    pub fn id_token_expires_at(&self) -> Option<u64> {
        self.id_token_expires_at
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn refresh_token_expires_at(&self) -> Option<u64> {
        self.refresh_token_expires_at
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn idp_client_id(&self) -> Option<&str> {
        self.idp_client_id.as_deref()
    }

    pub fn uses_sso(&self) -> Option<bool> {
        self.uses_sso
    }

    /// Set or clear the id token together with its expiry.
    pub fn set_id_token(&mut self, token: Option<String>, expires_at: Option<u64>) {
        match (normalize(token), expires_at) {
            (Some(token), Some(at)) => {
                self.id_token = Some(token);
                self.id_token_expires_at = Some(at);
            }
            _ => {
                self.id_token = None;
                self.id_token_expires_at = None;
            }
        }
    }

    /// Set or clear the refresh token together with its expiry.
    pub fn set_refresh_token(&mut self, token: Option<String>, expires_at: Option<u64>) {
        match (normalize(token), expires_at) {
            (Some(token), Some(at)) => {
                self.refresh_token = Some(token);
                self.refresh_token_expires_at = Some(at);
            }
            _ => {
                self.refresh_token = None;
                self.refresh_token_expires_at = None;
            }
        }
    }

    pub fn set_username(&mut self, username: Option<String>) {
        self.username = normalize(username);
    }

    pub fn set_idp_client_id(&mut self, client_id: Option<String>) {
        self.idp_client_id = normalize(client_id);
    }

    pub fn set_uses_sso(&mut self, uses_sso: Option<bool>) {
        self.uses_sso = uses_sso;
    }

    /// Apply a token response, converting relative expiries to absolute ones.
    pub fn update_tokens(&mut self, payload: &TokenPayload) -> Result<(), ApiError> {
        self.update_tokens_at(payload, epoch_ms())
    }

    /// [`update_tokens`](Self::update_tokens) with an explicit clock.
    ///
    /// Relative expiries become `now + secs * 1000`, except
    /// `refresh_expires_in == 0`: the IDP sends 0 for offline tokens that
    /// never expire, so it maps to [`NO_EXPIRY`] instead of `now`.
    pub fn update_tokens_at(&mut self, payload: &TokenPayload, now: u64) -> Result<(), ApiError> {
        let id_token = normalize(payload.id_token.clone())
            .ok_or_else(|| ApiError::validation("token payload is missing id_token"))?;
        let refresh_token = normalize(payload.refresh_token.clone())
            .ok_or_else(|| ApiError::validation("token payload is missing refresh_token"))?;

        let id_expires_at = match (payload.expires_at, payload.expires_in) {
            (Some(at), _) => at,
            (None, Some(secs)) => now.saturating_add(secs.saturating_mul(1000)),
            (None, None) => {
                return Err(ApiError::validation("token payload is missing expires_in"));
            }
        };
        let refresh_expires_at = match (payload.refresh_expires_at, payload.refresh_expires_in) {
            (Some(at), _) => at,
            (None, Some(0)) => NO_EXPIRY,
            (None, Some(secs)) => now.saturating_add(secs.saturating_mul(1000)),
            (None, None) => {
                return Err(ApiError::validation("token payload is missing refresh_expires_in"));
            }
        };

        self.set_id_token(Some(id_token), Some(id_expires_at));
        self.set_refresh_token(Some(refresh_token), Some(refresh_expires_at));
        Ok(())
    }

    /// Identity is known and was established through SSO.
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.uses_sso == Some(true)
    }

    pub fn is_token_expired(&self) -> bool {
        self.is_token_expired_at(epoch_ms())
    }

    pub fn is_token_expired_at(&self, now: u64) -> bool {
        self.id_token_expires_at.map_or(true, |at| at <= now)
    }

    pub fn is_refresh_token_expired(&self) -> bool {
        self.is_refresh_token_expired_at(epoch_ms())
    }

    pub fn is_refresh_token_expired_at(&self, now: u64) -> bool {
        self.refresh_token_expires_at.map_or(true, |at| at <= now)
    }

    /// An expired id token is fine (it can be refreshed); an expired refresh
    /// token is not.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(epoch_ms())
    }

    pub fn is_valid_at(&self, now: u64) -> bool {
        self.has_credentials() && self.id_token.is_some() && !self.is_refresh_token_expired_at(now)
    }

    /// Forget who the user is.
    pub fn reset_credentials(&mut self) {
        self.username = None;
        self.uses_sso = None;
    }

    pub fn reset_tokens(&mut self) {
        self.set_id_token(None, None);
        self.set_refresh_token(None, None);
    }

    pub fn reset(&mut self) {
        self.reset_credentials();
        self.reset_tokens();
        self.idp_client_id = None;
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, ApiError> {
        let access: Self = serde_json::from_value(value)?;
        if access.id_token.is_some() != access.id_token_expires_at.is_some()
            || access.refresh_token.is_some() != access.refresh_token_expires_at.is_some()
        {
            return Err(ApiError::validation("token and expiry must be stored together"));
        }
        Ok(access)
    }
}

// -- Cell --------------------------------------------------------------------

/// Single owner of the session [`AuthAccess`].
///
/// Readers take snapshots; writers submit closures. A version counter is
/// published on a watch channel whenever a mutation actually changed the value.
pub struct CredentialCell {
    access: Mutex<AuthAccess>,
    version_tx: watch::Sender<u64>,
}

impl CredentialCell {
    pub fn new(access: AuthAccess) -> Self {
        let (version_tx, _) = watch::channel(0);
        Self { access: Mutex::new(access), version_tx }
    }

    pub fn snapshot(&self) -> AuthAccess {
        self.lock().clone()
    }

    pub fn version(&self) -> u64 {
        *self.version_tx.borrow()
    }

    /// Subscribe to version bumps.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    /// Run one mutation. Returns the closure's result and whether the value changed.
    pub fn apply<R>(&self, f: impl FnOnce(&mut AuthAccess) -> R) -> (R, bool) {
        let mut access = self.lock();
        let before = access.clone();
        let out = f(&mut access);
        let changed = *access != before;
        drop(access);
        if changed {
            self.version_tx.send_modify(|v| *v += 1);
        }
        (out, changed)
    }

    /// Run a fallible mutation; on error the value is left untouched.
    pub fn try_apply<R, E>(
        &self,
        f: impl FnOnce(&mut AuthAccess) -> Result<R, E>,
    ) -> Result<R, E> {
        let mut access = self.lock();
        let before = access.clone();
        match f(&mut access) {
            Ok(out) => {
                let changed = *access != before;
                drop(access);
                if changed {
                    self.version_tx.send_modify(|v| *v += 1);
                }
                Ok(out)
            }
            Err(e) => {
                *access = before;
                Err(e)
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AuthAccess> {
        self.access.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for CredentialCell {
    fn default() -> Self {
        Self::new(AuthAccess::default())
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "access_tests.rs"]
mod tests;
