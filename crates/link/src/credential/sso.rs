// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Instance-level SSO login through the external browser.
//!
//! `idle -> authorizing -> {authorized | error}`. Starting only opens the
//! browser; the token arrives later through the deep-link callback and is
//! applied by [`SsoAuthCoordinator::finish_authorization`].

use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::credential::access::{CredentialCell, TokenPayload};
use crate::credential::jwt::decode_claims;
use crate::credential::oauth::{AuthClient, AuthUrlRequest, TokenGrant};
use crate::error::ApiError;
use crate::events::OAuthCallback;

/// `state` parameter used for the instance login round trip.
pub const SSO_AUTH_STATE: &str = "sso-auth";

/// Opens URLs outside the application.
pub trait BrowserOpener: Send + Sync {
    fn open(&self, url: &str) -> anyhow::Result<()>;
}

/// Platform default browser (`open`, `start`, or `xdg-open`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserOpener for SystemBrowser {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        let cmd = if cfg!(target_os = "macos") {
            "open"
        } else if cfg!(target_os = "windows") {
            "start"
        } else {
            "xdg-open"
        };
        std::process::Command::new(cmd).arg(url).spawn()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsoState {
    Idle,
    Authorizing,
    Authorized,
    Error(String),
}

pub struct SsoAuthCoordinator {
    browser: Arc<dyn BrowserOpener>,
    offline: bool,
    /// Set while a code exchange is in flight; duplicate callbacks are ignored.
    /// Transitions happen with this lock held.
    exchanging: Mutex<bool>,
    state: watch::Sender<SsoState>,
}

impl SsoAuthCoordinator {
    pub fn new(browser: Arc<dyn BrowserOpener>, offline: bool) -> Self {
        let (state, _) = watch::channel(SsoState::Idle);
        Self { browser, offline, exchanging: Mutex::new(false), state }
    }

    pub fn state(&self) -> SsoState {
        self.state.borrow().clone()
    }

    /// Wait until the coordinator is no longer authorizing.
    pub async fn settled(&self) -> SsoState {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(|s| *s != SsoState::Authorizing).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        state
    }

    fn set(&self, state: SsoState) -> SsoState {
        self.state.send_replace(state.clone());
        state
    }

    /// Open the authorization URL in the browser. No-op while already authorizing.
    pub fn start_authorization(&self, auth: &AuthClient) -> SsoState {
        let _guard = self.lock();
        if self.state() == SsoState::Authorizing {
            tracing::debug!("sso authorization already in progress");
            return SsoState::Authorizing;
        }
        if !auth.uses_sso() {
            return self.set(SsoState::Error("instance does not use SSO".to_owned()));
        }

        let url = auth.sso_auth_url(AuthUrlRequest {
            state: SSO_AUTH_STATE,
            client_id: None,
            offline: self.offline,
        });
        match self.browser.open(&url) {
            Ok(()) => {
                tracing::info!("opened browser for SSO login");
                self.set(SsoState::Authorizing)
            }
            Err(e) => self.set(SsoState::Error(format!("failed to open browser: {e}"))),
        }
    }

    /// Apply the browser callback. Ignored unless authorizing.
    ///
    /// A cancel that lands while the code exchange is in flight does not
    /// abort the request; its response is dropped and the cell is untouched.
    pub async fn finish_authorization(
        &self,
        oauth: &OAuthCallback,
        auth: &AuthClient,
        cell: &CredentialCell,
    ) -> SsoState {
        {
            let mut exchanging = self.lock();
            let state = self.state();
            if state != SsoState::Authorizing || *exchanging {
                tracing::debug!(state = ?state, "ignoring stale SSO callback");
                return state;
            }
            *exchanging = true;
        }

        let result = self.exchange(oauth, auth).await;

        // The state check and the cell write share the lock with `cancel`.
        let mut exchanging = self.lock();
        *exchanging = false;
        if self.state() != SsoState::Authorizing {
            tracing::debug!("SSO exchange finished after cancel, discarding");
            return self.state();
        }
        let client_id = auth.client_id().to_owned();
        let applied = result.and_then(|(tokens, username)| {
            cell.try_apply(|a| {
                a.update_tokens(&tokens)?;
                a.set_username(Some(username.clone()));
                a.set_uses_sso(Some(true));
                a.set_idp_client_id(Some(client_id));
                Ok::<_, ApiError>(())
            })?;
            Ok(username)
        });
        match applied {
            Ok(username) => {
                tracing::info!(username = %username, "SSO login complete");
                self.set(SsoState::Authorized)
            }
            Err(e) => {
                tracing::warn!(err = %e, "SSO login failed");
                self.set(SsoState::Error(e.to_string()))
            }
        }
    }

    /// Trade the code for tokens and read the username from the id token.
    async fn exchange(
        &self,
        oauth: &OAuthCallback,
        auth: &AuthClient,
    ) -> Result<(TokenPayload, String), ApiError> {
        let code = oauth.code_or_error()?;
        let tokens = auth
            .get_token(TokenGrant::AuthCode { code, client_id: None, offline: self.offline })
            .await?;

        let id_token = tokens.id_token.as_deref().unwrap_or_default();
        let username = decode_claims(id_token)?
            .preferred_username
            .filter(|u| !u.is_empty())
            .ok_or_else(ApiError::unauthorized)?;
        Ok((tokens, username))
    }

    /// Abandon an in-progress authorization. Returns false when not authorizing.
    pub fn cancel(&self, reason: &str) -> bool {
        let _guard = self.lock();
        if self.state() != SsoState::Authorizing {
            return false;
        }
        self.set(SsoState::Error(reason.to_owned()));
        true
    }

    /// Mark authorized without a round trip when the cell already holds a
    /// valid session.
    pub fn set_authorized(&self, cell: &CredentialCell) -> bool {
        if !cell.snapshot().is_valid() {
            return false;
        }
        let _guard = self.lock();
        self.set(SsoState::Authorized);
        true
    }

    pub fn reset(&self) {
        let mut exchanging = self.lock();
        *exchanging = false;
        self.set(SsoState::Idle);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, bool> {
        self.exchanging.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
#[path = "sso_tests.rs"]
mod tests;
