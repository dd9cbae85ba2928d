// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wires the credential, inventory, and onboarding services to deep-link
//! events. Events are handled one at a time in arrival order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cloud::config::CloudConfig;
use crate::cloud::inventory::{InventoryFetcher, InventoryProvider};
use crate::cloud::model::Cluster;
use crate::credential::access::CredentialCell;
use crate::credential::oauth::{AuthClient, TokenGrant};
use crate::credential::sso::{BrowserOpener, SsoAuthCoordinator, SsoState};
use crate::error::{ApiError, ErrorKind};
use crate::events::{AddClustersLink, EventBus, EventType, ExtensionEvent, OAuthCallback};
use crate::host::notify::{Notifier, NotifyLevel};
use crate::host::registry::ClusterRegistry;
use crate::onboard::{onboardable, OnboardOptions, OnboardState, OnboardingOrchestrator, ADD_CLUSTERS_STATE};

/// Host-side collaborators injected into [`App`].
pub struct Host {
    pub registry: Arc<dyn ClusterRegistry>,
    pub notifier: Arc<dyn Notifier>,
    pub browser: Arc<dyn BrowserOpener>,
}

#[derive(Debug, Clone)]
pub struct AppOptions {
    pub onboard: OnboardOptions,
    pub ignored_namespaces: Vec<String>,
    /// Cluster names to onboard. Empty selects every onboardable cluster.
    pub selection: Vec<String>,
}

pub struct App {
    pub cloud: CloudConfig,
    pub auth: AuthClient,
    pub cell: Arc<CredentialCell>,
    pub sso: SsoAuthCoordinator,
    pub inventory: InventoryProvider,
    pub onboard: OnboardingOrchestrator,
    notifier: Arc<dyn Notifier>,
    selection: Vec<String>,
}

impl App {
    pub fn new(
        http: reqwest::Client,
        cloud: CloudConfig,
        auth: AuthClient,
        cell: Arc<CredentialCell>,
        host: Host,
        options: AppOptions,
    ) -> Self {
        let offline = options.onboard.offline;
        Self {
            sso: SsoAuthCoordinator::new(Arc::clone(&host.browser), offline),
            inventory: InventoryProvider::new(InventoryFetcher::new(http, options.ignored_namespaces)),
            onboard: OnboardingOrchestrator::new(
                host.registry,
                Arc::clone(&host.notifier),
                host.browser,
                options.onboard,
            ),
            notifier: host.notifier,
            selection: options.selection,
            cloud,
            auth,
            cell,
        }
    }

    /// Establish a session for this instance.
    ///
    /// SSO instances reuse a valid stored session or go through the browser.
    /// Password instances reuse a stored session or use `credentials`.
    pub async fn login(&self, credentials: Option<(&str, &str)>) -> Result<(), ApiError> {
        if self.cloud.uses_sso() {
            return self.login_sso().await;
        }

        let access = self.cell.snapshot();
        if access.username().is_some()
            && access.uses_sso() == Some(false)
            && !access.is_refresh_token_expired()
        {
            tracing::info!("reusing stored session");
            return Ok(());
        }
        let Some((username, password)) = credentials else {
            return Err(ApiError::new(
                ErrorKind::Unauthorized,
                "no stored session; --username and --password are required",
            ));
        };
        let tokens = self.auth.get_token(TokenGrant::Password { username, password }).await?;
        let client_id = self.auth.client_id().to_owned();
        self.cell.try_apply(|a| {
            a.reset();
            a.update_tokens(&tokens)?;
            a.set_username(Some(username.to_owned()));
            a.set_uses_sso(Some(false));
            a.set_idp_client_id(Some(client_id));
            Ok::<_, ApiError>(())
        })?;
        tracing::info!(username, "password login complete");
        Ok(())
    }

    async fn login_sso(&self) -> Result<(), ApiError> {
        if self.sso.set_authorized(&self.cell) {
            tracing::info!("reusing stored SSO session");
            return Ok(());
        }
        if let SsoState::Error(message) = self.sso.start_authorization(&self.auth) {
            return Err(ApiError::transport(message));
        }
        match self.sso.settled().await {
            SsoState::Authorized => Ok(()),
            SsoState::Error(message) => Err(ApiError::new(ErrorKind::Unauthorized, message)),
            other => Err(ApiError::cancelled(format!("SSO login ended in state {other:?}"))),
        }
    }

    /// Load the inventory and keep the selected, onboardable clusters.
    pub async fn load_clusters(&self, only_namespaces: Option<&[String]>) -> Result<Vec<Cluster>, ApiError> {
        let inventory = self
            .inventory
            .load(&self.cloud, &self.auth, &self.cell, only_namespaces)
            .await
            .ok_or_else(|| ApiError::policy("an inventory load is already in progress"))??;
        let clusters = onboardable(inventory.clusters);
        for cluster in clusters.iter().filter(|c| !c.is_ready()) {
            tracing::warn!(cluster = %cluster.id, name = %cluster.name, "cluster is missing connection details");
        }
        if self.selection.is_empty() {
            return Ok(clusters);
        }
        for name in &self.selection {
            if !clusters.iter().any(|c| &c.name == name) {
                tracing::warn!(cluster = %name, "selected cluster not found");
            }
        }
        Ok(clusters.into_iter().filter(|c| self.selection.contains(&c.name)).collect())
    }

    /// Start onboarding, reporting errors raised before the run began.
    pub async fn add_clusters(&self, clusters: Vec<Cluster>) -> Result<OnboardState, ApiError> {
        let result = self.onboard.add_clusters(&self.cloud, &self.auth, &self.cell, clusters).await;
        if let Err(ref e) = result {
            self.notifier.notify(NotifyLevel::Error, &e.message);
        }
        result
    }

    /// Onboard one cluster per browser round trip until all are added.
    /// Stops at the first run that does not end in `Added`.
    pub async fn add_clusters_one_by_one(&self, clusters: Vec<Cluster>) -> Result<Vec<String>, ApiError> {
        let mut added = Vec::new();
        for cluster in clusters {
            self.add_clusters(vec![cluster]).await?;
            match self.onboard.settled().await {
                OnboardState::Added(names) => added.extend(names),
                OnboardState::Error(message) => return Err(ApiError::new(ErrorKind::Cancelled, message)),
                other => tracing::debug!(state = ?other, "onboarding ended"),
            }
        }
        Ok(added)
    }

    /// Route one deep-link event to its service.
    pub async fn handle(&self, event: ExtensionEvent) -> Result<(), ApiError> {
        tracing::debug!(event = %event.event_type(), "handling event");
        match event {
            ExtensionEvent::OauthCode(callback) => {
                self.on_oauth_code(&callback).await;
                Ok(())
            }
            ExtensionEvent::AddClusters(link) => self.on_add_clusters(link).await,
            ExtensionEvent::KubeConfig(link) => {
                self.check_instance(&link.cloud_url)?;
                self.onboard.add_kubeconfig(&link).await.map(|_| ())
            }
            ExtensionEvent::ActivateCluster(link) => {
                self.check_instance(&link.cloud_url)?;
                self.onboard.activate_cluster(&link)
            }
        }
    }

    async fn on_oauth_code(&self, callback: &OAuthCallback) {
        if callback.state.as_deref() == Some(ADD_CLUSTERS_STATE) {
            self.onboard.finish_add_clusters(callback, &self.auth).await;
        } else {
            self.sso.finish_authorization(callback, &self.auth, &self.cell).await;
        }
    }

    async fn on_add_clusters(&self, link: AddClustersLink) -> Result<(), ApiError> {
        self.check_instance(&link.cloud_url)?;
        let client_id = self.auth.client_id().to_owned();
        self.cell.try_apply(|a| {
            a.reset();
            a.update_tokens(&link.tokens)?;
            a.set_username(Some(link.username.clone()));
            a.set_uses_sso(Some(true));
            a.set_idp_client_id(Some(client_id));
            Ok::<_, ApiError>(())
        })?;
        if self.cloud.uses_sso() {
            self.sso.set_authorized(&self.cell);
        }
        let clusters = self.load_clusters(link.only_namespaces.as_deref()).await?;
        self.add_clusters(clusters).await.map(|_| ())
    }

    /// Links for another instance are reported and dropped.
    fn check_instance(&self, cloud_url: &str) -> Result<(), ApiError> {
        if cloud_url.trim().trim_end_matches('/') == self.cloud.cloud_url {
            return Ok(());
        }
        let message = format!("Link is for {cloud_url}, not {}", self.cloud.cloud_url);
        self.notifier.notify(NotifyLevel::Error, &message);
        Err(ApiError::validation(message))
    }
}

/// Forward every event type from `bus` to `app`, one event at a time.
pub fn spawn_event_loop(
    app: Arc<App>,
    bus: &EventBus,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    for event_type in
        [EventType::OauthCode, EventType::AddClusters, EventType::KubeConfig, EventType::ActivateCluster]
    {
        let tx = tx.clone();
        bus.add_handler(event_type, move |event| {
            let _ = tx.send(event);
        });
    }
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            let event_type = event.event_type();
            if let Err(e) = app.handle(event).await {
                tracing::warn!(event = %event_type, err = %e, kind = %e.kind, "event failed");
            }
        }
    })
}

#[cfg(test)]
#[path = "app_tests.rs"]
mod tests;
