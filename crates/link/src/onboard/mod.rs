// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Turns selected remote clusters into registered local clusters.
//!
//! SSO instances issue cluster-scoped tokens through a browser round trip,
//! so only one new cluster can be added per authorization. Password
//! instances reuse the session tokens and add a whole batch at once.
//! Registration only happens after every kubeconfig in the batch is written.

pub mod kubeconfig;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::cloud::config::{AuthMode, CloudConfig};
use crate::cloud::model::Cluster;
use crate::credential::access::{AuthAccess, CredentialCell};
use crate::credential::jwt::decode_claims;
use crate::credential::oauth::{AuthClient, AuthUrlRequest, TokenGrant};
use crate::credential::sso::BrowserOpener;
use crate::error::ApiError;
use crate::events::{ActivateClusterLink, KubeConfigLink, OAuthCallback};
use crate::host::notify::{Notifier, NotifyLevel};
use crate::host::registry::{ClusterMetadata, ClusterModel, ClusterRegistry, Group, RegisteredCluster};
use crate::settle::{first_error, settle_all};

use self::kubeconfig::{document_context, write_kubeconfig, KubeConfig};

/// `state` parameter marking a cluster-scoped authorization round trip.
pub const ADD_CLUSTERS_STATE: &str = "add-clusters";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnboardState {
    Idle,
    Loading,
    /// Browser opened; waiting for the `add-clusters` callback.
    Waiting,
    /// Names of the clusters added by the last run.
    Added(Vec<String>),
    Error(String),
}

#[derive(Debug, Clone)]
pub struct OnboardOptions {
    pub kubeconfig_dir: PathBuf,
    /// Request `offline_access` for cluster tokens.
    pub offline: bool,
    /// Put clusters in one group per source namespace.
    pub use_groups: bool,
}

/// Clusters worth offering: not being deleted and not management clusters.
pub fn onboardable(clusters: Vec<Cluster>) -> Vec<Cluster> {
    clusters.into_iter().filter(|c| !c.deleting && !c.is_management_cluster).collect()
}

/// Cluster waiting on the browser round trip.
#[derive(Debug, Clone)]
struct PendingAdd {
    cloud_url: String,
    cluster: Cluster,
    username: Option<String>,
}

#[derive(Debug)]
struct Inner {
    state: OnboardState,
    loading: bool,
    pending: Option<PendingAdd>,
    /// A callback's code exchange is in flight.
    exchanging: bool,
    /// Bumped by `cancel` and `reset`; exchanges started under an older
    /// run drop their result.
    run: u64,
    new_groups: Vec<Group>,
}

/// A kubeconfig on disk that is ready to register.
struct Written {
    cluster: Cluster,
    path: PathBuf,
    context: String,
}

pub struct OnboardingOrchestrator {
    registry: Arc<dyn ClusterRegistry>,
    notifier: Arc<dyn Notifier>,
    browser: Arc<dyn BrowserOpener>,
    options: OnboardOptions,
    inner: Mutex<Inner>,
    /// Mirrors `Inner::state` for waiters.
    states: watch::Sender<OnboardState>,
}

impl OnboardingOrchestrator {
    pub fn new(
        registry: Arc<dyn ClusterRegistry>,
        notifier: Arc<dyn Notifier>,
        browser: Arc<dyn BrowserOpener>,
        options: OnboardOptions,
    ) -> Self {
        Self {
            registry,
            notifier,
            browser,
            options,
            inner: Mutex::new(Inner {
                state: OnboardState::Idle,
                loading: false,
                pending: None,
                exchanging: false,
                run: 0,
                new_groups: Vec::new(),
            }),
            states: watch::channel(OnboardState::Idle).0,
        }
    }

    /// Wait until no run is loading or waiting on the browser.
    pub async fn settled(&self) -> OnboardState {
        let mut rx = self.states.subscribe();
        let done = |s: &OnboardState| !matches!(s, OnboardState::Loading | OnboardState::Waiting);
        let state = match rx.wait_for(done).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        state
    }

    fn publish(&self, inner: &mut Inner, state: OnboardState) -> OnboardState {
        inner.state = state.clone();
        self.states.send_replace(state.clone());
        state
    }

    pub fn state(&self) -> OnboardState {
        self.lock().state.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.lock().loading
    }

    /// Groups created since the last call, so the UI can switch to them.
    pub fn take_new_groups(&self) -> Vec<Group> {
        std::mem::take(&mut self.lock().new_groups)
    }

    /// Split into (new, already registered) by cluster id.
    pub fn classify(&self, clusters: Vec<Cluster>) -> Result<(Vec<Cluster>, Vec<Cluster>), ApiError> {
        let registered = self.registered_ids()?;
        Ok(clusters.into_iter().partition(|c| !registered.contains(&c.id)))
    }

    /// Start onboarding `clusters`.
    ///
    /// Policy violations (basic auth, several new clusters under SSO) fail
    /// before any network call. Returns the current state unchanged when a
    /// run is already in progress.
    pub async fn add_clusters(
        &self,
        config: &CloudConfig,
        auth: &AuthClient,
        cell: &CredentialCell,
        clusters: Vec<Cluster>,
    ) -> Result<OnboardState, ApiError> {
        if config.auth_mode == AuthMode::Basic {
            return Err(ApiError::policy("instance uses basic auth, which is not supported"));
        }
        let (new, existing) = self.classify(clusters)?;
        if config.uses_sso() && new.len() > 1 {
            return Err(ApiError::policy(format!(
                "only one cluster can be added per SSO authorization ({} selected)",
                new.len()
            )));
        }
        if !self.begin() {
            tracing::debug!("onboarding already in progress");
            return Ok(self.state());
        }

        if !existing.is_empty() {
            self.notify_skipped(&existing);
        }
        let Some(first) = new.first().cloned() else {
            return Ok(self.finish(OnboardState::Added(Vec::new())));
        };

        if config.uses_sso() {
            return Ok(self.authorize_cluster(config, auth, cell, first));
        }

        let result = self.add_batch(config, auth, cell, new).await;
        Ok(self.settle(result))
    }

    /// Open the browser for a cluster-scoped authorization and wait.
    fn authorize_cluster(
        &self,
        config: &CloudConfig,
        auth: &AuthClient,
        cell: &CredentialCell,
        cluster: Cluster,
    ) -> OnboardState {
        let Some(client_id) = cluster.idp_client_id.clone() else {
            return self.settle(Err(ApiError::validation(format!(
                "cluster {} has no IDP client id",
                cluster.name
            ))));
        };
        let url = auth.sso_auth_url(AuthUrlRequest {
            state: ADD_CLUSTERS_STATE,
            client_id: Some(&client_id),
            offline: self.options.offline,
        });
        if let Err(e) = self.browser.open(&url) {
            return self.settle(Err(ApiError::transport(format!("failed to open browser: {e}"))));
        }

        tracing::info!(cluster = %cluster.id, "waiting for cluster authorization");
        let mut inner = self.lock();
        inner.pending = Some(PendingAdd {
            cloud_url: config.cloud_url.clone(),
            cluster,
            username: cell.snapshot().username().map(str::to_owned),
        });
        self.publish(&mut inner, OnboardState::Waiting)
    }

    /// Complete a cluster authorization with the browser callback.
    /// Ignored unless waiting.
    ///
    /// `cancel` or `reset` during the code exchange does not abort it; the
    /// late result is dropped and nothing is registered.
    pub async fn finish_add_clusters(&self, oauth: &OAuthCallback, auth: &AuthClient) -> OnboardState {
        let (pending, run) = {
            let mut inner = self.lock();
            if inner.state != OnboardState::Waiting {
                tracing::debug!(state = ?inner.state, "ignoring stale cluster callback");
                return inner.state.clone();
            }
            let Some(pending) = inner.pending.take() else {
                return inner.state.clone();
            };
            inner.exchanging = true;
            self.publish(&mut inner, OnboardState::Loading);
            (pending, inner.run)
        };
        let cloud_url = pending.cloud_url.clone();
        let written = self.exchange_and_write(oauth, auth, pending).await;

        if !self.commit(run) {
            tracing::debug!("cluster authorization finished after cancel, discarding");
            if let Ok(w) = written {
                if let Err(e) = tokio::fs::remove_file(&w.path).await {
                    tracing::warn!(path = %w.path.display(), err = %e, "failed to remove discarded kubeconfig");
                }
            }
            return self.state();
        }
        let result = written.and_then(|w| self.register_all(&cloud_url, vec![w]));
        self.settle(result)
    }

    /// Claim the result of an exchange started under `run`. False when the
    /// run was cancelled or reset in the meantime.
    fn commit(&self, run: u64) -> bool {
        let mut inner = self.lock();
        if inner.run != run {
            return false;
        }
        inner.exchanging = false;
        true
    }

    async fn exchange_and_write(
        &self,
        oauth: &OAuthCallback,
        auth: &AuthClient,
        pending: PendingAdd,
    ) -> Result<Written, ApiError> {
        let code = oauth.code_or_error()?;
        let client_id = pending.cluster.idp_client_id.clone().unwrap_or_default();
        let tokens = auth
            .get_token(TokenGrant::AuthCode {
                code,
                client_id: Some(&client_id),
                offline: self.options.offline,
            })
            .await?;
        let mut access = AuthAccess::from_tokens(&tokens)?;
        access.set_idp_client_id(Some(client_id.clone()));

        let claims = access.id_token().map(decode_claims).transpose()?;
        let username = claims
            .and_then(|c| c.preferred_username)
            .filter(|u| !u.is_empty())
            .or(pending.username)
            .ok_or_else(ApiError::unauthorized)?;

        self.write_one(&pending.cluster, &username, &access, &client_id).await
    }

    /// Non-SSO path: every cluster gets a kubeconfig built from the session.
    async fn add_batch(
        &self,
        config: &CloudConfig,
        auth: &AuthClient,
        cell: &CredentialCell,
        clusters: Vec<Cluster>,
    ) -> Result<Vec<RegisteredCluster>, ApiError> {
        auth.ensure_fresh(cell).await?;
        let access = cell.snapshot();
        let username = access.username().map(str::to_owned).ok_or_else(ApiError::unauthorized)?;
        let client_id = access.idp_client_id().unwrap_or(auth.client_id()).to_owned();

        let results = settle_all(
            clusters.iter().map(|cluster| self.write_one(cluster, &username, &access, &client_id)),
        )
        .await;
        let written_paths: Vec<PathBuf> =
            results.iter().filter_map(|r| r.as_ref().ok().map(|w| w.path.clone())).collect();
        let written = match first_error(results) {
            Ok(written) => written,
            Err(e) => {
                for path in &written_paths {
                    tracing::warn!(path = %path.display(), "kubeconfig left behind by failed batch");
                }
                return Err(e);
            }
        };
        self.register_all(&config.cloud_url, written)
    }

    async fn write_one(
        &self,
        cluster: &Cluster,
        username: &str,
        access: &AuthAccess,
        client_id: &str,
    ) -> Result<Written, ApiError> {
        let doc = KubeConfig::for_cluster(cluster, username, access, client_id)?;
        let path = write_kubeconfig(&self.options.kubeconfig_dir, &cluster.id, &doc)
            .await
            .map_err(|e| ApiError::storage(&e))?;
        Ok(Written { cluster: cluster.clone(), path, context: doc.current_context })
    }

    /// Register written kubeconfigs, creating groups as needed. Clusters
    /// registered concurrently by another path are skipped.
    ///
    /// Groups are resolved before the first registration. If a registration
    /// fails, the clusters this call already registered are removed again.
    fn register_all(
        &self,
        cloud_url: &str,
        written: Vec<Written>,
    ) -> Result<Vec<RegisteredCluster>, ApiError> {
        let already = self.registered_ids()?;
        let mut prepared = Vec::with_capacity(written.len());
        for w in written {
            if already.contains(&w.cluster.id) {
                tracing::info!(cluster = %w.cluster.id, "already registered, skipping");
                continue;
            }
            let group = self.group_for(&w.cluster.namespace)?;
            let model = ClusterModel {
                kube_config_path: w.path,
                id: w.cluster.id.clone(),
                context_name: w.context,
                group,
            };
            let metadata = ClusterMetadata {
                cloud_url: cloud_url.to_owned(),
                namespace: w.cluster.namespace,
                cluster_id: w.cluster.id,
                cluster_name: w.cluster.name,
            };
            prepared.push((model, metadata));
        }

        let mut registered: Vec<RegisteredCluster> = Vec::with_capacity(prepared.len());
        for (model, metadata) in prepared {
            match self.registry.register_cluster(model, metadata) {
                Ok(record) => {
                    tracing::info!(cluster = %record.model.id, context = %record.model.context_name, "cluster registered");
                    registered.push(record);
                }
                Err(e) => {
                    let mut err = ApiError::storage(&e);
                    let stuck = self.roll_back(&registered);
                    if !stuck.is_empty() {
                        err.message = format!("{}; still registered: {}", err.message, stuck.join(", "));
                    }
                    return Err(err);
                }
            }
        }
        Ok(registered)
    }

    /// Undo registrations from a failed batch. Returns the names that could
    /// not be removed.
    fn roll_back(&self, registered: &[RegisteredCluster]) -> Vec<String> {
        let mut stuck = Vec::new();
        for record in registered.iter().rev() {
            match self.registry.unregister_cluster(&record.model.id) {
                Ok(()) => tracing::info!(cluster = %record.model.id, "registration rolled back"),
                Err(e) => {
                    tracing::warn!(cluster = %record.model.id, err = %e, "failed to roll back registration");
                    stuck.push(record.metadata.cluster_name.clone());
                }
            }
        }
        stuck
    }

    /// Group id for `namespace`, creating the group on first use.
    fn group_for(&self, namespace: &str) -> Result<Option<String>, ApiError> {
        if !self.options.use_groups {
            return Ok(None);
        }
        let groups = self.registry.groups().map_err(|e| ApiError::storage(&e))?;
        if let Some(existing) = groups.into_iter().find(|g| g.name == namespace) {
            return Ok(Some(existing.id));
        }
        let group = self.registry.create_group(namespace).map_err(|e| ApiError::storage(&e))?;
        tracing::info!(group = %group.id, namespace, "group created");
        let id = group.id.clone();
        self.lock().new_groups.push(group);
        Ok(Some(id))
    }

    /// Write and register a kubeconfig delivered by a deep link.
    pub async fn add_kubeconfig(&self, link: &KubeConfigLink) -> Result<OnboardState, ApiError> {
        let context = document_context(&link.kube_config)?;
        if self.registered_ids()?.contains(&link.cluster_id) {
            self.notifier.notify(
                NotifyLevel::Info,
                &format!("Cluster {} was already added, skipped", link.cluster_name),
            );
            return Ok(self.state());
        }
        if !self.begin() {
            return Ok(self.state());
        }

        let result: Result<Vec<RegisteredCluster>, ApiError> = async {
            let path = write_kubeconfig(&self.options.kubeconfig_dir, &link.cluster_id, &link.kube_config)
                .await
                .map_err(|e| ApiError::storage(&e))?;
            let cluster = Cluster {
                id: link.cluster_id.clone(),
                name: link.cluster_name.clone(),
                namespace: link.namespace.clone(),
                created: None,
                deleting: false,
                is_management_cluster: false,
                server_url: None,
                idp_issuer_url: None,
                idp_certificate: None,
                idp_client_id: None,
                api_certificate: None,
                ucp_dashboard_url: None,
                provider: None,
                region: None,
            };
            self.register_all(&link.cloud_url, vec![Written { cluster, path, context }])
        }
        .await;
        Ok(self.settle(result))
    }

    /// Make a registered cluster (and its group) active.
    pub fn activate_cluster(&self, link: &ActivateClusterLink) -> Result<(), ApiError> {
        let clusters = self.registry.list_registered_clusters().map_err(|e| ApiError::storage(&e))?;
        let Some(found) = clusters.into_iter().find(|c| c.model.id == link.cluster_id) else {
            let message = format!("Cluster {} has not been added yet", link.cluster_name);
            self.notifier.notify(NotifyLevel::Error, &message);
            return Err(ApiError::validation(message));
        };
        if let Some(ref group) = found.model.group {
            self.registry.set_active_group(group).map_err(|e| ApiError::storage(&e))?;
        }
        self.registry.set_active_cluster(&found.model.id).map_err(|e| ApiError::storage(&e))?;
        tracing::info!(cluster = %found.model.id, "cluster activated");
        Ok(())
    }

    /// Abandon a pending cluster authorization, including one whose code
    /// exchange is in flight. Returns false when there is nothing to cancel.
    pub fn cancel(&self, reason: &str) -> bool {
        let mut inner = self.lock();
        if inner.state != OnboardState::Waiting && !inner.exchanging {
            return false;
        }
        inner.run += 1;
        inner.exchanging = false;
        inner.pending = None;
        inner.loading = false;
        self.publish(&mut inner, OnboardState::Error(reason.to_owned()));
        drop(inner);
        self.notifier.notify(NotifyLevel::Info, reason);
        true
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.run += 1;
        inner.exchanging = false;
        inner.loading = false;
        inner.pending = None;
        self.publish(&mut inner, OnboardState::Idle);
    }

    fn registered_ids(&self) -> Result<HashSet<String>, ApiError> {
        let clusters = self.registry.list_registered_clusters().map_err(|e| ApiError::storage(&e))?;
        Ok(clusters.into_iter().map(|c| c.model.id).collect())
    }

    fn notify_skipped(&self, existing: &[Cluster]) {
        let names: Vec<&str> = existing.iter().map(|c| c.name.as_str()).collect();
        self.notifier.notify(
            NotifyLevel::Info,
            &format!("Skipped clusters that were already added: {}", names.join(", ")),
        );
    }

    /// Take the loading guard. False if a run is already active.
    fn begin(&self) -> bool {
        let mut inner = self.lock();
        if inner.loading {
            return false;
        }
        inner.loading = true;
        inner.pending = None;
        self.publish(&mut inner, OnboardState::Loading);
        true
    }

    /// Release the guard and move to a terminal state.
    fn finish(&self, state: OnboardState) -> OnboardState {
        let mut inner = self.lock();
        inner.loading = false;
        self.publish(&mut inner, state)
    }

    /// Report a run's outcome and release the guard.
    fn settle(&self, result: Result<Vec<RegisteredCluster>, ApiError>) -> OnboardState {
        match result {
            Ok(registered) => {
                let names: Vec<String> = registered.iter().map(|r| r.metadata.cluster_name.clone()).collect();
                if !names.is_empty() {
                    self.notifier.notify(NotifyLevel::Ok, &format!("Added clusters: {}", names.join(", ")));
                }
                self.finish(OnboardState::Added(names))
            }
            Err(e) => {
                tracing::warn!(err = %e, kind = %e.kind, "onboarding failed");
                self.notifier.notify(NotifyLevel::Error, &e.message);
                self.finish(OnboardState::Error(e.message))
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
#[path = "onboard_tests.rs"]
mod tests;
