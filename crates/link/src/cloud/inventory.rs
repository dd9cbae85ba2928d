// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Namespace and cluster retrieval.
//!
//! The instance API has no cross-namespace cluster listing, so clusters are
//! fetched with one request per namespace, all in flight at once.

use std::sync::Mutex;

use crate::cloud::config::CloudConfig;
use crate::cloud::model::{Cluster, ItemList, Namespace};
use crate::credential::access::{AuthAccess, CredentialCell};
use crate::credential::jwt::decode_claims;
use crate::credential::oauth::AuthClient;
use crate::error::ApiError;
use crate::settle::{first_error, settle_all};

/// Namespaces hidden from users regardless of their roles.
pub const DEFAULT_IGNORED_NAMESPACES: &[&str] =
    &["default", "kube-node-lease", "kube-public", "kube-system", "lcm-system", "system"];

/// Authenticated list calls against the instance API.
#[derive(Debug, Clone)]
pub struct InventoryFetcher {
    http: reqwest::Client,
    ignored_namespaces: Vec<String>,
}

impl InventoryFetcher {
    pub fn new(http: reqwest::Client, ignored_namespaces: Vec<String>) -> Self {
        Self { http, ignored_namespaces }
    }

    /// List namespaces the caller's role claims grant reader or writer on.
    pub async fn fetch_namespaces(
        &self,
        config: &CloudConfig,
        access: &AuthAccess,
    ) -> Result<Vec<Namespace>, ApiError> {
        let token = bearer(access)?;
        let claims = decode_claims(token)?;
        let url = format!("{}/api/v1/namespaces", config.cloud_url);
        let items = self.get_items(&url, token).await?;

        let mut namespaces = Vec::with_capacity(items.len());
        for item in items {
            let ns = Namespace::from_item(item)?;
            if self.ignored_namespaces.iter().any(|n| *n == ns.name) {
                continue;
            }
            if !claims.can_read_namespace(&ns.name) {
                tracing::debug!(namespace = %ns.name, "no reader/writer role, skipping");
                continue;
            }
            namespaces.push(ns);
        }
        Ok(namespaces)
    }

    /// List clusters in each namespace concurrently.
    ///
    /// Every request runs to completion. The first failure in `namespaces`
    /// order is returned; otherwise results are concatenated in that order.
    pub async fn fetch_clusters(
        &self,
        config: &CloudConfig,
        access: &AuthAccess,
        namespaces: &[String],
    ) -> Result<Vec<Cluster>, ApiError> {
        let token = bearer(access)?;
        let results = settle_all(
            namespaces.iter().map(|ns| self.fetch_namespace_clusters(config, token, ns)),
        )
        .await;
        Ok(first_error(results)?.into_iter().flatten().collect())
    }

    async fn fetch_namespace_clusters(
        &self,
        config: &CloudConfig,
        token: &str,
        namespace: &str,
    ) -> Result<Vec<Cluster>, ApiError> {
        let url = format!(
            "{}/apis/cluster.k8s.io/v1alpha1/namespaces/{namespace}/clusters",
            config.cloud_url
        );
        let result = match self.get_items(&url, token).await {
            Ok(items) => items.into_iter().map(Cluster::from_item).collect(),
            Err(e) => Err(e),
        };
        if let Err(ref e) = result {
            tracing::debug!(namespace, err = %e, "cluster list failed");
        }
        result
    }

    async fn get_items(&self, url: &str, token: &str) -> Result<Vec<serde_json::Value>, ApiError> {
        let resp = self.http.get(url).bearer_auth(token).send().await?;
        let status = resp.status().as_u16();
        if status == 401 {
            return Err(ApiError::unauthorized());
        }
        if !(200..300).contains(&status) {
            return Err(ApiError::transport(format!("GET {url} failed ({status})")));
        }
        let bytes = resp.bytes().await?;
        let list: ItemList = serde_json::from_slice(&bytes)?;
        Ok(list.items)
    }
}

fn bearer(access: &AuthAccess) -> Result<&str, ApiError> {
    access.id_token().ok_or_else(ApiError::unauthorized)
}

// -- Provider ----------------------------------------------------------------

/// Result set of one inventory load. Replaced wholesale on every reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    pub namespaces: Vec<Namespace>,
    pub clusters: Vec<Cluster>,
}

#[derive(Debug, Default)]
struct ProviderState {
    loading: bool,
    inventory: Option<Inventory>,
}

/// Stateful wrapper that allows one load at a time and keeps the last result.
pub struct InventoryProvider {
    fetcher: InventoryFetcher,
    state: Mutex<ProviderState>,
}

impl InventoryProvider {
    pub fn new(fetcher: InventoryFetcher) -> Self {
        Self { fetcher, state: Mutex::new(ProviderState::default()) }
    }

    pub fn is_loading(&self) -> bool {
        self.lock().loading
    }

    pub fn inventory(&self) -> Option<Inventory> {
        self.lock().inventory.clone()
    }

    /// Refresh tokens if needed, then fetch namespaces and their clusters.
    ///
    /// `only_namespaces` restricts the result to the named namespaces.
    /// Returns `None` without doing anything if a load is already running.
    pub async fn load(
        &self,
        config: &CloudConfig,
        auth: &AuthClient,
        cell: &CredentialCell,
        only_namespaces: Option<&[String]>,
    ) -> Option<Result<Inventory, ApiError>> {
        {
            let mut state = self.lock();
            if state.loading {
                tracing::debug!("inventory load already in flight");
                return None;
            }
            state.loading = true;
            state.inventory = None;
        }

        let result = self.load_inner(config, auth, cell, only_namespaces).await;

        let mut state = self.lock();
        state.loading = false;
        if let Ok(inv) = &result {
            state.inventory = Some(inv.clone());
        }
        Some(result)
    }

    async fn load_inner(
        &self,
        config: &CloudConfig,
        auth: &AuthClient,
        cell: &CredentialCell,
        only_namespaces: Option<&[String]>,
    ) -> Result<Inventory, ApiError> {
        auth.ensure_fresh(cell).await?;
        let access = cell.snapshot();

        let mut namespaces = self.fetcher.fetch_namespaces(config, &access).await?;
        if let Some(only) = only_namespaces {
            namespaces.retain(|ns| only.contains(&ns.name));
        }
        let names: Vec<String> = namespaces.iter().map(|ns| ns.name.clone()).collect();
        let clusters = self.fetcher.fetch_clusters(config, &access, &names).await?;
        tracing::info!(namespaces = names.len(), clusters = clusters.len(), "inventory loaded");
        Ok(Inventory { namespaces, clusters })
    }

    /// Drop the cached result set.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.inventory = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
#[path = "inventory_tests.rs"]
mod tests;
