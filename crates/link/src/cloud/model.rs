// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-only snapshots of instance objects, one per list item per fetch.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

const PROVIDER_LABEL: &str = "kaas.mirantis.com/provider";
const REGION_LABEL: &str = "kaas.mirantis.com/region";

// -- Wire shapes -------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Metadata {
    #[serde(default)]
    uid: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    creation_timestamp: Option<String>,
    #[serde(default)]
    deletion_timestamp: Option<String>,
    #[serde(default)]
    labels: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct Enabled {
    #[serde(default)]
    enabled: bool,
}

#[derive(Debug, Default, Deserialize)]
struct KaasSpec {
    #[serde(default)]
    management: Enabled,
    #[serde(default)]
    regional: Enabled,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderSpecValue {
    #[serde(default)]
    kaas: KaasSpec,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderSpec {
    #[serde(default)]
    value: ProviderSpecValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterSpec {
    #[serde(default)]
    provider_spec: ProviderSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Oidc {
    #[serde(default)]
    issuer_url: Option<String>,
    #[serde(default)]
    certificate: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderStatus {
    #[serde(default)]
    load_balancer_host: Option<String>,
    #[serde(default)]
    api_server_certificate: Option<String>,
    #[serde(default)]
    ucp_dashboard: Option<String>,
    #[serde(default)]
    oidc: Oidc,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterStatus {
    #[serde(default)]
    provider_status: ProviderStatus,
}

#[derive(Debug, Deserialize)]
struct RawCluster {
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    spec: ClusterSpec,
    #[serde(default)]
    status: ClusterStatus,
}

#[derive(Debug, Default, Deserialize)]
struct NamespaceStatus {
    #[serde(default)]
    phase: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawNamespace {
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    status: NamespaceStatus,
}

/// `{ "items": [...] }` list envelope.
#[derive(Debug, Deserialize)]
pub struct ItemList {
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
}

fn required(value: Option<String>, field: &str, kind: &str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::validation(format!("{kind} item is missing {field}")))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

// -- Snapshots ---------------------------------------------------------------

/// A cluster as reported by the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub created: Option<String>,
    pub deleting: bool,
    pub is_management_cluster: bool,
    /// `https://<load balancer host>:443`; `None` until the host is known.
    pub server_url: Option<String>,
    pub idp_issuer_url: Option<String>,
    pub idp_certificate: Option<String>,
    pub idp_client_id: Option<String>,
    pub api_certificate: Option<String>,
    pub ucp_dashboard_url: Option<String>,
    pub provider: Option<String>,
    pub region: Option<String>,
}

impl Cluster {
    pub fn from_item(item: serde_json::Value) -> Result<Self, ApiError> {
        let raw: RawCluster = serde_json::from_value(item)?;
        let meta = raw.metadata;
        let kaas = raw.spec.provider_spec.value.kaas;
        let status = raw.status.provider_status;

        let mut labels = meta.labels;
        Ok(Self {
            id: required(meta.uid, "metadata.uid", "cluster")?,
            name: required(meta.name, "metadata.name", "cluster")?,
            namespace: required(meta.namespace, "metadata.namespace", "cluster")?,
            created: meta.creation_timestamp,
            deleting: meta.deletion_timestamp.is_some(),
            is_management_cluster: kaas.management.enabled || kaas.regional.enabled,
            server_url: non_empty(status.load_balancer_host).map(|h| format!("https://{h}:443")),
            idp_issuer_url: non_empty(status.oidc.issuer_url),
            idp_certificate: non_empty(status.oidc.certificate),
            idp_client_id: non_empty(status.oidc.client_id),
            api_certificate: non_empty(status.api_server_certificate),
            ucp_dashboard_url: non_empty(status.ucp_dashboard),
            provider: labels.remove(PROVIDER_LABEL),
            region: labels.remove(REGION_LABEL),
        })
    }

    /// Everything a kubeconfig needs is known.
    pub fn is_ready(&self) -> bool {
        !self.deleting
            && self.server_url.is_some()
            && self.api_certificate.is_some()
            && self.idp_issuer_url.is_some()
            && self.idp_client_id.is_some()
    }
}

/// A namespace (project) on the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub id: String,
    pub name: String,
    pub phase: Option<String>,
    pub deleting: bool,
}

impl Namespace {
    pub fn from_item(item: serde_json::Value) -> Result<Self, ApiError> {
        let raw: RawNamespace = serde_json::from_value(item)?;
        let phase = raw.status.phase;
        let deleting =
            raw.metadata.deletion_timestamp.is_some() || phase.as_deref() == Some("Terminating");
        Ok(Self {
            id: required(raw.metadata.uid, "metadata.uid", "namespace")?,
            name: required(raw.metadata.name, "metadata.name", "namespace")?,
            phase,
            deleting,
        })
    }
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
