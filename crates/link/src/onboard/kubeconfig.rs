// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kubeconfig documents for onboarded clusters and their files on disk.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cloud::model::Cluster;
use crate::credential::access::AuthAccess;
use crate::credential::persist::write_json_atomic;
use crate::error::ApiError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KubeConfig {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub clusters: Vec<NamedCluster>,
    pub contexts: Vec<NamedContext>,
    pub current_context: String,
    pub users: Vec<NamedUser>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: ClusterEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterEntry {
    pub certificate_authority_data: String,
    pub server: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub cluster: String,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    pub user: UserEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    #[serde(rename = "auth-provider")]
    pub auth_provider: AuthProvider,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthProvider {
    pub name: String,
    pub config: OidcConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OidcConfig {
    pub client_id: String,
    pub id_token: String,
    pub refresh_token: String,
    pub idp_certificate_authority_data: String,
    pub idp_issuer_url: String,
}

/// `{username}@{namespace}/{cluster}`; shared by the kubeconfig and the
/// registration record.
pub fn context_name(username: &str, cluster: &Cluster) -> String {
    format!("{username}@{}/{}", cluster.namespace, cluster.name)
}

impl KubeConfig {
    /// Build an OIDC kubeconfig for `cluster` from tokens issued to `client_id`.
    pub fn for_cluster(
        cluster: &Cluster,
        username: &str,
        access: &AuthAccess,
        client_id: &str,
    ) -> Result<Self, ApiError> {
        let missing = |field: &str| ApiError::validation(format!("cluster {} has no {field}", cluster.name));
        let server = cluster.server_url.clone().ok_or_else(|| missing("server URL"))?;
        let ca = cluster.api_certificate.clone().ok_or_else(|| missing("API certificate"))?;
        let issuer = cluster.idp_issuer_url.clone().ok_or_else(|| missing("IDP issuer URL"))?;
        let idp_ca = cluster.idp_certificate.clone().unwrap_or_default();
        let id_token = access.id_token().ok_or_else(ApiError::unauthorized)?;
        let refresh_token = access.refresh_token().ok_or_else(ApiError::unauthorized)?;

        let context = context_name(username, cluster);
        let user = format!("{username}@{}", cluster.name);
        Ok(Self {
            api_version: "v1".to_owned(),
            kind: "Config".to_owned(),
            clusters: vec![NamedCluster {
                name: cluster.name.clone(),
                cluster: ClusterEntry { certificate_authority_data: ca, server },
            }],
            contexts: vec![NamedContext {
                name: context.clone(),
                context: ContextEntry { cluster: cluster.name.clone(), user: user.clone() },
            }],
            current_context: context,
            users: vec![NamedUser {
                name: user,
                user: UserEntry {
                    auth_provider: AuthProvider {
                        name: "oidc".to_owned(),
                        config: OidcConfig {
                            client_id: client_id.to_owned(),
                            id_token: id_token.to_owned(),
                            refresh_token: refresh_token.to_owned(),
                            idp_certificate_authority_data: idp_ca,
                            idp_issuer_url: issuer,
                        },
                    },
                },
            }],
        })
    }
}

/// Context name of an arbitrary kubeconfig document: `current-context`, or
/// the only context when there is exactly one.
pub fn document_context(doc: &serde_json::Value) -> Result<String, ApiError> {
    if let Some(current) = doc.get("current-context").and_then(|v| v.as_str()).filter(|s| !s.is_empty()) {
        return Ok(current.to_owned());
    }
    let names: Vec<&str> = doc
        .get("contexts")
        .and_then(|v| v.as_array())
        .map(|list| list.iter().filter_map(|c| c.get("name").and_then(|n| n.as_str())).collect())
        .unwrap_or_default();
    match names.as_slice() {
        [only] => Ok((*only).to_owned()),
        [] => Err(ApiError::validation("kubeconfig has no contexts")),
        _ => Err(ApiError::validation("kubeconfig has several contexts and no current-context")),
    }
}

/// `{dir}/{cluster_id}.json`, with anything outside `[A-Za-z0-9._-]` replaced.
pub fn kubeconfig_path(dir: &Path, cluster_id: &str) -> PathBuf {
    let safe: String = cluster_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    dir.join(format!("{safe}.json"))
}

/// Write `doc` to the cluster's kubeconfig file, replacing any previous one.
pub async fn write_kubeconfig<T>(dir: &Path, cluster_id: &str, doc: &T) -> anyhow::Result<PathBuf>
where
    T: Serialize + ?Sized,
{
    let path = kubeconfig_path(dir, cluster_id);
    let value = serde_json::to_value(doc)?;
    let target = path.clone();
    tokio::task::spawn_blocking(move || write_json_atomic(&target, &value)).await??;
    tracing::debug!(path = %path.display(), "kubeconfig written");
    Ok(path)
}

#[cfg(test)]
#[path = "kubeconfig_tests.rs"]
mod tests;
