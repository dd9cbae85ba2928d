// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local cluster registry: onboarded clusters, workspace groups, and the
//! active selection.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::credential::persist::write_json_atomic;

/// Registration record for one onboarded cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterModel {
    pub kube_config_path: PathBuf,
    /// Remote cluster id.
    pub id: String,
    /// Context name inside the kubeconfig at `kube_config_path`.
    pub context_name: String,
    /// Group id, when grouping is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Lookup data attached to a registered cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMetadata {
    pub cloud_url: String,
    pub namespace: String,
    pub cluster_id: String,
    pub cluster_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredCluster {
    #[serde(flatten)]
    pub model: ClusterModel,
    pub metadata: ClusterMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
}

/// Host-side storage for registered clusters and groups.
pub trait ClusterRegistry: Send + Sync {
    /// Register a cluster. Fails if its id is already registered.
    fn register_cluster(
        &self,
        model: ClusterModel,
        metadata: ClusterMetadata,
    ) -> anyhow::Result<RegisteredCluster>;

    /// Remove a registration. Used to roll back a partially registered batch.
    fn unregister_cluster(&self, id: &str) -> anyhow::Result<()>;

    fn list_registered_clusters(&self) -> anyhow::Result<Vec<RegisteredCluster>>;

    /// Create a group, or return the existing one with the same name.
    fn create_group(&self, name: &str) -> anyhow::Result<Group>;

    fn groups(&self) -> anyhow::Result<Vec<Group>>;

    fn set_active_group(&self, id: &str) -> anyhow::Result<()>;

    fn set_active_cluster(&self, id: &str) -> anyhow::Result<()>;
}

/// On-disk shape of [`FileRegistry`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryData {
    #[serde(default)]
    pub clusters: Vec<RegisteredCluster>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_cluster: Option<String>,
}

/// JSON file registry. Every mutation is a locked read-modify-write with an
/// atomic replace.
#[derive(Debug)]
pub struct FileRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents. A missing file reads as empty.
    pub fn data(&self) -> anyhow::Result<RegistryData> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        self.read()
    }

    fn read(&self) -> anyhow::Result<RegistryData> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RegistryData::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut RegistryData) -> anyhow::Result<R>) -> anyhow::Result<R> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut data = self.read()?;
        let out = f(&mut data)?;
        write_json_atomic(&self.path, &data)?;
        Ok(out)
    }
}

impl ClusterRegistry for FileRegistry {
    fn register_cluster(
        &self,
        model: ClusterModel,
        metadata: ClusterMetadata,
    ) -> anyhow::Result<RegisteredCluster> {
        self.update(|data| {
            if data.clusters.iter().any(|c| c.model.id == model.id) {
                anyhow::bail!("cluster {} is already registered", model.id);
            }
            if let Some(ref group) = model.group {
                if !data.groups.iter().any(|g| g.id == *group) {
                    anyhow::bail!("unknown group {group}");
                }
            }
            let registered = RegisteredCluster { model, metadata };
            data.clusters.push(registered.clone());
            Ok(registered)
        })
    }

    fn unregister_cluster(&self, id: &str) -> anyhow::Result<()> {
        self.update(|data| {
            let before = data.clusters.len();
            data.clusters.retain(|c| c.model.id != id);
            if data.clusters.len() == before {
                anyhow::bail!("cluster {id} is not registered");
            }
            if data.active_cluster.as_deref() == Some(id) {
                data.active_cluster = None;
            }
            Ok(())
        })
    }

    fn list_registered_clusters(&self) -> anyhow::Result<Vec<RegisteredCluster>> {
        Ok(self.data()?.clusters)
    }

    fn create_group(&self, name: &str) -> anyhow::Result<Group> {
        if name.trim().is_empty() {
            anyhow::bail!("group name is empty");
        }
        self.update(|data| {
            if let Some(existing) = data.groups.iter().find(|g| g.name == name) {
                return Ok(existing.clone());
            }
            let group = Group { id: format!("group-{}", data.groups.len() + 1), name: name.to_owned() };
            data.groups.push(group.clone());
            Ok(group)
        })
    }

    fn groups(&self) -> anyhow::Result<Vec<Group>> {
        Ok(self.data()?.groups)
    }

    fn set_active_group(&self, id: &str) -> anyhow::Result<()> {
        self.update(|data| {
            if !data.groups.iter().any(|g| g.id == id) {
                anyhow::bail!("unknown group {id}");
            }
            data.active_group = Some(id.to_owned());
            Ok(())
        })
    }

    fn set_active_cluster(&self, id: &str) -> anyhow::Result<()> {
        self.update(|data| {
            if !data.clusters.iter().any(|c| c.model.id == id) {
                anyhow::bail!("cluster {id} is not registered");
            }
            data.active_cluster = Some(id.to_owned());
            Ok(())
        })
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
