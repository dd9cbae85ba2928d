// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn model(id: &str, group: Option<&str>) -> ClusterModel {
    ClusterModel {
        kube_config_path: PathBuf::from(format!("/tmp/{id}.json")),
        id: id.to_owned(),
        context_name: format!("alice@ns/{id}"),
        group: group.map(String::from),
    }
}

fn meta(id: &str) -> ClusterMetadata {
    ClusterMetadata {
        cloud_url: "https://kaas.example.com".into(),
        namespace: "ns".into(),
        cluster_id: id.into(),
        cluster_name: format!("name-{id}"),
    }
}

#[test]
fn register_and_list() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let registry = FileRegistry::new(dir.path().join("registry.json"));
    assert!(registry.list_registered_clusters()?.is_empty());

    registry.register_cluster(model("u1", None), meta("u1"))?;
    let listed = registry.list_registered_clusters()?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].model, model("u1", None));
    assert_eq!(listed[0].metadata.cluster_name, "name-u1");

    // A second handle on the same file sees the same data.
    let reopened = FileRegistry::new(registry.path());
    assert_eq!(reopened.data()?, registry.data()?);
    Ok(())
}

#[test]
fn duplicate_id_is_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let registry = FileRegistry::new(dir.path().join("registry.json"));
    registry.register_cluster(model("u1", None), meta("u1"))?;
    assert!(registry.register_cluster(model("u1", None), meta("u1")).is_err());
    assert_eq!(registry.list_registered_clusters()?.len(), 1);
    Ok(())
}

#[test]
fn create_group_reuses_name() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let registry = FileRegistry::new(dir.path().join("registry.json"));
    let a = registry.create_group("team-a")?;
    let b = registry.create_group("team-b")?;
    assert_ne!(a.id, b.id);
    assert_eq!(registry.create_group("team-a")?, a);
    assert_eq!(registry.groups()?.len(), 2);
    assert!(registry.create_group("  ").is_err());
    Ok(())
}

#[test]
fn register_into_unknown_group_fails() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let registry = FileRegistry::new(dir.path().join("registry.json"));
    assert!(registry.register_cluster(model("u1", Some("group-9")), meta("u1")).is_err());

    let group = registry.create_group("ns")?;
    registry.register_cluster(model("u1", Some(&group.id)), meta("u1"))?;
    Ok(())
}

#[test]
fn activation_requires_known_ids() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let registry = FileRegistry::new(dir.path().join("registry.json"));
    assert!(registry.set_active_cluster("u1").is_err());
    assert!(registry.set_active_group("group-1").is_err());

    let group = registry.create_group("ns")?;
    registry.register_cluster(model("u1", Some(&group.id)), meta("u1"))?;
    registry.set_active_group(&group.id)?;
    registry.set_active_cluster("u1")?;

    let data = registry.data()?;
    assert_eq!(data.active_group.as_deref(), Some(group.id.as_str()));
    assert_eq!(data.active_cluster.as_deref(), Some("u1"));
    Ok(())
}

#[test]
fn wire_shape_is_camel_case() -> anyhow::Result<()> {
    let value = serde_json::to_value(RegisteredCluster { model: model("u1", None), metadata: meta("u1") })?;
    assert_eq!(value["kubeConfigPath"], "/tmp/u1.json");
    assert_eq!(value["contextName"], "alice@ns/u1");
    assert_eq!(value["metadata"]["cloudUrl"], "https://kaas.example.com");
    assert!(value.get("group").is_none());
    Ok(())
}

#[test]
fn unregister_removes_cluster_and_active_selection() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let registry = FileRegistry::new(dir.path().join("registry.json"));
    registry.register_cluster(model("u1", None), meta("u1"))?;
    registry.register_cluster(model("u2", None), meta("u2"))?;
    registry.set_active_cluster("u1")?;

    registry.unregister_cluster("u1")?;
    let data = registry.data()?;
    assert_eq!(data.clusters.len(), 1);
    assert_eq!(data.clusters[0].model.id, "u2");
    assert_eq!(data.active_cluster, None);
    assert!(registry.unregister_cluster("u1").is_err());
    Ok(())
}
