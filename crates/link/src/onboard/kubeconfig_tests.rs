// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::credential::access::TokenPayload;
use crate::test_support::cluster_item;

fn cluster() -> anyhow::Result<Cluster> {
    Ok(Cluster::from_item(cluster_item("team-a", "prod", "uid-1", "k8s-prod"))?)
}

fn tokens() -> anyhow::Result<AuthAccess> {
    Ok(AuthAccess::from_tokens(&TokenPayload {
        id_token: Some("id.tok.en".into()),
        expires_in: Some(300),
        refresh_token: Some("refresh".into()),
        refresh_expires_in: Some(1800),
        ..Default::default()
    })?)
}

#[test]
fn document_wire_shape() -> anyhow::Result<()> {
    let doc = KubeConfig::for_cluster(&cluster()?, "alice", &tokens()?, "k8s-prod")?;
    let v = serde_json::to_value(&doc)?;
    assert_eq!(v["apiVersion"], "v1");
    assert_eq!(v["current-context"], "alice@team-a/prod");
    assert_eq!(v["clusters"][0]["cluster"]["server"], "https://prod.lb.example.com:443");
    assert_eq!(v["clusters"][0]["cluster"]["certificate-authority-data"], "QVBJLUNB");
    assert_eq!(v["contexts"][0]["name"], "alice@team-a/prod");

    let oidc = &v["users"][0]["user"]["auth-provider"];
    assert_eq!(oidc["name"], "oidc");
    assert_eq!(oidc["config"]["client-id"], "k8s-prod");
    assert_eq!(oidc["config"]["id-token"], "id.tok.en");
    assert_eq!(oidc["config"]["refresh-token"], "refresh");
    assert_eq!(oidc["config"]["idp-issuer-url"], "https://kc.example.com/auth/realms/iam");
    assert_eq!(oidc["config"]["idp-certificate-authority-data"], "SURQLUNB");
    Ok(())
}

#[test]
fn context_matches_registration_name() -> anyhow::Result<()> {
    let c = cluster()?;
    let doc = KubeConfig::for_cluster(&c, "alice", &tokens()?, "k8s-prod")?;
    assert_eq!(doc.current_context, context_name("alice", &c));
    assert_eq!(document_context(&serde_json::to_value(&doc)?)?, doc.current_context);
    Ok(())
}

#[test]
fn cluster_without_server_is_rejected() -> anyhow::Result<()> {
    let mut c = cluster()?;
    c.server_url = None;
    let err = KubeConfig::for_cluster(&c, "alice", &tokens()?, "k8s-prod").err();
    assert_eq!(err.map(|e| e.kind), Some(crate::error::ErrorKind::Validation));
    Ok(())
}

#[test]
fn document_context_fallbacks() -> anyhow::Result<()> {
    let single = serde_json::json!({ "contexts": [{ "name": "only" }] });
    assert_eq!(document_context(&single)?, "only");

    let many = serde_json::json!({ "contexts": [{ "name": "a" }, { "name": "b" }] });
    assert!(document_context(&many).is_err());
    assert!(document_context(&serde_json::json!({})).is_err());
    Ok(())
}

#[test]
fn path_is_derived_from_id() {
    let dir = Path::new("/cfg");
    assert_eq!(kubeconfig_path(dir, "uid-1"), PathBuf::from("/cfg/uid-1.json"));
    assert_eq!(kubeconfig_path(dir, "../x/y"), PathBuf::from("/cfg/.._x_y.json"));
}

#[tokio::test]
async fn write_replaces_existing_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let first = write_kubeconfig(dir.path(), "uid-1", &serde_json::json!({ "v": 1 })).await?;
    let second = write_kubeconfig(dir.path(), "uid-1", &serde_json::json!({ "v": 2 })).await?;
    assert_eq!(first, second);
    let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&second)?)?;
    assert_eq!(saved["v"], 2);
    Ok(())
}
