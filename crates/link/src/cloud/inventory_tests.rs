// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;
use crate::credential::access::TokenPayload;
use crate::error::ErrorKind;
use crate::test_support::{cluster_item, http_client, MockInstance};

fn fetcher() -> InventoryFetcher {
    let ignored = DEFAULT_IGNORED_NAMESPACES.iter().map(|s| (*s).to_owned()).collect();
    InventoryFetcher::new(http_client(), ignored)
}

fn access_for(mock: &MockInstance) -> anyhow::Result<AuthAccess> {
    let mut access = AuthAccess::new();
    access.update_tokens(&TokenPayload {
        id_token: Some(mock.id_token()),
        expires_in: Some(300),
        refresh_token: Some("refresh".into()),
        refresh_expires_in: Some(1800),
        ..Default::default()
    })?;
    access.set_username(Some("alice".into()));
    access.set_uses_sso(Some(true));
    Ok(access)
}

fn names(ns: &[&str]) -> Vec<String> {
    ns.iter().map(|s| (*s).to_owned()).collect()
}

#[tokio::test]
async fn namespaces_filtered_by_roles_and_ignore_list() -> anyhow::Result<()> {
    let mock = MockInstance::builder()
        .sso(true)
        .namespace("team-a", vec![])
        .namespace("kube-system", vec![])
        .foreign_namespace("team-z")
        .spawn()
        .await?;
    let config = mock.config()?;
    let access = access_for(&mock)?;

    let namespaces = fetcher().fetch_namespaces(&config, &access).await?;
    let got: Vec<&str> = namespaces.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(got, ["team-a"]);
    Ok(())
}

#[tokio::test]
async fn namespaces_without_token_is_unauthorized() -> anyhow::Result<()> {
    let mock = MockInstance::builder().namespace("team-a", vec![]).spawn().await?;
    let err = fetcher().fetch_namespaces(&mock.config()?, &AuthAccess::new()).await.err();
    assert_eq!(err.map(|e| e.kind), Some(ErrorKind::Unauthorized));
    Ok(())
}

#[tokio::test]
async fn clusters_concatenate_in_namespace_order() -> anyhow::Result<()> {
    let mock = MockInstance::builder()
        .namespace("a", vec![cluster_item("a", "a1", "ua1", "c"), cluster_item("a", "a2", "ua2", "c")])
        .namespace("b", vec![cluster_item("b", "b1", "ub1", "c")])
        .delay("a", Duration::from_millis(50))
        .spawn()
        .await?;
    let clusters =
        fetcher().fetch_clusters(&mock.config()?, &access_for(&mock)?, &names(&["a", "b"])).await?;
    let ids: Vec<&str> = clusters.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, ["ua1", "ua2", "ub1"]);
    Ok(())
}

#[tokio::test]
async fn failing_namespace_error_wins_even_when_slowest() -> anyhow::Result<()> {
    let mock = MockInstance::builder()
        .namespace("a", vec![cluster_item("a", "a1", "ua1", "c")])
        .namespace("b", vec![])
        .namespace("c", vec![cluster_item("c", "c1", "uc1", "c")])
        .failing("b")
        .delay("b", Duration::from_millis(80))
        .spawn()
        .await?;
    let result =
        fetcher().fetch_clusters(&mock.config()?, &access_for(&mock)?, &names(&["a", "b", "c"])).await;
    let err = match result {
        Ok(clusters) => anyhow::bail!("expected error, got {} clusters", clusters.len()),
        Err(e) => e,
    };
    assert_eq!(err.kind, ErrorKind::Transport);
    assert!(err.message.contains("/namespaces/b/"), "{}", err.message);
    assert_eq!(mock.cluster_requests(), 3);
    Ok(())
}

#[tokio::test]
async fn malformed_payload_fails_like_network_error() -> anyhow::Result<()> {
    let mock = MockInstance::builder()
        .namespace("a", vec![cluster_item("a", "a1", "ua1", "c")])
        .namespace("b", vec![])
        .malformed("b")
        .spawn()
        .await?;
    let err = fetcher()
        .fetch_clusters(&mock.config()?, &access_for(&mock)?, &names(&["a", "b"]))
        .await
        .err();
    assert_eq!(err.map(|e| e.kind), Some(ErrorKind::Protocol));
    Ok(())
}

#[tokio::test]
async fn provider_loads_restricted_inventory() -> anyhow::Result<()> {
    let mock = MockInstance::builder()
        .sso(true)
        .namespace("a", vec![cluster_item("a", "a1", "ua1", "c")])
        .namespace("b", vec![cluster_item("b", "b1", "ub1", "c")])
        .spawn()
        .await?;
    let config = mock.config()?;
    let auth = AuthClient::new(http_client(), &config, "http://127.0.0.1/oauth/code")?;
    let cell = CredentialCell::new(access_for(&mock)?);
    let provider = InventoryProvider::new(fetcher());

    let only = names(&["b"]);
    let inv = match provider.load(&config, &auth, &cell, Some(&only)).await {
        Some(result) => result?,
        None => anyhow::bail!("load was skipped"),
    };
    assert_eq!(inv.namespaces.len(), 1);
    assert_eq!(inv.clusters.len(), 1);
    assert_eq!(inv.clusters[0].id, "ub1");
    assert_eq!(provider.inventory(), Some(inv));
    assert!(!provider.is_loading());

    provider.reset();
    assert_eq!(provider.inventory(), None);
    Ok(())
}

#[tokio::test]
async fn provider_ignores_concurrent_load() -> anyhow::Result<()> {
    let mock = MockInstance::builder()
        .namespace("a", vec![cluster_item("a", "a1", "ua1", "c")])
        .delay("a", Duration::from_millis(100))
        .spawn()
        .await?;
    let config = mock.config()?;
    let auth = AuthClient::new(http_client(), &config, "http://127.0.0.1/oauth/code")?;
    let cell = CredentialCell::new(access_for(&mock)?);
    let provider = InventoryProvider::new(fetcher());

    let (first, second) = tokio::join!(provider.load(&config, &auth, &cell, None), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        provider.load(&config, &auth, &cell, None).await
    });
    assert!(matches!(first, Some(Ok(_))));
    assert!(second.is_none());
    Ok(())
}
