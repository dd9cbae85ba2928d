// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;
use crate::credential::access::{AuthAccess, TokenPayload};
use crate::credential::sso::SSO_AUTH_STATE;
use crate::events::{ActivateClusterLink, KubeConfigLink, DEFAULT_QUEUE_CAPACITY};
use crate::host::notify::RecordingNotifier;
use crate::host::registry::FileRegistry;
use crate::test_support::{cluster_item, http_client, MockInstance, RecordingBrowser};

struct Harness {
    mock: MockInstance,
    app: App,
    registry: Arc<FileRegistry>,
    notifier: Arc<RecordingNotifier>,
    browser: Arc<RecordingBrowser>,
    _dir: tempfile::TempDir,
}

async fn harness(mock: MockInstance, selection: &[&str]) -> anyhow::Result<Harness> {
    let config = mock.config()?;
    let http = http_client();
    let auth = AuthClient::new(http.clone(), &config, "http://127.0.0.1:1/oauth/code")?;

    let dir = tempfile::tempdir()?;
    let registry = Arc::new(FileRegistry::new(dir.path().join("registry.json")));
    let notifier = Arc::new(RecordingNotifier::new());
    let browser = RecordingBrowser::new();
    let app = App::new(
        http,
        config,
        auth,
        Arc::new(CredentialCell::default()),
        Host { registry: registry.clone(), notifier: notifier.clone(), browser: browser.clone() },
        AppOptions {
            onboard: OnboardOptions {
                kubeconfig_dir: dir.path().join("kubeconfigs"),
                offline: false,
                use_groups: true,
            },
            ignored_namespaces: Vec::new(),
            selection: selection.iter().map(|s| (*s).to_owned()).collect(),
        },
    );
    Ok(Harness { mock, app, registry, notifier, browser, _dir: dir })
}

async fn two_cluster_instance(sso: bool) -> anyhow::Result<MockInstance> {
    MockInstance::builder()
        .sso(sso)
        .username("bob")
        .namespace(
            "team-a",
            vec![cluster_item("team-a", "prod", "uid-1", "X"), cluster_item("team-a", "dev", "uid-2", "Y")],
        )
        .namespace("team-b", vec![cluster_item("team-b", "edge", "uid-3", "Z")])
        .spawn()
        .await
}

fn session(mock: &MockInstance, uses_sso: bool) -> anyhow::Result<AuthAccess> {
    let mut access = AuthAccess::from_tokens(&tokens(mock))?;
    access.set_username(Some("bob".into()));
    access.set_uses_sso(Some(uses_sso));
    Ok(access)
}

fn tokens(mock: &MockInstance) -> TokenPayload {
    TokenPayload {
        id_token: Some(mock.id_token()),
        expires_in: Some(300),
        refresh_token: Some("link-refresh".into()),
        refresh_expires_in: Some(0),
        ..Default::default()
    }
}

async fn eventually(mut check: impl FnMut() -> bool) -> anyhow::Result<()> {
    for _ in 0..100 {
        if check() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    anyhow::bail!("condition not reached")
}

#[tokio::test]
async fn password_login_then_batch_add() -> anyhow::Result<()> {
    let h = harness(two_cluster_instance(false).await?, &[]).await?;
    h.app.login(Some(("bob", "hunter2"))).await?;

    let access = h.app.cell.snapshot();
    assert_eq!(access.username(), Some("bob"));
    assert_eq!(access.uses_sso(), Some(false));
    let form = &h.mock.token_requests()[0];
    assert_eq!(form.get("grant_type").map(String::as_str), Some("password"));

    let clusters = h.app.load_clusters(None).await?;
    assert_eq!(clusters.len(), 3);
    let state = h.app.add_clusters(clusters).await?;
    let OnboardState::Added(mut names) = state else {
        anyhow::bail!("unexpected state {state:?}");
    };
    names.sort();
    assert_eq!(names, ["dev", "edge", "prod"]);
    assert_eq!(h.registry.list_registered_clusters()?.len(), 3);
    assert!(h.browser.urls().is_empty());
    Ok(())
}

#[tokio::test]
async fn password_login_needs_credentials_or_session() -> anyhow::Result<()> {
    let h = harness(two_cluster_instance(false).await?, &[]).await?;
    let err = h.app.login(None).await.err();
    assert_eq!(err.map(|e| e.kind), Some(ErrorKind::Unauthorized));
    assert!(h.mock.token_requests().is_empty());

    h.app.cell.apply(|a| *a = session(&h.mock, false).unwrap_or_default());
    h.app.login(None).await?;
    assert!(h.mock.token_requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn selection_filters_by_name() -> anyhow::Result<()> {
    let h = harness(two_cluster_instance(false).await?, &["dev", "missing"]).await?;
    h.app.login(Some(("bob", "pw"))).await?;
    let names: Vec<String> = h.app.load_clusters(None).await?.into_iter().map(|c| c.name).collect();
    assert_eq!(names, ["dev"]);

    let only = vec!["team-b".to_owned()];
    assert!(h.app.load_clusters(Some(only.as_slice())).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn sso_login_waits_for_callback() -> anyhow::Result<()> {
    let h = harness(two_cluster_instance(true).await?, &[]).await?;
    let callback = async {
        tokio::task::yield_now().await;
        h.app.handle(ExtensionEvent::OauthCode(OAuthCallback::with_code("c1", SSO_AUTH_STATE))).await
    };
    let (login, handled) = tokio::join!(h.app.login(None), callback);
    login?;
    handled?;

    assert_eq!(h.browser.urls().len(), 1);
    assert_eq!(h.app.sso.state(), SsoState::Authorized);
    assert_eq!(h.app.cell.snapshot().username(), Some("bob"));
    Ok(())
}

#[tokio::test]
async fn sso_login_reuses_valid_session() -> anyhow::Result<()> {
    let h = harness(two_cluster_instance(true).await?, &[]).await?;
    h.app.cell.apply(|a| *a = session(&h.mock, true).unwrap_or_default());
    h.app.login(None).await?;
    assert!(h.browser.urls().is_empty());
    assert_eq!(h.app.sso.state(), SsoState::Authorized);
    Ok(())
}

#[tokio::test]
async fn add_clusters_link_onboards_through_cluster_client() -> anyhow::Result<()> {
    let h = harness(two_cluster_instance(true).await?, &[]).await?;
    let link = AddClustersLink {
        cloud_url: format!("{}/", h.mock.url()),
        username: "bob".into(),
        tokens: tokens(&h.mock),
        only_namespaces: Some(vec!["team-b".into()]),
    };
    h.app.handle(ExtensionEvent::AddClusters(link)).await?;

    let access = h.app.cell.snapshot();
    assert_eq!(access.username(), Some("bob"));
    assert!(access.is_valid());
    assert_eq!(h.app.onboard.state(), OnboardState::Waiting);
    let urls = h.browser.urls();
    assert!(urls[0].contains("client_id=Z&"), "{}", urls[0]);

    let callback = OAuthCallback::with_code("c2", ADD_CLUSTERS_STATE);
    h.app.handle(ExtensionEvent::OauthCode(callback)).await?;
    assert_eq!(h.app.onboard.state(), OnboardState::Added(vec!["edge".into()]));
    // The cluster callback must not touch the instance login.
    assert_eq!(h.app.sso.state(), SsoState::Authorized);
    Ok(())
}

#[tokio::test]
async fn several_new_clusters_under_sso_are_reported() -> anyhow::Result<()> {
    let h = harness(two_cluster_instance(true).await?, &[]).await?;
    let link = AddClustersLink {
        cloud_url: h.mock.url(),
        username: "bob".into(),
        tokens: tokens(&h.mock),
        only_namespaces: Some(vec!["team-a".into()]),
    };
    let err = h.app.handle(ExtensionEvent::AddClusters(link)).await.err();
    assert_eq!(err.map(|e| e.kind), Some(ErrorKind::Policy));
    assert_eq!(h.notifier.levels(), vec![NotifyLevel::Error]);
    assert!(h.browser.urls().is_empty());
    Ok(())
}

#[tokio::test]
async fn one_by_one_adds_each_cluster_after_its_callback() -> anyhow::Result<()> {
    let h = harness(two_cluster_instance(true).await?, &["prod", "dev"]).await?;
    h.app.cell.apply(|a| *a = session(&h.mock, true).unwrap_or_default());
    let clusters = h.app.load_clusters(None).await?;

    let callbacks = async {
        for code in ["c1", "c2"] {
            eventually(|| h.app.onboard.state() == OnboardState::Waiting).await?;
            let callback = OAuthCallback::with_code(code, ADD_CLUSTERS_STATE);
            h.app.handle(ExtensionEvent::OauthCode(callback)).await?;
        }
        anyhow::Ok(())
    };
    let (added, sent) = tokio::join!(h.app.add_clusters_one_by_one(clusters), callbacks);
    sent?;
    assert_eq!(added?.len(), 2);
    assert_eq!(h.browser.urls().len(), 2);
    assert_eq!(h.registry.list_registered_clusters()?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn links_for_other_instances_are_rejected() -> anyhow::Result<()> {
    let h = harness(two_cluster_instance(false).await?, &[]).await?;
    let link = ActivateClusterLink {
        cloud_url: "https://elsewhere.example.com".into(),
        namespace: "team-a".into(),
        cluster_name: "prod".into(),
        cluster_id: "uid-1".into(),
    };
    let err = h.app.handle(ExtensionEvent::ActivateCluster(link)).await.err();
    assert_eq!(err.map(|e| e.kind), Some(ErrorKind::Validation));
    assert_eq!(h.notifier.levels(), vec![NotifyLevel::Error]);
    Ok(())
}

#[tokio::test]
async fn event_loop_handles_bus_events_in_order() -> anyhow::Result<()> {
    let h = harness(two_cluster_instance(false).await?, &[]).await?;
    let app = Arc::new(h.app);
    let bus = EventBus::new(DEFAULT_QUEUE_CAPACITY);
    let shutdown = CancellationToken::new();
    let task = spawn_event_loop(Arc::clone(&app), &bus, shutdown.clone());

    let url = app.cloud.cloud_url.clone();
    bus.dispatch(ExtensionEvent::KubeConfig(KubeConfigLink {
        cloud_url: url.clone(),
        namespace: "team-c".into(),
        cluster_name: "linked".into(),
        cluster_id: "uid-9".into(),
        kube_config: serde_json::json!({
            "apiVersion": "v1",
            "contexts": [{ "name": "carol@team-c/linked", "context": {} }],
            "current-context": "carol@team-c/linked",
        }),
    }))?;
    bus.dispatch(ExtensionEvent::ActivateCluster(ActivateClusterLink {
        cloud_url: url,
        namespace: "team-c".into(),
        cluster_name: "linked".into(),
        cluster_id: "uid-9".into(),
    }))?;

    let registry = Arc::clone(&h.registry);
    eventually(|| registry.data().is_ok_and(|d| d.active_cluster.as_deref() == Some("uid-9"))).await?;

    shutdown.cancel();
    task.await?;
    Ok(())
}
