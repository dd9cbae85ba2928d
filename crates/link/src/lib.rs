// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kaaslink: onboard clusters from a KaaS instance into local kubeconfigs.

pub mod app;
pub mod cloud;
pub mod config;
pub mod credential;
pub mod error;
pub mod events;
pub mod host;
pub mod onboard;
pub mod settle;
pub mod test_support;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::app::{spawn_event_loop, App, AppOptions, Host};
use crate::cloud::config::CloudConfig;
use crate::config::LinkConfig;
use crate::credential::access::{AuthAccess, CredentialCell};
use crate::credential::oauth::AuthClient;
use crate::credential::persist;
use crate::credential::sso::SystemBrowser;
use crate::events::{EventBus, DEFAULT_QUEUE_CAPACITY};
use crate::host::notify::TracingNotifier;
use crate::host::registry::FileRegistry;
use crate::onboard::{OnboardOptions, OnboardState};
use crate::transport::build_router;

/// Log in, onboard the selected clusters, and (with `--listen`) keep serving
/// deep links until shutdown.
pub async fn run(config: LinkConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let http = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;
    let cloud = CloudConfig::load(&http, config.cloud_url()).await?;
    tracing::info!(cloud = %cloud.cloud_url, mode = ?cloud.auth_mode, "instance config loaded");
    let auth = AuthClient::new(http.clone(), &cloud, config.redirect_uri())?;

    let session_path = config.session_path();
    let access = persist::load(&session_path).unwrap_or_else(|e| {
        tracing::warn!(err = %e, "ignoring unreadable session");
        AuthAccess::new()
    });
    let cell = Arc::new(CredentialCell::new(access));
    let persister = persist::spawn_persister(Arc::clone(&cell), session_path.clone(), shutdown.clone());

    let host = Host {
        registry: Arc::new(FileRegistry::new(config.registry_path())),
        notifier: Arc::new(TracingNotifier),
        browser: Arc::new(SystemBrowser),
    };
    let options = AppOptions {
        onboard: OnboardOptions {
            kubeconfig_dir: config.kubeconfig_dir(),
            offline: config.offline_access,
            use_groups: !config.no_workspaces,
        },
        ignored_namespaces: config.ignored_namespaces(),
        selection: config.clusters.clone(),
    };
    let app = Arc::new(App::new(http, cloud, auth, Arc::clone(&cell), host, options));

    let bus = EventBus::new(DEFAULT_QUEUE_CAPACITY);
    let events = spawn_event_loop(Arc::clone(&app), &bus, shutdown.clone());

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("kaaslink listening on {addr}");
    let router = build_router(bus);
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router).with_graceful_shutdown(server_shutdown.cancelled_owned()).await
    });

    let result = tokio::select! {
        _ = shutdown.cancelled() => {
            app.sso.cancel("interrupted");
            app.onboard.cancel("interrupted");
            Ok(())
        }
        result = onboard_selected(&app, &config) => result,
    };
    if result.is_ok() && config.listen && !shutdown.is_cancelled() {
        tracing::info!("serving deep links until shutdown");
        shutdown.cancelled().await;
    }
    shutdown.cancel();

    server.await??;
    events.await?;
    persister.await?;
    // The persister stops on shutdown; make sure the last change is on disk.
    if let Err(e) = persist::save(&session_path, &cell.snapshot()) {
        tracing::warn!(err = %e, "failed to save session");
    }
    result
}

async fn onboard_selected(app: &App, config: &LinkConfig) -> anyhow::Result<()> {
    let credentials = config.username.as_deref().zip(config.password.as_deref());
    app.login(credentials).await?;

    let clusters = app.load_clusters(config.only_namespaces()).await?;
    if clusters.is_empty() {
        tracing::info!("no clusters to add");
        return Ok(());
    }

    let added = if app.cloud.uses_sso() {
        app.add_clusters_one_by_one(clusters).await?
    } else {
        match app.add_clusters(clusters).await? {
            OnboardState::Added(names) => names,
            OnboardState::Error(message) => anyhow::bail!(message),
            other => {
                tracing::debug!(state = ?other, "onboarding did not finish");
                Vec::new()
            }
        }
    };
    for group in app.onboard.take_new_groups() {
        tracing::info!(group = %group.name, "workspace created");
    }
    tracing::info!(added = added.len(), "onboarding finished");
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                tracing::info!("received SIGTERM");
                shutdown.cancel();
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                tracing::info!("received SIGINT");
                shutdown.cancel();
            }
        }
    });
}
