// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: payload builders, a mock instance, and a
//! browser that records instead of opening.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tokio::sync::Notify;

use crate::cloud::config::CloudConfig;
use crate::credential::sso::BrowserOpener;

/// Realm the mock identity provider serves.
pub const MOCK_REALM: &str = "iam";
/// Instance-level OIDC client of the mock.
pub const MOCK_CLIENT_ID: &str = "kaas";

static CRYPTO: Once = Once::new();

/// Install the rustls crypto provider (reqwest needs it even on plain HTTP).
pub fn ensure_crypto_provider() {
    CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// HTTP client for talking to mock servers.
pub fn http_client() -> reqwest::Client {
    ensure_crypto_provider();
    reqwest::Client::new()
}

/// Convert any `Display` error into `anyhow::Error`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}

/// Build an unsigned JWT around `claims`.
pub fn fake_jwt(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let body = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{body}.sig")
}

/// Id token for `username` holding reader on each of `namespaces`.
pub fn id_token_for(username: &str, namespaces: &[&str]) -> String {
    let roles: Vec<String> = namespaces.iter().map(|ns| format!("m:kaas:{ns}@reader")).collect();
    fake_jwt(&serde_json::json!({ "preferred_username": username, "iam_roles": roles }))
}

/// A ready cluster list item in the instance's wire shape.
pub fn cluster_item(namespace: &str, name: &str, uid: &str, idp_client_id: &str) -> serde_json::Value {
    serde_json::json!({
        "metadata": {
            "uid": uid,
            "name": name,
            "namespace": namespace,
            "creationTimestamp": "2026-01-01T00:00:00Z",
            "labels": {
                "kaas.mirantis.com/provider": "openstack",
                "kaas.mirantis.com/region": "region-one",
            },
        },
        "spec": {
            "providerSpec": { "value": { "kaas": {
                "management": { "enabled": false },
                "regional": { "enabled": false },
            } } },
        },
        "status": {
            "providerStatus": {
                "loadBalancerHost": format!("{name}.lb.example.com"),
                "apiServerCertificate": "QVBJLUNB",
                "ucpDashboard": format!("https://{name}.ucp.example.com"),
                "oidc": {
                    "issuerUrl": "https://kc.example.com/auth/realms/iam",
                    "certificate": "SURQLUNB",
                    "clientId": idp_client_id,
                },
            },
        },
    })
}

/// A namespace list item.
pub fn namespace_item(name: &str, phase: &str) -> serde_json::Value {
    serde_json::json!({
        "metadata": { "uid": format!("ns-{name}"), "name": name },
        "status": { "phase": phase },
    })
}

/// Browser stand-in that records every URL it is asked to open.
#[derive(Debug, Default)]
pub struct RecordingBrowser {
    urls: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingBrowser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self { urls: Mutex::new(Vec::new()), fail: true })
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

impl BrowserOpener for RecordingBrowser {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        if let Ok(mut urls) = self.urls.lock() {
            urls.push(url.to_owned());
        }
        if self.fail {
            anyhow::bail!("no browser available");
        }
        Ok(())
    }
}

// -- Mock instance -----------------------------------------------------------

/// Shared state behind the mock instance's routes.
#[derive(Debug, Default)]
pub struct MockState {
    pub addr: Mutex<Option<SocketAddr>>,
    pub sso: bool,
    pub basic: bool,
    pub username: String,
    /// Issue id tokens without a `preferred_username` claim.
    pub anonymous: bool,
    pub namespaces: Vec<serde_json::Value>,
    pub clusters: HashMap<String, Vec<serde_json::Value>>,
    pub foreign_namespaces: HashSet<String>,
    pub failing_namespaces: HashSet<String>,
    pub malformed_namespaces: HashSet<String>,
    pub delays: HashMap<String, Duration>,
    /// Status returned by the token endpoint (0 = 200).
    pub token_status: AtomicU16,
    pub token_requests: Mutex<Vec<HashMap<String, String>>>,
    /// When set, token responses wait for this gate.
    pub token_gate: Mutex<Option<Arc<Notify>>>,
    /// Signalled each time a token request parks at the gate.
    pub token_parked: Notify,
    pub logout_requests: AtomicU32,
    pub cluster_requests: AtomicU32,
}

impl MockState {
    fn role_namespaces(&self) -> Vec<String> {
        self.namespaces
            .iter()
            .filter_map(|n| n["metadata"]["name"].as_str().map(String::from))
            .filter(|n| !self.foreign_namespaces.contains(n))
            .collect()
    }
}

/// Builder for [`MockInstance`].
#[derive(Debug, Default)]
pub struct MockInstanceBuilder {
    state: MockState,
}

impl MockInstanceBuilder {
    pub fn sso(mut self, sso: bool) -> Self {
        self.state.sso = sso;
        self
    }

    pub fn basic(mut self) -> Self {
        self.state.basic = true;
        self
    }

    pub fn username(mut self, username: &str) -> Self {
        self.state.username = username.to_owned();
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.state.anonymous = true;
        self
    }

    /// Add a namespace the user has reader on, with the given clusters.
    pub fn namespace(mut self, name: &str, clusters: Vec<serde_json::Value>) -> Self {
        self.state.namespaces.push(namespace_item(name, "Active"));
        self.state.clusters.insert(name.to_owned(), clusters);
        self
    }

    /// Add a namespace listed by the API but absent from the user's roles.
    pub fn foreign_namespace(mut self, name: &str) -> Self {
        self.state.namespaces.push(namespace_item(name, "Active"));
        self.state.clusters.insert(name.to_owned(), Vec::new());
        self.state.foreign_namespaces.insert(name.to_owned());
        self
    }

    pub fn failing(mut self, namespace: &str) -> Self {
        self.state.failing_namespaces.insert(namespace.to_owned());
        self
    }

    pub fn malformed(mut self, namespace: &str) -> Self {
        self.state.malformed_namespaces.insert(namespace.to_owned());
        self
    }

    pub fn delay(mut self, namespace: &str, delay: Duration) -> Self {
        self.state.delays.insert(namespace.to_owned(), delay);
        self
    }

    pub async fn spawn(self) -> anyhow::Result<MockInstance> {
        let mut state = self.state;
        if state.username.is_empty() {
            state.username = "alice".to_owned();
        }
        let state = Arc::new(state);
        let oidc = format!("/auth/realms/{MOCK_REALM}/protocol/openid-connect");
        let app = Router::new()
            .route("/config.js", get(config_js))
            .route(&format!("{oidc}/token"), post(token))
            .route(&format!("{oidc}/logout"), post(logout))
            .route("/api/v1/namespaces", get(namespaces))
            .route("/apis/cluster.k8s.io/v1alpha1/namespaces/{ns}/clusters", get(clusters))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        if let Ok(mut slot) = state.addr.lock() {
            *slot = Some(addr);
        }
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(MockInstance { addr, state })
    }
}

/// In-process stand-in for an instance and its identity provider.
pub struct MockInstance {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockInstance {
    pub fn builder() -> MockInstanceBuilder {
        MockInstanceBuilder::default()
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn config(&self) -> anyhow::Result<CloudConfig> {
        Ok(CloudConfig::parse(&self.url(), &config_body(&self.state))?)
    }

    pub fn set_token_status(&self, status: u16) {
        self.state.token_status.store(status, Ordering::SeqCst);
    }

    /// Park token responses until the returned gate is notified.
    pub fn hold_tokens(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        if let Ok(mut slot) = self.state.token_gate.lock() {
            *slot = Some(Arc::clone(&gate));
        }
        gate
    }

    /// Resolves once a token request is parked at the gate.
    pub async fn token_parked(&self) {
        self.state.token_parked.notified().await;
    }

    pub fn token_requests(&self) -> Vec<HashMap<String, String>> {
        self.state.token_requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn cluster_requests(&self) -> u32 {
        self.state.cluster_requests.load(Ordering::SeqCst)
    }

    /// Id token the mock issues for its user.
    pub fn id_token(&self) -> String {
        let roles = self.state.role_namespaces();
        let roles: Vec<&str> = roles.iter().map(String::as_str).collect();
        id_token_for(&self.state.username, &roles)
    }
}

fn config_body(state: &MockState) -> String {
    let addr = state.addr.lock().ok().and_then(|a| *a);
    let base = addr.map(|a| format!("http://{a}")).unwrap_or_default();
    if state.basic {
        return "window.CONFIG = {};".to_owned();
    }
    let json = serde_json::json!({
        "keycloakLogin": state.sso,
        "keycloak": { "url": base, "realm": MOCK_REALM, "clientId": MOCK_CLIENT_ID },
    });
    format!("window.CONFIG = {json};")
}

async fn config_js(State(s): State<Arc<MockState>>) -> impl IntoResponse {
    config_body(&s)
}

async fn token(
    State(s): State<Arc<MockState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if let Ok(mut reqs) = s.token_requests.lock() {
        reqs.push(form.clone());
    }
    let gate = s.token_gate.lock().ok().and_then(|g| g.clone());
    if let Some(gate) = gate {
        s.token_parked.notify_one();
        gate.notified().await;
    }
    let status = match s.token_status.load(Ordering::SeqCst) {
        0 => 200,
        other => other,
    };
    if status != 200 {
        let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (code, "{\"error\":\"invalid_grant\"}").into_response();
    }

    let client_id = form.get("client_id").cloned().unwrap_or_default();
    let seq = s.token_requests.lock().map(|r| r.len()).unwrap_or(0);
    let roles = s.role_namespaces();
    let roles: Vec<&str> = roles.iter().map(String::as_str).collect();
    let id_token = if s.anonymous {
        let roles: Vec<String> = roles.iter().map(|ns| format!("m:kaas:{ns}@reader")).collect();
        fake_jwt(&serde_json::json!({ "iam_roles": roles }))
    } else {
        id_token_for(&s.username, &roles)
    };
    Json(serde_json::json!({
        "id_token": id_token,
        "expires_in": 300,
        "refresh_token": format!("refresh-{client_id}-{seq}"),
        "refresh_expires_in": 1800,
        "token_type": "Bearer",
    }))
    .into_response()
}

async fn logout(State(s): State<Arc<MockState>>) -> StatusCode {
    s.logout_requests.fetch_add(1, Ordering::SeqCst);
    StatusCode::NO_CONTENT
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Bearer ") && v.len() > 7)
}

async fn namespaces(State(s): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(serde_json::json!({ "items": s.namespaces })).into_response()
}

async fn clusters(
    State(s): State<Arc<MockState>>,
    Path(ns): Path<String>,
    headers: HeaderMap,
) -> Response {
    s.cluster_requests.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if let Some(delay) = s.delays.get(&ns) {
        tokio::time::sleep(*delay).await;
    }
    if s.failing_namespaces.contains(&ns) {
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("{ns} is broken")).into_response();
    }
    if s.malformed_namespaces.contains(&ns) {
        return "{\"items\": 7}".into_response();
    }
    let items = s.clusters.get(&ns).cloned().unwrap_or_default();
    Json(serde_json::json!({ "items": items })).into_response()
}
