// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deep-link event types and the queue that carries them to handlers.
//!
//! Events dispatched before anyone listens are buffered. The first
//! [`EventBus::add_handler`] call opens the gate; from then on every queued
//! event is delivered once to the handlers registered for its type and then
//! dropped, whether or not any handler matched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::credential::access::TokenPayload;
use crate::error::ApiError;

/// Buffered events held before the first handler registers.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

// -- Wire-format event types -------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    ActivateCluster,
    AddClusters,
    KubeConfig,
    OauthCode,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActivateCluster => "activateCluster",
            Self::AddClusters => "addClusters",
            Self::KubeConfig => "kubeConfig",
            Self::OauthCode => "oauthCode",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateClusterLink {
    pub cloud_url: String,
    pub namespace: String,
    pub cluster_name: String,
    pub cluster_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddClustersLink {
    pub cloud_url: String,
    pub username: String,
    pub tokens: TokenPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_namespaces: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeConfigLink {
    pub cloud_url: String,
    pub namespace: String,
    pub cluster_name: String,
    pub cluster_id: String,
    pub kube_config: serde_json::Value,
}

/// Authorization redirect parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthCallback {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl OAuthCallback {
    pub fn with_code(code: &str, state: &str) -> Self {
        Self { code: Some(code.to_owned()), state: Some(state.to_owned()), ..Default::default() }
    }

    /// The authorization code, or the IDP-reported error.
    pub fn code_or_error(&self) -> Result<&str, ApiError> {
        if let Some(ref error) = self.error {
            let message = self.error_description.as_deref().filter(|d| !d.is_empty()).unwrap_or(error);
            return Err(ApiError::transport(format!("authorization failed: {message}")));
        }
        self.code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ApiError::validation("authorization callback carried no code"))
    }
}

/// `{ type, data }` envelope for deep-link callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ExtensionEvent {
    ActivateCluster(ActivateClusterLink),
    AddClusters(AddClustersLink),
    KubeConfig(KubeConfigLink),
    OauthCode(OAuthCallback),
}

impl ExtensionEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::ActivateCluster(_) => EventType::ActivateCluster,
            Self::AddClusters(_) => EventType::AddClusters,
            Self::KubeConfig(_) => EventType::KubeConfig,
            Self::OauthCode(_) => EventType::OauthCode,
        }
    }
}

// -- Bus ---------------------------------------------------------------------

/// Identifies a registration for [`EventBus::remove_handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(ExtensionEvent) + Send + Sync>;
type HandlerMap = HashMap<EventType, Vec<(HandlerId, Handler)>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// The buffer is full; nothing has drained it yet.
    Full,
    /// The delivery task has stopped.
    Closed,
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => f.write_str("event queue is full"),
            Self::Closed => f.write_str("event queue is closed"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// Bounded queue plus handler registry, gated on the first registration.
pub struct EventBus {
    tx: mpsc::Sender<ExtensionEvent>,
    handlers: Arc<Mutex<HandlerMap>>,
    /// Flips to true on the first `add_handler` and never back.
    gate: watch::Sender<bool>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create the bus and spawn its delivery task. Must be called within a
    /// tokio runtime.
    pub fn new(capacity: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (gate, gate_rx) = watch::channel(false);
        let handlers: Arc<Mutex<HandlerMap>> = Arc::default();
        tokio::spawn(deliver(rx, gate_rx, Arc::clone(&handlers)));
        Arc::new(Self { tx, handlers, gate, next_id: AtomicU64::new(1) })
    }

    /// Enqueue an event without waiting.
    pub fn dispatch(&self, event: ExtensionEvent) -> Result<(), DispatchError> {
        let event_type = event.event_type();
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatchError::Full,
            mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
        })?;
        tracing::debug!(event = %event_type, "event queued");
        Ok(())
    }

    /// Register `handler` for `event_type` and open the gate.
    pub fn add_handler<F>(&self, event_type: EventType, handler: F) -> HandlerId
    where
        F: Fn(ExtensionEvent) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.handlers).entry(event_type).or_default().push((id, Arc::new(handler)));
        self.gate.send_if_modified(|open| !std::mem::replace(open, true));
        id
    }

    /// Unregister a handler. Returns false when `id` was unknown.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut handlers = lock(&self.handlers);
        let mut removed = false;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|(hid, _)| *hid != id);
            removed |= list.len() != before;
        }
        removed
    }

    /// Whether a handler has ever been registered.
    pub fn is_open(&self) -> bool {
        *self.gate.borrow()
    }

    /// Events waiting in the buffer.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

async fn deliver(
    mut rx: mpsc::Receiver<ExtensionEvent>,
    mut gate: watch::Receiver<bool>,
    handlers: Arc<Mutex<HandlerMap>>,
) {
    if gate.wait_for(|open| *open).await.is_err() {
        return;
    }
    while let Some(event) = rx.recv().await {
        let event_type = event.event_type();
        let matched: Vec<Handler> = lock(&handlers)
            .get(&event_type)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        if matched.is_empty() {
            tracing::debug!(event = %event_type, "no handler, event dropped");
            continue;
        }
        for handler in matched {
            handler(event.clone());
        }
    }
}

fn lock(handlers: &Mutex<HandlerMap>) -> std::sync::MutexGuard<'_, HandlerMap> {
    handlers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
