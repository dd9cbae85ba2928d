// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local HTTP intake for deep-link callbacks.

pub mod http;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::events::EventBus;

/// Build the axum `Router` with all deep-link routes.
pub fn build_router(bus: Arc<EventBus>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::health))
        // Browser redirect target for authorization code flows
        .route("/oauth/code", get(http::oauth_code))
        // Deep links
        .route("/api/v1/events", post(http::event))
        .route("/api/v1/links/add-clusters", post(http::add_clusters))
        .route("/api/v1/links/kubeconfig", post(http::kube_config))
        .route("/api/v1/links/activate-cluster", post(http::activate_cluster))
        .with_state(bus)
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
