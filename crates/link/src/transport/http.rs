// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers that turn requests into queued [`ExtensionEvent`]s.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::events::{
    ActivateClusterLink, AddClustersLink, DispatchError, EventBus, ExtensionEvent, KubeConfigLink,
    OAuthCallback,
};

/// Shown in the browser tab after the redirect.
const RETURN_TO_APP: &str = "Authorization received. You can close this tab and return to the application.";

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub pending_events: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueuedResponse {
    pub queued: bool,
    #[serde(rename = "type")]
    pub event_type: String,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

fn dispatch_error(e: DispatchError) -> Response {
    let code = match e {
        DispatchError::Full => "QUEUE_FULL",
        DispatchError::Closed => "QUEUE_CLOSED",
    };
    let body = ErrorResponse { error: ErrorBody { code: code.to_owned(), message: e.to_string() } };
    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}

fn enqueue(bus: &EventBus, event: ExtensionEvent) -> Response {
    let event_type = event.event_type();
    match bus.dispatch(event) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(QueuedResponse { queued: true, event_type: event_type.as_str().to_owned() }),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(event = %event_type, err = %e, "deep link dropped");
            dispatch_error(e)
        }
    }
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(bus): State<Arc<EventBus>>) -> impl IntoResponse {
    Json(HealthResponse { status: "running".to_owned(), pending_events: bus.pending() })
}

/// `GET /oauth/code?code=&state=` or `?error=&error_description=`
pub async fn oauth_code(
    State(bus): State<Arc<EventBus>>,
    Query(callback): Query<OAuthCallback>,
) -> Response {
    match bus.dispatch(ExtensionEvent::OauthCode(callback)) {
        Ok(()) => (StatusCode::OK, RETURN_TO_APP).into_response(),
        Err(e) => {
            tracing::warn!(err = %e, "authorization callback dropped");
            dispatch_error(e)
        }
    }
}

/// `POST /api/v1/events` with a `{ type, data }` envelope.
pub async fn event(State(bus): State<Arc<EventBus>>, Json(event): Json<ExtensionEvent>) -> Response {
    enqueue(&bus, event)
}

/// `POST /api/v1/links/add-clusters`
pub async fn add_clusters(
    State(bus): State<Arc<EventBus>>,
    Json(link): Json<AddClustersLink>,
) -> Response {
    enqueue(&bus, ExtensionEvent::AddClusters(link))
}

/// `POST /api/v1/links/kubeconfig`
pub async fn kube_config(
    State(bus): State<Arc<EventBus>>,
    Json(link): Json<KubeConfigLink>,
) -> Response {
    enqueue(&bus, ExtensionEvent::KubeConfig(link))
}

/// `POST /api/v1/links/activate-cluster`
pub async fn activate_cluster(
    State(bus): State<Arc<EventBus>>,
    Json(link): Json<ActivateClusterLink>,
) -> Response {
    enqueue(&bus, ExtensionEvent::ActivateCluster(link))
}
