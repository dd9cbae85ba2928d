// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use tokio::sync::mpsc;

use super::*;

fn activate(id: &str) -> ExtensionEvent {
    ExtensionEvent::ActivateCluster(ActivateClusterLink {
        cloud_url: "https://kaas.example.com".into(),
        namespace: "team-a".into(),
        cluster_name: "c1".into(),
        cluster_id: id.into(),
    })
}

fn oauth(code: &str) -> ExtensionEvent {
    ExtensionEvent::OauthCode(OAuthCallback::with_code(code, "sso-auth"))
}

/// Forward every delivery of `event_type` into a channel.
fn collect(bus: &EventBus, event_type: EventType) -> (HandlerId, mpsc::UnboundedReceiver<ExtensionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = bus.add_handler(event_type, move |event| {
        let _ = tx.send(event);
    });
    (id, rx)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<ExtensionEvent>) -> anyhow::Result<ExtensionEvent> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("handler channel closed"))
}

#[tokio::test]
async fn early_events_wait_for_first_handler() -> anyhow::Result<()> {
    let bus = EventBus::new(DEFAULT_QUEUE_CAPACITY);
    bus.dispatch(activate("u1"))?;
    bus.dispatch(activate("u2"))?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!bus.is_open());
    assert_eq!(bus.pending(), 2);

    let (_, mut rx) = collect(&bus, EventType::ActivateCluster);
    assert_eq!(next(&mut rx).await?, activate("u1"));
    assert_eq!(next(&mut rx).await?, activate("u2"));
    Ok(())
}

#[tokio::test]
async fn unmatched_event_is_consumed_and_never_redelivered() -> anyhow::Result<()> {
    let bus = EventBus::new(DEFAULT_QUEUE_CAPACITY);
    let (_, mut activations) = collect(&bus, EventType::ActivateCluster);

    bus.dispatch(oauth("stale"))?;
    // Ordering marker: once this arrives, the oauth event was already taken.
    bus.dispatch(activate("marker"))?;
    assert_eq!(next(&mut activations).await?, activate("marker"));

    let (_, mut codes) = collect(&bus, EventType::OauthCode);
    bus.dispatch(oauth("fresh"))?;
    assert_eq!(next(&mut codes).await?, oauth("fresh"));
    Ok(())
}

#[tokio::test]
async fn every_matching_handler_receives_the_event() -> anyhow::Result<()> {
    let bus = EventBus::new(DEFAULT_QUEUE_CAPACITY);
    let (_, mut a) = collect(&bus, EventType::OauthCode);
    let (_, mut b) = collect(&bus, EventType::OauthCode);
    bus.dispatch(oauth("x"))?;
    assert_eq!(next(&mut a).await?, oauth("x"));
    assert_eq!(next(&mut b).await?, oauth("x"));
    Ok(())
}

#[tokio::test]
async fn removed_handler_stops_receiving() -> anyhow::Result<()> {
    let bus = EventBus::new(DEFAULT_QUEUE_CAPACITY);
    let (first, mut first_rx) = collect(&bus, EventType::OauthCode);
    let (_, mut second_rx) = collect(&bus, EventType::OauthCode);
    assert!(bus.remove_handler(first));
    assert!(!bus.remove_handler(first));

    bus.dispatch(oauth("y"))?;
    assert_eq!(next(&mut second_rx).await?, oauth("y"));
    assert!(first_rx.try_recv().is_err());
    // Gate stays open after removal.
    assert!(bus.is_open());
    Ok(())
}

#[tokio::test]
async fn full_buffer_rejects_dispatch() -> anyhow::Result<()> {
    let bus = EventBus::new(1);
    bus.dispatch(activate("u1"))?;
    assert_eq!(bus.dispatch(activate("u2")), Err(DispatchError::Full));
    Ok(())
}

#[test]
fn envelope_wire_shape() -> anyhow::Result<()> {
    let json = serde_json::json!({
        "type": "addClusters",
        "data": {
            "cloudUrl": "https://kaas.example.com",
            "username": "alice",
            "tokens": {
                "id_token": "a.b.c",
                "expires_in": 300,
                "refresh_token": "r",
                "refresh_expires_in": 1800
            },
            "onlyNamespaces": ["team-a"]
        }
    });
    let event: ExtensionEvent = serde_json::from_value(json)?;
    assert_eq!(event.event_type(), EventType::AddClusters);
    let ExtensionEvent::AddClusters(link) = event else {
        anyhow::bail!("wrong variant");
    };
    assert_eq!(link.only_namespaces, Some(vec!["team-a".to_owned()]));
    assert_eq!(link.tokens.refresh_expires_in, Some(1800));
    Ok(())
}

#[test]
fn callback_error_prefers_description() {
    let cb = OAuthCallback {
        error: Some("access_denied".into()),
        error_description: Some("user said no".into()),
        ..Default::default()
    };
    let err = cb.code_or_error().err().map(|e| e.message);
    assert_eq!(err.as_deref(), Some("authorization failed: user said no"));

    let empty = OAuthCallback::default();
    assert!(empty.code_or_error().is_err());
    assert_eq!(OAuthCallback::with_code("c", "s").code_or_error().ok(), Some("c"));
}
