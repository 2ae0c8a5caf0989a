//! Invocation through the store once capabilities are installed.
#![cfg(unix)]

mod common;

use std::time::{Duration, Instant};

use common::{Fixture, agents_doc, script_agent};
use hangar_core::{CapabilityId, CapabilityKind};
use hangar_store::{ErrorKind, InvocationRequest};
use serde_json::json;

const AGENT: CapabilityKind = CapabilityKind::Agent;

const TREE: &[(&str, &str)] = &[
    (
        "agents/echo/main.sh",
        "read line\necho '{\"text\": \"hello from echo\"}'\n",
    ),
    ("agents/slow/main.sh", "exec sleep 30\n"),
];

async fn fixture() -> Fixture {
    let mut fx = Fixture::new(TREE).await;
    fx.server
        .mock("GET", "/registry.json")
        .with_status(200)
        .with_body(agents_doc(json!({
            "echo": script_agent("agents/echo", true),
            "slow": script_agent("agents/slow", true),
        })))
        .create_async()
        .await;
    fx.server
        .mock("GET", "/empty.json")
        .with_status(200)
        .with_body(agents_doc(json!({})))
        .create_async()
        .await;
    fx
}

#[tokio::test(flavor = "multi_thread")]
async fn installed_capability_answers() {
    let fx = fixture().await;
    let store = fx.store();
    let echo = CapabilityId::from_static("echo");
    store.install(AGENT, &echo).await.unwrap();

    let resp = store.invoke(AGENT, &echo, &InvocationRequest::new("hi")).await;
    assert!(resp.is_ok(), "{resp:?}");
    assert_eq!(resp.text, "hello from echo");
}

#[tokio::test(flavor = "multi_thread")]
async fn disabled_capability_is_refused() {
    let fx = fixture().await;
    let store = fx.store();
    let echo = CapabilityId::from_static("echo");
    store.install(AGENT, &echo).await.unwrap();
    store.set_enabled(AGENT, &echo, false).unwrap();

    let resp = store.invoke(AGENT, &echo, &InvocationRequest::new("hi")).await;
    assert_eq!(resp.error, Some(ErrorKind::CapabilityDisabled));
}

#[tokio::test(flavor = "multi_thread")]
async fn unregistered_install_stays_invocable() {
    let fx = fixture().await;
    let store = fx.store();
    let echo = CapabilityId::from_static("echo");
    store.install(AGENT, &echo).await.unwrap();

    let registry = store
        .set_registry_url(AGENT, &format!("{}/empty.json", fx.server.url()))
        .await
        .unwrap();
    assert!(registry.is_empty());

    let listing = store.list(AGENT).await;
    assert_eq!(listing.len(), 1);
    assert!(!listing[0].registered);
    assert!(listing[0].installed);

    let resp = store.invoke(AGENT, &echo, &InvocationRequest::new("hi")).await;
    assert!(resp.is_ok(), "{resp:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_is_bounded() {
    let fx = fixture().await;
    let store = fx.store();
    let slow = CapabilityId::from_static("slow");
    store.install(AGENT, &slow).await.unwrap();

    let timeout = Duration::from_millis(300);
    let started = Instant::now();
    let resp = store
        .invoke_with_timeout(AGENT, &slow, &InvocationRequest::new("hi"), timeout)
        .await;
    assert_eq!(resp.error, Some(ErrorKind::InvocationTimeout));
    let elapsed = started.elapsed();
    assert!(elapsed < timeout.saturating_add(Duration::from_secs(1)), "took {elapsed:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_refuses_new_invocations() {
    let fx = fixture().await;
    let store = fx.store();
    let echo = CapabilityId::from_static("echo");
    store.install(AGENT, &echo).await.unwrap();

    store.shutdown();
    let resp = store.invoke(AGENT, &echo, &InvocationRequest::new("hi")).await;
    assert_eq!(resp.error, Some(ErrorKind::InvocationCancelled));
}
