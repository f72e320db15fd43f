mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::*;
use offgrid_agent::{Agent, AgentState, Classification, LifecycleManager, ResponseSource};
use offgrid_core::{AgentMessage, ArtifactStore, Destination, Error, MutationDraft, MutationQueue, Request};

fn mutation(method: &str, url: &str) -> MutationDraft {
    MutationDraft {
        url: url.into(),
        method: method.into(),
        headers: BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())]),
        body: Some(r#"{"username":"offline"}"#.into()),
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn install_prewarms_manifest_under_current_generation() {
    let fx = fixture(&config("v1", &["/", "/app.js"])).await;
    fx.network.respond("GET", "/", html("<html>root</html>"));
    fx.network.respond("GET", "/app.js", html("console.log(1)"));

    let report = fx.agent.install().await.unwrap();

    assert_eq!(report.generation, "v1");
    assert_eq!(report.stored, vec!["http://localhost:3000/", "http://localhost:3000/app.js"]);
    let root = fx.db.get_artifact("v1", &key("/")).await.unwrap().unwrap();
    let script = fx.db.get_artifact("v1", &key("/app.js")).await.unwrap().unwrap();
    assert_eq!(root.response.text(), "<html>root</html>");
    assert_eq!(script.response.text(), "console.log(1)");
    assert_eq!(fx.agent.state().await, AgentState::Ready);
}

#[tokio::test]
async fn cached_read_survives_network_loss() {
    let fx = serving("v1").await;
    fx.network.respond("GET", "/data", json(200, r#"{"items":[1,2,3]}"#));

    let first = fx.agent.fetch(Request::get("/data")).await;
    assert_eq!(first.source, ResponseSource::Network);
    first.cache_write.expect("200 same-origin response is cached").await.unwrap();

    fx.network.set_offline(true);
    let calls_before = fx.network.call_count();
    let second = fx.agent.fetch(Request::get("/data")).await;

    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.response.body, first.response.body);
    assert_eq!(fx.network.call_count(), calls_before);
}

#[tokio::test]
async fn offline_mutation_gets_synthetic_503_without_touching_cache() {
    let fx = serving("v1").await;
    fx.network.set_offline(true);

    let request = Request::new("POST", "/api/register").with_body(r#"{"username":"a"}"#);
    let routed = fx.agent.fetch(request).await;

    assert_eq!(routed.classification, Classification::NetworkOnly);
    assert_eq!(routed.source, ResponseSource::Synthetic);
    assert_eq!(routed.response.status, 503);
    let body: serde_json::Value = serde_json::from_slice(&routed.response.body).unwrap();
    assert_eq!(body["error"], "Network request failed");
    assert!(routed.cache_write.is_none());
    assert_eq!(fx.store.reads(), 0);
    assert_eq!(fx.store.writes(), 0);
}

#[tokio::test]
async fn drain_keeps_failed_mutation_and_delivers_the_rest() {
    let fx = serving("v1").await;
    let m1 = fx.agent.message(AgentMessage::SaveMutation { mutation: mutation("POST", "/api/x") }).await.unwrap();
    let m2 = fx.agent.message(AgentMessage::SaveMutation { mutation: mutation("POST", "/api/y") }).await.unwrap();
    fx.network.fail("POST", "/api/x");
    fx.network.respond("POST", "/api/y", json(201, "{}"));

    let report = fx.agent.sync("background-sync").await.unwrap().unwrap();

    assert_eq!(report.attempted, vec![m1.id.clone(), m2.id.clone()]);
    assert_eq!(report.delivered, vec![m2.id]);
    assert_eq!(report.retained, vec![m1.id.clone()]);
    let pending = fx.db.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, m1.id);
}

#[tokio::test]
async fn activation_purges_every_other_generation() {
    let db = offgrid_core::AgentDb::open_in_memory().await.unwrap();
    let network = ScriptedNetwork::new();
    network.respond("GET", "/", html("v1 root"));
    network.respond("GET", "/app.js", html("v1 app"));

    let v1 = fixture_on(&config("v1", &["/", "/app.js"]), db.clone(), network.clone()).await;
    v1.agent.start().await.unwrap();

    network.respond("GET", "/", html("v2 root"));
    network.respond("GET", "/app.js", html("v2 app"));
    let v2 = fixture_on(&config("v2", &["/", "/app.js"]), db.clone(), network.clone()).await;
    v2.agent.install().await.unwrap();
    assert_eq!(db.generations().await.unwrap(), vec!["v1".to_string(), "v2".to_string()]);

    let report = v2.agent.activate().await.unwrap();

    assert_eq!(report.purged, vec!["v1".to_string()]);
    assert_eq!(report.artifacts_removed, 2);
    assert!(db.list_artifacts("v1").await.unwrap().is_empty());
    let v2_artifacts = db.list_artifacts("v2").await.unwrap();
    assert_eq!(v2_artifacts.len(), 2);
    assert!(v2_artifacts.iter().all(|artifact| artifact.response.text().starts_with("v2")));
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn network_only_requests_never_read_or_write_the_store() {
    let fx = serving("v1").await;
    fx.network.respond("GET", "/api/profile", json(200, r#"{"name":"a"}"#));
    fx.network.respond("PUT", "/settings", json(200, "{}"));
    fx.network.respond("DELETE", "/data", json(204, ""));

    let requests = [
        Request::get("/api/profile"),
        Request::new("PUT", "/settings"),
        Request::new("DELETE", "/data"),
        Request::new("POST", "/api/login"),
        Request::get(""),
    ];
    for request in requests {
        let routed = fx.agent.fetch(request).await;
        assert_eq!(routed.classification, Classification::NetworkOnly);
        assert!(routed.cache_write.is_none());
    }
    fx.agent.settle().await;

    assert_eq!(fx.store.reads(), 0);
    assert_eq!(fx.store.writes(), 0);
}

#[tokio::test]
async fn network_only_passes_status_through_unmodified() {
    let fx = serving("v1").await;
    fx.network.respond("POST", "/api/register", json(409, r#"{"detail":"taken"}"#));

    let routed = fx.agent.fetch(Request::new("POST", "/api/register")).await;

    assert_eq!(routed.source, ResponseSource::Network);
    assert_eq!(routed.response.status, 409);
    assert_eq!(routed.response.text(), r#"{"detail":"taken"}"#);
}

#[tokio::test]
async fn caller_and_store_bodies_are_independent() {
    let fx = serving("v1").await;
    fx.network.respond("GET", "/logo.svg", html("<svg/>"));

    let routed = fx.agent.fetch(Request::get("/logo.svg")).await;
    routed.cache_write.unwrap().await.unwrap();

    let caller_body = routed.response.body.to_vec();
    drop(routed.response);
    let stored = fx.db.get_artifact("v1", &key("/logo.svg")).await.unwrap().unwrap();

    assert_eq!(caller_body, b"<svg/>");
    assert_eq!(stored.response.body.to_vec(), b"<svg/>");
}

#[tokio::test]
async fn drain_replays_in_enqueue_order_past_a_failure() {
    let fx = serving("v1").await;
    for path in ["/api/t1", "/api/t2", "/api/t3"] {
        fx.agent.queue().enqueue(mutation("POST", path)).await.unwrap();
        fx.network.respond("POST", path, json(200, "{}"));
    }
    fx.network.fail("POST", "/api/t2");
    let calls_before = fx.network.call_count();

    fx.agent.sync("background-sync").await.unwrap().unwrap();

    let replayed = fx.network.calls().split_off(calls_before);
    assert_eq!(replayed, vec!["POST /api/t1", "POST /api/t2", "POST /api/t3"]);
    let remaining: Vec<String> = fx.db.pending().await.unwrap().into_iter().map(|m| m.url).collect();
    assert_eq!(remaining, vec!["/api/t2"]);
}

#[tokio::test]
async fn replay_sends_exact_method_headers_and_body() {
    let fx = serving("v1").await;
    let queued = fx.agent.queue().enqueue(mutation("PATCH", "/api/profile")).await.unwrap();
    let request = queued.to_request();

    assert_eq!(request.method, "PATCH");
    assert_eq!(request.url, "/api/profile");
    assert_eq!(request.headers, vec![("Content-Type".to_string(), "application/json".to_string())]);
    assert_eq!(request.body.as_deref(), Some(&br#"{"username":"offline"}"#[..]));
}

#[tokio::test]
async fn stale_generation_is_not_retrievable_after_activation() {
    let db = offgrid_core::AgentDb::open_in_memory().await.unwrap();
    let network = ScriptedNetwork::new();
    network.respond("GET", "/", html("root"));
    network.respond("GET", "/old", html("old page"));

    let v1 = fixture_on(&config("v1", &["/", "/old"]), db.clone(), network.clone()).await;
    v1.agent.start().await.unwrap();

    let v2 = fixture_on(&config("v2", &["/"]), db.clone(), network.clone()).await;
    v2.agent.start().await.unwrap();

    assert!(db.get_artifact("v1", &key("/old")).await.unwrap().is_none());
    network.set_offline(true);
    let routed = v2.agent.fetch(Request::get("/old")).await;
    assert_eq!(routed.source, ResponseSource::Synthetic);
    assert_eq!(routed.response.status, 503);
}

// ============================================================================
// Router edge cases
// ============================================================================

#[tokio::test]
async fn non_200_and_cross_origin_responses_are_not_cached() {
    let fx = serving("v1").await;
    fx.network.respond("GET", "/missing", json(404, "{}"));
    fx.network.respond("GET", "/partial", json(206, "{}"));
    fx.network.respond("GET", "https://cdn.example.com/lib.js", cross_origin("lib"));

    for url in ["/missing", "/partial", "https://cdn.example.com/lib.js"] {
        let routed = fx.agent.fetch(Request::get(url)).await;
        assert_eq!(routed.classification, Classification::CacheFirst);
        assert_eq!(routed.source, ResponseSource::Network);
        assert!(routed.cache_write.is_none(), "{url} must not be cached");
    }
    fx.agent.settle().await;

    assert_eq!(fx.store.writes(), 0);
    assert_eq!(fx.db.list_artifacts("v1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_navigation_falls_back_to_start_page() {
    let fx = serving("v1").await;
    fx.network.set_offline(true);

    let routed = fx.agent.fetch(Request::get("/profile").with_destination(Destination::Document)).await;

    assert_eq!(routed.source, ResponseSource::OfflineFallback);
    assert_eq!(routed.response.text(), "<h1>start</h1>");
}

#[tokio::test]
async fn failed_subresource_gets_plain_503() {
    let fx = serving("v1").await;
    fx.network.set_offline(true);

    let routed = fx.agent.fetch(Request::get("/image.png")).await;

    assert_eq!(routed.source, ResponseSource::Synthetic);
    assert_eq!(routed.response.status, 503);
    assert_eq!(routed.response.text(), "Network error");
}

#[tokio::test]
async fn failed_navigation_without_start_page_gets_503() {
    let fx = fixture(&config("v1", &[])).await;
    fx.agent.start().await.unwrap();
    fx.network.set_offline(true);

    let routed = fx.agent.fetch(Request::get("/").with_destination(Destination::Document)).await;

    assert_eq!(routed.source, ResponseSource::Synthetic);
    assert_eq!(routed.response.status, 503);
}

#[tokio::test]
async fn storage_faults_degrade_to_network() {
    let network = ScriptedNetwork::new();
    network.respond("GET", "/data", json(200, "[]"));
    let db = offgrid_core::AgentDb::open_in_memory().await.unwrap();
    let store = Arc::new(BrokenStore { active: Some("v1".into()) });
    let agent = Agent::new(&config("v1", &["/"]), network.clone(), store, Arc::new(db)).await.unwrap();

    let routed = agent.fetch(Request::get("/data")).await;
    assert_eq!(routed.source, ResponseSource::Network);
    assert_eq!(routed.response.text(), "[]");

    routed.cache_write.expect("write attempted").await.expect("write failure is swallowed");
}

#[tokio::test]
async fn duplicate_in_flight_requests_both_write() {
    let fx = serving("v1").await;
    fx.network.respond("GET", "/feed", json(200, "latest"));

    let (a, b) = tokio::join!(fx.agent.fetch(Request::get("/feed")), fx.agent.fetch(Request::get("/feed")));
    fx.agent.settle().await;

    assert_eq!(a.source, ResponseSource::Network);
    assert_eq!(b.source, ResponseSource::Network);
    assert_eq!(fx.store.writes(), 2);
    assert_eq!(fx.db.list_artifacts("v1").await.unwrap().len(), 2);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn install_failure_stores_nothing_and_keeps_previous_generation() {
    let db = offgrid_core::AgentDb::open_in_memory().await.unwrap();
    let network = ScriptedNetwork::new();
    network.respond("GET", "/", html("v1 root"));
    let v1 = fixture_on(&config("v1", &["/"]), db.clone(), network.clone()).await;
    v1.agent.start().await.unwrap();

    network.respond("GET", "/", html("v2 root"));
    network.respond("GET", "/app.js", json(500, "boom"));
    let v2 = fixture_on(&config("v2", &["/", "/app.js"]), db.clone(), network.clone()).await;

    let err = v2.agent.install().await.unwrap_err();

    assert!(matches!(err, Error::ManifestInstallFailed { ref url, .. } if url == "http://localhost:3000/app.js"));
    assert_eq!(v2.agent.state().await, AgentState::Idle);
    assert!(db.list_artifacts("v2").await.unwrap().is_empty());
    assert!(matches!(v2.agent.activate().await, Err(Error::InvalidState(_))));

    network.set_offline(true);
    let routed = v2.agent.fetch(Request::get("/")).await;
    assert_eq!(routed.source, ResponseSource::Cache);
    assert_eq!(routed.response.text(), "v1 root");
}

#[tokio::test]
async fn reads_cached_after_failed_upgrade_are_served_offline() {
    let db = offgrid_core::AgentDb::open_in_memory().await.unwrap();
    let network = ScriptedNetwork::new();
    network.respond("GET", "/", html("v1 root"));
    let v1 = fixture_on(&config("v1", &["/"]), db.clone(), network.clone()).await;
    v1.agent.start().await.unwrap();

    network.respond("GET", "/app.js", json(500, "boom"));
    let v2 = fixture_on(&config("v2", &["/", "/app.js"]), db.clone(), network.clone()).await;
    assert!(v2.agent.start().await.is_err());

    network.respond("GET", "/data", json(200, r#"{"fresh":true}"#));
    let first = v2.agent.fetch(Request::get("/data")).await;
    assert_eq!(first.source, ResponseSource::Network);
    first.cache_write.expect("200 same-origin response is cached").await.unwrap();

    network.set_offline(true);
    let second = v2.agent.fetch(Request::get("/data")).await;

    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.response.text(), r#"{"fresh":true}"#);
    assert_eq!(db.generations().await.unwrap(), vec!["v1".to_string()]);
}

#[tokio::test]
async fn never_activated_agent_still_serves_what_it_cached() {
    let fx = fixture(&config("v1", &["/"])).await;
    fx.network.set_offline(true);
    assert!(fx.agent.start().await.is_err());

    fx.network.set_offline(false);
    fx.network.respond("GET", "/data", json(200, "[1]"));
    let first = fx.agent.fetch(Request::get("/data")).await;
    first.cache_write.expect("200 same-origin response is cached").await.unwrap();

    fx.network.set_offline(true);
    let second = fx.agent.fetch(Request::get("/data")).await;

    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.response.text(), "[1]");
    assert!(!fx.db.is_installed("v1").await.unwrap());
    assert!(matches!(fx.agent.activate().await, Err(Error::InvalidState(_))));
}

#[tokio::test]
async fn activating_an_uninstalled_generation_is_refused() {
    let db = offgrid_core::AgentDb::open_in_memory().await.unwrap();
    let network = ScriptedNetwork::new();
    network.respond("GET", "/", html("v1 root"));
    let v1 = fixture_on(&config("v1", &["/"]), db.clone(), network.clone()).await;
    v1.agent.start().await.unwrap();

    let origin = url::Url::parse(ORIGIN).unwrap();
    let lifecycle = LifecycleManager::new(network.clone(), Arc::new(db.clone()), origin, "v2");
    let err = lifecycle.activate().await.unwrap_err();

    assert!(matches!(err, Error::InvalidState(_)));
    assert_eq!(db.active_generation().await.unwrap().as_deref(), Some("v1"));
    assert_eq!(db.generations().await.unwrap(), vec!["v1".to_string()]);
    assert_eq!(db.list_artifacts("v1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn late_cache_write_does_not_resurrect_purged_generation() {
    let db = offgrid_core::AgentDb::open_in_memory().await.unwrap();
    let network = ScriptedNetwork::new();
    network.respond("GET", "/", html("root"));
    let v1 = fixture_on(&config("v1", &["/"]), db.clone(), network.clone()).await;
    v1.agent.start().await.unwrap();

    let v2 = fixture_on(&config("v2", &["/"]), db.clone(), network.clone()).await;
    v2.agent.start().await.unwrap();

    network.respond("GET", "/late", json(200, "late"));
    let routed = v1.agent.fetch(Request::get("/late")).await;
    routed.cache_write.expect("write attempted").await.expect("write failure is swallowed");

    assert_eq!(db.generations().await.unwrap(), vec!["v2".to_string()]);
    assert!(db.get_artifact("v1", &key("/late")).await.unwrap().is_none());
}

#[tokio::test]
async fn install_fails_when_network_is_down() {
    let fx = fixture(&config("v1", &["/"])).await;
    fx.network.set_offline(true);

    let err = fx.agent.start().await.unwrap_err();

    assert!(matches!(err, Error::ManifestInstallFailed { .. }));
    assert!(fx.db.generations().await.unwrap().is_empty());
}

#[tokio::test]
async fn lifecycle_transitions_are_ordered() {
    let fx = fixture(&config("v1", &["/"])).await;
    fx.network.respond("GET", "/", html("root"));

    assert_eq!(fx.agent.state().await, AgentState::Idle);
    assert!(matches!(fx.agent.activate().await, Err(Error::InvalidState(_))));

    fx.agent.install().await.unwrap();
    assert!(matches!(fx.agent.install().await, Err(Error::InvalidState(_))));

    fx.agent.activate().await.unwrap();
    let status = fx.agent.status().await;
    assert_eq!(status.state, AgentState::Serving);
    assert_eq!(status.serving_generation.as_deref(), Some("v1"));
    assert_eq!(status.pending_mutations, Some(0));
}

#[tokio::test]
async fn restart_serves_previously_activated_generation() {
    let db = offgrid_core::AgentDb::open_in_memory().await.unwrap();
    let network = ScriptedNetwork::new();
    network.respond("GET", "/", html("root"));
    let first = fixture_on(&config("v1", &["/"]), db.clone(), network.clone()).await;
    first.agent.start().await.unwrap();

    let second = fixture_on(&config("v1", &["/"]), db, network.clone()).await;
    network.set_offline(true);

    assert_eq!(second.agent.state().await, AgentState::Idle);
    let routed = second.agent.fetch(Request::get("/")).await;
    assert_eq!(routed.source, ResponseSource::Cache);
}

// ============================================================================
// Queue signals
// ============================================================================

#[tokio::test]
async fn sync_with_other_tag_is_ignored() {
    let fx = serving("v1").await;
    fx.agent.queue().enqueue(mutation("POST", "/api/x")).await.unwrap();
    fx.network.respond("POST", "/api/x", json(200, "{}"));

    assert!(fx.agent.sync("periodic-refresh").await.unwrap().is_none());
    assert_eq!(fx.db.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn fetch_failures_are_never_queued_automatically() {
    let fx = serving("v1").await;
    fx.network.set_offline(true);

    fx.agent.fetch(Request::new("POST", "/api/register")).await;

    assert_eq!(fx.db.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn non_ok_replay_is_retained() {
    let fx = serving("v1").await;
    let queued = fx.agent.queue().enqueue(mutation("POST", "/api/x")).await.unwrap();
    fx.network.respond("POST", "/api/x", json(500, "{}"));

    let report = fx.agent.sync("background-sync").await.unwrap().unwrap();

    assert_eq!(report.retained, vec![queued.id]);
    assert!(report.delivered.is_empty());
}

#[tokio::test]
async fn event_loop_serves_handle_requests() {
    let fx = fixture(&config("v1", &["/"])).await;
    fx.network.respond("GET", "/", html("root"));
    fx.network.respond("POST", "/api/x", json(200, "{}"));
    let (handle, task) = fx.agent.clone().spawn(16);

    handle.install().await.unwrap();
    handle.activate().await.unwrap();
    let routed = handle.fetch(Request::get("/")).await.unwrap();
    assert_eq!(routed.source, ResponseSource::Cache);

    let message = serde_json::from_str::<AgentMessage>(
        r#"{"type":"SAVE_MUTATION","mutation":{"url":"/api/x","method":"POST","body":"{}"}}"#,
    )
    .unwrap();
    handle.message(message).await.unwrap();
    let report = handle.sync("background-sync").await.unwrap().unwrap();
    assert_eq!(report.delivered.len(), 1);

    let status = handle.status().await.unwrap();
    assert_eq!(status.state, AgentState::Serving);
    assert_eq!(status.pending_mutations, Some(0));

    drop(handle);
    task.await.unwrap();
}
