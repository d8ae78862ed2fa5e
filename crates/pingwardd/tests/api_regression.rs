//! API regression tests.
//!
//! Drives the assembled router the way the daemon serves it: client set
//! replacement, heartbeats, activation, call forwarding and on-demand
//! registry refresh.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pingward_api::build_router;
use pingward_core::PingwardConfig;
use pingward_fetch::{ReqwestTransport, ResilientFetch};
use pingward_health::{ScriptedRemote, Watchdog};
use pingward_notify::{Channel, MemorySink};

struct Fixture {
    router: axum::Router,
    watchdog: Watchdog,
    remote: Arc<ScriptedRemote>,
    sink: Arc<MemorySink>,
}

fn fixture(config: PingwardConfig) -> Fixture {
    let sink = Arc::new(MemorySink::new());
    let fetch = ResilientFetch::new(Arc::new(ReqwestTransport::default()), sink.clone());
    let remote = Arc::new(ScriptedRemote::new());
    let watchdog = Watchdog::new(&config, fetch, remote.clone(), sink.clone());
    let router = build_router(watchdog.clone(), "pingward-test");
    Fixture {
        router,
        watchdog,
        remote,
        sink,
    }
}

async fn call(router: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn put_clients(body: Value) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri("/clients")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn two_clients() -> Value {
    serde_json::json!([
        {"clientId": "alpha", "repl": "https://alpha.example", "deployKey": "https://deploy.example/alpha"},
        {"clientId": "beta", "endpoint": "https://beta.example", "restartKey": "https://deploy.example/beta"}
    ])
}

#[tokio::test]
async fn banner_reports_service() {
    let f = fixture(PingwardConfig::default());
    let (status, body) = call(&f.router, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["service"], "pingward-test");
    assert_eq!(body["data"]["clients"], 0);
}

#[tokio::test]
async fn replace_then_list_clients() {
    let f = fixture(PingwardConfig::default());
    let (status, body) = call(&f.router, put_clients(two_clients())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["added"], 2);

    let (status, body) = call(&f.router, get("/clients")).await;
    assert_eq!(status, StatusCode::OK);
    let clients = body["data"].as_array().unwrap();
    assert_eq!(clients.len(), 2);
    assert_eq!(clients[0]["clientId"], "alpha");
    assert_eq!(clients[0]["phase"], "healthy");
    assert_eq!(clients[1]["restartKey"], "https://deploy.example/beta");

    let (status, body) = call(&f.router, get("/clients/beta")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["endpoint"], "https://beta.example");

    let (status, body) = call(&f.router, get("/clients/gamma")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn heartbeat_statuses() {
    let f = fixture(PingwardConfig::default());
    call(&f.router, put_clients(two_clients())).await;

    let (status, body) = call(&f.router, get("/receive?clientId=alpha")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["lastHeartbeatAt"].is_u64());

    let (status, _) = call(&f.router, get("/receive?clientId=ghost")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(f.watchdog.registry().len().await, 2);

    let (status, body) = call(&f.router, get("/receive")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "missing query parameter: clientId");
}

#[tokio::test]
async fn activation_flow() {
    let f = fixture(PingwardConfig::default());
    call(&f.router, put_clients(two_clients())).await;
    f.remote.set_process_id("https://alpha.example", "proc-9");

    let (status, body) = call(&f.router, get("/tgclientoff/proc-1?clientId=alpha")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], false);
    assert!(f.watchdog.sequencer().is_empty());

    let (status, body) = call(&f.router, get("/tgclientoff/proc-9?clientId=alpha")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], true);
    assert_eq!(f.watchdog.sequencer().len(), 1);

    let (_, body) = call(&f.router, get("/clients/alpha")).await;
    assert_eq!(body["data"]["queued"], true);

    let (status, _) = call(&f.router, get("/tgclientoff/proc-9?clientId=ghost")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn call_forwarding_posts_event() {
    let events = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/schedule"))
        .and(body_json(serde_json::json!({
            "chatId": "chat-1",
            "profile": "alpha",
            "type": "video"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&events)
        .await;

    let mut config = PingwardConfig::default();
    config.upstream.events_url = Some(format!("{}/schedule", events.uri()));
    let f = fixture(config);
    call(&f.router, put_clients(two_clients())).await;

    let (status, body) = call(
        &f.router,
        get("/requestcall?clientId=alpha&chatId=chat-1&type=video"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], true);

    let (status, _) = call(&f.router, get("/requestcall?clientId=alpha&type=video")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn refresh_map_pulls_upstream_list() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(two_clients()))
        .expect(1)
        .mount(&upstream)
        .await;

    let mut config = PingwardConfig::default();
    config.upstream.registry_url = Some(format!("{}/clients", upstream.uri()));
    config.notify.service_name = "pingward-eu".to_string();
    let f = fixture(config);

    let (status, body) = call(&f.router, get("/refreshMap")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["added"], 2);
    assert_eq!(f.watchdog.registry().ids().await, vec!["alpha", "beta"]);
    assert_eq!(
        f.sink.texts(Channel::Updates),
        vec!["Refreshed Map :: pingward-eu"]
    );
}

#[tokio::test]
async fn refresh_map_without_source() {
    let f = fixture(PingwardConfig::default());
    let (status, body) = call(&f.router, get("/refreshMap")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "no registry URL configured");
}
