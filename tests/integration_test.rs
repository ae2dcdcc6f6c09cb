use axum::http::StatusCode;
use influence_engine::api::{self, AppState};
use influence_engine::config::EngineConfig;
use influence_engine::db::init_db;
use influence_engine::{Engine, Repository};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

const T0: i64 = 1_700_000_000_000;

struct TestApp {
    app: axum::Router,
    engine: Arc<Engine>,
    db_path: String,
    _temp_dir: TempDir,
}

async fn setup_test_app() -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();

    let engine = start_engine(&db_path).await;
    TestApp {
        app: api::create_router(AppState::new(Arc::clone(&engine))),
        engine,
        db_path,
        _temp_dir: temp_dir,
    }
}

async fn start_engine(db_path: &str) -> Arc<Engine> {
    let pool = init_db(db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));
    let config = EngineConfig {
        shard_count: 2,
        ..EngineConfig::default()
    };
    let engine = Engine::start(config, repo);
    engine.bootstrap().await.expect("bootstrap failed");
    engine
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = axum::http::Request::builder().method(method).uri(uri);
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(axum::body::Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(axum::body::Body::empty()).unwrap(),
    };

    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn register(app: &axum::Router, id: &str, persona: &str, economic: f64) {
    let (status, body) = send(
        app,
        "PUT",
        &format!("/v1/accounts/{}", id),
        Some(json!({
            "personaType": persona,
            "alignment": { "economicPosition": economic, "socialPosition": 50.0 }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "register {}: {}", id, body);
}

fn follow(seq: u64, at: i64, follower: &str, account: &str) -> Value {
    json!({
        "seq": seq,
        "timestamp": at,
        "actorId": follower,
        "subjectId": account,
        "type": "followChanged",
        "followed": true
    })
}

fn like(seq: u64, at: i64, actor: &str, author: &str, post: &str) -> Value {
    json!({
        "seq": seq,
        "timestamp": at,
        "actorId": actor,
        "subjectId": post,
        "type": "reactionAdded",
        "authorId": author,
        "kind": "like"
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let test_app = setup_test_app().await;
    let (status, body) = send(&test_app.app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&test_app.app, "GET", "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_account_registration_versions() {
    let test_app = setup_test_app().await;
    register(&test_app.app, "alice", "politician", 20.0).await;

    let (status, body) = send(
        &test_app.app,
        "PUT",
        "/v1/accounts/alice",
        Some(json!({
            "personaType": "politician",
            "alignment": { "economicPosition": 70.0, "socialPosition": 40.0 }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["alignmentVersion"], 2);
    assert_eq!(body["alignment"]["economicPosition"], 70.0);
}

#[tokio::test]
async fn test_account_registration_validation() {
    let test_app = setup_test_app().await;

    let (status, body) = send(
        &test_app.app,
        "PUT",
        "/v1/accounts/alice",
        Some(json!({
            "personaType": "wizard",
            "alignment": { "economicPosition": 50.0, "socialPosition": 50.0 }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = send(
        &test_app.app,
        "PUT",
        "/v1/accounts/alice",
        Some(json!({
            "personaType": "journalist",
            "alignment": { "economicPosition": 150.0, "socialPosition": 50.0 }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("economicPosition"));
}

#[tokio::test]
async fn test_submit_event_and_idempotent_resubmit() {
    let test_app = setup_test_app().await;
    register(&test_app.app, "alice", "politician", 30.0).await;

    let event = follow(1, T0, "bob", "alice");
    let (status, body) = send(&test_app.app, "POST", "/v1/events", Some(event.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["shardKey"], "account:alice");
    assert_eq!(body["seq"], 1);

    let (status, body) = send(&test_app.app, "POST", "/v1/events", Some(event)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "duplicate");

    let (_, metrics) = send(&test_app.app, "GET", "/v1/accounts/alice/metrics", None).await;
    assert_eq!(metrics["followerCount"], 1);

    let (_, stats) = send(&test_app.app, "GET", "/v1/admin/stats", None).await;
    assert_eq!(stats["ingest"]["accepted"], 1);
    assert_eq!(stats["ingest"]["duplicates"], 1);
}

#[tokio::test]
async fn test_out_of_order_sequence_rejected() {
    let test_app = setup_test_app().await;
    register(&test_app.app, "alice", "politician", 30.0).await;

    let (status, _) = send(&test_app.app, "POST", "/v1/events", Some(follow(4, T0, "bob", "alice"))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&test_app.app, "POST", "/v1/events", Some(follow(2, T0 + 1_000, "carol", "alice"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (_, metrics) = send(&test_app.app, "GET", "/v1/accounts/alice/metrics", None).await;
    assert_eq!(metrics["followerCount"], 1);
    let (_, stats) = send(&test_app.app, "GET", "/v1/admin/stats", None).await;
    assert_eq!(stats["ingest"]["duplicates"], 0);
}

#[tokio::test]
async fn test_duplicate_reaction_conflict() {
    let test_app = setup_test_app().await;
    register(&test_app.app, "alice", "politician", 30.0).await;

    let post = json!({
        "seq": 1,
        "timestamp": T0,
        "actorId": "alice",
        "subjectId": "p1",
        "type": "postPublished"
    });
    let (status, _) = send(&test_app.app, "POST", "/v1/events", Some(post)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&test_app.app, "POST", "/v1/events", Some(like(2, T0 + 1_000, "bob", "alice", "p1"))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&test_app.app, "POST", "/v1/events", Some(like(3, T0 + 2_000, "bob", "alice", "p1"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");

    let (_, metrics) = send(&test_app.app, "GET", "/v1/accounts/alice/metrics", None).await;
    assert_eq!(metrics["totals"]["likes"], 1);
}

#[tokio::test]
async fn test_event_for_unknown_account_not_found() {
    let test_app = setup_test_app().await;
    let (status, body) = send(&test_app.app, "POST", "/v1/events", Some(follow(1, T0, "bob", "ghost"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_malformed_event_rejected() {
    let test_app = setup_test_app().await;
    register(&test_app.app, "alice", "politician", 30.0).await;

    let (status, body) = send(
        &test_app.app,
        "POST",
        "/v1/events",
        Some(json!({ "seq": 1, "timestamp": T0, "actorId": "bob", "subjectId": "alice", "type": "teleported" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, _) = send(&test_app.app, "POST", "/v1/events", Some(follow(1, T0, "alice", "alice"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_unknown_account_not_found() {
    let test_app = setup_test_app().await;
    let (status, body) = send(&test_app.app, "GET", "/v1/accounts/nobody/metrics", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_history_endpoint() {
    let test_app = setup_test_app().await;

    let (status, body) = send(&test_app.app, "GET", "/v1/accounts/nobody/history", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accountId"], "nobody");
    assert_eq!(body["timeframe"], "week");
    assert_eq!(body["granularity"], "hour");
    assert!(body["points"].as_array().unwrap().is_empty());

    let (status, _) = send(&test_app.app, "GET", "/v1/accounts/nobody/history?granularity=minute", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_recompute_endpoint() {
    let test_app = setup_test_app().await;
    register(&test_app.app, "alice", "politician", 30.0).await;
    send(&test_app.app, "POST", "/v1/events", Some(follow(1, T0, "bob", "alice"))).await;

    let (status, first) = send(&test_app.app, "POST", "/v1/admin/recompute", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["full"], true);
    assert_eq!(first["accounts"], 1);
    let (_, before) = send(&test_app.app, "GET", "/v1/accounts/alice/metrics", None).await;

    let (status, _) = send(&test_app.app, "POST", "/v1/admin/recompute", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, after) = send(&test_app.app, "GET", "/v1/accounts/alice/metrics", None).await;
    assert_eq!(before["influenceScore"], after["influenceScore"]);

    let (status, single) = send(
        &test_app.app,
        "POST",
        "/v1/admin/recompute",
        Some(json!({ "accountId": "alice" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(single["full"], false);

    let (status, _) = send(
        &test_app.app,
        "POST",
        "/v1/admin/recompute",
        Some(json!({ "accountId": "ghost" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_state_replayed_after_restart() {
    let test_app = setup_test_app().await;
    register(&test_app.app, "alice", "journalist", 30.0).await;
    for (i, follower) in ["bob", "carol", "dave"].iter().enumerate() {
        let seq = i as u64 + 1;
        let (status, _) = send(
            &test_app.app,
            "POST",
            "/v1/events",
            Some(follow(seq, T0 + seq as i64 * 1_000, follower, "alice")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (_, before) = send(&test_app.app, "GET", "/v1/accounts/alice/metrics", None).await;

    let restarted = start_engine(&test_app.db_path).await;
    let app = api::create_router(AppState::new(restarted));

    let (status, after) = send(&app, "GET", "/v1/accounts/alice/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(after["followerCount"], 3);
    assert_eq!(after["personaType"], "journalist");
    assert_eq!(before["influenceScore"], after["influenceScore"]);

    let (status, body) = send(&app, "POST", "/v1/events", Some(follow(3, T0 + 3_000, "dave", "alice"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "duplicate");

    let (_, stats) = send(&app, "GET", "/v1/admin/stats", None).await;
    assert_eq!(stats["ingest"]["replayed"], 3);
    drop(test_app.engine);
}
