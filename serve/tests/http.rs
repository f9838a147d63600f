//! End-to-end handler tests over the in-process router: project bootstrap,
//! the chat message flow with its outbox rows, approvals, and plans.

use std::sync::Arc;

use atelier::broker::StreamItem;
use atelier::context::{HashEmbedder, InMemoryVectorIndex};
use atelier::{Database, MockLlm};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use serve::{router, AppState};
use tower::ServiceExt;
use uuid::Uuid;

struct TestApp {
    state: AppState,
    user_id: Uuid,
    // Keeps the database file alive.
    _dir: tempfile::TempDir,
}

fn test_app() -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Database::open(dir.path().join("serve.db")).expect("open db");
    let state = AppState::assemble(
        config::Settings::default(),
        db,
        Arc::new(MockLlm::new("mock reply")),
        Arc::new(HashEmbedder::new(16)),
        Some(Arc::new(InMemoryVectorIndex::new())),
    );
    TestApp {
        state,
        user_id: Uuid::new_v4(),
        _dir: dir,
    }
}

async fn request(
    app: &TestApp,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-user-id", app.user_id.to_string());
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = router(app.state.clone())
        .oneshot(builder.body(body).expect("request"))
        .await
        .expect("response");

    let status = response.status();
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn bootstrap_project(app: &TestApp) -> (Uuid, Value) {
    let (status, body) = request(
        app,
        "POST",
        "/api/projects",
        Some(json!({"name": "demo"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let project_id = Uuid::parse_str(body["project"]["id"].as_str().unwrap()).unwrap();
    (project_id, body)
}

async fn open_session(app: &TestApp, project_id: Uuid) -> Uuid {
    let (status, body) = request(
        app,
        "POST",
        "/api/chat/sessions",
        Some(json!({"project_id": project_id})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    Uuid::parse_str(body["id"].as_str().unwrap()).unwrap()
}

#[tokio::test]
async fn health_is_ok_and_identity_is_required() {
    let app = test_app();
    let (status, body) = request(&app, "GET", "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    // No x-user-id header: boundary validation.
    let response = router(app.state.clone())
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/chat/sessions")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn project_bootstrap_seeds_the_starter_pack() {
    let app = test_app();
    let (_, body) = bootstrap_project(&app).await;
    let agents = body["agents"].as_array().unwrap();
    assert_eq!(agents.len(), 3);
    let names: Vec<&str> = agents.iter().map(|a| a["name"].as_str().unwrap()).collect();
    assert!(names.contains(&"Coder"));
}

#[tokio::test]
async fn happy_path_chat_persists_two_messages_and_two_outbox_rows() {
    let app = test_app();
    let (project_id, _) = bootstrap_project(&app).await;
    let session_id = open_session(&app, project_id).await;

    // Subscribe before sending so the publisher's events are observable.
    let (_, mut rx) = app
        .state
        .broker
        .register(session_id, app.user_id, None)
        .await;

    let (status, body) = request(
        &app,
        "POST",
        &format!("/api/chat/{session_id}/message"),
        Some(json!({"content": "hello", "target_agent": "Coder"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"]["role"], "assistant");
    assert_eq!(body["message"]["content"], "mock reply");
    assert_eq!(body["agent_name"], "Coder");

    // Two persisted messages, visible through the API.
    let (status, body) = request(
        &app,
        "GET",
        &format!("/api/chat/{session_id}/messages"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    let roles: Vec<&str> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles, vec!["user", "assistant"]);

    // Two pending outbox rows committed beside them.
    let pending: i64 = app
        .state
        .db
        .with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM event_outbox WHERE status = 'pending' \
                 AND event_type = 'message_created'",
                [],
                |row| row.get(0),
            )?)
        })
        .await
        .unwrap();
    assert_eq!(pending, 2);

    // One publisher cycle drains both; subscribers see exactly two
    // message_created events, in commit order.
    app.state.publisher.process_batch().await.unwrap();
    for expected_role in ["user", "assistant"] {
        let event = match rx.recv().await.unwrap() {
            StreamItem::Event(event) => event,
            StreamItem::Closed => panic!("closed"),
        };
        assert_eq!(event.event_type.as_str(), "message_created");
        assert_eq!(event.payload["role"], expected_role);
        assert!(event.payload["event_id"].is_string());
    }

    let published: i64 = app
        .state
        .db
        .with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM event_outbox WHERE status = 'published'",
                [],
                |row| row.get(0),
            )?)
        })
        .await
        .unwrap();
    assert_eq!(published, 2);
}

#[tokio::test]
async fn message_to_unknown_session_or_agent_is_not_found() {
    let app = test_app();
    let (project_id, _) = bootstrap_project(&app).await;

    let (status, _) = request(
        &app,
        "POST",
        &format!("/api/chat/{}/message", Uuid::new_v4()),
        Some(json!({"content": "hello"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let session_id = open_session(&app, project_id).await;
    let (status, _) = request(
        &app,
        "POST",
        &format!("/api/chat/{session_id}/message"),
        Some(json!({"content": "hello", "target_agent": "NoSuchAgent"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = request(
        &app,
        "POST",
        &format!("/api/chat/{session_id}/message"),
        Some(json!({"content": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn approval_routes_resolve_pending_requests() {
    let app = test_app();

    let approval = app
        .state
        .approvals
        .request_tool_approval(
            app.user_id,
            "write_file",
            &json!({"path": "/tmp/a.py"}),
            Uuid::new_v4(),
            None,
        )
        .await
        .unwrap();

    let (status, body) = request(&app, "GET", "/api/approvals", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = request(
        &app,
        "POST",
        &format!("/api/approvals/{}/confirm", approval.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved");

    // Second decision: already resolved.
    let (status, _) = request(
        &app,
        "POST",
        &format!("/api/approvals/{}/reject", approval.id),
        Some(json!({"reason": "no"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = request(
        &app,
        "POST",
        &format!("/api/approvals/{}/confirm", Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cyclic_plan_is_rejected_before_any_write() {
    let app = test_app();
    let (project_id, _) = bootstrap_project(&app).await;
    let session_id = open_session(&app, project_id).await;

    let (status, body) = request(
        &app,
        "POST",
        &format!("/api/chat/{session_id}/plans"),
        Some(json!({
            "original_request": "impossible",
            "tasks": [
                {"task_id": "t0", "description": "a"},
                {"task_id": "t1", "description": "b"}
            ],
            "dependencies": [
                {"from": "t0", "to": "t1"},
                {"from": "t1", "to": "t0"}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().unwrap().contains("cyclic"));

    let outbox_rows: i64 = app
        .state
        .db
        .with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM event_outbox", [], |row| row.get(0))?)
        })
        .await
        .unwrap();
    assert_eq!(outbox_rows, 0, "no event may be emitted for an invalid plan");
}

#[tokio::test]
async fn plan_lifecycle_create_approve_execute() {
    let app = test_app();
    let (project_id, _) = bootstrap_project(&app).await;
    let session_id = open_session(&app, project_id).await;

    // Three tasks force a MEDIUM classification and a pending approval.
    let (status, body) = request(
        &app,
        "POST",
        &format!("/api/chat/{session_id}/plans"),
        Some(json!({
            "original_request": "build it",
            "tasks": [
                {"task_id": "t0", "description": "scaffold", "assigned_to": "Coder"},
                {"task_id": "t1", "description": "fill in", "assigned_to": "Coder", "depends_on": ["t0"]},
                {"task_id": "t2", "description": "test it", "assigned_to": "Coder", "depends_on": ["t0"]}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["plan"]["status"], "pending_approval");
    assert_eq!(body["approval"]["status"], "pending");
    let plan_id = Uuid::parse_str(body["plan"]["id"].as_str().unwrap()).unwrap();
    let approval_id = Uuid::parse_str(body["approval"]["id"].as_str().unwrap()).unwrap();

    // Executing before approval is refused.
    let (status, _) = request(&app, "POST", &format!("/api/plans/{plan_id}/execute"), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // Confirming releases the plan from pending_approval in the same
    // transaction.
    let (status, _) = request(
        &app,
        "POST",
        &format!("/api/approvals/{approval_id}/confirm"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(&app, "POST", &format!("/api/plans/{plan_id}/execute"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plan"]["status"], "completed");
    assert_eq!(body["result"]["total_tasks"], 3);
    assert_eq!(body["result"]["failed_tasks"], 0);
    assert_eq!(
        body["result"]["task_results"]["t1"]["assigned_agent"],
        "Coder"
    );
}

#[tokio::test]
async fn rejecting_a_plan_approval_blocks_execution() {
    let app = test_app();
    let (project_id, _) = bootstrap_project(&app).await;
    let session_id = open_session(&app, project_id).await;

    let (_, body) = request(
        &app,
        "POST",
        &format!("/api/chat/{session_id}/plans"),
        Some(json!({
            "original_request": "build it",
            "tasks": [
                {"task_id": "t0", "description": "a"},
                {"task_id": "t1", "description": "b"},
                {"task_id": "t2", "description": "c"}
            ]
        })),
    )
    .await;
    let plan_id = Uuid::parse_str(body["plan"]["id"].as_str().unwrap()).unwrap();
    let approval_id = Uuid::parse_str(body["approval"]["id"].as_str().unwrap()).unwrap();

    let (status, _) = request(
        &app,
        "POST",
        &format!("/api/approvals/{approval_id}/reject"),
        Some(json!({"reason": "not now"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(&app, "POST", &format!("/api/plans/{plan_id}/execute"), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().unwrap().contains("rejected"));
}

#[tokio::test]
async fn bad_since_timestamp_is_rejected() {
    let app = test_app();
    let (project_id, _) = bootstrap_project(&app).await;
    let session_id = open_session(&app, project_id).await;

    let (status, _) = request(
        &app,
        "GET",
        &format!("/api/chat/{session_id}/events?since=yesterday"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn stats_aggregates_subsystem_snapshots() {
    let app = test_app();
    let (project_id, _) = bootstrap_project(&app).await;
    let _session = open_session(&app, project_id).await;

    let (status, body) = request(&app, "GET", "/api/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["worker_spaces"].is_object());
    assert!(body["stream"]["total_connections"].is_number());
    assert!(body["outbox"]["published_total"].is_number());
}
