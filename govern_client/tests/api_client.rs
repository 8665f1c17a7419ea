use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch},
    Json, Router,
};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use uuid::Uuid;

use govern_client::{
    api::ApiClient,
    classify::RiskLevel,
    collection::CollectionView,
    config::{parse_base_url, ClientConfig},
    error::ApiError,
    models::Task,
    poll::{wait_final, PollConfig, PollRegistry, Terminal},
    JobId, JobKind, JobRef, JobStatus,
};

/// A `Null` body is sent as an empty response.
type Reply = (StatusCode, Value);

#[derive(Clone, Default)]
struct FakeApi {
    tasks: Arc<DashMap<String, Value>>,
    jobs: Arc<DashMap<Uuid, VecDeque<Reply>>>,
    status_calls: Arc<AtomicUsize>,
    last_auth: Arc<Mutex<Option<String>>>,
    projects: Arc<DashMap<String, Value>>,
}

impl FakeApi {
    fn with_tasks(ids: &[u32]) -> Self {
        let api = Self::default();
        for id in ids {
            api.tasks.insert(
                id.to_string(),
                json!({"id": id, "title": format!("Task {}", id), "status": "open", "priority": "high"}),
            );
        }
        api
    }

    /// Queues status replies for a new job; the last one repeats.
    fn script(&self, replies: Vec<Reply>) -> Uuid {
        let id = Uuid::new_v4();
        self.jobs.insert(id, replies.into());
        id
    }
}

async fn list_tasks(State(api): State<FakeApi>, headers: HeaderMap) -> Json<Value> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    *api.last_auth.lock().unwrap() = auth;

    let mut tasks: Vec<Value> = api.tasks.iter().map(|t| t.value().clone()).collect();
    tasks.sort_by_key(|t| t["id"].as_u64());
    Json(json!({ "data": tasks }))
}

async fn get_task(State(api): State<FakeApi>, Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    match api.tasks.get(&id) {
        Some(task) => (StatusCode::OK, Json(json!({ "data": task.value().clone() }))),
        None => (StatusCode::NOT_FOUND, Json(json!({ "message": "Task not found" }))),
    }
}

async fn delete_task(State(api): State<FakeApi>, Path(id): Path<String>) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    if id == "2" {
        return Err((
            StatusCode::CONFLICT,
            Json(json!({ "error": "Task has linked evidence" })),
        ));
    }
    match api.tasks.remove(&id) {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err((StatusCode::NOT_FOUND, Json(json!({ "message": "Task not found" })))),
    }
}

async fn job_status(State(api): State<FakeApi>, Path(id): Path<Uuid>) -> Response {
    api.status_calls.fetch_add(1, Ordering::SeqCst);
    let Some(mut script) = api.jobs.get_mut(&id) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "Bias audit not found" }))).into_response();
    };
    let (status, body) = if script.len() > 1 {
        script.pop_front().unwrap()
    } else {
        script.front().cloned().unwrap()
    };
    match body {
        Value::Null => status.into_response(),
        body => (status, Json(body)).into_response(),
    }
}

async fn update_project(
    State(api): State<FakeApi>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    api.projects.insert(id.clone(), body.clone());
    Json(json!({ "data": { "id": id } }))
}

async fn serve(api: FakeApi) -> ApiClient {
    let app = Router::new()
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/{id}", get(get_task).delete(delete_task))
        .route("/api/bias-audits/{id}/status", get(job_status))
        .route("/api/projects/{id}", patch(update_project))
        .with_state(api);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = ClientConfig {
        base_url: parse_base_url(&format!("http://{}/api", addr)).unwrap(),
        token: Some("secret-token".to_string()),
        request_timeout: Duration::from_secs(5),
        ..ClientConfig::default()
    };
    ApiClient::new(&config).unwrap()
}

#[tokio::test]
async fn lists_records_with_bearer_token() {
    let api = FakeApi::with_tasks(&[1, 2]);
    let client = serve(api.clone()).await;

    let tasks: Vec<Task> = client.list::<Task>().await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].id, "1");
    assert_eq!(tasks[1].title, "Task 2");
    assert_eq!(
        api.last_auth.lock().unwrap().as_deref(),
        Some("Bearer secret-token")
    );
}

#[tokio::test]
async fn error_bodies_become_messages() {
    let client = serve(FakeApi::with_tasks(&[1])).await;

    let err = client.get::<Task>("9").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.user_message(), "Task not found");
}

#[tokio::test]
async fn failed_delete_keeps_the_collection() {
    let api = FakeApi::with_tasks(&[1, 2, 3]);
    let client = serve(api.clone()).await;
    let mut view = CollectionView::<Task>::new();
    view.list(&client).await.unwrap();
    view.select(&client, "2").await.unwrap();

    let err = view.delete(&client, "2").await.unwrap_err();
    assert_eq!(err.status(), Some(409));
    assert_eq!(view.len(), 3);
    assert_eq!(view.selected().map(|t| t.id.as_str()), Some("2"));
    assert_eq!(view.notice(), Some("Task has linked evidence"));

    view.delete(&client, "3").await.unwrap();
    assert_eq!(view.len(), 2);
    assert!(!api.tasks.contains_key("3"));
}

#[tokio::test]
async fn accepted_reply_without_status_is_running() {
    let api = FakeApi::default();
    let id = api.script(vec![(StatusCode::ACCEPTED, json!({ "data": {} }))]);
    let client = serve(api).await;

    let job_id = JobId::new(id.to_string());
    let reply = client.fetch_job_status(JobKind::BiasAudit, &job_id).await.unwrap();
    assert!(reply.is_processing());
    assert_eq!(reply.job.status, JobStatus::Running);
    assert_eq!(reply.job.id, job_id);
}

#[tokio::test]
async fn accepted_reply_without_envelope_is_running() {
    let api = FakeApi::default();
    let empty = api.script(vec![(StatusCode::ACCEPTED, Value::Null)]);
    let message = api.script(vec![(
        StatusCode::ACCEPTED,
        json!({ "message": "Audit still processing" }),
    )]);
    let client = serve(api).await;

    for id in [empty, message] {
        let job_id = JobId::new(id.to_string());
        let reply = client.fetch_job_status(JobKind::BiasAudit, &job_id).await.unwrap();
        assert!(reply.is_processing());
        assert_eq!(reply.job.status, JobStatus::Running);
        assert_eq!(reply.job.id, job_id);
    }
}

#[tokio::test]
async fn empty_accepted_replies_keep_the_watch_going() {
    let api = FakeApi::default();
    let id = api.script(vec![
        (StatusCode::ACCEPTED, Value::Null),
        (StatusCode::ACCEPTED, json!({ "message": "Audit still processing" })),
        (StatusCode::OK, json!({ "data": { "status": "completed" } })),
    ]);
    let client = Arc::new(serve(api.clone()).await);
    let registry = PollRegistry::new(
        client,
        PollConfig {
            interval: Duration::from_millis(20),
            max_consecutive_failures: 3,
        },
    );

    let rx = registry.start(JobRef::new(JobKind::BiasAudit, JobId::new(id.to_string())));
    let state = tokio::time::timeout(Duration::from_secs(5), wait_final(rx))
        .await
        .expect("job should finish");
    assert_eq!(state.terminal(), Some(&Terminal::Completed { result: None }));
    assert_eq!(api.status_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn ok_reply_without_status_is_an_error() {
    let api = FakeApi::default();
    let id = api.script(vec![(StatusCode::OK, json!({ "data": {} }))]);
    let client = serve(api).await;

    let err = client
        .fetch_job_status(JobKind::BiasAudit, &JobId::new(id.to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)));
}

#[tokio::test]
async fn unreachable_server_is_a_transient_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ClientConfig {
        base_url: parse_base_url(&format!("http://{}/api", addr)).unwrap(),
        ..ClientConfig::default()
    };
    let client = ApiClient::new(&config).unwrap();
    let err = client.list::<Task>().await.unwrap_err();
    assert!(matches!(err, ApiError::Network(_)));
    assert!(err.is_transient());
    assert_eq!(err.user_message(), "Unable to reach the server");
}

#[tokio::test]
async fn watches_a_job_until_it_completes() {
    let api = FakeApi::default();
    let id = api.script(vec![
        (StatusCode::ACCEPTED, json!({ "data": { "id": "ignored" } })),
        (StatusCode::OK, json!({ "data": { "status": "running" } })),
        (
            StatusCode::OK,
            json!({ "data": { "status": "completed", "result": { "disparate_impact": 0.82 } } }),
        ),
    ]);
    let client = Arc::new(serve(api.clone()).await);

    let registry = PollRegistry::new(
        client,
        PollConfig {
            interval: Duration::from_millis(20),
            max_consecutive_failures: 3,
        },
    );
    let rx = registry.start(JobRef::new(JobKind::BiasAudit, JobId::new(id.to_string())));
    let state = tokio::time::timeout(Duration::from_secs(5), wait_final(rx))
        .await
        .expect("job should finish");

    match state.terminal() {
        Some(Terminal::Completed { result: Some(result) }) => {
            assert_eq!(result["disparate_impact"], json!(0.82));
        }
        other => panic!("unexpected terminal {:?}", other),
    }
    assert_eq!(state.fetches, 3);
    assert_eq!(api.status_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn deleted_job_ends_as_not_found() {
    let client = Arc::new(serve(FakeApi::default()).await);
    let registry = PollRegistry::new(
        client,
        PollConfig {
            interval: Duration::from_millis(20),
            max_consecutive_failures: 3,
        },
    );
    let rx = registry.start(JobRef::new(JobKind::BiasAudit, JobId::new(Uuid::new_v4().to_string())));
    let state = tokio::time::timeout(Duration::from_secs(5), wait_final(rx))
        .await
        .expect("job should finish");
    assert_eq!(state.terminal(), Some(&Terminal::NotFound));
}

#[tokio::test]
async fn classification_is_saved_on_the_project() {
    let api = FakeApi::default();
    let client = serve(api.clone()).await;

    client
        .save_risk_classification("p-7", RiskLevel::High)
        .await
        .unwrap();
    assert_eq!(
        api.projects.get("p-7").map(|v| v.value().clone()),
        Some(json!({ "ai_risk_classification": "HIGH" }))
    );
}
