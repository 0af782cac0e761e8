use std::convert::Infallible;
use std::time::Duration;

use arbor_core::events::event_name;
use arbor_core::plan::{PlanningSession, TreeSpec};
use arbor_core::types::{PinId, RepositoryPin};
use arbord::{ArborService, DeletableCheck, ScanTrigger, ServiceError, SnapshotView};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::error::WebError;
use crate::model::{
    field, BaseBranchQuery, CheckDeletableRequest, CreateBranchRequest, CreateBranchResponse,
    DeleteBranchRequest, DeleteBranchResponse, PushBranchRequest, PushBranchResponse,
    RebaseBranchRequest, ScanTriggerRequest, SessionBody, SuccessResponse, TreeSpecBody,
};
use crate::state::WebState;

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/scan", post(trigger_scan))
        .route("/api/repos", get(list_repos))
        .route("/api/repos/{pin_id}/snapshot", get(read_snapshot))
        .route(
            "/api/repos/{pin_id}/tree-spec",
            get(read_tree_spec).put(replace_tree_spec),
        )
        .route("/api/repos/{pin_id}/sessions/{session_id}", put(save_session))
        .route("/api/sessions/{session_id}/confirm", post(confirm_session))
        .route("/api/branches/create", post(create_branch))
        .route("/api/branches/push", post(push_branch))
        .route("/api/branches/rebase", post(rebase_branch))
        .route("/api/branches/check-deletable", post(check_deletable))
        .route("/api/branches/delete", post(delete_branch))
        .route("/api/events", get(stream_events))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

/// Service calls shell out to git and touch SQLite, so they run off the async workers.
async fn blocking<T, F>(state: &WebState, call: F) -> Result<T, WebError>
where
    F: FnOnce(ArborService) -> Result<T, ServiceError> + Send + 'static,
    T: Send + 'static,
{
    let service = state.service().clone();
    tokio::task::spawn_blocking(move || call(service))
        .await
        .map_err(|err| WebError::Join {
            message: err.to_string(),
        })?
        .map_err(WebError::from)
}

fn body<T: DeserializeOwned>(payload: Result<Json<T>, JsonRejection>) -> Result<T, WebError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| {
            WebError::bad_request(format!("invalid request body: {}", rejection.body_text()))
        })
}

fn pin_id(raw: &str) -> Result<PinId, WebError> {
    raw.parse::<PinId>().map_err(WebError::bad_request)
}

async fn trigger_scan(
    State(state): State<WebState>,
    payload: Result<Json<ScanTriggerRequest>, JsonRejection>,
) -> Result<Json<ScanTrigger>, WebError> {
    let request = body(payload)?;
    let local_path = field(request.local_path);
    let trigger = blocking(&state, move |service| {
        service.trigger_scan(&local_path, request.active_worktree_path.as_deref())
    })
    .await?;
    debug!(pin_id = %trigger.pin_id, started = trigger.started, "scan triggered");
    Ok(Json(trigger))
}

async fn list_repos(State(state): State<WebState>) -> Result<Json<Vec<RepositoryPin>>, WebError> {
    Ok(Json(blocking(&state, |service| service.list_pins()).await?))
}

async fn read_snapshot(
    State(state): State<WebState>,
    Path(raw_pin): Path<String>,
) -> Result<Json<SnapshotView>, WebError> {
    let pin = pin_id(&raw_pin)?;
    Ok(Json(blocking(&state, move |service| service.read_snapshot(pin)).await?))
}

async fn read_tree_spec(
    State(state): State<WebState>,
    Path(raw_pin): Path<String>,
    Query(query): Query<BaseBranchQuery>,
) -> Result<Json<TreeSpec>, WebError> {
    let pin = pin_id(&raw_pin)?;
    let spec = blocking(&state, move |service| {
        service.tree_spec(pin, query.base_branch.as_deref())
    })
    .await?;
    Ok(Json(spec))
}

async fn replace_tree_spec(
    State(state): State<WebState>,
    Path(raw_pin): Path<String>,
    Query(query): Query<BaseBranchQuery>,
    payload: Result<Json<TreeSpecBody>, JsonRejection>,
) -> Result<Json<TreeSpec>, WebError> {
    let pin = pin_id(&raw_pin)?;
    let request = body(payload)?;
    let spec = blocking(&state, move |service| {
        service.replace_tree_spec(pin, query.base_branch.as_deref(), request.nodes, request.edges)
    })
    .await?;
    Ok(Json(spec))
}

async fn save_session(
    State(state): State<WebState>,
    Path((raw_pin, session_id)): Path<(String, String)>,
    payload: Result<Json<SessionBody>, JsonRejection>,
) -> Result<Json<PlanningSession>, WebError> {
    let pin = pin_id(&raw_pin)?;
    let request = body(payload)?;
    let session = blocking(&state, move |service| {
        service.save_session(
            pin,
            &session_id,
            request.base_branch.as_deref(),
            request.nodes,
            request.edges,
        )
    })
    .await?;
    Ok(Json(session))
}

async fn confirm_session(
    State(state): State<WebState>,
    Path(session_id): Path<String>,
) -> Result<Json<PlanningSession>, WebError> {
    let session = blocking(&state, move |service| service.confirm_session(&session_id)).await?;
    Ok(Json(session))
}

async fn create_branch(
    State(state): State<WebState>,
    payload: Result<Json<CreateBranchRequest>, JsonRejection>,
) -> Result<Json<CreateBranchResponse>, WebError> {
    let request = body(payload)?;
    let local_path = field(request.local_path);
    let branch_name = field(request.branch_name);
    let base_branch = field(request.base_branch);
    let (branch, base) = (branch_name.clone(), base_branch.clone());
    blocking(&state, move |service| {
        service.create_branch(&local_path, &branch, &base)
    })
    .await?;
    Ok(Json(CreateBranchResponse {
        success: true,
        branch_name: branch_name.trim().to_string(),
        base_branch: base_branch.trim().to_string(),
    }))
}

async fn push_branch(
    State(state): State<WebState>,
    payload: Result<Json<PushBranchRequest>, JsonRejection>,
) -> Result<Json<PushBranchResponse>, WebError> {
    let request = body(payload)?;
    let local_path = field(request.local_path);
    let branch_name = field(request.branch_name);
    let force = request.force.unwrap_or(false);
    let branch = branch_name.clone();
    blocking(&state, move |service| {
        service.push_branch(&local_path, &branch, force, request.worktree_path.as_deref())
    })
    .await?;
    Ok(Json(PushBranchResponse {
        success: true,
        branch_name: branch_name.trim().to_string(),
    }))
}

async fn rebase_branch(
    State(state): State<WebState>,
    payload: Result<Json<RebaseBranchRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, WebError> {
    let request = body(payload)?;
    let local_path = field(request.local_path);
    let branch_name = field(request.branch_name);
    let parent_branch = field(request.parent_branch);
    blocking(&state, move |service| {
        service.rebase_branch(&local_path, &branch_name, &parent_branch)
    })
    .await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn check_deletable(
    State(state): State<WebState>,
    payload: Result<Json<CheckDeletableRequest>, JsonRejection>,
) -> Result<Json<DeletableCheck>, WebError> {
    let request = body(payload)?;
    let local_path = field(request.local_path);
    let branch_name = field(request.branch_name);
    let check = blocking(&state, move |service| {
        service.check_deletable(&local_path, &branch_name)
    })
    .await?;
    Ok(Json(check))
}

async fn delete_branch(
    State(state): State<WebState>,
    payload: Result<Json<DeleteBranchRequest>, JsonRejection>,
) -> Result<Json<DeleteBranchResponse>, WebError> {
    let request = body(payload)?;
    let local_path = field(request.local_path);
    let branch_name = field(request.branch_name);
    let force = request.force.unwrap_or(false);
    let delete_remote = request.delete_remote.unwrap_or(false);
    let outcome = blocking(&state, move |service| {
        service.delete_branch(&local_path, &branch_name, force, delete_remote)
    })
    .await?;
    Ok(Json(DeleteBranchResponse {
        success: true,
        reparented_edges: outcome.reparented_edges,
        warnings: outcome.warnings,
    }))
}

async fn stream_events(
    State(state): State<WebState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.subscribe();
    let stream = BroadcastStream::new(rx).map(|message| {
        let event = match message {
            Ok(payload) => {
                let data = serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string());
                SseEvent::default()
                    .event(event_name(&payload.kind))
                    .data(data)
            }
            Err(_) => SseEvent::default().event("lagged").data("{}"),
        };
        Ok::<SseEvent, Infallible>(event)
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(10))
            .text("keepalive"),
    )
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::process::Command;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use arbor_core::config::ArborConfig;
    use arbor_core::naming::PrefixNamingConvention;
    use arbor_gh::StaticCodeHost;
    use arbor_git::GitCli;
    use arbord::{ArborService, EventSink, ServiceParts, SqliteStore};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::router;
    use crate::state::{BroadcastSink, WebState};

    fn state() -> WebState {
        let store = SqliteStore::open_in_memory().expect("store");
        store.migrate().expect("migrate");
        let broadcast = BroadcastSink::new(16);
        let events: Arc<dyn EventSink> = Arc::new(broadcast.clone());
        let service = ArborService::new(ServiceParts {
            config: ArborConfig::default(),
            store,
            git: Arc::new(GitCli::default()),
            host: Arc::new(StaticCodeHost {
                repository: Some("acme/widgets".to_string()),
                ..StaticCodeHost::default()
            }),
            naming: Arc::new(PrefixNamingConvention::new(Vec::new(), 100)),
            events,
        });
        WebState::new(service, broadcast)
    }

    fn run_git(cwd: &Path, args: &[&str]) {
        let output = Command::new("git")
            .args(["-c", "user.name=Test User", "-c", "user.email=test@example.com"])
            .args(["-c", "commit.gpgsign=false"])
            .args(args)
            .current_dir(cwd)
            .output()
            .expect("spawn git");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn init_repo() -> TempDir {
        let dir = tempfile::tempdir().expect("temp dir");
        run_git(dir.path(), &["init", "--quiet"]);
        run_git(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/main"]);
        fs::write(dir.path().join("README.md"), "init\n").expect("write file");
        run_git(dir.path(), &["add", "README.md"]);
        run_git(dir.path(), &["commit", "--quiet", "-m", "init"]);
        dir
    }

    async fn send(state: &WebState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .expect("request");
        let response = router(state.clone()).oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = send(&state(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn scan_without_local_path_is_a_validation_error() {
        let (status, body) = send(&state(), "POST", "/api/scan", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");
        assert!(body["message"].as_str().unwrap_or_default().contains("localPath is required"));
    }

    #[tokio::test]
    async fn snapshot_route_distinguishes_bad_and_unknown_pins() {
        let state = state();
        let (status, body) = send(&state, "GET", "/api/repos/abc/snapshot", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");

        let (status, body) = send(&state, "GET", "/api/repos/41/snapshot", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn malformed_json_body_is_rejected() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/branches/delete")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .expect("request");
        let response = router(state()).oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn check_deletable_blocks_the_checked_out_branch() {
        let repo = init_repo();
        let path = repo.path().to_string_lossy().into_owned();
        let (status, body) = send(
            &state(),
            "POST",
            "/api/branches/check-deletable",
            Some(json!({ "localPath": path, "branchName": "main" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "deletable": false, "reason": "currently_checked_out" })
        );
    }

    #[tokio::test]
    async fn delete_reports_reparented_children() {
        let repo = init_repo();
        run_git(repo.path(), &["branch", "feature/parent"]);
        run_git(repo.path(), &["branch", "feature/child"]);
        let path = repo.path().to_string_lossy().into_owned();
        let state = state();

        let (status, trigger) = send(&state, "POST", "/api/scan", Some(json!({ "localPath": path }))).await;
        assert_eq!(status, StatusCode::OK);
        let pin = trigger["repoId"].as_i64().expect("pin id");
        let deadline = Instant::now() + Duration::from_secs(20);
        loop {
            let (status, _) = send(&state, "GET", &format!("/api/repos/{pin}/snapshot"), None).await;
            if status == StatusCode::OK {
                break;
            }
            assert!(Instant::now() < deadline, "scan never completed");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let (status, _) = send(
            &state,
            "PUT",
            &format!("/api/repos/{pin}/tree-spec"),
            Some(json!({
                "edges": [
                    { "parent": "main", "child": "feature/parent" },
                    { "parent": "feature/parent", "child": "feature/child" }
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &state,
            "POST",
            "/api/branches/delete",
            Some(json!({ "localPath": path, "branchName": "feature/parent" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "success": true,
                "reparentedEdges": [{ "child": "feature/child", "newParent": "main" }]
            })
        );

        let (status, spec) = send(&state, "GET", &format!("/api/repos/{pin}/tree-spec"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(spec["edges"], json!([{ "parent": "main", "child": "feature/child" }]));
    }

    #[tokio::test]
    async fn create_branch_requires_a_branch_name() {
        let repo = init_repo();
        let path = repo.path().to_string_lossy().into_owned();
        let (status, body) = send(
            &state(),
            "POST",
            "/api/branches/create",
            Some(json!({ "localPath": path, "baseBranch": "main" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap_or_default().contains("branchName is required"));
    }
}
