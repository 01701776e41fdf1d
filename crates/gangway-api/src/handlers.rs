//! REST API handlers.
//!
//! Handlers validate requests against the registry and store, then emit
//! events for the scheduler loop; JSON responses share one wrapper shape.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use gangway_registry::{GroupSubmission, RegistryError};
use gangway_scheduler::Event;
use gangway_state::*;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// The scheduler loop is gone; nothing can be admitted any more.
fn loop_unavailable() -> axum::response::Response {
    error_response("scheduler unavailable", StatusCode::SERVICE_UNAVAILABLE).into_response()
}

// ── Groups ─────────────────────────────────────────────────────

/// GET /api/v1/groups
pub async fn list_groups(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.registry.list())
}

/// GET /api/v1/groups/:id
pub async fn get_group(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.get(&id) {
        Some(record) => ApiResponse::ok(record).into_response(),
        None => error_response("group not found", StatusCode::NOT_FOUND).into_response(),
    }
}

/// POST /api/v1/groups
pub async fn submit_group(
    State(state): State<ApiState>,
    Json(submission): Json<GroupSubmission>,
) -> impl IntoResponse {
    let group_id = match state.registry.submit(submission) {
        Ok(id) => id,
        Err(e @ RegistryError::InvalidGroupSpec(_)) => {
            return error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response();
        }
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };

    if state
        .events
        .send(Event::GroupSubmitted { group_id: group_id.clone() })
        .await
        .is_err()
    {
        return loop_unavailable();
    }
    (
        StatusCode::CREATED,
        ApiResponse::ok(serde_json::json!({ "group_id": group_id })),
    )
        .into_response()
}

/// DELETE /api/v1/groups/:id
///
/// Deletion is asynchronous: the scheduler rolls back any held capacity
/// before the record disappears, so a successful response means
/// "scheduled", not "gone".
pub async fn delete_group(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.registry.get(&id).is_none() {
        return error_response("group not found", StatusCode::NOT_FOUND).into_response();
    }
    if state
        .events
        .send(Event::GroupDeleted { group_id: id })
        .await
        .is_err()
    {
        return loop_unavailable();
    }
    (StatusCode::ACCEPTED, ApiResponse::ok("deletion scheduled")).into_response()
}

// ── Task lifecycle ─────────────────────────────────────────────

/// Task transition reported by a node agent.
#[derive(serde::Deserialize)]
pub struct TaskStatusUpdate {
    pub phase: TaskTransition,
}

#[derive(serde::Deserialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TaskTransition {
    Started,
    Completed,
    Failed,
}

/// POST /api/v1/groups/:id/tasks/:task_id/status
pub async fn update_task_status(
    State(state): State<ApiState>,
    Path((group_id, task_id)): Path<(String, String)>,
    Json(update): Json<TaskStatusUpdate>,
) -> impl IntoResponse {
    let Some(record) = state.registry.get(&group_id) else {
        return error_response("group not found", StatusCode::NOT_FOUND).into_response();
    };
    if !record.tasks.iter().any(|t| t.id == task_id) {
        return error_response("task not found", StatusCode::NOT_FOUND).into_response();
    }

    let event = match update.phase {
        TaskTransition::Started => Event::TaskStarted { group_id, task_id },
        TaskTransition::Completed => Event::TaskCompleted { group_id, task_id },
        TaskTransition::Failed => Event::TaskFailed { group_id, task_id },
    };
    if state.events.send(event).await.is_err() {
        return loop_unavailable();
    }
    (StatusCode::ACCEPTED, ApiResponse::ok("accepted")).into_response()
}

// ── Nodes ──────────────────────────────────────────────────────

/// Node registration request.
#[derive(serde::Deserialize)]
pub struct JoinRequest {
    pub address: String,
    pub capacity: ResourceVec,
    #[serde(default)]
    pub taints: Vec<String>,
}

/// GET /api/v1/nodes
pub async fn list_nodes(State(state): State<ApiState>) -> impl IntoResponse {
    match state.membership.list_members() {
        Ok(members) => ApiResponse::ok(members).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// POST /api/v1/nodes
pub async fn join_node(
    State(state): State<ApiState>,
    Json(req): Json<JoinRequest>,
) -> impl IntoResponse {
    let node = match state.membership.join(&req.address, req.capacity, req.taints) {
        Ok(node) => node,
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };
    if state
        .events
        .send(Event::NodeJoined { node: node.clone() })
        .await
        .is_err()
    {
        return loop_unavailable();
    }
    (StatusCode::CREATED, ApiResponse::ok(node)).into_response()
}

/// DELETE /api/v1/nodes/:id
pub async fn leave_node(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.membership.leave(&id) {
        Ok(true) => {}
        Ok(false) => {
            return error_response("node not found", StatusCode::NOT_FOUND).into_response();
        }
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    }
    if state
        .events
        .send(Event::NodeLeft { node_id: id })
        .await
        .is_err()
    {
        return loop_unavailable();
    }
    ApiResponse::ok("left").into_response()
}

/// POST /api/v1/nodes/:id/heartbeat
pub async fn node_heartbeat(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.membership.heartbeat(&id) {
        Ok(true) => ApiResponse::ok("ok").into_response(),
        // Unknown node: the agent should re-join.
        Ok(false) => error_response("node not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/availability
pub async fn availability(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.inventory.snapshot())
}

// ── Queues ─────────────────────────────────────────────────────

/// Queue creation request.
#[derive(serde::Deserialize)]
pub struct QueueCreate {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// GET /api/v1/queues
pub async fn list_queues(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_queues() {
        Ok(queues) => ApiResponse::ok(queues).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// POST /api/v1/queues
pub async fn create_queue(
    State(state): State<ApiState>,
    Json(req): Json<QueueCreate>,
) -> impl IntoResponse {
    if req.name.is_empty() {
        return error_response("queue name must not be empty", StatusCode::BAD_REQUEST)
            .into_response();
    }
    let queue = QueueSpec {
        name: req.name,
        weight: req.weight,
        created_at: epoch_secs(),
    };
    match state.store.put_queue(&queue) {
        Ok(()) => (StatusCode::CREATED, ApiResponse::ok(queue)).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// DELETE /api/v1/queues/:name
pub async fn delete_queue(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.store.delete_queue(&name) {
        Ok(true) => ApiResponse::ok("deleted").into_response(),
        Ok(false) => error_response("queue not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

fn epoch_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use gangway_cluster::MembershipManager;
    use gangway_inventory::Inventory;
    use gangway_registry::Registry;

    fn test_state() -> (ApiState, mpsc::Receiver<Event>) {
        let store = StateStore::open_in_memory().unwrap();
        let (tx, rx) = mpsc::channel(16);
        let state = ApiState {
            store: store.clone(),
            registry: Registry::new(store.clone()),
            inventory: Inventory::new(),
            membership: Arc::new(MembershipManager::new(store)),
            events: tx,
        };
        (state, rx)
    }

    fn test_submission(min_available: u32, tasks: u32) -> GroupSubmission {
        GroupSubmission {
            name: "train".to_string(),
            queue: "default".to_string(),
            priority: 0,
            min_available,
            tasks: (0..tasks)
                .map(|i| TaskSpec {
                    id: format!("t-{i}"),
                    request: ResourceVec { gpus: 1, memory_bytes: 0 },
                    tolerations: Vec::new(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn list_groups_empty() {
        let (state, _rx) = test_state();
        let resp = list_groups(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn submit_group_emits_event() {
        let (state, mut rx) = test_state();
        let resp = submit_group(State(state.clone()), Json(test_submission(2, 2)))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let event = rx.recv().await.unwrap();
        let Event::GroupSubmitted { group_id } = event else {
            panic!("expected GroupSubmitted");
        };
        assert!(state.registry.get(&group_id).is_some());
    }

    #[tokio::test]
    async fn submit_rejects_invalid_spec() {
        let (state, mut rx) = test_state();
        // min_available above task count never admits.
        let resp = submit_group(State(state), Json(test_submission(5, 2)))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn get_nonexistent_group() {
        let (state, _rx) = test_state();
        let resp = get_group(State(state), Path("nope".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_group_is_scheduled_not_immediate() {
        let (state, mut rx) = test_state();
        let group_id = state.registry.submit(test_submission(1, 1)).unwrap();

        let resp = delete_group(State(state.clone()), Path(group_id.clone()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        // The record survives until the scheduler processes the event.
        assert!(state.registry.get(&group_id).is_some());
        assert!(matches!(rx.recv().await, Some(Event::GroupDeleted { .. })));
    }

    #[tokio::test]
    async fn delete_nonexistent_group() {
        let (state, _rx) = test_state();
        let resp = delete_group(State(state), Path("nope".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn task_status_routes_by_phase() {
        let (state, mut rx) = test_state();
        let group_id = state.registry.submit(test_submission(1, 1)).unwrap();

        let resp = update_task_status(
            State(state),
            Path((group_id.clone(), "t-0".to_string())),
            Json(TaskStatusUpdate { phase: TaskTransition::Failed }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert!(matches!(rx.recv().await, Some(Event::TaskFailed { .. })));
    }

    #[tokio::test]
    async fn task_status_unknown_task() {
        let (state, _rx) = test_state();
        let group_id = state.registry.submit(test_submission(1, 1)).unwrap();

        let resp = update_task_status(
            State(state),
            Path((group_id, "t-99".to_string())),
            Json(TaskStatusUpdate { phase: TaskTransition::Started }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn join_node_returns_record_and_event() {
        let (state, mut rx) = test_state();
        let req = JoinRequest {
            address: "gpu-1.local:9000".to_string(),
            capacity: ResourceVec { gpus: 8, memory_bytes: 0 },
            taints: Vec::new(),
        };
        let resp = join_node(State(state), Json(req)).await.into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert!(matches!(rx.recv().await, Some(Event::NodeJoined { .. })));
    }

    #[tokio::test]
    async fn heartbeat_unknown_node() {
        let (state, _rx) = test_state();
        let resp = node_heartbeat(State(state), Path("nope".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn leave_unknown_node() {
        let (state, _rx) = test_state();
        let resp = leave_node(State(state), Path("nope".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn queue_create_list_delete() {
        let (state, _rx) = test_state();
        let resp = create_queue(
            State(state.clone()),
            Json(QueueCreate { name: "prod".to_string(), weight: 10 }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let queues = state.store.list_queues().unwrap();
        assert_eq!(queues.len(), 1);
        assert_eq!(queues[0].weight, 10);

        let resp = delete_queue(State(state.clone()), Path("prod".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.store.list_queues().unwrap().is_empty());
    }

    #[tokio::test]
    async fn queue_create_rejects_empty_name() {
        let (state, _rx) = test_state();
        let resp = create_queue(
            State(state),
            Json(QueueCreate { name: String::new(), weight: 1 }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn availability_reflects_inventory() {
        let (state, _rx) = test_state();
        state
            .inventory
            .add_node("n-1", ResourceVec { gpus: 4, memory_bytes: 0 }, Vec::new());
        let resp = availability(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
