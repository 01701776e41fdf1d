//! gangway-api — REST API for Gangway.
//!
//! Provides axum route handlers for submitting groups, managing cluster
//! nodes, and queue administration. Handlers never mutate scheduling
//! state directly: validated changes are forwarded to the scheduler loop
//! as events.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/groups` | List all groups |
//! | POST | `/api/v1/groups` | Submit a group |
//! | GET | `/api/v1/groups/:id` | Get group details |
//! | DELETE | `/api/v1/groups/:id` | Delete a group |
//! | POST | `/api/v1/groups/:id/tasks/:task_id/status` | Report a task transition |
//! | GET | `/api/v1/nodes` | List nodes with liveness |
//! | POST | `/api/v1/nodes` | Join a node |
//! | DELETE | `/api/v1/nodes/:id` | Graceful node departure |
//! | POST | `/api/v1/nodes/:id/heartbeat` | Node heartbeat |
//! | GET | `/api/v1/availability` | Per-node free capacity |
//! | GET | `/api/v1/queues` | List queues |
//! | POST | `/api/v1/queues` | Create or update a queue |
//! | DELETE | `/api/v1/queues/:name` | Delete a queue |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::sync::mpsc;

use gangway_cluster::MembershipManager;
use gangway_inventory::Inventory;
use gangway_registry::Registry;
use gangway_scheduler::Event;
use gangway_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub registry: Registry,
    pub inventory: Inventory,
    pub membership: Arc<MembershipManager>,
    pub events: mpsc::Sender<Event>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/groups", get(handlers::list_groups).post(handlers::submit_group))
        .route("/groups/{id}", get(handlers::get_group).delete(handlers::delete_group))
        .route("/groups/{id}/tasks/{task_id}/status", post(handlers::update_task_status))
        .route("/nodes", get(handlers::list_nodes).post(handlers::join_node))
        .route("/nodes/{id}", axum::routing::delete(handlers::leave_node))
        .route("/nodes/{id}/heartbeat", post(handlers::node_heartbeat))
        .route("/availability", get(handlers::availability))
        .route("/queues", get(handlers::list_queues).post(handlers::create_queue))
        .route("/queues/{name}", axum::routing::delete(handlers::delete_queue))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
