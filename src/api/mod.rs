pub mod agents;
pub mod stats;
pub mod webhooks;

use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

/// Create the API router with all endpoint routes.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/agents", get(agents::list_agents))
        .route("/agents/:agent_id", get(agents::get_agent))
        .route("/agents/:agent_id/message", post(agents::send_message))
        .route("/agents/:agent_id/task", post(agents::submit_task))
        .route("/agents/:agent_id/control", post(agents::control_agent))
        .route("/agents/:agent_id/conversation", get(agents::get_conversation))
        .route("/stats", get(stats::get_stats))
}
