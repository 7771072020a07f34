use axum::{extract::State, response::Json};
use serde::Serialize;

use crate::classifier::IssueCounts;
use crate::registry::{AgentCounts, CostTotals};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub agents: AgentCounts,
    pub issues: IssueCounts,
    pub tasks_completed: u64,
    pub average_success_rate: f64,
    pub cost: CostTotals,
}

/// Aggregate statistics across the whole fleet.
pub async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let (agents, tasks_completed, average_success_rate, cost) = state.registry.aggregates().await;
    let issues = state.issues.counts().await;
    Json(StatsResponse {
        agents,
        issues,
        tasks_completed,
        average_success_rate,
        cost,
    })
}
