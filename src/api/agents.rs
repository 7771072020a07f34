use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Deserialize;

use crate::agent::{Agent, TaskRequest};
use crate::control::{ControlAction, ControlReport};
use crate::conversation::ChatMessage;
use crate::dispatch::DispatchOutcome;
use crate::error::{AppError, Result};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub action: ControlAction,
}

pub async fn list_agents(State(state): State<AppState>) -> Json<Vec<Agent>> {
    Json(state.registry.list().await)
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<Agent>> {
    state
        .registry
        .get(&agent_id)
        .await
        .map(Json)
        .ok_or(AppError::AgentNotFound(agent_id))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<DispatchOutcome>> {
    if request.content.trim().is_empty() {
        return Err(AppError::BadRequest("message content cannot be empty".into()));
    }
    let outcome = state.dispatcher.send_message(&agent_id, &request.content).await?;
    Ok(Json(outcome))
}

pub async fn submit_task(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(request): Json<TaskRequest>,
) -> Result<Json<DispatchOutcome>> {
    let outcome = state.dispatcher.submit_task(&agent_id, &request).await?;
    Ok(Json(outcome))
}

pub async fn control_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<ControlReport>> {
    let report = state.controller.execute(&agent_id, request.action).await?;
    Ok(Json(report))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<Vec<ChatMessage>>> {
    if state.registry.get(&agent_id).await.is_none() {
        return Err(AppError::AgentNotFound(agent_id));
    }
    Ok(Json(state.conversations.history(&agent_id)))
}
