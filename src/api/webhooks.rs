//! Issue-tracker webhook receiver.
//!
//! Issue opened/reopened and pull-request opened events are classified into
//! a `(role, priority)` binding and auto-assigned to the first idle agent of
//! the resolved role. When no such agent is idle the event is recorded but
//! not assigned — no queuing, no retry. Close events update the issue log;
//! comments are broadcast without reclassification.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::agent::{AgentRole, TaskPriority};
use crate::classifier::{classify, IssueEvent};
use crate::error::{AppError, Result};
use crate::events::EventPayload;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    issue: Option<IssuePayload>,
    #[serde(default)]
    pull_request: Option<IssuePayload>,
    #[serde(default)]
    repository: Option<RepositoryPayload>,
}

#[derive(Debug, Deserialize)]
struct IssuePayload {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<LabelPayload>,
}

#[derive(Debug, Deserialize)]
struct LabelPayload {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    full_name: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<AgentRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
}

pub async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<Json<WebhookResponse>> {
    let event_kind = headers
        .get("x-github-event")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();

    let payload: WebhookPayload = serde_json::from_value(payload)?;
    let action = payload.action.as_deref().unwrap_or("");
    let repository = payload
        .repository
        .as_ref()
        .map(|repo| repo.full_name.clone())
        .unwrap_or_default();

    let subject = match event_kind.as_str() {
        "issues" | "issue_comment" => payload.issue.as_ref(),
        "pull_request" => payload.pull_request.as_ref(),
        _ => None,
    };
    let Some(subject) = subject else {
        return Ok(Json(WebhookResponse {
            processed: false,
            role: None,
            priority: None,
            assigned_agent: None,
        }));
    };

    let event = IssueEvent {
        repository: repository.clone(),
        number: subject.number,
        title: subject.title.clone(),
        body: subject.body.clone().unwrap_or_default(),
        labels: subject.labels.iter().map(|label| label.name.clone()).collect(),
    };

    match (event_kind.as_str(), action) {
        ("issues", "opened") | ("issues", "reopened") | ("pull_request", "opened") => {
            let mut binding = classify(&event);
            info!(
                repository = %binding.repository,
                number = binding.number,
                role = %binding.role,
                priority = %binding.priority,
                "issue classified"
            );

            let description = format!("Issue #{} ({}): {}", event.number, repository, event.title);
            match state
                .dispatcher
                .assign_issue(binding.role, &description, binding.priority)
                .await
            {
                Ok((agent_id, _)) => binding.assigned_agent = Some(agent_id),
                Err(AppError::ClassificationMiss(role)) => {
                    warn!(role = %role, number = event.number, "no idle agent for role, recording unassigned");
                }
                Err(err) => return Err(err),
            }

            state.issues.record(binding.clone()).await;
            state.broadcaster.broadcast(EventPayload::github_issue(binding.clone()));

            Ok(Json(WebhookResponse {
                processed: true,
                role: Some(binding.role),
                priority: Some(binding.priority),
                assigned_agent: binding.assigned_agent,
            }))
        }
        ("issues", "closed") => {
            state.issues.mark_closed(&repository, event.number).await;
            Ok(Json(WebhookResponse {
                processed: true,
                role: None,
                priority: None,
                assigned_agent: None,
            }))
        }
        ("issue_comment", _) => {
            // Comments surface on the realtime channel but are neither
            // reclassified nor auto-assigned.
            let binding = classify(&event);
            state.broadcaster.broadcast(EventPayload::github_issue(binding.clone()));
            Ok(Json(WebhookResponse {
                processed: true,
                role: Some(binding.role),
                priority: Some(binding.priority),
                assigned_agent: None,
            }))
        }
        _ => Ok(Json(WebhookResponse {
            processed: false,
            role: None,
            priority: None,
            assigned_agent: None,
        })),
    }
}
