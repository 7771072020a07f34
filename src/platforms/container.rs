//! Managed-container-task platform adapter.
//!
//! Discovery lists the platform's tasks; dispatch starts a new task
//! invocation with the payload injected as environment data.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::agent::{Agent, PlatformRef};
use crate::config::PlatformEndpoint;
use crate::error::{AppError, Result};
use crate::platforms::virtual_machine::resolve_role;
use crate::platforms::{authorize, PlatformAdapter};

#[derive(Debug, Deserialize)]
struct TaskRecord {
    task_ref: String,
    name: String,
    last_status: String,
    #[serde(default)]
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunTaskResponse {
    task_ref: String,
}

pub struct ContainerTaskAdapter {
    client: reqwest::Client,
    endpoint: PlatformEndpoint,
}

impl ContainerTaskAdapter {
    pub fn new(client: reqwest::Client, endpoint: PlatformEndpoint) -> Self {
        Self { client, endpoint }
    }

    fn adapter_failure(&self, err: impl std::fmt::Display) -> AppError {
        AppError::AdapterFailure {
            platform: "container-task",
            message: err.to_string(),
        }
    }

    /// Start a new task invocation carrying the payload as environment data.
    /// Returns the new task reference.
    pub async fn run_task(&self, family: &str, payload: &str, timeout_seconds: u64) -> Result<String> {
        let url = format!("{}/v1/tasks/run", self.endpoint.base_url);
        let response: RunTaskResponse = authorize(self.client.post(&url), &self.endpoint.api_token)
            .json(&json!({
                "family": family,
                "timeout_seconds": timeout_seconds,
                "environment": [
                    { "name": "AGENT_PAYLOAD", "value": payload },
                ],
            }))
            .send()
            .await
            .map_err(|e| self.adapter_failure(e))?
            .error_for_status()
            .map_err(|e| self.adapter_failure(e))?
            .json()
            .await
            .map_err(|e| self.adapter_failure(e))?;

        debug!(family = %family, task_ref = %response.task_ref, "container task started");
        Ok(response.task_ref)
    }
}

#[async_trait]
impl PlatformAdapter for ContainerTaskAdapter {
    fn platform(&self) -> &'static str {
        "container-task"
    }

    fn credentials_configured(&self) -> bool {
        self.endpoint.credentials_configured()
    }

    async fn discover(&self) -> Result<Vec<Agent>> {
        if !self.credentials_configured() {
            debug!("container-task credentials not configured, skipping discovery");
            return Ok(Vec::new());
        }

        let url = format!("{}/v1/tasks", self.endpoint.base_url);
        let records: Vec<TaskRecord> = authorize(self.client.get(&url), &self.endpoint.api_token)
            .send()
            .await
            .map_err(|e| self.adapter_failure(e))?
            .error_for_status()
            .map_err(|e| self.adapter_failure(e))?
            .json()
            .await
            .map_err(|e| self.adapter_failure(e))?;

        let agents = records
            .into_iter()
            .map(|record| {
                let role = resolve_role(record.role.as_deref(), &record.name);
                let running = record.last_status == "RUNNING";
                Agent::discovered(
                    record.name,
                    role,
                    PlatformRef::ContainerTask(record.task_ref),
                    running,
                )
            })
            .collect();
        Ok(agents)
    }
}
