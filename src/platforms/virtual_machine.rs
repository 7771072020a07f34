//! Virtual-machine platform adapter.
//!
//! Discovery lists instances; dispatch and control actions go through the
//! remote command-execution channel: fire a command, then poll a bounded
//! number of seconds for its output. If the platform does not return output
//! within the bound, callers get a best-effort "still processing" result
//! instead of blocking indefinitely.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::agent::{Agent, AgentRole, PlatformRef};
use crate::config::PlatformEndpoint;
use crate::error::{AppError, Result};
use crate::platforms::{authorize, PlatformAdapter};

#[derive(Debug, Deserialize)]
struct InstanceRecord {
    instance_id: String,
    name: String,
    state: String,
    #[serde(default)]
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommandHandle {
    command_id: String,
}

#[derive(Debug, Deserialize)]
struct CommandPoll {
    status: String,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InstanceUtilization {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// Result of a remote command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub command_id: String,
    /// `None` while the command is still processing at the bound.
    pub output: Option<String>,
    pub completed: bool,
}

pub struct VirtualMachineAdapter {
    client: reqwest::Client,
    endpoint: PlatformEndpoint,
    poll_interval: Duration,
    output_bound: Duration,
}

impl VirtualMachineAdapter {
    pub fn new(
        client: reqwest::Client,
        endpoint: PlatformEndpoint,
        poll_interval: Duration,
        output_bound: Duration,
    ) -> Self {
        Self {
            client,
            endpoint,
            poll_interval,
            output_bound,
        }
    }

    fn adapter_failure(&self, err: impl std::fmt::Display) -> AppError {
        AppError::AdapterFailure {
            platform: "virtual-machine",
            message: err.to_string(),
        }
    }

    /// Fire a remote command and wait up to the configured bound for output.
    pub async fn run_command(&self, instance_id: &str, command: &str) -> Result<CommandResult> {
        let url = format!("{}/v1/instances/{}/commands", self.endpoint.base_url, instance_id);
        let handle: CommandHandle = authorize(self.client.post(&url), &self.endpoint.api_token)
            .json(&json!({ "command": command }))
            .send()
            .await
            .map_err(|e| AppError::RemoteExecution(e.to_string()))?
            .error_for_status()
            .map_err(|e| AppError::RemoteExecution(e.to_string()))?
            .json()
            .await
            .map_err(|e| AppError::RemoteExecution(e.to_string()))?;

        debug!(
            instance_id = %instance_id,
            command_id = %handle.command_id,
            "remote command fired"
        );

        let deadline = tokio::time::Instant::now() + self.output_bound;
        loop {
            tokio::time::sleep(self.poll_interval).await;

            let url = format!("{}/v1/commands/{}", self.endpoint.base_url, handle.command_id);
            let poll: CommandPoll = authorize(self.client.get(&url), &self.endpoint.api_token)
                .send()
                .await
                .map_err(|e| AppError::RemoteExecution(e.to_string()))?
                .error_for_status()
                .map_err(|e| AppError::RemoteExecution(e.to_string()))?
                .json()
                .await
                .map_err(|e| AppError::RemoteExecution(e.to_string()))?;

            match poll.status.as_str() {
                "done" => {
                    return Ok(CommandResult {
                        command_id: handle.command_id,
                        output: poll.output,
                        completed: true,
                    })
                }
                "failed" => {
                    return Err(AppError::RemoteExecution(
                        poll.error.unwrap_or_else(|| "command failed".to_string()),
                    ))
                }
                _ => {}
            }

            if tokio::time::Instant::now() >= deadline {
                debug!(
                    command_id = %handle.command_id,
                    "remote command still processing at output bound"
                );
                return Ok(CommandResult {
                    command_id: handle.command_id,
                    output: None,
                    completed: false,
                });
            }
        }
    }

    /// Current CPU/memory utilization for one instance.
    pub async fn utilization(&self, instance_id: &str) -> Result<InstanceUtilization> {
        let url = format!(
            "{}/v1/instances/{}/utilization",
            self.endpoint.base_url, instance_id
        );
        authorize(self.client.get(&url), &self.endpoint.api_token)
            .send()
            .await
            .map_err(|e| self.adapter_failure(e))?
            .error_for_status()
            .map_err(|e| self.adapter_failure(e))?
            .json()
            .await
            .map_err(|e| self.adapter_failure(e))
    }
}

#[async_trait]
impl PlatformAdapter for VirtualMachineAdapter {
    fn platform(&self) -> &'static str {
        "virtual-machine"
    }

    fn credentials_configured(&self) -> bool {
        self.endpoint.credentials_configured()
    }

    async fn discover(&self) -> Result<Vec<Agent>> {
        if !self.credentials_configured() {
            debug!("virtual-machine credentials not configured, skipping discovery");
            return Ok(Vec::new());
        }

        let url = format!("{}/v1/instances", self.endpoint.base_url);
        let records: Vec<InstanceRecord> = authorize(self.client.get(&url), &self.endpoint.api_token)
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
                let running = record.state == "running";
                Agent::discovered(
                    record.name,
                    role,
                    PlatformRef::VirtualMachine(record.instance_id),
                    running,
                )
            })
            .collect();
        Ok(agents)
    }
}

/// Map a platform role tag to an [`AgentRole`], falling back to the
/// conversational role for untagged workers.
pub(crate) fn resolve_role(tag: Option<&str>, name: &str) -> AgentRole {
    match tag {
        Some(tag) => tag.parse().unwrap_or_else(|_| {
            warn!(name = %name, tag = %tag, "unknown role tag, treating as conversational");
            AgentRole::Conversational
        }),
        None => AgentRole::Conversational,
    }
}
