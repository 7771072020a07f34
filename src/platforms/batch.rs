//! Batch-job platform adapter.
//!
//! Discovery lists active jobs; dispatch submits a new job with a
//! priority-to-queue mapping: high priority goes to the high-priority queue,
//! everything else to the default queue.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::agent::{Agent, PlatformRef, TaskPriority};
use crate::config::PlatformEndpoint;
use crate::error::{AppError, Result};
use crate::platforms::virtual_machine::resolve_role;
use crate::platforms::{authorize, PlatformAdapter};

const HIGH_PRIORITY_QUEUE: &str = "agent-high-priority";
const DEFAULT_QUEUE: &str = "agent-default";

#[derive(Debug, Deserialize)]
struct JobRecord {
    job_id: String,
    job_name: String,
    status: String,
    #[serde(default)]
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitJobResponse {
    job_id: String,
}

pub struct BatchJobAdapter {
    client: reqwest::Client,
    endpoint: PlatformEndpoint,
}

impl BatchJobAdapter {
    pub fn new(client: reqwest::Client, endpoint: PlatformEndpoint) -> Self {
        Self { client, endpoint }
    }

    fn adapter_failure(&self, err: impl std::fmt::Display) -> AppError {
        AppError::AdapterFailure {
            platform: "batch-job",
            message: err.to_string(),
        }
    }

    pub fn queue_for(priority: TaskPriority) -> &'static str {
        match priority {
            TaskPriority::High => HIGH_PRIORITY_QUEUE,
            TaskPriority::Medium | TaskPriority::Low => DEFAULT_QUEUE,
        }
    }

    /// Submit a job carrying the payload. Returns the platform job id.
    pub async fn submit_job(
        &self,
        job_name: &str,
        payload: &str,
        priority: TaskPriority,
        timeout_seconds: u64,
    ) -> Result<String> {
        let url = format!("{}/v1/jobs", self.endpoint.base_url);
        let response: SubmitJobResponse = authorize(self.client.post(&url), &self.endpoint.api_token)
            .json(&json!({
                "job_name": job_name,
                "queue": Self::queue_for(priority),
                "payload": payload,
                "timeout_seconds": timeout_seconds,
            }))
            .send()
            .await
            .map_err(|e| self.adapter_failure(e))?
            .error_for_status()
            .map_err(|e| self.adapter_failure(e))?
            .json()
            .await
            .map_err(|e| self.adapter_failure(e))?;

        debug!(
            job_name = %job_name,
            job_id = %response.job_id,
            queue = Self::queue_for(priority),
            "batch job submitted"
        );
        Ok(response.job_id)
    }
}

#[async_trait]
impl PlatformAdapter for BatchJobAdapter {
    fn platform(&self) -> &'static str {
        "batch-job"
    }

    fn credentials_configured(&self) -> bool {
        self.endpoint.credentials_configured()
    }

    async fn discover(&self) -> Result<Vec<Agent>> {
        if !self.credentials_configured() {
            debug!("batch-job credentials not configured, skipping discovery");
            return Ok(Vec::new());
        }

        let url = format!("{}/v1/jobs?status=active", self.endpoint.base_url);
        let records: Vec<JobRecord> = authorize(self.client.get(&url), &self.endpoint.api_token)
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
                let role = resolve_role(record.role.as_deref(), &record.job_name);
                let running = record.status == "RUNNING";
                Agent::discovered(
                    record.job_name,
                    role,
                    PlatformRef::BatchJob(record.job_id),
                    running,
                )
            })
            .collect();
        Ok(agents)
    }
}
