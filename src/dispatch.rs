//! Task and message dispatch.
//!
//! The dispatcher resolves an agent id, optimistically marks it busy, and
//! routes the payload to the agent's platform. Completion accounting happens
//! only when finished work is observed: remote command output, a simulator
//! completion, or an explicit platform event. A chat exchange additionally
//! arms an auto-timeout that reverts the agent to idle when no completion
//! signal arrives.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::agent::{Agent, PlatformRef, TaskPriority, TaskRequest};
use crate::conversation::{ConversationStore, MessageSender};
use crate::error::{AppError, Result};
use crate::events::EventPayload;
use crate::platforms::{BatchJobAdapter, ContainerTaskAdapter, LocalSimulator, VirtualMachineAdapter};
use crate::realtime::EventBroadcaster;
use crate::registry::AgentRegistry;

/// Submission state reported back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    /// Finished work was observed before returning.
    Completed,
    /// Accepted by the platform; completion will arrive later (or never).
    Processing,
}

/// Handle returned from a successful dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub submission_id: String,
    pub status: SubmissionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

pub struct Dispatcher {
    registry: Arc<AgentRegistry>,
    conversations: Arc<ConversationStore>,
    broadcaster: EventBroadcaster,
    virtual_machine: Arc<VirtualMachineAdapter>,
    container: Arc<ContainerTaskAdapter>,
    batch: Arc<BatchJobAdapter>,
    simulator: LocalSimulator,
    chat_auto_idle: Duration,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<AgentRegistry>,
        conversations: Arc<ConversationStore>,
        broadcaster: EventBroadcaster,
        virtual_machine: Arc<VirtualMachineAdapter>,
        container: Arc<ContainerTaskAdapter>,
        batch: Arc<BatchJobAdapter>,
        simulator: LocalSimulator,
        chat_auto_idle: Duration,
    ) -> Self {
        Self {
            registry,
            conversations,
            broadcaster,
            virtual_machine,
            container,
            batch,
            simulator,
            chat_auto_idle,
        }
    }

    /// Send a chat message to an agent.
    pub async fn send_message(&self, agent_id: &str, content: &str) -> Result<DispatchOutcome> {
        let task = format!("chat: {}", content);
        let (agent, dispatched_at) = self.registry.begin_dispatch(agent_id, &task).await?;

        let message = self
            .conversations
            .append(agent_id, MessageSender::User, content);
        self.broadcaster
            .broadcast(EventPayload::message(agent_id, message));

        let outcome = match &agent.platform {
            PlatformRef::VirtualMachine(instance_id) => {
                self.message_virtual_machine(&agent, instance_id, content, dispatched_at)
                    .await
            }
            PlatformRef::ContainerTask(_) | PlatformRef::BatchJob(_) => {
                self.submit_to_platform(&agent, content, TaskPriority::Medium, 300)
                    .await
            }
            PlatformRef::LocalSimulated(_) => Ok(DispatchOutcome {
                submission_id: self.simulator.dispatch(agent_id, content),
                status: SubmissionStatus::Processing,
                response: None,
            }),
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                // Undo the optimistic busy transition; the exchange never
                // reached the platform.
                self.registry.revert_idle(agent_id, dispatched_at).await;
                return Err(err);
            }
        };

        if outcome.status == SubmissionStatus::Processing {
            self.arm_chat_timeout(agent_id, dispatched_at);
        }

        self.broadcaster
            .broadcast(EventPayload::agents_updated(self.registry.list().await));
        Ok(outcome)
    }

    /// Submit a task to an agent.
    pub async fn submit_task(&self, agent_id: &str, request: &TaskRequest) -> Result<DispatchOutcome> {
        if request.description.trim().is_empty() {
            return Err(AppError::BadRequest("task description cannot be empty".into()));
        }

        let (agent, dispatched_at) = self
            .registry
            .begin_dispatch(agent_id, &request.description)
            .await?;

        let outcome = match &agent.platform {
            PlatformRef::VirtualMachine(instance_id) => {
                self.task_virtual_machine(&agent, instance_id, request).await
            }
            PlatformRef::ContainerTask(_) | PlatformRef::BatchJob(_) => {
                self.submit_to_platform(
                    &agent,
                    &request.description,
                    request.priority,
                    request.timeout_seconds,
                )
                .await
            }
            PlatformRef::LocalSimulated(_) => Ok(DispatchOutcome {
                submission_id: self.simulator.dispatch(agent_id, &request.description),
                status: SubmissionStatus::Processing,
                response: None,
            }),
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                self.registry.revert_idle(agent_id, dispatched_at).await;
                return Err(err);
            }
        };

        info!(
            agent_id = %agent_id,
            submission_id = %outcome.submission_id,
            priority = %request.priority,
            "task dispatched"
        );
        self.broadcaster.broadcast(EventPayload::task_submitted(
            agent_id,
            &outcome.submission_id,
            &request.description,
            request.priority,
        ));
        self.broadcaster
            .broadcast(EventPayload::agents_updated(self.registry.list().await));
        Ok(outcome)
    }

    /// Assign a classified issue to the first idle agent of the resolved
    /// role. Fails with [`AppError::ClassificationMiss`] when none is idle;
    /// the caller records the event without queuing or retrying.
    pub async fn assign_issue(
        &self,
        role: crate::agent::AgentRole,
        description: &str,
        priority: TaskPriority,
    ) -> Result<(String, DispatchOutcome)> {
        let agent = self
            .registry
            .first_idle(role)
            .await
            .ok_or_else(|| AppError::ClassificationMiss(role.to_string()))?;

        let request = TaskRequest {
            description: description.to_string(),
            priority,
            timeout_seconds: 600,
        };
        let outcome = self.submit_task(&agent.id, &request).await?;
        self.conversations.append(
            &agent.id,
            MessageSender::System,
            format!("Auto-assigned: {}", description),
        );
        Ok((agent.id, outcome))
    }

    async fn message_virtual_machine(
        &self,
        agent: &Agent,
        instance_id: &str,
        content: &str,
        dispatched_at: DateTime<Utc>,
    ) -> Result<DispatchOutcome> {
        let command = format!("agent-cli prompt {}", shell_quote(content));
        let result = self.virtual_machine.run_command(instance_id, &command).await?;

        if let Some(output) = result.output {
            let elapsed = (Utc::now() - dispatched_at).num_milliseconds().max(0) as f64;
            self.registry.complete_task(&agent.id, elapsed, true).await;
            let reply = self
                .conversations
                .append(&agent.id, MessageSender::Agent, output.clone());
            self.broadcaster
                .broadcast(EventPayload::message(&agent.id, reply));
            return Ok(DispatchOutcome {
                submission_id: result.command_id,
                status: SubmissionStatus::Completed,
                response: Some(output),
            });
        }

        debug!(agent_id = %agent.id, "no output within bound, reporting still processing");
        Ok(DispatchOutcome {
            submission_id: result.command_id,
            status: SubmissionStatus::Processing,
            response: None,
        })
    }

    async fn task_virtual_machine(
        &self,
        agent: &Agent,
        instance_id: &str,
        request: &TaskRequest,
    ) -> Result<DispatchOutcome> {
        let command = format!(
            "agent-cli task --priority {} {}",
            request.priority,
            shell_quote(&request.description)
        );
        let result = self.virtual_machine.run_command(instance_id, &command).await?;

        if let Some(output) = result.output {
            self.registry.complete_task(&agent.id, 0.0, true).await;
            return Ok(DispatchOutcome {
                submission_id: result.command_id,
                status: SubmissionStatus::Completed,
                response: Some(output),
            });
        }
        Ok(DispatchOutcome {
            submission_id: result.command_id,
            status: SubmissionStatus::Processing,
            response: None,
        })
    }

    async fn submit_to_platform(
        &self,
        agent: &Agent,
        payload: &str,
        priority: TaskPriority,
        timeout_seconds: u64,
    ) -> Result<DispatchOutcome> {
        let submission_id = match &agent.platform {
            PlatformRef::ContainerTask(_) => {
                self.container
                    .run_task(&agent.name, payload, timeout_seconds)
                    .await?
            }
            PlatformRef::BatchJob(_) => {
                self.batch
                    .submit_job(&agent.name, payload, priority, timeout_seconds)
                    .await?
            }
            _ => unreachable!("submit_to_platform called for non-submission platform"),
        };
        Ok(DispatchOutcome {
            submission_id,
            status: SubmissionStatus::Processing,
            response: None,
        })
    }

    /// Revert the agent to idle after the chat auto-timeout unless a
    /// completion (or a newer dispatch) got there first. Counters stay
    /// untouched; a timeout is not finished work.
    fn arm_chat_timeout(&self, agent_id: &str, dispatched_at: DateTime<Utc>) {
        let registry = Arc::clone(&self.registry);
        let broadcaster = self.broadcaster.clone();
        let agent_id = agent_id.to_string();
        let timeout = self.chat_auto_idle;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if registry.revert_idle(&agent_id, dispatched_at).await.is_some() {
                warn!(agent_id = %agent_id, "chat exchange timed out, reverting to idle");
                broadcaster.broadcast(EventPayload::agents_updated(registry.list().await));
            }
        });
    }
}

/// Minimal single-quote shell quoting for payloads embedded in remote
/// commands.
fn shell_quote(payload: &str) -> String {
    format!("'{}'", payload.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
