//! Control actions for virtual-machine agents.
//!
//! Each action is a deterministic, named sequence of remote commands
//! executed through the VM adapter's command channel. A remote failure
//! surfaces as an error and leaves the agent's status unchanged, with one
//! exception: `stop` always forces the agent offline, because a local stop
//! intent must win over an uncertain remote result.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agent::{AgentStatus, PlatformRef};
use crate::conversation::{ConversationStore, MessageSender};
use crate::error::{AppError, Result};
use crate::events::EventPayload;
use crate::platforms::VirtualMachineAdapter;
use crate::realtime::EventBroadcaster;
use crate::reconciler::Reconciler;
use crate::registry::AgentRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
    Status,
    Logs,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Start => "start",
            ControlAction::Stop => "stop",
            ControlAction::Restart => "restart",
            ControlAction::Status => "status",
            ControlAction::Logs => "logs",
        }
    }

    /// The remote command sequence for this action.
    pub fn commands(&self) -> &'static [&'static str] {
        match self {
            ControlAction::Start => &["tmux new-session -d -s agent 'agent-runtime --resume'"],
            ControlAction::Stop => &["tmux kill-session -t agent", "pkill -f agent-runtime"],
            ControlAction::Restart => &[
                "tmux kill-session -t agent",
                "pkill -f agent-runtime",
                "sleep 2",
                "agent-auth refresh",
                "tmux new-session -d -s agent 'agent-runtime --resume'",
            ],
            ControlAction::Status => &["tmux has-session -t agent && echo running || echo stopped"],
            ControlAction::Logs => &["tail -n 100 /var/log/agent/agent.log"],
        }
    }

    /// Whether the action changes platform state and therefore warrants an
    /// immediate reconciliation sweep.
    pub fn changes_platform_state(&self) -> bool {
        matches!(
            self,
            ControlAction::Start | ControlAction::Stop | ControlAction::Restart
        )
    }
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Report returned to the caller after a control action.
#[derive(Debug, Clone, Serialize)]
pub struct ControlReport {
    pub agent_id: String,
    pub action: ControlAction,
    pub succeeded: bool,
    pub status: AgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

pub struct Controller {
    registry: Arc<AgentRegistry>,
    virtual_machine: Arc<VirtualMachineAdapter>,
    conversations: Arc<ConversationStore>,
    broadcaster: EventBroadcaster,
    reconciler: Arc<Reconciler>,
}

impl Controller {
    pub fn new(
        registry: Arc<AgentRegistry>,
        virtual_machine: Arc<VirtualMachineAdapter>,
        conversations: Arc<ConversationStore>,
        broadcaster: EventBroadcaster,
        reconciler: Arc<Reconciler>,
    ) -> Self {
        Self {
            registry,
            virtual_machine,
            conversations,
            broadcaster,
            reconciler,
        }
    }

    pub async fn execute(&self, agent_id: &str, action: ControlAction) -> Result<ControlReport> {
        let agent = self
            .registry
            .get(agent_id)
            .await
            .ok_or_else(|| AppError::AgentNotFound(agent_id.to_string()))?;

        let PlatformRef::VirtualMachine(instance_id) = agent.platform.clone() else {
            return Err(AppError::BadRequest(format!(
                "control actions are only available for virtual-machine agents, {} runs on {}",
                agent_id,
                agent.platform.label()
            )));
        };

        info!(agent_id = %agent_id, action = %action, "executing control action");

        let mut output = None;
        for command in action.commands() {
            match self.virtual_machine.run_command(&instance_id, command).await {
                Ok(result) => output = result.output,
                Err(err) => {
                    warn!(
                        agent_id = %agent_id,
                        action = %action,
                        error = %err,
                        "control action remote execution failed"
                    );
                    if action == ControlAction::Stop {
                        return Ok(self.finish(agent_id, action, false, None).await?);
                    }
                    // All other actions leave the agent's status unchanged.
                    return Err(err);
                }
            }
        }

        Ok(self.finish(agent_id, action, true, output).await?)
    }

    async fn finish(
        &self,
        agent_id: &str,
        action: ControlAction,
        succeeded: bool,
        output: Option<String>,
    ) -> Result<ControlReport> {
        let status = match action {
            ControlAction::Start | ControlAction::Restart => {
                self.registry.mark_started(agent_id).await?.status
            }
            ControlAction::Stop => self.registry.force_offline(agent_id).await?.status,
            ControlAction::Status | ControlAction::Logs => {
                self.registry
                    .get(agent_id)
                    .await
                    .ok_or_else(|| AppError::AgentNotFound(agent_id.to_string()))?
                    .status
            }
        };

        self.conversations.append(
            agent_id,
            MessageSender::System,
            format!(
                "Control action '{}' {}",
                action,
                if succeeded { "completed" } else { "failed (remote channel)" }
            ),
        );
        self.broadcaster.broadcast(EventPayload::agent_controlled(
            agent_id,
            action.as_str(),
            succeeded,
            status.as_str(),
        ));
        self.broadcaster
            .broadcast(EventPayload::agents_updated(self.registry.list().await));

        if action.changes_platform_state() {
            let reconciler = Arc::clone(&self.reconciler);
            tokio::spawn(async move {
                if let Err(err) = reconciler.sweep().await {
                    warn!(error = %err, "post-control reconciliation sweep failed");
                }
            });
        }

        Ok(ControlReport {
            agent_id: agent_id.to_string(),
            action,
            succeeded,
            status,
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_sequences_are_fixed() {
        assert_eq!(ControlAction::Start.commands().len(), 1);
        assert_eq!(ControlAction::Stop.commands().len(), 2);
        // restart = kill session, kill process, sleep, re-authenticate, start session
        assert_eq!(ControlAction::Restart.commands().len(), 5);
        assert!(ControlAction::Restart.commands()[2].starts_with("sleep"));
    }

    #[test]
    fn test_only_lifecycle_actions_trigger_reconcile() {
        assert!(ControlAction::Start.changes_platform_state());
        assert!(ControlAction::Stop.changes_platform_state());
        assert!(ControlAction::Restart.changes_platform_state());
        assert!(!ControlAction::Status.changes_platform_state());
        assert!(!ControlAction::Logs.changes_platform_state());
    }
}
