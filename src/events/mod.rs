//! Typed event system for realtime broadcasts.
//!
//! Every state mutation in the control plane is fanned out to subscribed
//! clients as one of these payloads. Serialization to a wire frame happens
//! once, at the transport boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{Agent, TaskPriority};
use crate::classifier::IssueBinding;
use crate::conversation::ChatMessage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub data: EventData,
}

/// Event types delivered over the realtime channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    AgentsUpdated,
    MetricsUpdated,
    CostsUpdated,
    Message,
    TaskSubmitted,
    AgentControlled,
    AgentsDeployed,
    GithubIssue,
    Snapshot,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventType::AgentsUpdated => "agents-updated",
            EventType::MetricsUpdated => "metrics-updated",
            EventType::CostsUpdated => "costs-updated",
            EventType::Message => "message",
            EventType::TaskSubmitted => "task-submitted",
            EventType::AgentControlled => "agent-controlled",
            EventType::AgentsDeployed => "agents-deployed",
            EventType::GithubIssue => "github-issue",
            EventType::Snapshot => "snapshot",
        };
        write!(f, "{}", name)
    }
}

/// Event data, strongly typed per event type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventData {
    Agents(AgentsData),
    Costs(CostsData),
    Chat(ChatData),
    Task(TaskData),
    Control(ControlData),
    Issue(IssueData),
    Snapshot(SnapshotData),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsData {
    pub agents: Vec<Agent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostsData {
    pub hourly: f64,
    pub daily: f64,
    pub monthly: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatData {
    pub agent_id: String,
    pub message: ChatMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskData {
    pub agent_id: String,
    pub submission_id: String,
    pub description: String,
    pub priority: TaskPriority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlData {
    pub agent_id: String,
    pub action: String,
    pub succeeded: bool,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueData {
    pub binding: IssueBinding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotData {
    pub agents: Vec<Agent>,
    pub issues: Vec<IssueBinding>,
}

impl EventPayload {
    fn new(event_type: EventType, data: EventData) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn agents_updated(agents: Vec<Agent>) -> Self {
        Self::new(
            EventType::AgentsUpdated,
            EventData::Agents(AgentsData { agents, deployed: None }),
        )
    }

    pub fn agents_deployed(agents: Vec<Agent>, deployed: Vec<String>) -> Self {
        Self::new(
            EventType::AgentsDeployed,
            EventData::Agents(AgentsData {
                agents,
                deployed: Some(deployed),
            }),
        )
    }

    pub fn metrics_updated(agents: Vec<Agent>) -> Self {
        Self::new(
            EventType::MetricsUpdated,
            EventData::Agents(AgentsData { agents, deployed: None }),
        )
    }

    pub fn costs_updated(hourly: f64, daily: f64, monthly: f64) -> Self {
        Self::new(
            EventType::CostsUpdated,
            EventData::Costs(CostsData { hourly, daily, monthly }),
        )
    }

    pub fn message(agent_id: &str, message: ChatMessage) -> Self {
        Self::new(
            EventType::Message,
            EventData::Chat(ChatData {
                agent_id: agent_id.to_string(),
                message,
            }),
        )
    }

    pub fn task_submitted(
        agent_id: &str,
        submission_id: &str,
        description: &str,
        priority: TaskPriority,
    ) -> Self {
        Self::new(
            EventType::TaskSubmitted,
            EventData::Task(TaskData {
                agent_id: agent_id.to_string(),
                submission_id: submission_id.to_string(),
                description: description.to_string(),
                priority,
            }),
        )
    }

    pub fn agent_controlled(agent_id: &str, action: &str, succeeded: bool, status: &str) -> Self {
        Self::new(
            EventType::AgentControlled,
            EventData::Control(ControlData {
                agent_id: agent_id.to_string(),
                action: action.to_string(),
                succeeded,
                status: status.to_string(),
            }),
        )
    }

    pub fn github_issue(binding: IssueBinding) -> Self {
        Self::new(EventType::GithubIssue, EventData::Issue(IssueData { binding }))
    }

    pub fn snapshot(agents: Vec<Agent>, issues: Vec<IssueBinding>) -> Self {
        Self::new(
            EventType::Snapshot,
            EventData::Snapshot(SnapshotData { agents, issues }),
        )
    }

    /// Serialize for the wire. A payload that fails to serialize degrades to
    /// an empty object rather than killing the connection.
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_wire_names() {
        let payload = EventPayload::costs_updated(1.0, 24.0, 720.0);
        let frame: serde_json::Value = serde_json::from_str(&payload.to_frame()).unwrap();
        assert_eq!(frame["event_type"], "costs-updated");
        assert_eq!(frame["data"]["hourly"], 1.0);
    }

    #[test]
    fn test_deployed_ids_only_present_on_deploy_events() {
        let updated = EventPayload::agents_updated(vec![]);
        let frame: serde_json::Value = serde_json::from_str(&updated.to_frame()).unwrap();
        assert!(frame["data"].get("deployed").is_none());

        let deployed = EventPayload::agents_deployed(vec![], vec!["vm-i-1".to_string()]);
        let frame: serde_json::Value = serde_json::from_str(&deployed.to_frame()).unwrap();
        assert_eq!(frame["data"]["deployed"][0], "vm-i-1");
    }
}
