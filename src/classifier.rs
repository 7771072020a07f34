//! Issue-tracker event classification.
//!
//! Maps an inbound issue event to a `(role, priority)` pair using a fixed
//! precedence: labels first, then title/body keywords, then a management
//! triage default. First match wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::agent::{AgentRole, TaskPriority};

/// Upper bound on retained bindings; older entries are dropped first.
const ISSUE_LOG_CAPACITY: usize = 200;

/// Parsed issue-tracker event, extracted from the webhook payload.
#[derive(Debug, Clone)]
pub struct IssueEvent {
    pub repository: String,
    pub number: u64,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

/// Classification result bound to the issue that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueBinding {
    pub repository: String,
    pub number: u64,
    pub title: String,
    pub role: AgentRole,
    pub priority: TaskPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
    pub state: IssueState,
    pub received_at: DateTime<Utc>,
}

/// Resolve the agent role for an issue.
pub fn classify_role(labels: &[String], title: &str, body: &str) -> AgentRole {
    let labels: Vec<String> = labels.iter().map(|l| l.to_lowercase()).collect();
    let has = |candidates: &[&str]| labels.iter().any(|l| candidates.contains(&l.as_str()));

    if has(&["bug", "fix"]) {
        return AgentRole::Developer;
    }
    if has(&["architecture", "design"]) {
        return AgentRole::Architecture;
    }
    if has(&["deployment", "infrastructure"]) {
        return AgentRole::Operations;
    }
    if has(&["testing", "qa"]) {
        return AgentRole::Quality;
    }

    let text = format!("{} {}", title, body).to_lowercase();
    if text.contains("deploy") {
        return AgentRole::Operations;
    }
    if text.contains("test") {
        return AgentRole::Quality;
    }
    if text.contains("design") {
        return AgentRole::Architecture;
    }

    AgentRole::Management
}

/// Resolve the priority for an issue.
pub fn classify_priority(labels: &[String]) -> TaskPriority {
    let labels: Vec<String> = labels.iter().map(|l| l.to_lowercase()).collect();
    let has = |candidates: &[&str]| labels.iter().any(|l| candidates.contains(&l.as_str()));

    if has(&["critical", "urgent", "high-priority"]) {
        return TaskPriority::High;
    }
    if has(&["low-priority"]) {
        return TaskPriority::Low;
    }
    TaskPriority::Medium
}

/// Classify an issue event into a transient binding (unassigned).
pub fn classify(event: &IssueEvent) -> IssueBinding {
    IssueBinding {
        repository: event.repository.clone(),
        number: event.number,
        title: event.title.clone(),
        role: classify_role(&event.labels, &event.title, &event.body),
        priority: classify_priority(&event.labels),
        assigned_agent: None,
        state: IssueState::Open,
        received_at: Utc::now(),
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IssueCounts {
    pub total: usize,
    pub open: usize,
    pub closed: usize,
}

/// Bounded in-memory log of issue bindings, consumed by the aggregate
/// statistics endpoint and by realtime snapshots for newly connected clients.
#[derive(Default)]
pub struct IssueLog {
    entries: RwLock<Vec<IssueBinding>>,
}

impl IssueLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, binding: IssueBinding) {
        let mut entries = self.entries.write().await;
        entries.push(binding);
        if entries.len() > ISSUE_LOG_CAPACITY {
            let excess = entries.len() - ISSUE_LOG_CAPACITY;
            entries.drain(..excess);
        }
    }

    /// Mark the most recent binding for the issue as closed.
    pub async fn mark_closed(&self, repository: &str, number: u64) -> bool {
        let mut entries = self.entries.write().await;
        for entry in entries.iter_mut().rev() {
            if entry.repository == repository && entry.number == number {
                entry.state = IssueState::Closed;
                return true;
            }
        }
        false
    }

    pub async fn snapshot(&self) -> Vec<IssueBinding> {
        self.entries.read().await.clone()
    }

    pub async fn counts(&self) -> IssueCounts {
        let entries = self.entries.read().await;
        let closed = entries.iter().filter(|e| e.state == IssueState::Closed).count();
        IssueCounts {
            total: entries.len(),
            open: entries.len() - closed,
            closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(labels: &[&str], title: &str, body: &str) -> IssueEvent {
        IssueEvent {
            repository: "acme/widgets".to_string(),
            number: 42,
            title: title.to_string(),
            body: body.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[test]
    fn test_bug_label_routes_to_developer() {
        let binding = classify(&event(&["bug"], "Something broke", ""));
        assert_eq!(binding.role, AgentRole::Developer);
    }

    #[test]
    fn test_critical_label_is_high_priority() {
        let binding = classify(&event(&["critical"], "Everything is down", ""));
        assert_eq!(binding.priority, TaskPriority::High);
    }

    #[test]
    fn test_deploy_keyword_routes_to_operations() {
        let binding = classify(&event(&[], "Deploy new pipeline", ""));
        assert_eq!(binding.role, AgentRole::Operations);
        assert_eq!(binding.priority, TaskPriority::Medium);
    }

    #[test]
    fn test_unmatched_defaults_to_management_triage() {
        let binding = classify(&event(&[], "Question about roadmap", "when is v2 due?"));
        assert_eq!(binding.role, AgentRole::Management);
        assert_eq!(binding.priority, TaskPriority::Medium);
    }

    #[test]
    fn test_labels_take_precedence_over_keywords() {
        // Body mentions "deploy", but the bug label wins.
        let binding = classify(&event(&["bug"], "Deploy script crashes", "fails to deploy"));
        assert_eq!(binding.role, AgentRole::Developer);
    }

    #[test]
    fn test_label_matching_is_case_insensitive() {
        let binding = classify(&event(&["QA", "Low-Priority"], "Flaky suite", ""));
        assert_eq!(binding.role, AgentRole::Quality);
        assert_eq!(binding.priority, TaskPriority::Low);
    }

    #[tokio::test]
    async fn test_issue_log_counts_open_and_closed() {
        let log = IssueLog::new();
        log.record(classify(&event(&["bug"], "a", ""))).await;
        let mut second = classify(&event(&[], "b", ""));
        second.number = 43;
        log.record(second).await;
        log.mark_closed("acme/widgets", 43).await;

        let counts = log.counts().await;
        assert_eq!(counts.total, 2);
        assert_eq!(counts.open, 1);
        assert_eq!(counts.closed, 1);
    }
}
