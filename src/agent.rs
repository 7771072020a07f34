//! Agent domain model and related types
//!
//! An [`Agent`] is one autonomous worker process, represented uniformly no
//! matter which execution platform hosts it. The registry owns the canonical
//! set of agents; everything else reads and mutates them through the
//! registry's narrow API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role an agent fulfils inside the fleet.
///
/// Capabilities are derived from the role, never stored independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Coordinator,
    Developer,
    Operations,
    Quality,
    Architecture,
    Security,
    Management,
    Conversational,
}

impl AgentRole {
    pub const ALL: [AgentRole; 8] = [
        AgentRole::Coordinator,
        AgentRole::Developer,
        AgentRole::Operations,
        AgentRole::Quality,
        AgentRole::Architecture,
        AgentRole::Security,
        AgentRole::Management,
        AgentRole::Conversational,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Coordinator => "coordinator",
            AgentRole::Developer => "developer",
            AgentRole::Operations => "operations",
            AgentRole::Quality => "quality",
            AgentRole::Architecture => "architecture",
            AgentRole::Security => "security",
            AgentRole::Management => "management",
            AgentRole::Conversational => "conversational",
        }
    }

    /// Fixed capability set for the role.
    pub fn capabilities(&self) -> Vec<String> {
        let caps: &[&str] = match self {
            AgentRole::Coordinator => &["task-coordination", "planning", "delegation"],
            AgentRole::Developer => &["code-generation", "debugging", "refactoring"],
            AgentRole::Operations => &["deployment", "infrastructure", "monitoring"],
            AgentRole::Quality => &["testing", "code-review", "validation"],
            AgentRole::Architecture => &["system-design", "api-design", "documentation"],
            AgentRole::Security => &["security-audit", "vulnerability-scanning", "compliance"],
            AgentRole::Management => &["triage", "reporting", "prioritization"],
            AgentRole::Conversational => &["chat", "summarization", "assistance"],
        };
        caps.iter().map(|c| c.to_string()).collect()
    }
}

impl std::str::FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentRole::ALL
            .iter()
            .copied()
            .find(|role| role.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("unknown agent role: {s}"))
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Current status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Busy,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Offline => "offline",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Execution platform reference carrying the native handle.
///
/// Exactly one handle exists per agent by construction; the variant is the
/// platform tag and the payload is the platform-specific identifier
/// (instance id, task reference, job id, or a generated simulator id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "platform", content = "native_handle", rename_all = "kebab-case")]
pub enum PlatformRef {
    VirtualMachine(String),
    ContainerTask(String),
    BatchJob(String),
    LocalSimulated(String),
}

impl PlatformRef {
    /// Short platform prefix used when composing the global agent id.
    pub fn prefix(&self) -> &'static str {
        match self {
            PlatformRef::VirtualMachine(_) => "vm",
            PlatformRef::ContainerTask(_) => "task",
            PlatformRef::BatchJob(_) => "job",
            PlatformRef::LocalSimulated(_) => "sim",
        }
    }

    /// Human-readable platform label used in logs and error reports.
    pub fn label(&self) -> &'static str {
        match self {
            PlatformRef::VirtualMachine(_) => "virtual-machine",
            PlatformRef::ContainerTask(_) => "container-task",
            PlatformRef::BatchJob(_) => "batch-job",
            PlatformRef::LocalSimulated(_) => "local-simulated",
        }
    }

    pub fn handle(&self) -> &str {
        match self {
            PlatformRef::VirtualMachine(h)
            | PlatformRef::ContainerTask(h)
            | PlatformRef::BatchJob(h)
            | PlatformRef::LocalSimulated(h) => h,
        }
    }

    /// Flat hourly rate estimate in USD. An approximation by design, not
    /// true cost attribution.
    pub fn hourly_rate(&self) -> f64 {
        match self {
            PlatformRef::VirtualMachine(_) => 0.0416,
            PlatformRef::ContainerTask(_) => 0.012,
            PlatformRef::BatchJob(_) => 0.008,
            PlatformRef::LocalSimulated(_) => 0.0,
        }
    }

    pub fn agent_id(&self) -> String {
        format!("{}-{}", self.prefix(), self.handle())
    }
}

/// Rolling per-agent task metrics.
///
/// `cpu_usage`/`memory_usage` are populated by the metrics collector for
/// virtual-machine agents only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub tasks_completed: u64,
    pub success_rate: f64,
    pub average_response_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_usage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<f64>,
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self {
            tasks_completed: 0,
            success_rate: 1.0,
            average_response_time_ms: 0.0,
            cpu_usage: None,
            memory_usage: None,
        }
    }
}

impl AgentMetrics {
    /// Fold one finished task into the rolling averages.
    pub fn record_completion(&mut self, response_time_ms: f64, success: bool) {
        let n = self.tasks_completed as f64;
        self.average_response_time_ms =
            (self.average_response_time_ms * n + response_time_ms) / (n + 1.0);
        self.success_rate = (self.success_rate * n + if success { 1.0 } else { 0.0 }) / (n + 1.0);
        self.tasks_completed += 1;
    }
}

/// Cost estimate attached by the cost collector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub hourly: f64,
    pub daily: f64,
    pub monthly: f64,
}

impl CostEstimate {
    pub fn from_hourly(hourly: f64) -> Self {
        Self {
            hourly,
            daily: hourly * 24.0,
            monthly: hourly * 24.0 * 30.0,
        }
    }
}

/// A worker process discovered on one of the execution platforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub role: AgentRole,
    pub status: AgentStatus,
    #[serde(flatten)]
    pub platform: PlatformRef,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    pub capabilities: Vec<String>,
    pub metrics: AgentMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostEstimate>,
    #[serde(skip)]
    pub last_dispatched_at: Option<DateTime<Utc>>,
}

impl Agent {
    /// Build an agent from a platform discovery record.
    ///
    /// Initial status is `idle` for a running lifecycle and `offline`
    /// otherwise.
    pub fn discovered(name: impl Into<String>, role: AgentRole, platform: PlatformRef, running: bool) -> Self {
        Self {
            id: platform.agent_id(),
            name: name.into(),
            role,
            status: if running { AgentStatus::Idle } else { AgentStatus::Offline },
            capabilities: role.capabilities(),
            platform,
            last_seen: Utc::now(),
            current_task: None,
            metrics: AgentMetrics::default(),
            cost: None,
            last_dispatched_at: None,
        }
    }

    pub fn is_offline(&self) -> bool {
        self.status == AgentStatus::Offline
    }
}

/// Priority of a dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    High,
    Medium,
    Low,
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Medium
    }
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::High => "high",
            TaskPriority::Medium => "medium",
            TaskPriority::Low => "low",
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ephemeral dispatch request. Not retained after dispatch; its only durable
/// trace is the counter increment and `current_task` on the agent.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskRequest {
    pub description: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default = "TaskRequest::default_timeout")]
    pub timeout_seconds: u64,
}

impl TaskRequest {
    fn default_timeout() -> u64 {
        300
    }
}
