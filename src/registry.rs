//! Canonical agent registry.
//!
//! The registry is the single owner of the canonical agent map. Every
//! component (reconciler, dispatcher, collectors, request handlers) goes
//! through the same narrow mutation API, so the accepted race between
//! reconciliation and dispatch is confined to the sweep-merge rules here.
//! Nothing is persisted; the map is rebuilt from the platforms on every
//! sweep.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::agent::{
    Agent, AgentMetrics, AgentRole, AgentStatus, CostEstimate, PlatformRef,
};
use crate::error::{AppError, Result};

/// Decide whether the demo fallback fleet should populate the registry.
///
/// True only when no platform credentials are configured at all AND the sweep
/// discovered nothing. With credentials configured, zero discovered agents
/// must produce an empty registry, never fabricated data.
pub fn should_use_fallback(credentials_present: bool, discovered: usize) -> bool {
    !credentials_present && discovered == 0
}

/// Fixed, deterministic demo fleet: seven simulated agents, one per role
/// (the conversational role is covered by chat against any of them).
pub fn demo_fleet() -> Vec<Agent> {
    const ROLES: [AgentRole; 7] = [
        AgentRole::Coordinator,
        AgentRole::Developer,
        AgentRole::Operations,
        AgentRole::Quality,
        AgentRole::Architecture,
        AgentRole::Security,
        AgentRole::Management,
    ];

    ROLES
        .iter()
        .enumerate()
        .map(|(index, role)| {
            let mut agent = Agent::discovered(
                format!("demo-{}", role.as_str()),
                *role,
                PlatformRef::LocalSimulated(format!("demo-{}", role.as_str())),
                true,
            );
            // Synthetic but stable metrics, varying by position only.
            agent.metrics = AgentMetrics {
                tasks_completed: 12 + (index as u64) * 7,
                success_rate: 0.9 + (index as f64) * 0.01,
                average_response_time_ms: 800.0 + (index as f64) * 150.0,
                cpu_usage: None,
                memory_usage: None,
            };
            agent
        })
        .collect()
}

/// Full result of one reconciliation sweep.
#[derive(Debug)]
pub struct SweepOutcome {
    pub agents: Vec<Agent>,
    /// Ids that were not present before this sweep.
    pub newly_deployed: Vec<String>,
}

/// Summed cost estimates across the fleet.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CostTotals {
    pub hourly: f64,
    pub daily: f64,
    pub monthly: f64,
}

/// Agent-side aggregates for the statistics endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AgentCounts {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub offline: usize,
}

pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Agent>>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Full agent list, ordered by id for deterministic output.
    pub async fn list(&self) -> Vec<Agent> {
        let agents = self.agents.read().await;
        let mut list: Vec<Agent> = agents.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub async fn get(&self, id: &str) -> Option<Agent> {
        self.agents.read().await.get(id).cloned()
    }

    /// First idle agent of the given role, in id order.
    pub async fn first_idle(&self, role: AgentRole) -> Option<Agent> {
        self.list()
            .await
            .into_iter()
            .find(|agent| agent.role == role && agent.status == AgentStatus::Idle)
    }

    /// Replace the registry contents with the merged result of a sweep.
    ///
    /// For every incoming agent that already exists, the in-flight
    /// `current_task` is copied forward so a reconciliation racing with a
    /// dispatch does not silently erase the task (and, with it, the busy
    /// status the task invariant requires). Derived fields the platforms
    /// cannot report — metrics, cost, dispatch bookkeeping — are carried
    /// over as well. Agents belonging to a platform whose adapter failed
    /// this sweep are retained stale instead of being dropped.
    pub async fn apply_sweep(
        &self,
        discovered: Vec<Agent>,
        failed_platforms: &[&'static str],
    ) -> SweepOutcome {
        let mut agents = self.agents.write().await;

        let mut next: HashMap<String, Agent> = HashMap::with_capacity(discovered.len());
        for mut agent in discovered {
            if let Some(previous) = agents.get(&agent.id) {
                agent.metrics = previous.metrics.clone();
                agent.cost = previous.cost;
                agent.last_dispatched_at = previous.last_dispatched_at;
                if agent.status != AgentStatus::Offline {
                    if let Some(task) = previous.current_task.clone() {
                        agent.current_task = Some(task);
                        agent.status = AgentStatus::Busy;
                    }
                }
            }
            next.insert(agent.id.clone(), agent);
        }

        for (id, previous) in agents.iter() {
            if failed_platforms.contains(&previous.platform.label()) && !next.contains_key(id) {
                next.insert(id.clone(), previous.clone());
            }
        }

        let mut newly_deployed: Vec<String> = next
            .keys()
            .filter(|id| !agents.contains_key(*id))
            .cloned()
            .collect();
        newly_deployed.sort();

        *agents = next;

        let mut list: Vec<Agent> = agents.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        SweepOutcome {
            agents: list,
            newly_deployed,
        }
    }

    /// Optimistically mark an agent busy for a dispatch.
    ///
    /// Fails with [`AppError::AgentNotFound`] for unknown ids and
    /// [`AppError::AgentUnavailable`] for offline agents, mutating nothing
    /// in either case. Returns the updated agent and the dispatch timestamp
    /// used as a token by [`Self::revert_idle`].
    pub async fn begin_dispatch(&self, id: &str, task: &str) -> Result<(Agent, DateTime<Utc>)> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(id)
            .ok_or_else(|| AppError::AgentNotFound(id.to_string()))?;
        if agent.is_offline() {
            return Err(AppError::AgentUnavailable(id.to_string()));
        }

        let now = Utc::now();
        agent.status = AgentStatus::Busy;
        agent.current_task = Some(task.to_string());
        agent.last_seen = now;
        agent.last_dispatched_at = Some(now);
        Ok((agent.clone(), now))
    }

    /// Apply a task-completion event: busy agents go idle, the task is
    /// cleared and the completion is folded into the rolling metrics.
    /// Returns `None` if the agent is unknown or no longer busy.
    pub async fn complete_task(
        &self,
        id: &str,
        response_time_ms: f64,
        success: bool,
    ) -> Option<Agent> {
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(id)?;
        if agent.status != AgentStatus::Busy {
            return None;
        }
        agent.status = AgentStatus::Idle;
        agent.current_task = None;
        agent.last_seen = Utc::now();
        agent.metrics.record_completion(response_time_ms, success);
        Some(agent.clone())
    }

    /// Auto-timeout revert for chat exchanges with no completion signal.
    ///
    /// Only reverts when the agent is still busy with the exchange identified
    /// by `dispatched_at`; a newer dispatch keeps its busy state. Counters are
    /// not incremented — a timeout is not finished work.
    pub async fn revert_idle(&self, id: &str, dispatched_at: DateTime<Utc>) -> Option<Agent> {
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(id)?;
        if agent.status != AgentStatus::Busy || agent.last_dispatched_at != Some(dispatched_at) {
            return None;
        }
        agent.status = AgentStatus::Idle;
        agent.current_task = None;
        agent.last_seen = Utc::now();
        Some(agent.clone())
    }

    /// Force an agent offline. Used by the stop control action, where the
    /// local stop intent wins over an uncertain remote result.
    pub async fn force_offline(&self, id: &str) -> Result<Agent> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(id)
            .ok_or_else(|| AppError::AgentNotFound(id.to_string()))?;
        agent.status = AgentStatus::Offline;
        agent.current_task = None;
        agent.last_seen = Utc::now();
        Ok(agent.clone())
    }

    /// Bring an agent back after a successful start/restart control action.
    pub async fn mark_started(&self, id: &str) -> Result<Agent> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(id)
            .ok_or_else(|| AppError::AgentNotFound(id.to_string()))?;
        if agent.status == AgentStatus::Offline {
            agent.status = AgentStatus::Idle;
        }
        agent.last_seen = Utc::now();
        Ok(agent.clone())
    }

    /// Attach cost estimates from the flat per-platform rate table and
    /// return the fleet totals.
    pub async fn apply_costs(&self) -> CostTotals {
        let mut agents = self.agents.write().await;
        let mut totals = CostTotals::default();
        for agent in agents.values_mut() {
            let estimate = CostEstimate::from_hourly(agent.platform.hourly_rate());
            agent.cost = Some(estimate);
            totals.hourly += estimate.hourly;
            totals.daily += estimate.daily;
            totals.monthly += estimate.monthly;
        }
        totals
    }

    /// Write collector-derived CPU/memory gauges for a virtual-machine agent
    /// and apply the threshold reclassification.
    ///
    /// Reclassification never moves an agent to or from offline, and a
    /// dispatch within the last collector interval takes precedence over the
    /// CPU-derived state.
    pub async fn apply_vm_metrics(
        &self,
        id: &str,
        cpu_percent: f64,
        memory_percent: f64,
        collector_interval: chrono::Duration,
    ) -> Option<Agent> {
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(id)?;
        if !matches!(agent.platform, PlatformRef::VirtualMachine(_)) {
            return None;
        }

        agent.metrics.cpu_usage = Some(cpu_percent);
        agent.metrics.memory_usage = Some(memory_percent);

        if agent.status != AgentStatus::Offline {
            let recently_dispatched = agent
                .last_dispatched_at
                .map(|at| Utc::now() - at < collector_interval)
                .unwrap_or(false);
            if !recently_dispatched {
                if cpu_percent > 70.0 && agent.status == AgentStatus::Idle {
                    agent.status = AgentStatus::Busy;
                } else if cpu_percent < 20.0 && agent.status == AgentStatus::Busy {
                    agent.status = AgentStatus::Idle;
                    agent.current_task = None;
                }
            }
        }

        agent.last_seen = Utc::now();
        Some(agent.clone())
    }

    /// Agent-side aggregates for the statistics endpoint.
    pub async fn aggregates(&self) -> (AgentCounts, u64, f64, CostTotals) {
        let agents = self.agents.read().await;
        let mut counts = AgentCounts::default();
        let mut tasks_completed = 0;
        let mut success_sum = 0.0;
        let mut costs = CostTotals::default();

        for agent in agents.values() {
            counts.total += 1;
            match agent.status {
                AgentStatus::Busy => counts.active += 1,
                AgentStatus::Idle => counts.idle += 1,
                AgentStatus::Offline => counts.offline += 1,
            }
            tasks_completed += agent.metrics.tasks_completed;
            success_sum += agent.metrics.success_rate;
            if let Some(cost) = agent.cost {
                costs.hourly += cost.hourly;
                costs.daily += cost.daily;
                costs.monthly += cost.monthly;
            }
        }

        let mean_success = if counts.total > 0 {
            success_sum / counts.total as f64
        } else {
            0.0
        };
        (counts, tasks_completed, mean_success, costs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm_agent(instance: &str, role: AgentRole, running: bool) -> Agent {
        Agent::discovered(
            format!("{}-{}", role.as_str(), instance),
            role,
            PlatformRef::VirtualMachine(instance.to_string()),
            running,
        )
    }

    #[test]
    fn test_fallback_decision_table() {
        assert!(should_use_fallback(false, 0));
        assert!(!should_use_fallback(false, 3));
        assert!(!should_use_fallback(true, 0));
        assert!(!should_use_fallback(true, 3));
    }

    #[test]
    fn test_demo_fleet_is_stable_and_role_unique() {
        let first = demo_fleet();
        let second = demo_fleet();
        assert_eq!(first.len(), 7);

        // Identity and synthetic metrics are deterministic across calls.
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.role, b.role);
            assert_eq!(a.metrics, b.metrics);
        }

        let roles: std::collections::HashSet<AgentRole> = first.iter().map(|a| a.role).collect();
        assert_eq!(roles.len(), 7);
        assert!(first.iter().all(|a| a.id.starts_with("sim-demo-")));
    }

    #[tokio::test]
    async fn test_sweep_copies_current_task_forward() {
        let registry = AgentRegistry::new();
        registry
            .apply_sweep(vec![vm_agent("i-1", AgentRole::Developer, true)], &[])
            .await;
        registry.begin_dispatch("vm-i-1", "fix the build").await.unwrap();

        // Next sweep rediscovers the same agent as a fresh idle record.
        let outcome = registry
            .apply_sweep(vec![vm_agent("i-1", AgentRole::Developer, true)], &[])
            .await;

        let agent = &outcome.agents[0];
        assert_eq!(agent.current_task.as_deref(), Some("fix the build"));
        assert_eq!(agent.status, AgentStatus::Busy);
    }

    #[tokio::test]
    async fn test_sweep_preserves_metrics_across_rediscovery() {
        let registry = AgentRegistry::new();
        registry
            .apply_sweep(vec![vm_agent("i-1", AgentRole::Developer, true)], &[])
            .await;
        registry.begin_dispatch("vm-i-1", "task").await.unwrap();
        registry.complete_task("vm-i-1", 500.0, true).await.unwrap();

        let outcome = registry
            .apply_sweep(vec![vm_agent("i-1", AgentRole::Developer, true)], &[])
            .await;
        assert_eq!(outcome.agents[0].metrics.tasks_completed, 1);
    }

    #[tokio::test]
    async fn test_sweep_drops_task_for_offline_agent() {
        let registry = AgentRegistry::new();
        registry
            .apply_sweep(vec![vm_agent("i-1", AgentRole::Developer, true)], &[])
            .await;
        registry.begin_dispatch("vm-i-1", "task").await.unwrap();

        // Instance stopped between sweeps.
        let outcome = registry
            .apply_sweep(vec![vm_agent("i-1", AgentRole::Developer, false)], &[])
            .await;
        let agent = &outcome.agents[0];
        assert_eq!(agent.status, AgentStatus::Offline);
        assert_eq!(agent.current_task, None);
    }

    #[tokio::test]
    async fn test_sweep_retains_stale_agents_for_failed_platform() {
        let registry = AgentRegistry::new();
        registry
            .apply_sweep(
                vec![
                    vm_agent("i-1", AgentRole::Developer, true),
                    Agent::discovered(
                        "q-1",
                        AgentRole::Quality,
                        PlatformRef::BatchJob("j-1".into()),
                        true,
                    ),
                ],
                &[],
            )
            .await;

        // Batch adapter failed this sweep; its agent must survive stale.
        let outcome = registry
            .apply_sweep(
                vec![vm_agent("i-1", AgentRole::Developer, true)],
                &["batch-job"],
            )
            .await;
        assert_eq!(outcome.agents.len(), 2);
        assert!(outcome.agents.iter().any(|a| a.id == "job-j-1"));

        // Adapter recovered and reports nothing: the agent is gone.
        let outcome = registry
            .apply_sweep(vec![vm_agent("i-1", AgentRole::Developer, true)], &[])
            .await;
        assert_eq!(outcome.agents.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_reports_newly_deployed_ids() {
        let registry = AgentRegistry::new();
        let outcome = registry
            .apply_sweep(vec![vm_agent("i-1", AgentRole::Developer, true)], &[])
            .await;
        assert_eq!(outcome.newly_deployed, vec!["vm-i-1".to_string()]);

        let outcome = registry
            .apply_sweep(
                vec![
                    vm_agent("i-1", AgentRole::Developer, true),
                    vm_agent("i-2", AgentRole::Security, true),
                ],
                &[],
            )
            .await;
        assert_eq!(outcome.newly_deployed, vec!["vm-i-2".to_string()]);
    }

    #[tokio::test]
    async fn test_dispatch_to_unknown_agent_fails() {
        let registry = AgentRegistry::new();
        let err = registry.begin_dispatch("vm-i-404", "task").await.unwrap_err();
        assert!(matches!(err, AppError::AgentNotFound(_)));
    }

    #[tokio::test]
    async fn test_dispatch_to_offline_agent_fails_without_mutation() {
        let registry = AgentRegistry::new();
        registry
            .apply_sweep(vec![vm_agent("i-1", AgentRole::Developer, false)], &[])
            .await;

        let err = registry.begin_dispatch("vm-i-1", "task").await.unwrap_err();
        assert!(matches!(err, AppError::AgentUnavailable(_)));

        let agent = registry.get("vm-i-1").await.unwrap();
        assert_eq!(agent.status, AgentStatus::Offline);
        assert_eq!(agent.current_task, None);
    }

    #[tokio::test]
    async fn test_revert_idle_ignores_newer_dispatch() {
        let registry = AgentRegistry::new();
        registry
            .apply_sweep(vec![vm_agent("i-1", AgentRole::Developer, true)], &[])
            .await;

        let (_, first) = registry.begin_dispatch("vm-i-1", "first").await.unwrap();
        registry.complete_task("vm-i-1", 100.0, true).await.unwrap();
        let (_, _second) = registry.begin_dispatch("vm-i-1", "second").await.unwrap();

        // Timeout from the first exchange fires late; the second dispatch wins.
        assert!(registry.revert_idle("vm-i-1", first).await.is_none());
        let agent = registry.get("vm-i-1").await.unwrap();
        assert_eq!(agent.status, AgentStatus::Busy);
        assert_eq!(agent.current_task.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_vm_metrics_reclassification_thresholds() {
        let registry = AgentRegistry::new();
        registry
            .apply_sweep(vec![vm_agent("i-1", AgentRole::Developer, true)], &[])
            .await;
        let interval = chrono::Duration::seconds(30);

        let agent = registry.apply_vm_metrics("vm-i-1", 85.0, 40.0, interval).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Busy);
        assert_eq!(agent.metrics.cpu_usage, Some(85.0));

        let agent = registry.apply_vm_metrics("vm-i-1", 10.0, 40.0, interval).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);

        // Mid-band CPU leaves the status alone.
        let agent = registry.apply_vm_metrics("vm-i-1", 50.0, 40.0, interval).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn test_vm_metrics_never_touch_offline() {
        let registry = AgentRegistry::new();
        registry
            .apply_sweep(vec![vm_agent("i-1", AgentRole::Developer, false)], &[])
            .await;

        let agent = registry
            .apply_vm_metrics("vm-i-1", 95.0, 60.0, chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(agent.status, AgentStatus::Offline);
        assert_eq!(agent.metrics.cpu_usage, Some(95.0));
    }

    #[tokio::test]
    async fn test_vm_metrics_respect_fresh_dispatch() {
        let registry = AgentRegistry::new();
        registry
            .apply_sweep(vec![vm_agent("i-1", AgentRole::Developer, true)], &[])
            .await;
        registry.begin_dispatch("vm-i-1", "task").await.unwrap();

        // CPU says idle, but the dispatch just happened: busy wins.
        let agent = registry
            .apply_vm_metrics("vm-i-1", 5.0, 30.0, chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(agent.status, AgentStatus::Busy);
        assert_eq!(agent.current_task.as_deref(), Some("task"));
    }

    #[tokio::test]
    async fn test_costs_use_flat_platform_rates() {
        let registry = AgentRegistry::new();
        registry
            .apply_sweep(
                vec![
                    vm_agent("i-1", AgentRole::Developer, true),
                    Agent::discovered(
                        "sim-1",
                        AgentRole::Conversational,
                        PlatformRef::LocalSimulated("s-1".into()),
                        true,
                    ),
                ],
                &[],
            )
            .await;

        let totals = registry.apply_costs().await;
        assert!((totals.hourly - 0.0416).abs() < 1e-9);
        let vm = registry.get("vm-i-1").await.unwrap();
        assert_eq!(vm.cost.unwrap().hourly, 0.0416);
        let sim = registry.get("sim-s-1").await.unwrap();
        assert_eq!(sim.cost.unwrap().hourly, 0.0);
    }
}
