//! CPU/memory metrics collector for virtual-machine agents.
//!
//! Polls the VM platform's utilization endpoint per instance in isolation —
//! one instance's failure does not block the rest — and applies the
//! threshold reclassification (>70% CPU ⇒ busy, <20% ⇒ idle). The
//! reclassification never moves an agent to or from offline, and a fresh
//! dispatch takes precedence over the CPU-derived state for one interval.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::agent::PlatformRef;
use crate::events::EventPayload;
use crate::platforms::VirtualMachineAdapter;
use crate::realtime::EventBroadcaster;
use crate::registry::AgentRegistry;

pub struct MetricsCollector {
    registry: Arc<AgentRegistry>,
    virtual_machine: Arc<VirtualMachineAdapter>,
    broadcaster: EventBroadcaster,
    interval: Duration,
}

impl MetricsCollector {
    pub fn new(
        registry: Arc<AgentRegistry>,
        virtual_machine: Arc<VirtualMachineAdapter>,
        broadcaster: EventBroadcaster,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            virtual_machine,
            broadcaster,
            interval,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.interval);
            loop {
                tick.tick().await;
                self.collect().await;
            }
        })
    }

    pub async fn collect(&self) {
        let collector_interval =
            chrono::Duration::from_std(self.interval).unwrap_or_else(|_| chrono::Duration::seconds(30));
        let mut updated = false;

        for agent in self.registry.list().await {
            let PlatformRef::VirtualMachine(instance_id) = &agent.platform else {
                continue;
            };
            match self.virtual_machine.utilization(instance_id).await {
                Ok(utilization) => {
                    self.registry
                        .apply_vm_metrics(
                            &agent.id,
                            utilization.cpu_percent,
                            utilization.memory_percent,
                            collector_interval,
                        )
                        .await;
                    updated = true;
                }
                Err(err) => {
                    warn!(
                        agent_id = %agent.id,
                        error = %err,
                        "utilization query failed, keeping previous metrics"
                    );
                }
            }
        }

        if updated {
            self.broadcaster
                .broadcast(EventPayload::metrics_updated(self.registry.list().await));
        }
    }
}
