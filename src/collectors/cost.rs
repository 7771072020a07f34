//! Cost collector.
//!
//! Attaches hourly/daily/monthly estimates to every agent from a flat
//! per-platform rate table. This is an explicit approximation, not true
//! cost attribution.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::events::EventPayload;
use crate::realtime::EventBroadcaster;
use crate::registry::AgentRegistry;

pub struct CostCollector {
    registry: Arc<AgentRegistry>,
    broadcaster: EventBroadcaster,
    interval: Duration,
}

impl CostCollector {
    pub fn new(registry: Arc<AgentRegistry>, broadcaster: EventBroadcaster, interval: Duration) -> Self {
        Self {
            registry,
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
        let totals = self.registry.apply_costs().await;
        debug!(
            hourly = totals.hourly,
            daily = totals.daily,
            "cost estimates refreshed"
        );
        self.broadcaster.broadcast(EventPayload::costs_updated(
            totals.hourly,
            totals.daily,
            totals.monthly,
        ));
    }
}
