//! Periodic reconciliation of the canonical registry.
//!
//! On every tick all platform adapters are invoked concurrently. Each
//! adapter succeeds or fails independently; one failure never blocks or
//! discards the others' results. Merged results replace the registry via
//! the sweep-merge rules, and the demo fallback fleet is installed only
//! when no platform credentials are configured at all.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::events::EventPayload;
use crate::platforms::PlatformAdapter;
use crate::realtime::EventBroadcaster;
use crate::registry::{demo_fleet, should_use_fallback, AgentRegistry};

pub struct Reconciler {
    registry: Arc<AgentRegistry>,
    adapters: Vec<Arc<dyn PlatformAdapter>>,
    broadcaster: EventBroadcaster,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        registry: Arc<AgentRegistry>,
        adapters: Vec<Arc<dyn PlatformAdapter>>,
        broadcaster: EventBroadcaster,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            adapters,
            broadcaster,
            interval,
        }
    }

    /// Run the reconciliation loop. The first tick fires immediately, so the
    /// registry is populated before the server starts answering requests in
    /// earnest. A failed sweep is logged and the next tick retries naturally.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.interval);
            loop {
                tick.tick().await;
                if let Err(err) = self.sweep().await {
                    warn!(error = %err, "reconciliation sweep failed");
                }
            }
        })
    }

    /// One full reconciliation sweep: fan out, merge, broadcast.
    pub async fn sweep(&self) -> anyhow::Result<()> {
        let results = join_all(self.adapters.iter().map(|adapter| {
            let adapter = Arc::clone(adapter);
            async move { (adapter.platform(), adapter.discover().await) }
        }))
        .await;

        let mut discovered = Vec::new();
        let mut failed_platforms = Vec::new();
        for (platform, result) in results {
            match result {
                Ok(agents) => {
                    debug!(platform = platform, count = agents.len(), "platform discovery succeeded");
                    discovered.extend(agents);
                }
                Err(err) => {
                    warn!(platform = platform, error = %err, "platform discovery failed, retaining stale agents");
                    failed_platforms.push(platform);
                }
            }
        }

        let credentials_present = self
            .adapters
            .iter()
            .any(|adapter| adapter.credentials_configured());

        if should_use_fallback(credentials_present, discovered.len()) {
            debug!("no platform credentials configured, installing demo fleet");
            discovered = demo_fleet();
        }

        let outcome = self
            .registry
            .apply_sweep(discovered, &failed_platforms)
            .await;

        if !outcome.newly_deployed.is_empty() {
            info!(deployed = ?outcome.newly_deployed, "new agents discovered");
            self.broadcaster.broadcast(EventPayload::agents_deployed(
                outcome.agents.clone(),
                outcome.newly_deployed,
            ));
        }
        self.broadcaster
            .broadcast(EventPayload::agents_updated(outcome.agents));

        Ok(())
    }
}
