//! Local simulated platform.
//!
//! Simulated agents complete dispatched work after a randomized delay, then
//! self-transition back to idle and increment their completion counters.
//! Used by the demo fallback fleet and by any agent discovered with a
//! `local-simulated` platform reference.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::debug;
use uuid::Uuid;

use crate::conversation::{ConversationStore, MessageSender};
use crate::events::EventPayload;
use crate::realtime::EventBroadcaster;
use crate::registry::AgentRegistry;

pub struct LocalSimulator {
    registry: Arc<AgentRegistry>,
    conversations: Arc<ConversationStore>,
    broadcaster: EventBroadcaster,
    delay_min: Duration,
    delay_max: Duration,
}

impl LocalSimulator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        conversations: Arc<ConversationStore>,
        broadcaster: EventBroadcaster,
        delay_min: Duration,
        delay_max: Duration,
    ) -> Self {
        Self {
            registry,
            conversations,
            broadcaster,
            delay_min,
            delay_max,
        }
    }

    /// Accept a dispatch for a simulated agent. Returns immediately with a
    /// generated submission id; a background task applies the completion
    /// after the randomized delay.
    pub fn dispatch(&self, agent_id: &str, payload: &str) -> String {
        let submission_id = format!("sim-{}", Uuid::new_v4());
        let delay = self.completion_delay();

        debug!(
            agent_id = %agent_id,
            submission_id = %submission_id,
            delay_ms = delay.as_millis() as u64,
            "simulated dispatch accepted"
        );

        let registry = Arc::clone(&self.registry);
        let conversations = Arc::clone(&self.conversations);
        let broadcaster = self.broadcaster.clone();
        let agent_id = agent_id.to_string();
        let payload = payload.to_string();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let completed = registry
                .complete_task(&agent_id, delay.as_millis() as f64, true)
                .await;
            // The agent may have been reverted or swept away in the meantime;
            // a missed completion is simply dropped.
            if completed.is_none() {
                debug!(agent_id = %agent_id, "simulated completion found no busy agent");
                return;
            }

            let reply = conversations.append(
                &agent_id,
                MessageSender::Agent,
                format!("Completed: {}", summary(&payload)),
            );
            broadcaster.broadcast(EventPayload::message(&agent_id, reply));
            broadcaster.broadcast(EventPayload::agents_updated(registry.list().await));
        });

        submission_id
    }

    fn completion_delay(&self) -> Duration {
        if self.delay_max <= self.delay_min {
            return self.delay_min;
        }
        let range = self.delay_min.as_millis()..=self.delay_max.as_millis();
        Duration::from_millis(rand::thread_rng().gen_range(range) as u64)
    }
}

fn summary(payload: &str) -> &str {
    let end = payload
        .char_indices()
        .take(80)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    &payload[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_truncates_long_payloads() {
        let long = "x".repeat(200);
        assert_eq!(summary(&long).len(), 80);
        assert_eq!(summary("short"), "short");
    }
}
