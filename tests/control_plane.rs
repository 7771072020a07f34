//! Integration tests for the control plane.
//!
//! These drive the registry, reconciler, dispatcher and controller through
//! the same narrow mutation API the request handlers use. Platform discovery
//! is stubbed via the adapter trait; the virtual-machine command channel is
//! mocked with wiremock where a test needs remote output behavior.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use serde_json::json;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use agent_plane::agent::{Agent, AgentRole, AgentStatus, PlatformRef, TaskPriority, TaskRequest};
use agent_plane::config::PlatformEndpoint;
use agent_plane::control::{ControlAction, Controller};
use agent_plane::conversation::{ConversationStore, MessageSender};
use agent_plane::dispatch::{Dispatcher, SubmissionStatus};
use agent_plane::error::AppError;
use agent_plane::platforms::{
    BatchJobAdapter, ContainerTaskAdapter, LocalSimulator, PlatformAdapter, VirtualMachineAdapter,
};
use agent_plane::realtime::EventBroadcaster;
use agent_plane::reconciler::Reconciler;
use agent_plane::registry::AgentRegistry;

/// Discovery stub: fixed agent list, or a forced failure.
struct StaticAdapter {
    platform: &'static str,
    credentials: bool,
    agents: Vec<Agent>,
    fail: bool,
}

impl StaticAdapter {
    fn ok(platform: &'static str, agents: Vec<Agent>) -> Arc<Self> {
        Arc::new(Self {
            platform,
            credentials: true,
            agents,
            fail: false,
        })
    }

    fn failing(platform: &'static str) -> Arc<Self> {
        Arc::new(Self {
            platform,
            credentials: true,
            agents: Vec::new(),
            fail: true,
        })
    }

    fn unconfigured(platform: &'static str) -> Arc<Self> {
        Arc::new(Self {
            platform,
            credentials: false,
            agents: Vec::new(),
            fail: false,
        })
    }
}

#[async_trait]
impl PlatformAdapter for StaticAdapter {
    fn platform(&self) -> &'static str {
        self.platform
    }

    fn credentials_configured(&self) -> bool {
        self.credentials
    }

    async fn discover(&self) -> agent_plane::Result<Vec<Agent>> {
        if self.fail {
            return Err(AppError::AdapterFailure {
                platform: self.platform,
                message: "listing call failed".to_string(),
            });
        }
        Ok(self.agents.clone())
    }
}

fn vm_agent(instance: &str, role: AgentRole, running: bool) -> Agent {
    Agent::discovered(
        format!("{}-{}", role.as_str(), instance),
        role,
        PlatformRef::VirtualMachine(instance.to_string()),
        running,
    )
}

fn sim_agent(handle: &str, role: AgentRole) -> Agent {
    Agent::discovered(handle, role, PlatformRef::LocalSimulated(handle.to_string()), true)
}

fn reconciler_with(
    registry: &Arc<AgentRegistry>,
    adapters: Vec<Arc<dyn PlatformAdapter>>,
) -> Arc<Reconciler> {
    Arc::new(Reconciler::new(
        Arc::clone(registry),
        adapters,
        EventBroadcaster::new(),
        Duration::from_secs(30),
    ))
}

/// Everything a dispatcher test needs, wired against a VM platform endpoint
/// (reachable or not, per test).
struct Harness {
    registry: Arc<AgentRegistry>,
    conversations: Arc<ConversationStore>,
    dispatcher: Dispatcher,
}

fn harness(vm_base_url: &str) -> Harness {
    let registry = Arc::new(AgentRegistry::new());
    let conversations = Arc::new(ConversationStore::new());
    let broadcaster = EventBroadcaster::new();
    let client = reqwest::Client::new();

    let virtual_machine = Arc::new(VirtualMachineAdapter::new(
        client.clone(),
        PlatformEndpoint::new(vm_base_url, Some("test-token".to_string())),
        Duration::from_millis(20),
        Duration::from_millis(100),
    ));
    let container = Arc::new(ContainerTaskAdapter::new(
        client.clone(),
        PlatformEndpoint::new("http://127.0.0.1:1", None),
    ));
    let batch = Arc::new(BatchJobAdapter::new(
        client,
        PlatformEndpoint::new("http://127.0.0.1:1", None),
    ));
    let simulator = LocalSimulator::new(
        Arc::clone(&registry),
        Arc::clone(&conversations),
        broadcaster.clone(),
        Duration::from_millis(50),
        Duration::from_millis(100),
    );

    let dispatcher = Dispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&conversations),
        broadcaster,
        virtual_machine,
        container,
        batch,
        simulator,
        Duration::from_millis(200),
    );

    Harness {
        registry,
        conversations,
        dispatcher,
    }
}

fn controller_with(vm_base_url: &str, registry: &Arc<AgentRegistry>, post_sweep_agents: Vec<Agent>) -> Controller {
    let virtual_machine = Arc::new(VirtualMachineAdapter::new(
        reqwest::Client::new(),
        PlatformEndpoint::new(vm_base_url, Some("test-token".to_string())),
        Duration::from_millis(20),
        Duration::from_millis(100),
    ));
    let reconciler = reconciler_with(
        registry,
        vec![StaticAdapter::ok("virtual-machine", post_sweep_agents) as Arc<dyn PlatformAdapter>],
    );
    Controller::new(
        Arc::clone(registry),
        virtual_machine,
        Arc::new(ConversationStore::new()),
        EventBroadcaster::new(),
        reconciler,
    )
}

#[tokio::test]
async fn one_failing_adapter_does_not_suppress_the_others() {
    let registry = Arc::new(AgentRegistry::new());
    let reconciler = reconciler_with(
        &registry,
        vec![
            StaticAdapter::ok(
                "virtual-machine",
                vec![vm_agent("i-1", AgentRole::Developer, true)],
            ) as Arc<dyn PlatformAdapter>,
            StaticAdapter::failing("container-task") as Arc<dyn PlatformAdapter>,
            StaticAdapter::ok(
                "batch-job",
                vec![Agent::discovered(
                    "quality-j-1",
                    AgentRole::Quality,
                    PlatformRef::BatchJob("j-1".to_string()),
                    true,
                )],
            ) as Arc<dyn PlatformAdapter>,
        ],
    );

    reconciler.sweep().await.unwrap();

    let agents = registry.list().await;
    assert_eq!(agents.len(), 2);
    assert!(agents.iter().any(|a| a.id == "vm-i-1"));
    assert!(agents.iter().any(|a| a.id == "job-j-1"));
}

#[tokio::test]
async fn demo_fallback_requires_absent_credentials() {
    // No credentials anywhere and nothing discovered: demo fleet.
    let registry = Arc::new(AgentRegistry::new());
    let reconciler = reconciler_with(
        &registry,
        vec![
            StaticAdapter::unconfigured("virtual-machine") as Arc<dyn PlatformAdapter>,
            StaticAdapter::unconfigured("container-task") as Arc<dyn PlatformAdapter>,
            StaticAdapter::unconfigured("batch-job") as Arc<dyn PlatformAdapter>,
        ],
    );
    reconciler.sweep().await.unwrap();
    let agents = registry.list().await;
    assert_eq!(agents.len(), 7);
    assert!(agents.iter().all(|a| a.id.starts_with("sim-demo-")));

    // Credentials configured but zero live agents: empty registry, never
    // fabricated data.
    let registry = Arc::new(AgentRegistry::new());
    let reconciler = reconciler_with(
        &registry,
        vec![
            StaticAdapter::ok("virtual-machine", vec![]) as Arc<dyn PlatformAdapter>,
            StaticAdapter::unconfigured("container-task") as Arc<dyn PlatformAdapter>,
        ],
    );
    reconciler.sweep().await.unwrap();
    assert!(registry.list().await.is_empty());
}

#[tokio::test]
async fn current_task_survives_reconciliation_sweeps() {
    let registry = Arc::new(AgentRegistry::new());
    let reconciler = reconciler_with(
        &registry,
        vec![StaticAdapter::ok(
            "virtual-machine",
            vec![vm_agent("i-1", AgentRole::Developer, true)],
        ) as Arc<dyn PlatformAdapter>],
    );

    reconciler.sweep().await.unwrap();
    registry
        .begin_dispatch("vm-i-1", "migrate the database")
        .await
        .unwrap();

    // A racing sweep rediscovers the agent as a fresh idle record.
    reconciler.sweep().await.unwrap();

    let agent = registry.get("vm-i-1").await.unwrap();
    assert_eq!(agent.status, AgentStatus::Busy);
    assert_eq!(agent.current_task.as_deref(), Some("migrate the database"));
}

#[tokio::test]
async fn dispatch_to_offline_agent_fails_without_state_change() {
    let h = harness("http://127.0.0.1:1");
    h.registry
        .apply_sweep(vec![vm_agent("i-1", AgentRole::Developer, false)], &[])
        .await;

    let err = h.dispatcher.send_message("vm-i-1", "hello").await.unwrap_err();
    assert_matches!(err, AppError::AgentUnavailable(_));

    let request = TaskRequest {
        description: "do a thing".to_string(),
        priority: TaskPriority::High,
        timeout_seconds: 60,
    };
    let err = h.dispatcher.submit_task("vm-i-1", &request).await.unwrap_err();
    assert_matches!(err, AppError::AgentUnavailable(_));

    let agent = h.registry.get("vm-i-1").await.unwrap();
    assert_eq!(agent.status, AgentStatus::Offline);
    assert_eq!(agent.current_task, None);
    assert_eq!(agent.metrics.tasks_completed, 0);
}

#[tokio::test]
async fn dispatch_to_unknown_agent_fails() {
    let h = harness("http://127.0.0.1:1");
    let err = h.dispatcher.send_message("vm-i-404", "hello").await.unwrap_err();
    assert_matches!(err, AppError::AgentNotFound(_));
}

#[tokio::test]
async fn simulated_dispatch_completes_and_increments_once() {
    let h = harness("http://127.0.0.1:1");
    h.registry
        .apply_sweep(vec![sim_agent("s-1", AgentRole::Developer)], &[])
        .await;

    let request = TaskRequest {
        description: "summarize the changelog".to_string(),
        priority: TaskPriority::Medium,
        timeout_seconds: 60,
    };
    let outcome = h.dispatcher.submit_task("sim-s-1", &request).await.unwrap();
    assert_eq!(outcome.status, SubmissionStatus::Processing);
    assert!(outcome.submission_id.starts_with("sim-"));

    // Optimistically busy right away.
    let agent = h.registry.get("sim-s-1").await.unwrap();
    assert_eq!(agent.status, AgentStatus::Busy);
    assert_eq!(agent.current_task.as_deref(), Some("summarize the changelog"));

    // Completion lands within the configured delay bound (50-100ms here).
    tokio::time::sleep(Duration::from_millis(400)).await;
    let agent = h.registry.get("sim-s-1").await.unwrap();
    assert_eq!(agent.status, AgentStatus::Idle);
    assert_eq!(agent.current_task, None);
    assert_eq!(agent.metrics.tasks_completed, 1);

    let history = h.conversations.history("sim-s-1");
    assert!(history
        .iter()
        .any(|m| m.sender == MessageSender::Agent && m.content.starts_with("Completed:")));
}

#[tokio::test]
async fn chat_exchange_auto_reverts_to_idle_without_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/v1/instances/[^/]+/commands$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "command_id": "cmd-1" })))
        .mount(&server)
        .await;
    // The platform never returns output.
    Mock::given(method("GET"))
        .and(path("/v1/commands/cmd-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "pending" })))
        .mount(&server)
        .await;

    let h = harness(&server.uri());
    h.registry
        .apply_sweep(vec![vm_agent("i-1", AgentRole::Conversational, true)], &[])
        .await;

    let outcome = h.dispatcher.send_message("vm-i-1", "how are things?").await.unwrap();
    assert_eq!(outcome.status, SubmissionStatus::Processing);
    assert_eq!(h.registry.get("vm-i-1").await.unwrap().status, AgentStatus::Busy);

    // Auto-timeout (200ms here) reverts the agent; no counter increment.
    tokio::time::sleep(Duration::from_millis(1000)).await;
    let agent = h.registry.get("vm-i-1").await.unwrap();
    assert_eq!(agent.status, AgentStatus::Idle);
    assert_eq!(agent.current_task, None);
    assert_eq!(agent.metrics.tasks_completed, 0);
}

#[tokio::test]
async fn chat_exchange_with_output_completes_and_records_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/v1/instances/[^/]+/commands$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "command_id": "cmd-2" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/commands/cmd-2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "status": "done", "output": "all quiet" })),
        )
        .mount(&server)
        .await;

    let h = harness(&server.uri());
    h.registry
        .apply_sweep(vec![vm_agent("i-1", AgentRole::Conversational, true)], &[])
        .await;

    let outcome = h.dispatcher.send_message("vm-i-1", "status report").await.unwrap();
    assert_eq!(outcome.status, SubmissionStatus::Completed);
    assert_eq!(outcome.response.as_deref(), Some("all quiet"));

    let agent = h.registry.get("vm-i-1").await.unwrap();
    assert_eq!(agent.status, AgentStatus::Idle);
    assert_eq!(agent.metrics.tasks_completed, 1);

    let history = h.conversations.history("vm-i-1");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].sender, MessageSender::User);
    assert_eq!(history[1].sender, MessageSender::Agent);
    assert_eq!(history[1].content, "all quiet");
}

#[tokio::test]
async fn dispatch_failure_reverts_optimistic_busy() {
    // Unreachable platform endpoint: the remote call fails fast.
    let h = harness("http://127.0.0.1:1");
    h.registry
        .apply_sweep(vec![vm_agent("i-1", AgentRole::Developer, true)], &[])
        .await;

    let err = h.dispatcher.send_message("vm-i-1", "hello").await.unwrap_err();
    assert_matches!(err, AppError::RemoteExecution(_));

    let agent = h.registry.get("vm-i-1").await.unwrap();
    assert_eq!(agent.status, AgentStatus::Idle);
    assert_eq!(agent.current_task, None);
}

#[tokio::test]
async fn stop_forces_offline_even_when_remote_channel_fails() {
    let registry = Arc::new(AgentRegistry::new());
    registry
        .apply_sweep(vec![vm_agent("i-1", AgentRole::Operations, true)], &[])
        .await;

    // Endpoint unreachable: every remote command errors.
    let controller = controller_with(
        "http://127.0.0.1:1",
        &registry,
        vec![vm_agent("i-1", AgentRole::Operations, false)],
    );
    let report = controller.execute("vm-i-1", ControlAction::Stop).await.unwrap();
    assert!(!report.succeeded);
    assert_eq!(report.status, AgentStatus::Offline);
    assert_eq!(registry.get("vm-i-1").await.unwrap().status, AgentStatus::Offline);
}

#[tokio::test]
async fn failed_start_leaves_status_unchanged() {
    let registry = Arc::new(AgentRegistry::new());
    registry
        .apply_sweep(vec![vm_agent("i-1", AgentRole::Operations, false)], &[])
        .await;

    let controller = controller_with(
        "http://127.0.0.1:1",
        &registry,
        vec![vm_agent("i-1", AgentRole::Operations, false)],
    );
    let err = controller.execute("vm-i-1", ControlAction::Start).await.unwrap_err();
    assert_matches!(err, AppError::RemoteExecution(_));
    assert_eq!(registry.get("vm-i-1").await.unwrap().status, AgentStatus::Offline);
}

#[tokio::test]
async fn control_actions_reject_non_vm_agents() {
    let registry = Arc::new(AgentRegistry::new());
    registry
        .apply_sweep(vec![sim_agent("s-1", AgentRole::Developer)], &[])
        .await;

    let controller = controller_with("http://127.0.0.1:1", &registry, vec![]);
    let err = controller.execute("sim-s-1", ControlAction::Restart).await.unwrap_err();
    assert_matches!(err, AppError::BadRequest(_));
}

#[tokio::test]
async fn issue_assignment_picks_first_idle_agent_of_role() {
    let h = harness("http://127.0.0.1:1");
    h.registry
        .apply_sweep(
            vec![
                sim_agent("dev-1", AgentRole::Developer),
                sim_agent("dev-2", AgentRole::Developer),
                sim_agent("ops-1", AgentRole::Operations),
            ],
            &[],
        )
        .await;

    let (agent_id, outcome) = h
        .dispatcher
        .assign_issue(AgentRole::Developer, "Issue #7: fix login crash", TaskPriority::High)
        .await
        .unwrap();
    // First idle developer in id order.
    assert_eq!(agent_id, "sim-dev-1");
    assert_eq!(outcome.status, SubmissionStatus::Processing);

    // No idle operations agent left once it is busy.
    h.registry.begin_dispatch("sim-ops-1", "other work").await.unwrap();
    let err = h
        .dispatcher
        .assign_issue(AgentRole::Operations, "Issue #8: deploy", TaskPriority::Medium)
        .await
        .unwrap_err();
    assert_matches!(err, AppError::ClassificationMiss(_));
}
