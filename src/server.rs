use std::sync::Arc;

use axum::http::Method;
use axum::{
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    api::{create_api_router, webhooks::github_webhook},
    classifier::IssueLog,
    collectors::{CostCollector, MetricsCollector},
    config::Config,
    control::Controller,
    conversation::ConversationStore,
    dispatch::Dispatcher,
    error::Result,
    platforms::{
        BatchJobAdapter, ContainerTaskAdapter, LocalSimulator, PlatformAdapter,
        VirtualMachineAdapter,
    },
    realtime::{ws_handler, EventBroadcaster},
    reconciler::Reconciler,
    registry::AgentRegistry,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: Arc<AgentRegistry>,
    pub conversations: Arc<ConversationStore>,
    pub issues: Arc<IssueLog>,
    pub broadcaster: EventBroadcaster,
    pub dispatcher: Arc<Dispatcher>,
    pub controller: Arc<Controller>,
    pub reconciler: Arc<Reconciler>,
}

pub async fn run_server(config: Config) -> Result<()> {
    let http_client = reqwest::Client::new();

    let virtual_machine = Arc::new(VirtualMachineAdapter::new(
        http_client.clone(),
        config.virtual_machine.clone(),
        config.command_poll_interval,
        config.command_output_bound,
    ));
    let container = Arc::new(ContainerTaskAdapter::new(
        http_client.clone(),
        config.container.clone(),
    ));
    let batch = Arc::new(BatchJobAdapter::new(http_client, config.batch.clone()));

    let registry = Arc::new(AgentRegistry::new());
    let conversations = Arc::new(ConversationStore::new());
    let issues = Arc::new(IssueLog::new());
    let broadcaster = EventBroadcaster::new();

    let adapters: Vec<Arc<dyn PlatformAdapter>> = vec![
        Arc::clone(&virtual_machine) as Arc<dyn PlatformAdapter>,
        Arc::clone(&container) as Arc<dyn PlatformAdapter>,
        Arc::clone(&batch) as Arc<dyn PlatformAdapter>,
    ];
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&registry),
        adapters,
        broadcaster.clone(),
        config.reconcile_interval,
    ));

    let simulator = LocalSimulator::new(
        Arc::clone(&registry),
        Arc::clone(&conversations),
        broadcaster.clone(),
        config.simulator_delay_min,
        config.simulator_delay_max,
    );
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&conversations),
        broadcaster.clone(),
        Arc::clone(&virtual_machine),
        Arc::clone(&container),
        Arc::clone(&batch),
        simulator,
        config.chat_auto_idle,
    ));
    let controller = Arc::new(Controller::new(
        Arc::clone(&registry),
        Arc::clone(&virtual_machine),
        Arc::clone(&conversations),
        broadcaster.clone(),
        Arc::clone(&reconciler),
    ));

    // Background timers: reconciliation and both collectors. Each first tick
    // fires immediately, so the registry is populated at startup.
    Arc::clone(&reconciler).spawn();
    CostCollector::new(
        Arc::clone(&registry),
        broadcaster.clone(),
        config.cost_interval,
    )
    .spawn();
    MetricsCollector::new(
        Arc::clone(&registry),
        Arc::clone(&virtual_machine),
        broadcaster.clone(),
        config.metrics_interval,
    )
    .spawn();

    let state = AppState {
        config: config.clone(),
        registry,
        conversations,
        issues,
        broadcaster,
        dispatcher,
        controller,
        reconciler,
    };

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::header::HeaderName::from_static("x-github-event"),
        ])
        .allow_origin(axum::http::header::HeaderValue::from_static("*"));

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .route("/webhooks/github", post(github_webhook))
        .nest("/api", create_api_router())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)) // 1 MiB
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let address = config.server_address();
    info!("Server listening on {}", address);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(anyhow::Error::from)?;
    axum::serve(listener, app).await.map_err(anyhow::Error::from)?;

    Ok(())
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "agent-plane",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
