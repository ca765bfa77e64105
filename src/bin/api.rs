use deep_research_orchestrator::{
    agent::Orchestrator,
    api::start_server,
    config::BackendConfig,
    ensemble::EnsembleEngine,
    governor::RateGovernor,
    planner::Planner,
    provider::{Provider, ProviderGateway},
    router::TaskRouter,
    state::InMemoryRunStore,
    tools::create_default_registry,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("Deep Research Orchestrator - API Server");
    info!("Port: {}", api_port);

    // Create components: one governor shared by every gateway
    let config = Arc::new(BackendConfig::from_env());
    let governor = Arc::new(RateGovernor::new());
    let provider: Arc<dyn Provider> =
        Arc::new(ProviderGateway::new(config.clone(), governor));

    let planner = Planner::new(provider.clone(), config.planner.clone());
    let ensemble = EnsembleEngine::new(
        provider.clone(),
        config.ensemble_workers.clone(),
        config.judge.clone(),
    );
    let registry = create_default_registry();

    let orchestrator = Arc::new(Orchestrator::new(
        provider.clone(),
        planner,
        ensemble,
        registry,
        config.clone(),
    ));
    let router = Arc::new(TaskRouter::new(provider, config));
    let runs = Arc::new(InMemoryRunStore::new());

    info!("Orchestrator initialized");
    info!("Starting API server...");

    start_server(orchestrator, router, runs, api_port).await?;

    Ok(())
}
