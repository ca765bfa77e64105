use deep_research_orchestrator::{
    agent::Orchestrator,
    config::BackendConfig,
    ensemble::EnsembleEngine,
    governor::RateGovernor,
    models::ApprovalSignal,
    planner::Planner,
    provider::{Provider, ProviderGateway},
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

    info!("Deep Research Orchestrator starting");

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

    let orchestrator = Orchestrator::new(provider, planner, ensemble, registry, config);

    let task = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let task = if task.trim().is_empty() {
        "Analyze TCS financial performance vs Infosys over 5 years".to_string()
    } else {
        task
    };

    info!(task = %task, "Running research workflow");

    // Background research + planning, then suspend for approval
    let state = orchestrator.start(&task).await?;

    println!("\n=== PROPOSED PLAN ===");
    for step in &state.plan {
        println!("  {}. {} [{:?}]", step.index + 1, step.description, step.strategy);
    }

    // CLI mode auto-approves; the API server leaves this to the caller.
    let state = orchestrator.resume(state, ApprovalSignal::Approve).await?;

    println!("\n=== FINAL REPORT ===");
    println!(
        "{}",
        state.final_report.as_deref().unwrap_or("No report generated.")
    );

    Ok(())
}
