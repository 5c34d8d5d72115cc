use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use workflow_bridge::{
    BridgeConfig, HttpApiClient, HttpWorkflowDiscovery, ToolRegistry, WorkflowExecutionService,
    WorkflowPerformanceMonitor, WorkflowToolGenerator, WorkflowToolManager,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = BridgeConfig::from_env();
    info!(api = %config.api_base_url, "starting workflow bridge");

    let api = Arc::new(HttpApiClient::new(
        config.api_base_url.clone(),
        config.retry_attempts,
    )?);
    let monitor = Arc::new(WorkflowPerformanceMonitor::new(config.monitor.clone()));
    let execution = Arc::new(WorkflowExecutionService::new(
        api.clone(),
        Arc::clone(&monitor),
        config.status_check_interval,
        config.execution_timeout,
    ));
    let generator = Arc::new(WorkflowToolGenerator::new(
        Arc::clone(&execution),
        config.tool_prefix.clone(),
    ));
    let discovery = Arc::new(HttpWorkflowDiscovery::new(
        api,
        config.discovery_cache_ttl,
        config.filter_patterns.clone(),
    ));
    let registry = Arc::new(ToolRegistry::new());

    let manager = Arc::new(WorkflowToolManager::new(
        config,
        discovery,
        generator,
        Arc::clone(&registry),
        execution,
        monitor,
    ));
    manager.initialize().await;

    let status = manager.status();
    info!(
        tools = status.total_tool_count,
        workflow_tools = status.workflow_tool_count,
        "workflow bridge ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    manager.shutdown().await;
    Ok(())
}
