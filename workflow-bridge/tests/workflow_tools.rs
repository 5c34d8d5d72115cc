//! End-to-end: discover a workflow, expose it as a tool, call it, and get a
//! structured result back. The remote API is a scripted transport; everything
//! above it is the real stack.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use workflow_bridge::{
    ApiResponse, ApiTransport, BridgeConfig, BridgeError, HttpWorkflowDiscovery, Method, Result,
    ToolRegistry, WorkflowExecutionService, WorkflowPerformanceMonitor, WorkflowToolGenerator,
    WorkflowToolManager,
};

/// Plays the remote workflow API: one workflow in the catalog, runs complete
/// on the first status poll.
struct FakeWorkflowApi {
    calls: Mutex<Vec<(Method, String, Option<Value>)>>,
}

impl FakeWorkflowApi {
    fn new() -> Arc<Self> {
        Arc::new(FakeWorkflowApi {
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(Method, String, Option<Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApiTransport for FakeWorkflowApi {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse> {
        self.calls
            .lock()
            .unwrap()
            .push((method.clone(), path.to_string(), body.cloned()));

        let data = if method == Method::GET && path == "/api/v1/service/workflows" {
            json!([{
                "id": "42",
                "name": "Site Audit",
                "description": "Runs a full audit of a site",
                "inputSchema": {
                    "type": "object",
                    "properties": {"url": {"type": "string"}},
                    "required": ["url"]
                }
            }])
        } else if method == Method::POST && path == "/api/v1/service/workflows/42/start" {
            json!({
                "correlation_id": "corr-7",
                "workflow_id": "inst-7"
            })
        } else if method == Method::GET
            && path == "/api/v1/service/workflows/42/runs/inst-7/status"
        {
            json!({
                "create_time": 1000,
                "update_time": 5000,
                "status": "COMPLETED",
                "start_time": 1100,
                "end_time": 4100,
                "workflow_id": "inst-7",
                "input": {"url": "https://a.com"},
                "output": {"score": 97}
            })
        } else {
            return Err(BridgeError::api(format!(
                "unexpected request {method} {path}"
            )));
        };
        Ok(ApiResponse { status: 200, data })
    }
}

fn bridge(api: Arc<FakeWorkflowApi>) -> (Arc<WorkflowToolManager>, Arc<ToolRegistry>) {
    let config = BridgeConfig {
        discovery_interval: Duration::ZERO,
        ..BridgeConfig::default()
    };
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
    (manager, registry)
}

#[tokio::test]
async fn discovered_workflow_becomes_a_callable_tool() {
    let api = FakeWorkflowApi::new();
    let (manager, registry) = bridge(api.clone());

    manager.initialize().await;
    assert_eq!(manager.status().workflow_tool_count, 1);

    let tool = registry.get("workflow_Site_Audit").expect("tool registered");
    assert!(tool.description.contains("audit"));
    assert!(registry.is_workflow_tool("workflow_Site_Audit"));

    let result = registry
        .execute("workflow_Site_Audit", json!({"url": "https://a.com"}))
        .await
        .expect("tool call succeeds");
    assert!(result.is_error.is_none());

    let payload: Value = serde_json::from_str(result.first_text().unwrap()).unwrap();
    assert_eq!(payload["success"], json!(true));
    assert_eq!(payload["status"], json!("COMPLETED"));
    assert_eq!(payload["correlationId"], json!("corr-7"));
    assert_eq!(payload["workflowInstanceId"], json!("inst-7"));
    assert_eq!(payload["originalWorkflowId"], json!("42"));
    assert_eq!(payload["output"]["score"], json!(97));
    assert_eq!(payload["executionDuration"], json!(3000));

    // Submit hit the right endpoint with the wrapped payload.
    let calls = api.calls();
    let (method, path, body) = calls
        .iter()
        .find(|(method, _, _)| *method == Method::POST)
        .expect("a start call was made");
    assert_eq!(*method, Method::POST);
    assert_eq!(path, "/api/v1/service/workflows/42/start");
    let body = body.as_ref().unwrap();
    assert_eq!(body["source"], json!("application"));
    assert_eq!(body["input"]["url"], json!("https://a.com"));

    manager.shutdown().await;
}

#[tokio::test]
async fn missing_required_parameter_is_rejected_before_any_api_call() {
    let api = FakeWorkflowApi::new();
    let (manager, registry) = bridge(api.clone());

    manager.initialize().await;
    let calls_after_init = api.calls().len();

    let err = registry
        .execute("workflow_Site_Audit", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Validation(_)));
    assert!(err.to_string().contains("url"));
    assert_eq!(api.calls().len(), calls_after_init);

    manager.shutdown().await;
}

#[tokio::test]
async fn execution_is_tracked_by_the_monitor() {
    let api = FakeWorkflowApi::new();
    let (manager, registry) = bridge(api);

    manager.initialize().await;
    registry
        .execute("workflow_Site_Audit", json!({"url": "https://a.com"}))
        .await
        .unwrap();

    let status = manager.status();
    assert_eq!(status.performance.total_executions, 1);
    assert_eq!(status.performance.completed, 1);
    assert_eq!(status.running_executions, 0);
    assert!(status.last_refresh_ms.is_some());

    manager.shutdown().await;
}
