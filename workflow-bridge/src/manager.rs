//! Lifecycle orchestration: initialise, reconcile, refresh, shut down.
//!
//! The manager owns the hot-reload loop. Each refresh fetches the current
//! remote catalog and reconciles it incrementally against the tool registry:
//! new workflows are added, changed ones swapped in place under their
//! existing tool name, vanished ones unregistered. One broken workflow never
//! stops the rest of the batch, and a failed refresh leaves the previous
//! tool set serving.

use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use workflow_bridge_sdk::{Result, WorkflowDefinition};

use crate::config::BridgeConfig;
use crate::discovery::{CacheStats, WorkflowDiscovery};
use crate::execution::WorkflowExecutionService;
use crate::generator::WorkflowToolGenerator;
use crate::monitor::{PerformanceStats, WorkflowPerformanceMonitor};
use crate::registry::ToolRegistry;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Workflows that could not be turned into tools this pass.
    pub failed: usize,
}

/// Point-in-time view of the bridge, for operators.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub enabled: bool,
    pub initialized: bool,
    pub workflow_tool_count: usize,
    pub total_tool_count: usize,
    pub running_executions: usize,
    pub last_refresh_ms: Option<i64>,
    pub cache: CacheStats,
    pub performance: PerformanceStats,
}

pub struct WorkflowToolManager {
    config: BridgeConfig,
    discovery: Arc<dyn WorkflowDiscovery>,
    generator: Arc<WorkflowToolGenerator>,
    registry: Arc<ToolRegistry>,
    execution: Arc<WorkflowExecutionService>,
    monitor: Arc<WorkflowPerformanceMonitor>,
    initialized: AtomicBool,
    last_refresh_ms: Mutex<Option<i64>>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl WorkflowToolManager {
    pub fn new(
        config: BridgeConfig,
        discovery: Arc<dyn WorkflowDiscovery>,
        generator: Arc<WorkflowToolGenerator>,
        registry: Arc<ToolRegistry>,
        execution: Arc<WorkflowExecutionService>,
        monitor: Arc<WorkflowPerformanceMonitor>,
    ) -> Self {
        WorkflowToolManager {
            config,
            discovery,
            generator,
            registry,
            execution,
            monitor,
            initialized: AtomicBool::new(false),
            last_refresh_ms: Mutex::new(None),
            refresh_task: Mutex::new(None),
        }
    }

    /// Bring the bridge up. Fail-open: an unreachable discovery endpoint logs
    /// and leaves the bridge serving zero workflow tools until a later
    /// refresh succeeds.
    pub async fn initialize(self: &Arc<Self>) {
        if !self.config.workflows_enabled {
            info!("workflow tools disabled by configuration");
            return;
        }
        if self.initialized.swap(true, Ordering::SeqCst) {
            warn!("workflow tool manager already initialized");
            return;
        }

        if self.discovery.is_available().await {
            // The probe warmed the cache, so this refresh is served locally.
            match self.refresh_workflows().await {
                Ok(summary) => {
                    info!(
                        added = summary.added,
                        failed = summary.failed,
                        "initial workflow discovery complete"
                    );
                }
                Err(e) => {
                    error!(error = %e, "initial workflow refresh failed, starting with no workflow tools");
                }
            }
        } else {
            error!("workflow discovery unavailable, starting with no workflow tools");
        }

        self.monitor.start_background_tasks();
        self.start_auto_refresh();
    }

    /// Fetch the catalog and reconcile it into the registry.
    pub async fn refresh_workflows(&self) -> Result<ReconcileSummary> {
        let workflows = self.discovery.discover_workflows().await?;
        let summary = self.update_workflow_tools(workflows);
        *self.last_refresh_ms.lock().unwrap() = Some(Utc::now().timestamp_millis());
        Ok(summary)
    }

    /// Operator-facing refresh: bypasses the discovery cache.
    pub async fn trigger_manual_refresh(&self) -> Result<ReconcileSummary> {
        self.discovery.invalidate_cache();
        self.refresh_workflows().await
    }

    /// Incremental diff of the discovered set against the registered set.
    pub fn update_workflow_tools(&self, workflows: Vec<WorkflowDefinition>) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        // Registered workflow tools, keyed by workflow id.
        let current: HashMap<String, (String, WorkflowDefinition)> = self
            .registry
            .workflow_tools()
            .into_iter()
            .map(|(name, workflow)| (workflow.id.clone(), (name, workflow)))
            .collect();
        let incoming_ids: HashSet<&str> =
            workflows.iter().map(|workflow| workflow.id.as_str()).collect();

        for workflow in &workflows {
            match current.get(&workflow.id) {
                Some((_, existing)) if existing == workflow => {
                    summary.unchanged += 1;
                }
                Some((name, _)) => {
                    // Swap out the old tool and recompute the name from the
                    // current definition. Generation is deterministic, so an
                    // unchanged display name keeps its tool name; a renamed
                    // workflow gets a fresh one.
                    self.registry.unregister(name);
                    self.generator.release_name(&workflow.id);
                    match self.register_workflow(workflow) {
                        Ok(tool_name) => {
                            debug!(workflow_id = %workflow.id, tool = %tool_name, "updated workflow tool");
                            summary.updated += 1;
                        }
                        Err(e) => {
                            warn!(workflow_id = %workflow.id, error = %e, "failed to update workflow tool");
                            self.generator.release_name(&workflow.id);
                            summary.failed += 1;
                        }
                    }
                }
                None => match self.register_workflow(workflow) {
                    Ok(tool_name) => {
                        debug!(workflow_id = %workflow.id, tool = %tool_name, "added workflow tool");
                        summary.added += 1;
                    }
                    Err(e) => {
                        warn!(workflow_id = %workflow.id, error = %e, "failed to add workflow tool");
                        self.generator.release_name(&workflow.id);
                        summary.failed += 1;
                    }
                },
            }
        }

        for (workflow_id, (name, _)) in &current {
            if !incoming_ids.contains(workflow_id.as_str()) {
                self.registry.unregister(name);
                self.generator.release_name(workflow_id);
                debug!(workflow_id = %workflow_id, tool = %name, "removed workflow tool");
                summary.removed += 1;
            }
        }

        info!(
            added = summary.added,
            updated = summary.updated,
            removed = summary.removed,
            unchanged = summary.unchanged,
            failed = summary.failed,
            "workflow reconciliation complete"
        );
        summary
    }

    fn register_workflow(&self, workflow: &WorkflowDefinition) -> Result<String> {
        let taken = self.registry.tool_names();
        let tool = self.generator.generate_tool(workflow, &taken)?;
        let name = tool.name.clone();
        self.registry.register_workflow_tool(tool, workflow.clone())?;
        Ok(name)
    }

    fn start_auto_refresh(self: &Arc<Self>) {
        if self.config.discovery_interval.is_zero() {
            debug!("auto-refresh disabled (zero discovery interval)");
            return;
        }
        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(manager.config.discovery_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; initialisation already
            // refreshed, so consume it.
            tick.tick().await;
            loop {
                tick.tick().await;
                if let Err(e) = manager.refresh_workflows().await {
                    // Keep serving the previous tool set.
                    warn!(error = %e, "scheduled workflow refresh failed");
                }
            }
        });
        *self.refresh_task.lock().unwrap() = Some(task);
    }

    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            enabled: self.config.workflows_enabled,
            initialized: self.initialized.load(Ordering::SeqCst),
            workflow_tool_count: self.registry.workflow_tools().len(),
            total_tool_count: self.registry.count(),
            running_executions: self.monitor.running_count(),
            last_refresh_ms: *self.last_refresh_ms.lock().unwrap(),
            cache: self.discovery.cache_stats(),
            performance: self.monitor.get_performance_stats(None),
        }
    }

    /// Stop the refresh timer, cancel in-flight executions, stop the monitor,
    /// and take every workflow tool out of the registry.
    pub async fn shutdown(&self) {
        if let Some(task) = self.refresh_task.lock().unwrap().take() {
            task.abort();
        }
        self.execution.shutdown().await;

        for (name, workflow) in self.registry.workflow_tools() {
            self.registry.unregister(&name);
            self.generator.release_name(&workflow.id);
        }
        self.generator.clear_name_cache();

        self.initialized.store(false, Ordering::SeqCst);
        info!("workflow tool manager shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{ApiResponse, ApiTransport, Method};
    use crate::monitor::MonitorConfig;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::time::Duration;
    use workflow_bridge_sdk::BridgeError;

    struct NullApi;

    #[async_trait]
    impl ApiTransport for NullApi {
        async fn request(
            &self,
            _method: Method,
            _path: &str,
            _body: Option<&Value>,
        ) -> Result<ApiResponse> {
            Err(BridgeError::network("no transport in this test"))
        }
    }

    /// Scripted discovery: each call pops the next catalog; the last one
    /// repeats.
    struct ScriptedDiscovery {
        catalogs: Mutex<VecDeque<Result<Vec<WorkflowDefinition>>>>,
        invalidations: Mutex<usize>,
    }

    impl ScriptedDiscovery {
        fn new(catalogs: Vec<Result<Vec<WorkflowDefinition>>>) -> Arc<Self> {
            Arc::new(ScriptedDiscovery {
                catalogs: Mutex::new(catalogs.into_iter().collect()),
                invalidations: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl WorkflowDiscovery for ScriptedDiscovery {
        async fn discover_workflows(&self) -> Result<Vec<WorkflowDefinition>> {
            let mut catalogs = self.catalogs.lock().unwrap();
            if catalogs.len() > 1 {
                catalogs.pop_front().unwrap()
            } else {
                match catalogs.front() {
                    Some(Ok(workflows)) => Ok(workflows.clone()),
                    Some(Err(_)) | None => Err(BridgeError::network("discovery exhausted")),
                }
            }
        }

        async fn is_available(&self) -> bool {
            matches!(self.catalogs.lock().unwrap().front(), Some(Ok(_)))
        }

        fn invalidate_cache(&self) {
            *self.invalidations.lock().unwrap() += 1;
        }

        fn cache_stats(&self) -> CacheStats {
            CacheStats::default()
        }
    }

    fn workflow(id: &str, name: &str, description: &str) -> WorkflowDefinition {
        serde_json::from_value(json!({
            "id": id,
            "name": name,
            "description": description,
            "inputSchema": {"type": "object", "properties": {"url": {"type": "string"}}}
        }))
        .unwrap()
    }

    fn manager(discovery: Arc<dyn WorkflowDiscovery>) -> Arc<WorkflowToolManager> {
        let config = BridgeConfig {
            discovery_interval: Duration::ZERO,
            ..BridgeConfig::default()
        };
        let monitor = Arc::new(WorkflowPerformanceMonitor::new(MonitorConfig::default()));
        let execution = Arc::new(WorkflowExecutionService::new(
            Arc::new(NullApi),
            Arc::clone(&monitor),
            config.status_check_interval,
            config.execution_timeout,
        ));
        let generator = Arc::new(WorkflowToolGenerator::new(
            Arc::clone(&execution),
            config.tool_prefix.clone(),
        ));
        Arc::new(WorkflowToolManager::new(
            config,
            discovery,
            generator,
            Arc::new(ToolRegistry::new()),
            execution,
            monitor,
        ))
    }

    #[tokio::test]
    async fn first_reconciliation_adds_every_workflow() {
        let discovery = ScriptedDiscovery::new(vec![Ok(vec![
            workflow("1", "Site Audit", "Audits"),
            workflow("2", "Link Checker", "Checks"),
        ])]);
        let manager = manager(discovery);

        let summary = manager.refresh_workflows().await.unwrap();
        assert_eq!(summary.added, 2);
        assert_eq!(summary.failed, 0);
        assert!(manager.registry.get("workflow_Site_Audit").is_some());
        assert!(manager.registry.is_workflow_tool("workflow_Link_Checker"));
    }

    #[tokio::test]
    async fn reconciliation_is_idempotent() {
        let discovery = ScriptedDiscovery::new(vec![Ok(vec![workflow("1", "Site Audit", "Audits")])]);
        let manager = manager(discovery);

        manager.refresh_workflows().await.unwrap();
        let second = manager.refresh_workflows().await.unwrap();

        assert_eq!(
            second,
            ReconcileSummary {
                unchanged: 1,
                ..ReconcileSummary::default()
            }
        );
        assert_eq!(manager.registry.count(), 1);
    }

    #[tokio::test]
    async fn changed_definition_is_swapped_under_the_same_name() {
        let discovery = ScriptedDiscovery::new(vec![
            Ok(vec![workflow("1", "Site Audit", "Audits")]),
            Ok(vec![workflow("1", "Site Audit", "Audits, but deeper")]),
        ]);
        let manager = manager(discovery);

        manager.refresh_workflows().await.unwrap();
        let summary = manager.refresh_workflows().await.unwrap();

        assert_eq!(summary.updated, 1);
        assert_eq!(summary.added, 0);
        let tool = manager.registry.get("workflow_Site_Audit").unwrap();
        assert!(tool.description.contains("deeper"));
    }

    #[tokio::test]
    async fn renamed_workflow_gets_a_freshly_generated_tool_name() {
        let discovery = ScriptedDiscovery::new(vec![
            Ok(vec![workflow("1", "Site Audit", "Audits")]),
            Ok(vec![workflow("1", "Deep Audit", "Audits, renamed")]),
        ]);
        let manager = manager(discovery);

        manager.refresh_workflows().await.unwrap();
        let summary = manager.refresh_workflows().await.unwrap();

        assert_eq!(summary.updated, 1);
        assert!(manager.registry.get("workflow_Site_Audit").is_none());
        let tool = manager.registry.get("workflow_Deep_Audit").expect("renamed tool");
        assert!(tool.description.contains("renamed"));
        assert_eq!(
            manager.generator.assigned_name("1").as_deref(),
            Some("workflow_Deep_Audit")
        );
    }

    #[tokio::test]
    async fn vanished_workflow_is_unregistered_and_name_released() {
        let discovery = ScriptedDiscovery::new(vec![
            Ok(vec![
                workflow("1", "Site Audit", "Audits"),
                workflow("2", "Link Checker", "Checks"),
            ]),
            Ok(vec![workflow("2", "Link Checker", "Checks")]),
            Ok(vec![
                workflow("2", "Link Checker", "Checks"),
                workflow("9", "Site Audit", "A different audit"),
            ]),
        ]);
        let manager = manager(discovery);

        manager.refresh_workflows().await.unwrap();
        let summary = manager.refresh_workflows().await.unwrap();
        assert_eq!(summary.removed, 1);
        assert!(manager.registry.get("workflow_Site_Audit").is_none());

        // The released name is available to a new workflow.
        manager.refresh_workflows().await.unwrap();
        assert!(manager.registry.is_workflow_tool("workflow_Site_Audit"));
        assert_eq!(
            manager
                .registry
                .workflow_definition("workflow_Site_Audit")
                .unwrap()
                .id,
            "9"
        );
    }

    #[tokio::test]
    async fn one_broken_workflow_does_not_stop_the_batch() {
        let mut broken = workflow("1", "Broken", "No schema");
        broken.input_schema = Default::default();
        let discovery = ScriptedDiscovery::new(vec![Ok(vec![
            broken,
            workflow("2", "Fine", "Works"),
        ])]);
        let manager = manager(discovery);

        let summary = manager.refresh_workflows().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.added, 1);
        assert!(manager.registry.get("workflow_Fine").is_some());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_the_previous_tool_set() {
        let discovery = ScriptedDiscovery::new(vec![
            Ok(vec![workflow("1", "Site Audit", "Audits")]),
            Err(BridgeError::network("remote down")),
        ]);
        let manager = manager(discovery);

        manager.refresh_workflows().await.unwrap();
        assert!(manager.refresh_workflows().await.is_err());
        assert_eq!(manager.registry.count(), 1);
    }

    #[tokio::test]
    async fn initialize_is_fail_open() {
        let discovery =
            ScriptedDiscovery::new(vec![Err(BridgeError::network("remote down"))]);
        let manager = manager(discovery);

        manager.initialize().await;
        let status = manager.status();
        assert!(status.initialized);
        assert_eq!(status.total_tool_count, 0);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn disabled_bridge_skips_discovery_entirely() {
        let discovery = ScriptedDiscovery::new(vec![Ok(vec![workflow("1", "Site Audit", "Audits")])]);
        let config = BridgeConfig {
            workflows_enabled: false,
            ..BridgeConfig::default()
        };
        let monitor = Arc::new(WorkflowPerformanceMonitor::new(MonitorConfig::default()));
        let execution = Arc::new(WorkflowExecutionService::new(
            Arc::new(NullApi),
            Arc::clone(&monitor),
            config.status_check_interval,
            config.execution_timeout,
        ));
        let generator = Arc::new(WorkflowToolGenerator::new(
            Arc::clone(&execution),
            config.tool_prefix.clone(),
        ));
        let manager = Arc::new(WorkflowToolManager::new(
            config,
            discovery,
            generator,
            Arc::new(ToolRegistry::new()),
            execution,
            monitor,
        ));

        manager.initialize().await;
        let status = manager.status();
        assert!(!status.enabled);
        assert!(!status.initialized);
        assert_eq!(status.total_tool_count, 0);
    }

    #[tokio::test]
    async fn initialize_twice_is_a_warning_not_a_second_refresh() {
        let discovery = ScriptedDiscovery::new(vec![Ok(vec![workflow("1", "Site Audit", "Audits")])]);
        let manager = manager(discovery);

        manager.initialize().await;
        manager.initialize().await;
        assert!(manager.status().initialized);
        assert_eq!(manager.registry.count(), 1);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_unregisters_workflow_tools_and_frees_names() {
        let discovery = ScriptedDiscovery::new(vec![Ok(vec![workflow("1", "Site Audit", "Audits")])]);
        let manager = manager(discovery);

        manager.initialize().await;
        assert_eq!(manager.registry.count(), 1);

        manager.shutdown().await;
        assert_eq!(manager.registry.count(), 0);
        assert!(manager.generator.assigned_name("1").is_none());
        assert!(!manager.status().initialized);
    }

    #[tokio::test]
    async fn manual_refresh_bypasses_the_cache() {
        let discovery = ScriptedDiscovery::new(vec![Ok(vec![workflow("1", "Site Audit", "Audits")])]);
        let manager = manager(Arc::clone(&discovery) as Arc<dyn WorkflowDiscovery>);

        manager.trigger_manual_refresh().await.unwrap();
        assert_eq!(*discovery.invalidations.lock().unwrap(), 1);
        assert!(manager.status().last_refresh_ms.is_some());
    }
}
