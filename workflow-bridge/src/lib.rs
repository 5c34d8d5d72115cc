//! Bridge between a remote workflow API and a tool-calling protocol.
//!
//! Remote workflow definitions are discovered over HTTP, turned into callable
//! tools with conflict-free names, and kept in sync with the remote catalog by
//! an incremental reconciliation loop. Tool invocations submit a run, poll it
//! to a terminal state, and hand back a structured result; a performance
//! monitor tracks every execution and reaps the ones that overstay.

pub mod config;
pub mod discovery;
pub mod execution;
pub mod generator;
pub mod http;
pub mod manager;
pub mod monitor;
pub mod registry;

pub use config::BridgeConfig;
pub use discovery::{CacheStats, HttpWorkflowDiscovery, WorkflowDiscovery};
pub use execution::WorkflowExecutionService;
pub use generator::{tool_listing, WorkflowToolGenerator};
pub use http::{ApiResponse, ApiTransport, HttpApiClient, Method};
pub use manager::{BridgeStatus, ReconcileSummary, WorkflowToolManager};
pub use monitor::{
    ExecutionMetrics, MonitorConfig, PerformanceStats, ResourceLimitStatus,
    WorkflowPerformanceMonitor,
};
pub use registry::{ToolDefinition, ToolHandler, ToolRegistry};

pub use workflow_bridge_sdk::{
    BridgeError, ExecutionStatus, ExecutionType, InputSchema, PropertySchema, RemoteRunStatus,
    Result, RunStatusSnapshot, ToolContent, ToolResult, WorkflowDefinition,
    WorkflowExecutionResult,
};
