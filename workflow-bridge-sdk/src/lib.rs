//! Shared types for the workflow tool bridge.
//!
//! This crate carries everything both sides of the bridge need to agree on:
//! remote workflow definitions, run statuses, execution results, the tool
//! content envelope handed back to the tool-calling protocol, the typed
//! schema nodes, and the error taxonomy.

pub mod error;
pub mod schema;

pub use error::{BridgeError, Result};
pub use schema::{validate_parameters, InputSchema, PropertySchema};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Remote-sourced workflow descriptor. Immutable once fetched; a re-discovery
/// supersedes it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Stable remote identifier, opaque string.
    pub id: String,
    /// Human label; not guaranteed unique or protocol-legal.
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub input_schema: InputSchema,
    #[serde(default)]
    pub execution_type: ExecutionType,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

fn default_category() -> String {
    "workflow".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionType {
    Sync,
    #[default]
    Async,
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionType::Sync => write!(f, "sync"),
            ExecutionType::Async => write!(f, "async"),
        }
    }
}

/// Status literal set of the remote status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RemoteRunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RemoteRunStatus {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "RUNNING" => Some(RemoteRunStatus::Running),
            "COMPLETED" => Some(RemoteRunStatus::Completed),
            "FAILED" => Some(RemoteRunStatus::Failed),
            "CANCELLED" => Some(RemoteRunStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RemoteRunStatus::Running)
    }
}

impl fmt::Display for RemoteRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RemoteRunStatus::Running => "RUNNING",
            RemoteRunStatus::Completed => "COMPLETED",
            RemoteRunStatus::Failed => "FAILED",
            RemoteRunStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{text}")
    }
}

/// Local execution status; extends the remote set with the locally-synthesised
/// `Timeout` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl From<RemoteRunStatus> for ExecutionStatus {
    fn from(status: RemoteRunStatus) -> Self {
        match status {
            RemoteRunStatus::Running => ExecutionStatus::Running,
            RemoteRunStatus::Completed => ExecutionStatus::Completed,
            RemoteRunStatus::Failed => ExecutionStatus::Failed,
            RemoteRunStatus::Cancelled => ExecutionStatus::Cancelled,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
            ExecutionStatus::Timeout => "TIMEOUT",
        };
        write!(f, "{text}")
    }
}

/// Point-in-time snapshot of a remote run, as returned by the status endpoint.
/// Transient; lives only inside the poll loop and the final result.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatusSnapshot {
    pub status: RemoteRunStatus,
    pub create_time: i64,
    pub update_time: i64,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub workflow_id: String,
    pub input: Value,
    pub output: Value,
    /// Derived from `output.error` / `output.message` when `status == FAILED`.
    pub error: Option<String>,
}

/// Terminal outcome of one workflow execution, returned to the tool caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecutionResult {
    /// True iff the terminal status is `COMPLETED`.
    pub success: bool,
    pub correlation_id: String,
    pub workflow_instance_id: String,
    pub original_workflow_id: String,
    pub status: ExecutionStatus,
    pub input: Value,
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub create_time: Option<i64>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub update_time: Option<i64>,
    /// `end_time - start_time` when both are known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_duration: Option<i64>,
    /// Raw submit response, kept for debugging.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_response: Option<Value>,
    /// Raw final status response, kept for debugging.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_response: Option<Value>,
}

/// Content envelope returned by tool handlers to the protocol layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text { text: String },
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        ToolResult {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        ToolResult {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: Some(true),
        }
    }

    /// First text block, for callers that only care about the payload.
    pub fn first_text(&self) -> Option<&str> {
        self.content.first().map(|ToolContent::Text { text }| text.as_str())
    }
}
