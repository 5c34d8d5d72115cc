//! Turn remote workflow definitions into callable tools.
//!
//! Two jobs live here: deterministic, conflict-free tool naming (remote names
//! are neither unique nor protocol-legal) and wrapping the execution service
//! in a per-workflow async handler that returns the result envelope.

use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::debug;
use workflow_bridge_sdk::{
    BridgeError, Result, ToolContent, ToolResult, WorkflowDefinition, WorkflowExecutionResult,
};

use crate::execution::WorkflowExecutionService;
use crate::registry::ToolDefinition;

/// Hard stop for the numeric-suffix fallback.
const MAX_NAME_ATTEMPTS: u32 = 1000;

pub struct WorkflowToolGenerator {
    execution: Arc<WorkflowExecutionService>,
    /// Prefix for generated names; `None` disables prefixing.
    tool_prefix: Option<String>,
    /// workflow id -> generated name. Reserves names across a batch before
    /// registration; the manager releases an entry when its workflow changes
    /// or disappears so the name is regenerated from the current definition.
    assigned_names: Mutex<HashMap<String, String>>,
}

impl WorkflowToolGenerator {
    pub fn new(execution: Arc<WorkflowExecutionService>, tool_prefix: Option<String>) -> Self {
        WorkflowToolGenerator {
            execution,
            tool_prefix,
            assigned_names: Mutex::new(HashMap::new()),
        }
    }

    /// Build the tool for one workflow. `taken` is the set of names already
    /// registered; the chosen name is recorded so later calls for the same
    /// workflow id reuse it.
    pub fn generate_tool(
        &self,
        workflow: &WorkflowDefinition,
        taken: &HashSet<String>,
    ) -> Result<ToolDefinition> {
        validate_definition(workflow)?;
        let name = self.tool_name(workflow, taken)?;
        let description = describe(workflow);

        let execution = Arc::clone(&self.execution);
        let workflow_id = workflow.id.clone();
        let handler = move |params: Value| {
            let execution = Arc::clone(&execution);
            let workflow_id = workflow_id.clone();
            Box::pin(async move {
                let result = execution.execute_workflow(&workflow_id, params).await;
                render_result(result)
            }) as futures::future::BoxFuture<'static, Result<ToolResult>>
        };

        Ok(ToolDefinition::new(name, description, workflow.input_schema.clone(), handler)
            .category(workflow.category.clone())
            .version(workflow.version.clone()))
    }

    /// Resolve the tool name for a workflow: cached assignment first, then
    /// sanitised name, id suffix, numeric suffix.
    fn tool_name(&self, workflow: &WorkflowDefinition, taken: &HashSet<String>) -> Result<String> {
        let mut assigned = self.assigned_names.lock().unwrap();
        if let Some(existing) = assigned.get(&workflow.id) {
            return Ok(existing.clone());
        }

        let reserved: HashSet<String> = assigned.values().cloned().collect();
        let is_free =
            |candidate: &String| !taken.contains(candidate) && !reserved.contains(candidate);

        let base = match &self.tool_prefix {
            Some(prefix) => format!("{}_{}", prefix, sanitize(&workflow.name)),
            None => sanitize(&workflow.name),
        };
        let mut candidate = base.clone();
        if !is_free(&candidate) {
            let id_fragment = sanitize_fragment(&workflow.id);
            if !id_fragment.is_empty() {
                candidate = format!("{base}_{id_fragment}");
            }
        }
        let mut attempt = 1u32;
        let suffixed_base = candidate.clone();
        while !is_free(&candidate) {
            if attempt > MAX_NAME_ATTEMPTS {
                return Err(BridgeError::validation(format!(
                    "could not find a free tool name for workflow '{}' after {} attempts",
                    workflow.name, MAX_NAME_ATTEMPTS
                )));
            }
            candidate = format!("{suffixed_base}_{attempt}");
            attempt += 1;
        }

        debug!(workflow_id = %workflow.id, tool = %candidate, "assigned tool name");
        assigned.insert(workflow.id.clone(), candidate.clone());
        Ok(candidate)
    }

    /// Name previously assigned to a workflow id, if any.
    pub fn assigned_name(&self, workflow_id: &str) -> Option<String> {
        self.assigned_names.lock().unwrap().get(workflow_id).cloned()
    }

    /// Forget the assignment for a removed workflow so the name can be reused.
    pub fn release_name(&self, workflow_id: &str) -> Option<String> {
        self.assigned_names.lock().unwrap().remove(workflow_id)
    }

    pub fn clear_name_cache(&self) {
        self.assigned_names.lock().unwrap().clear();
    }
}

fn validate_definition(workflow: &WorkflowDefinition) -> Result<()> {
    if workflow.id.trim().is_empty() {
        return Err(BridgeError::validation("workflow id must be a non-empty string"));
    }
    if workflow.name.trim().is_empty() {
        return Err(BridgeError::validation(format!(
            "workflow '{}' must have a non-empty name",
            workflow.id
        )));
    }
    if workflow.description.trim().is_empty() {
        return Err(BridgeError::validation(format!(
            "workflow '{}' must have a non-empty description",
            workflow.name
        )));
    }
    if !workflow.input_schema.is_object_schema() {
        return Err(BridgeError::validation(format!(
            "workflow '{}' input schema must be of type object with a properties map",
            workflow.name
        )));
    }
    Ok(())
}

/// Keep only `[a-zA-Z0-9_]`, collapsing runs of illegal characters into one
/// underscore and trimming underscores at both ends.
fn sanitize_fragment(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    for c in text.trim().chars() {
        if c.is_ascii_alphanumeric() {
            cleaned.push(c);
        } else if !cleaned.ends_with('_') {
            cleaned.push('_');
        }
    }
    cleaned.trim_matches('_').to_string()
}

/// Make a full name protocol-legal: legal charset, starts with a letter,
/// never empty.
fn sanitize(name: &str) -> String {
    let cleaned = sanitize_fragment(name);
    if cleaned.is_empty() {
        "unnamed_workflow".to_string()
    } else if !cleaned.starts_with(|c: char| c.is_ascii_alphabetic()) {
        format!("workflow_{cleaned}")
    } else {
        cleaned
    }
}

/// Tool description: the workflow's own text plus traceability annotations.
fn describe(workflow: &WorkflowDefinition) -> String {
    format!(
        "{} (workflow id {}, version {}, {} execution)",
        workflow.description.trim(),
        workflow.id,
        workflow.version,
        workflow.execution_type
    )
}

/// Fold an execution result into the tool envelope. Failures are values, not
/// errors: the caller always gets the full result object back.
fn render_result(result: WorkflowExecutionResult) -> Result<ToolResult> {
    let payload = serde_json::to_string_pretty(&result).map_err(|e| {
        BridgeError::validation(format!(
            "failed to serialise execution result for workflow '{}': {e}",
            result.original_workflow_id
        ))
    })?;
    if result.success {
        Ok(ToolResult::text(payload))
    } else {
        let summary = result
            .error
            .as_deref()
            .unwrap_or("workflow execution failed");
        Ok(ToolResult {
            content: vec![
                ToolContent::Text {
                    text: format!("Workflow execution failed: {summary}"),
                },
                ToolContent::Text { text: payload },
            ],
            is_error: Some(true),
        })
    }
}

/// JSON shape a generated tool advertises to the protocol layer for listing.
pub fn tool_listing(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "inputSchema": serde_json::to_value(&tool.input_schema).unwrap_or(Value::Null),
    })
}
