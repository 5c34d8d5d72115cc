//! In-memory tool registry.
//!
//! Single source of truth for the tools currently exposed to the protocol
//! layer. Tools are keyed by unique name; workflow-generated tools carry a
//! side-table entry back to their source [`WorkflowDefinition`] so they can be
//! told apart from static tools and documented with richer metadata.

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use workflow_bridge_sdk::{
    validate_parameters, BridgeError, InputSchema, Result, ToolResult, WorkflowDefinition,
};

/// Async handler stored with each tool. Handlers capture their collaborators
/// (execution service, workflow definition) in the closure.
pub type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<ToolResult>> + Send + Sync>;

/// Protocol-facing tool descriptor.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub category: Option<String>,
    pub version: Option<String>,
    pub input_schema: InputSchema,
    pub handler: ToolHandler,
}

impl ToolDefinition {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: InputSchema,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> BoxFuture<'static, Result<ToolResult>> + Send + Sync + 'static,
    {
        ToolDefinition {
            name: name.into(),
            description: description.into(),
            category: None,
            version: None,
            input_schema,
            handler: Arc::new(handler),
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RegistryState {
    tools: HashMap<String, ToolDefinition>,
    categories: HashMap<String, BTreeSet<String>>,
    workflow_tools: HashMap<String, WorkflowDefinition>,
}

/// Thread-safe catalog of callable tools.
#[derive(Default)]
pub struct ToolRegistry {
    state: Mutex<RegistryState>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry::default()
    }

    /// Register a static tool. Fails if the definition is malformed or the
    /// name is already taken.
    pub fn register(&self, tool: ToolDefinition) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::register_locked(&mut state, tool)
    }

    /// Register a workflow-generated tool together with its source definition.
    pub fn register_workflow_tool(
        &self,
        tool: ToolDefinition,
        workflow: WorkflowDefinition,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let name = tool.name.clone();
        Self::register_locked(&mut state, tool)?;
        state.workflow_tools.insert(name, workflow);
        Ok(())
    }

    fn register_locked(state: &mut RegistryState, tool: ToolDefinition) -> Result<()> {
        if tool.name.trim().is_empty() {
            return Err(BridgeError::validation("tool name must be a non-empty string"));
        }
        if tool.description.trim().is_empty() {
            return Err(BridgeError::validation(format!(
                "tool '{}' must have a non-empty description",
                tool.name
            )));
        }
        if !tool.input_schema.is_object_schema() {
            return Err(BridgeError::validation(format!(
                "tool '{}' input schema must be of type object with a properties map",
                tool.name
            )));
        }
        if state.tools.contains_key(&tool.name) {
            return Err(BridgeError::validation(format!(
                "tool '{}' is already registered",
                tool.name
            )));
        }
        if let Some(category) = &tool.category {
            state
                .categories
                .entry(category.clone())
                .or_default()
                .insert(tool.name.clone());
        }
        debug!(tool = %tool.name, "registered tool");
        state.tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    /// Remove a tool. Idempotent; returns whether anything was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        let removed = state.tools.remove(name);
        if let Some(tool) = &removed {
            if let Some(category) = &tool.category {
                if let Some(members) = state.categories.get_mut(category) {
                    members.remove(name);
                    if members.is_empty() {
                        state.categories.remove(category);
                    }
                }
            }
        }
        state.workflow_tools.remove(name);
        removed.is_some()
    }

    pub fn get(&self, name: &str) -> Option<ToolDefinition> {
        self.state.lock().unwrap().tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<ToolDefinition> {
        let mut tools: Vec<ToolDefinition> =
            self.state.lock().unwrap().tools.values().cloned().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn list_by_category(&self, category: &str) -> Vec<ToolDefinition> {
        let state = self.state.lock().unwrap();
        state
            .categories
            .get(category)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|name| state.tools.get(name).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.state.lock().unwrap().tools.len()
    }

    pub fn is_workflow_tool(&self, name: &str) -> bool {
        self.state.lock().unwrap().workflow_tools.contains_key(name)
    }

    /// Source definition of a workflow-generated tool, if any.
    pub fn workflow_definition(&self, name: &str) -> Option<WorkflowDefinition> {
        self.state.lock().unwrap().workflow_tools.get(name).cloned()
    }

    /// Every workflow-generated tool with its source definition; input to
    /// reconciliation.
    pub fn workflow_tools(&self) -> Vec<(String, WorkflowDefinition)> {
        self.state
            .lock()
            .unwrap()
            .workflow_tools
            .iter()
            .map(|(name, workflow)| (name.clone(), workflow.clone()))
            .collect()
    }

    /// All currently registered names; input to conflict-free name generation.
    pub fn tool_names(&self) -> HashSet<String> {
        self.state.lock().unwrap().tools.keys().cloned().collect()
    }

    /// Validate `params` against the named tool's schema.
    pub fn validate_tool_parameters(&self, name: &str, params: &Map<String, Value>) -> Result<()> {
        let schema = self
            .get(name)
            .map(|tool| tool.input_schema)
            .ok_or_else(|| BridgeError::validation(format!("unknown tool '{name}'")))?;
        let undeclared = validate_parameters(&schema, params)?;
        if !undeclared.is_empty() {
            warn!(tool = name, ?undeclared, "call carried undeclared parameters");
        }
        Ok(())
    }

    /// Validate parameters, then invoke the handler. Handler failures are
    /// wrapped as tool-execution errors carrying the original cause.
    pub async fn execute(&self, name: &str, params: Value) -> Result<ToolResult> {
        let handler = {
            let map = params.as_object().cloned().unwrap_or_default();
            self.validate_tool_parameters(name, &map)?;
            // Re-fetched under the same name; the tool may have been swapped
            // between validation and now, in which case the lookup miss is the
            // honest answer.
            self.get(name)
                .map(|tool| tool.handler)
                .ok_or_else(|| BridgeError::validation(format!("unknown tool '{name}'")))?
        };
        (handler)(params)
            .await
            .map_err(|e| BridgeError::tool_execution(name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use workflow_bridge_sdk::PropertySchema;

    fn simple_schema() -> InputSchema {
        let mut properties = BTreeMap::new();
        properties.insert(
            "url".to_string(),
            PropertySchema::String {
                description: None,
                allowed: None,
                min_length: None,
                max_length: None,
                pattern: None,
            },
        );
        InputSchema::object(properties, Some(vec!["url".to_string()]))
    }

    fn echo_tool(name: &str) -> ToolDefinition {
        ToolDefinition::new(name, "Echoes its input", simple_schema(), |params| {
            Box::pin(async move { Ok(ToolResult::text(params.to_string())) })
        })
    }

    #[test]
    fn register_rejects_empty_name_and_description() {
        let registry = ToolRegistry::new();

        let mut tool = echo_tool("");
        assert!(registry.register(tool).is_err());

        tool = echo_tool("ok");
        tool.description = String::new();
        assert!(registry.register(tool).is_err());
    }

    #[test]
    fn register_rejects_non_object_schema() {
        let registry = ToolRegistry::new();
        let mut tool = echo_tool("bad_schema");
        tool.input_schema = InputSchema::default();
        let err = registry.register(tool).unwrap_err();
        assert!(err.to_string().contains("object"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool("dup")).unwrap();
        let err = registry.register(echo_tool("dup")).unwrap_err();
        assert!(err.to_string().contains("already registered"));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool("gone")).unwrap();
        assert!(registry.unregister("gone"));
        assert!(!registry.unregister("gone"));
        assert!(!registry.unregister("never_existed"));
    }

    #[test]
    fn category_index_tracks_membership() {
        let registry = ToolRegistry::new();
        registry
            .register(echo_tool("a").category("audit"))
            .unwrap();
        registry
            .register(echo_tool("b").category("audit"))
            .unwrap();
        registry.register(echo_tool("c")).unwrap();

        let audit = registry.list_by_category("audit");
        assert_eq!(audit.len(), 2);
        assert!(registry.list_by_category("other").is_empty());

        registry.unregister("a");
        assert_eq!(registry.list_by_category("audit").len(), 1);
    }

    #[test]
    fn workflow_side_table_distinguishes_generated_tools() {
        let registry = ToolRegistry::new();
        let workflow: WorkflowDefinition = serde_json::from_value(json!({
            "id": "42",
            "name": "Site Audit",
            "description": "Audits a site",
            "inputSchema": {"type": "object", "properties": {"url": {"type": "string"}}}
        }))
        .unwrap();

        registry
            .register_workflow_tool(echo_tool("workflow_Site_Audit"), workflow.clone())
            .unwrap();
        registry.register(echo_tool("static_tool")).unwrap();

        assert!(registry.is_workflow_tool("workflow_Site_Audit"));
        assert!(!registry.is_workflow_tool("static_tool"));
        assert_eq!(
            registry.workflow_definition("workflow_Site_Audit").unwrap().id,
            workflow.id
        );

        registry.unregister("workflow_Site_Audit");
        assert!(!registry.is_workflow_tool("workflow_Site_Audit"));
    }

    #[tokio::test]
    async fn execute_validates_before_invoking() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool("echo")).unwrap();

        let err = registry.execute("echo", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("url"));

        let result = registry
            .execute("echo", json!({"url": "https://a.com"}))
            .await
            .unwrap();
        assert!(result.first_text().unwrap().contains("a.com"));
    }

    #[tokio::test]
    async fn undeclared_parameters_are_reported_but_do_not_fail_the_call() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool("echo")).unwrap();

        let result = registry
            .execute("echo", json!({"url": "https://a.com", "depth": 3}))
            .await
            .unwrap();
        assert!(result.first_text().unwrap().contains("depth"));
    }

    #[tokio::test]
    async fn execute_wraps_handler_errors_without_losing_the_cause() {
        let registry = ToolRegistry::new();
        let failing = ToolDefinition::new("boomer", "Always fails", simple_schema(), |_| {
            Box::pin(async { Err(BridgeError::api("remote exploded")) })
        });
        registry.register(failing).unwrap();

        let err = registry
            .execute("boomer", json!({"url": "https://a.com"}))
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("boomer"));
        assert!(text.contains("remote exploded"));
        assert!(matches!(err, BridgeError::ToolExecution { .. }));
    }

    #[tokio::test]
    async fn execute_unknown_tool_is_a_validation_error() {
        let registry = ToolRegistry::new();
        let err = registry.execute("ghost", json!({})).await.unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
    }
}
