//! Error taxonomy shared by every workflow-bridge component.
//!
//! Validation problems are always local pre-flight checks and are never
//! retried. API errors cover remote call failures, malformed response shapes
//! and declared timeouts/cancellations; the transport already retried what was
//! retryable before one of these surfaces. Network errors sit below HTTP
//! semantics. Tool execution errors wrap whatever a tool handler returned,
//! keeping the original message intact.

use thiserror::Error;

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Malformed tool/workflow definition or parameters.
    #[error("validation error: {0}")]
    Validation(String),

    /// Remote call failed, response shape was unexpected, or the execution
    /// timed out / was cancelled locally.
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status, when the error came from a completed response.
        status: Option<u16>,
    },

    /// Transport-level failure below HTTP semantics.
    #[error("network error: {0}")]
    Network(String),

    /// A tool handler failed; carries the tool name and the original error.
    #[error("tool '{tool}' execution failed: {source}")]
    ToolExecution {
        tool: String,
        #[source]
        source: Box<BridgeError>,
    },
}

impl BridgeError {
    pub fn validation(message: impl Into<String>) -> Self {
        BridgeError::Validation(message.into())
    }

    pub fn api(message: impl Into<String>) -> Self {
        BridgeError::Api {
            message: message.into(),
            status: None,
        }
    }

    pub fn api_status(message: impl Into<String>, status: u16) -> Self {
        BridgeError::Api {
            message: message.into(),
            status: Some(status),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        BridgeError::Network(message.into())
    }

    pub fn tool_execution(tool: impl Into<String>, source: BridgeError) -> Self {
        BridgeError::ToolExecution {
            tool: tool.into(),
            source: Box::new(source),
        }
    }

    /// Local poll-loop timeout, declared as an API error per the taxonomy.
    pub fn timeout(timeout_ms: u64) -> Self {
        BridgeError::api(format!("workflow execution timeout after {timeout_ms}ms"))
    }

    /// Local poll-loop cancellation.
    pub fn cancelled() -> Self {
        BridgeError::api("workflow execution cancelled")
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::Api { message, .. } if message.contains("timeout"))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BridgeError::Api { message, .. } if message.contains("cancelled"))
    }
}
