//! Environment-driven configuration.
//!
//! Values arrive as environment variables (the binary loads `.env` via
//! `dotenv` first), are parsed with per-field fallbacks, and are normalised
//! here: the status-check interval is floored to [`MIN_STATUS_CHECK_INTERVAL_MS`]
//! so the remote API is never polled more than once a second.

use std::env;
use std::time::Duration;
use tracing::warn;

use crate::monitor::MonitorConfig;

/// Hard floor on the poll interval, applied at normalisation time.
pub const MIN_STATUS_CHECK_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Base URL of the remote workflow API.
    pub api_base_url: String,
    /// Master switch; when false the manager initialises to a no-op.
    pub workflows_enabled: bool,
    /// Auto-refresh cadence; zero disables the background refresh task.
    pub discovery_interval: Duration,
    /// How long the discovery cache stays fresh.
    pub discovery_cache_ttl: Duration,
    /// Wall-clock budget for one workflow execution.
    pub execution_timeout: Duration,
    pub max_concurrent_executions: usize,
    /// Case-insensitive substring filters on workflow names; empty = all.
    pub filter_patterns: Vec<String>,
    /// Sleep between status polls; floored to 1000 ms.
    pub status_check_interval: Duration,
    /// Transport-level retries for 5xx/429 responses.
    pub retry_attempts: u32,
    /// Prefix applied to generated tool names; `None` disables prefixing.
    pub tool_prefix: Option<String>,
    pub monitor: MonitorConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            api_base_url: "http://localhost:8080".to_string(),
            workflows_enabled: true,
            discovery_interval: Duration::from_secs(300),
            discovery_cache_ttl: Duration::from_secs(30),
            execution_timeout: Duration::from_secs(300),
            max_concurrent_executions: 10,
            filter_patterns: Vec::new(),
            status_check_interval: Duration::from_secs(5),
            retry_attempts: 3,
            tool_prefix: Some("workflow".to_string()),
            monitor: MonitorConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Load from the process environment, falling back to defaults on missing
    /// or unparseable values, then normalise.
    pub fn from_env() -> Self {
        let defaults = BridgeConfig::default();
        let mut config = BridgeConfig {
            api_base_url: env_string("WORKFLOW_API_BASE_URL", &defaults.api_base_url),
            workflows_enabled: env_bool("WORKFLOWS_ENABLED", defaults.workflows_enabled),
            discovery_interval: Duration::from_millis(env_u64(
                "WORKFLOW_DISCOVERY_INTERVAL_MS",
                defaults.discovery_interval.as_millis() as u64,
            )),
            discovery_cache_ttl: Duration::from_millis(env_u64(
                "WORKFLOW_DISCOVERY_CACHE_TTL_MS",
                defaults.discovery_cache_ttl.as_millis() as u64,
            )),
            execution_timeout: Duration::from_millis(env_u64(
                "WORKFLOW_EXECUTION_TIMEOUT_MS",
                defaults.execution_timeout.as_millis() as u64,
            )),
            max_concurrent_executions: env_u64(
                "WORKFLOW_MAX_CONCURRENT_EXECUTIONS",
                defaults.max_concurrent_executions as u64,
            ) as usize,
            filter_patterns: env_patterns("WORKFLOW_FILTER_PATTERNS"),
            status_check_interval: Duration::from_millis(env_u64(
                "WORKFLOW_STATUS_CHECK_INTERVAL_MS",
                defaults.status_check_interval.as_millis() as u64,
            )),
            retry_attempts: env_u64("WORKFLOW_RETRY_ATTEMPTS", defaults.retry_attempts as u64)
                as u32,
            tool_prefix: env_prefix("WORKFLOW_TOOL_PREFIX", defaults.tool_prefix.clone()),
            monitor: MonitorConfig {
                enabled: env_bool("WORKFLOW_METRICS_ENABLED", defaults.monitor.enabled),
                retention: Duration::from_millis(env_u64(
                    "WORKFLOW_METRICS_RETENTION_MS",
                    defaults.monitor.retention.as_millis() as u64,
                )),
                cleanup_interval: Duration::from_millis(env_u64(
                    "WORKFLOW_METRICS_CLEANUP_INTERVAL_MS",
                    defaults.monitor.cleanup_interval.as_millis() as u64,
                )),
                memory_threshold_bytes: env_u64(
                    "WORKFLOW_MEMORY_THRESHOLD_MB",
                    defaults.monitor.memory_threshold_bytes / (1024 * 1024),
                ) * 1024
                    * 1024,
                cpu_threshold_percent: env_f32(
                    "WORKFLOW_CPU_THRESHOLD_PERCENT",
                    defaults.monitor.cpu_threshold_percent,
                ),
                ..defaults.monitor
            },
        };
        config.monitor.execution_timeout = config.execution_timeout;
        config.monitor.max_concurrent_executions = config.max_concurrent_executions;
        config.normalized()
    }

    /// Apply floors and cross-field defaults.
    pub fn normalized(mut self) -> Self {
        let floor = Duration::from_millis(MIN_STATUS_CHECK_INTERVAL_MS);
        if self.status_check_interval < floor {
            warn!(
                configured_ms = self.status_check_interval.as_millis() as u64,
                floor_ms = MIN_STATUS_CHECK_INTERVAL_MS,
                "status check interval below floor, clamping"
            );
            self.status_check_interval = floor;
        }
        self
    }
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %value, "unparseable value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_f32(name: &str, default: f32) -> f32 {
    match env::var(name) {
        Ok(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %value, "unparseable value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_patterns(name: &str) -> Vec<String> {
    env::var(name)
        .map(|value| {
            value
                .split(',')
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn env_prefix(name: &str, default: Option<String>) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        }
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_check_interval_is_floored() {
        let config = BridgeConfig {
            status_check_interval: Duration::from_millis(100),
            ..BridgeConfig::default()
        }
        .normalized();
        assert_eq!(
            config.status_check_interval,
            Duration::from_millis(MIN_STATUS_CHECK_INTERVAL_MS)
        );
    }

    #[test]
    fn interval_at_or_above_floor_is_untouched() {
        let config = BridgeConfig {
            status_check_interval: Duration::from_millis(2500),
            ..BridgeConfig::default()
        }
        .normalized();
        assert_eq!(config.status_check_interval, Duration::from_millis(2500));
    }

    #[test]
    fn default_tool_prefix_is_workflow() {
        assert_eq!(BridgeConfig::default().tool_prefix.as_deref(), Some("workflow"));
    }
}
