//! Remote workflow discovery with a TTL cache.
//!
//! Discovery fetches the catalog of workflow definitions from the remote API,
//! applies the configured name filters, and caches the outcome so bursts of
//! lookups do not hammer the endpoint. Individual malformed entries are
//! skipped with a warning; only a transport-level failure fails the fetch.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use workflow_bridge_sdk::{BridgeError, Result, WorkflowDefinition};

use crate::http::{ApiTransport, Method};

const WORKFLOWS_PATH: &str = "/api/v1/service/workflows";

/// Counters for cache effectiveness, exposed through manager status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries currently cached (0 or the size of the last good fetch).
    pub cached_workflows: usize,
}

#[async_trait]
pub trait WorkflowDiscovery: Send + Sync {
    /// Current set of workflows, served from cache while it is fresh.
    async fn discover_workflows(&self) -> Result<Vec<WorkflowDefinition>>;

    /// Availability probe used at startup. A probe that fetches also warms
    /// the cache.
    async fn is_available(&self) -> bool;

    /// Drop the cache so the next call refetches.
    fn invalidate_cache(&self);

    fn cache_stats(&self) -> CacheStats;
}

struct CacheEntry {
    workflows: Vec<WorkflowDefinition>,
    fetched_at: Instant,
}

/// API-backed discovery.
pub struct HttpWorkflowDiscovery {
    api: Arc<dyn ApiTransport>,
    cache_ttl: Duration,
    /// Case-insensitive substring filters on workflow names; empty = keep all.
    filter_patterns: Vec<String>,
    cache: Mutex<Option<CacheEntry>>,
    stats: Mutex<CacheStats>,
}

impl HttpWorkflowDiscovery {
    pub fn new(
        api: Arc<dyn ApiTransport>,
        cache_ttl: Duration,
        filter_patterns: Vec<String>,
    ) -> Self {
        let filter_patterns = filter_patterns
            .into_iter()
            .map(|pattern| pattern.to_lowercase())
            .collect();
        HttpWorkflowDiscovery {
            api,
            cache_ttl,
            filter_patterns,
            cache: Mutex::new(None),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    fn matches_filters(&self, workflow: &WorkflowDefinition) -> bool {
        if self.filter_patterns.is_empty() {
            return true;
        }
        let name = workflow.name.to_lowercase();
        self.filter_patterns
            .iter()
            .any(|pattern| name.contains(pattern))
    }

    async fn fetch(&self) -> Result<Vec<WorkflowDefinition>> {
        let response = self.api.request(Method::GET, WORKFLOWS_PATH, None).await?;

        // The endpoint has been seen returning both a bare array and an
        // object wrapping it under "workflows".
        let items = match &response.data {
            Value::Array(items) => items.as_slice(),
            Value::Object(object) => object
                .get("workflows")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .ok_or_else(|| {
                    BridgeError::api("workflow list response has no 'workflows' array")
                })?,
            _ => {
                return Err(BridgeError::api(
                    "workflow list response is neither an array nor an object",
                ))
            }
        };

        let mut workflows = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<WorkflowDefinition>(item.clone()) {
                Ok(workflow) => {
                    if self.matches_filters(&workflow) {
                        workflows.push(workflow);
                    } else {
                        debug!(workflow = %workflow.name, "workflow excluded by filter");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "skipping malformed workflow entry");
                }
            }
        }
        info!(count = workflows.len(), "discovered workflows");
        Ok(workflows)
    }
}

#[async_trait]
impl WorkflowDiscovery for HttpWorkflowDiscovery {
    async fn discover_workflows(&self) -> Result<Vec<WorkflowDefinition>> {
        {
            let cache = self.cache.lock().unwrap();
            if let Some(entry) = cache.as_ref() {
                if entry.fetched_at.elapsed() < self.cache_ttl {
                    let mut stats = self.stats.lock().unwrap();
                    stats.hits += 1;
                    return Ok(entry.workflows.clone());
                }
            }
        }

        self.stats.lock().unwrap().misses += 1;
        let workflows = self.fetch().await?;

        let mut cache = self.cache.lock().unwrap();
        *cache = Some(CacheEntry {
            workflows: workflows.clone(),
            fetched_at: Instant::now(),
        });
        self.stats.lock().unwrap().cached_workflows = workflows.len();
        Ok(workflows)
    }

    async fn is_available(&self) -> bool {
        match self.discover_workflows().await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "workflow discovery is unavailable");
                false
            }
        }
    }

    fn invalidate_cache(&self) {
        *self.cache.lock().unwrap() = None;
        self.stats.lock().unwrap().cached_workflows = 0;
        debug!("discovery cache invalidated");
    }

    fn cache_stats(&self) -> CacheStats {
        *self.stats.lock().unwrap()
    }
}
