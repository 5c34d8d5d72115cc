//! Per-execution performance tracking and soft resource governance.
//!
//! Tracking is advisory: the execution service keeps working even when every
//! call here is a no-op (the monitor can be disabled entirely), and a missing
//! metrics row is logged rather than failed on. Status rows only ever move
//! from `RUNNING` to a terminal state, never backward.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::{Pid, System};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use workflow_bridge_sdk::ExecutionStatus;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// When false, every mutating method is a no-op and every accessor
    /// returns empty/zero.
    pub enabled: bool,
    pub max_concurrent_executions: usize,
    /// Terminal rows older than this are eligible for cleanup.
    pub retention: Duration,
    /// Running rows older than this are force-transitioned to `TIMEOUT` by
    /// the reaper.
    pub execution_timeout: Duration,
    pub cleanup_interval: Duration,
    pub resource_sample_interval: Duration,
    pub memory_threshold_bytes: u64,
    pub cpu_threshold_percent: f32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            enabled: true,
            max_concurrent_executions: 10,
            retention: Duration::from_secs(3600),
            execution_timeout: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
            resource_sample_interval: Duration::from_secs(30),
            memory_threshold_bytes: 1024 * 1024 * 1024,
            cpu_threshold_percent: 80.0,
        }
    }
}

/// One row per in-flight or recently-completed execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionMetrics {
    pub workflow_id: String,
    pub instance_id: String,
    pub correlation_id: Option<String>,
    pub start_time_ms: i64,
    pub end_time_ms: Option<i64>,
    pub duration_ms: Option<i64>,
    pub status: ExecutionStatus,
    pub api_call_count: u64,
    pub total_api_time_ms: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub metadata: HashMap<String, Value>,
}

/// Outcome of one advisory resource check. Exceeding never blocks anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceLimitStatus {
    pub memory_exceeded: bool,
    pub cpu_exceeded: bool,
    pub concurrency_exceeded: bool,
}

/// Aggregate view over the metrics in a time window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub total_executions: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub timed_out: usize,
    pub min_duration_ms: Option<i64>,
    pub max_duration_ms: Option<i64>,
    pub avg_duration_ms: Option<f64>,
    pub total_api_time_ms: u64,
    pub avg_api_time_ms: f64,
    /// Share of executions that recorded at least one error.
    pub error_rate: f64,
}

#[derive(Debug, Clone)]
struct ResourceSample {
    taken_at_ms: i64,
    memory_bytes: u64,
    cpu_percent: f32,
}

type MetricsKey = (String, String);

pub struct WorkflowPerformanceMonitor {
    config: MonitorConfig,
    metrics: Mutex<HashMap<MetricsKey, ExecutionMetrics>>,
    resource_history: Mutex<VecDeque<ResourceSample>>,
    system: Mutex<System>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl WorkflowPerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        WorkflowPerformanceMonitor {
            config,
            metrics: Mutex::new(HashMap::new()),
            resource_history: Mutex::new(VecDeque::new()),
            system: Mutex::new(System::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Create a metrics row for a newly submitted execution and run an
    /// advisory resource check.
    pub fn start_execution(
        &self,
        workflow_id: &str,
        instance_id: &str,
        correlation_id: Option<&str>,
        metadata: HashMap<String, Value>,
    ) {
        if !self.config.enabled {
            return;
        }
        let row = ExecutionMetrics {
            workflow_id: workflow_id.to_string(),
            instance_id: instance_id.to_string(),
            correlation_id: correlation_id.map(str::to_string),
            start_time_ms: now_ms(),
            end_time_ms: None,
            duration_ms: None,
            status: ExecutionStatus::Running,
            api_call_count: 0,
            total_api_time_ms: 0,
            error_count: 0,
            last_error: None,
            metadata,
        };
        self.metrics
            .lock()
            .unwrap()
            .insert((workflow_id.to_string(), instance_id.to_string()), row);
        self.check_resource_limits();
    }

    /// Move a row to a new status. Terminal rows are never overwritten; a
    /// missing row is a warning, not a failure.
    pub fn update_execution_status(
        &self,
        workflow_id: &str,
        instance_id: &str,
        status: ExecutionStatus,
        error: Option<&str>,
    ) {
        if !self.config.enabled {
            return;
        }
        let mut metrics = self.metrics.lock().unwrap();
        let key = (workflow_id.to_string(), instance_id.to_string());
        let Some(row) = metrics.get_mut(&key) else {
            warn!(
                workflow_id,
                instance_id, "status update for unknown execution, ignoring"
            );
            return;
        };
        if row.status.is_terminal() {
            debug!(
                workflow_id,
                instance_id,
                current = %row.status,
                requested = %status,
                "execution already terminal, ignoring status update"
            );
            return;
        }
        row.status = status;
        if status.is_terminal() {
            let end = now_ms();
            row.end_time_ms = Some(end);
            row.duration_ms = Some(end - row.start_time_ms);
        }
        if let Some(error) = error {
            row.error_count += 1;
            row.last_error = Some(error.to_string());
        }
    }

    /// Record one remote API call made on behalf of an execution.
    pub fn record_api_call(
        &self,
        workflow_id: &str,
        instance_id: &str,
        duration_ms: u64,
        success: bool,
        error: Option<&str>,
    ) {
        if !self.config.enabled {
            return;
        }
        let mut metrics = self.metrics.lock().unwrap();
        let key = (workflow_id.to_string(), instance_id.to_string());
        let Some(row) = metrics.get_mut(&key) else {
            warn!(
                workflow_id,
                instance_id, "API call recorded for unknown execution, ignoring"
            );
            return;
        };
        row.api_call_count += 1;
        row.total_api_time_ms += duration_ms;
        if !success {
            row.error_count += 1;
            if let Some(error) = error {
                row.last_error = Some(error.to_string());
            }
        }
    }

    /// Final status update plus a copy of the resulting row.
    pub fn complete_execution(
        &self,
        workflow_id: &str,
        instance_id: &str,
        final_status: ExecutionStatus,
        error: Option<&str>,
    ) -> Option<ExecutionMetrics> {
        if !self.config.enabled {
            return None;
        }
        self.update_execution_status(workflow_id, instance_id, final_status, error);
        self.get_metrics(workflow_id, instance_id)
    }

    pub fn get_metrics(&self, workflow_id: &str, instance_id: &str) -> Option<ExecutionMetrics> {
        if !self.config.enabled {
            return None;
        }
        self.metrics
            .lock()
            .unwrap()
            .get(&(workflow_id.to_string(), instance_id.to_string()))
            .cloned()
    }

    /// Aggregate stats over rows whose `start_time` falls inside the window
    /// (all time when `window` is `None`). All-zero on empty input.
    pub fn get_performance_stats(&self, window: Option<Duration>) -> PerformanceStats {
        if !self.config.enabled {
            return PerformanceStats::default();
        }
        let cutoff = window.map(|w| now_ms() - w.as_millis() as i64);
        let metrics = self.metrics.lock().unwrap();

        let mut stats = PerformanceStats::default();
        let mut duration_sum = 0i64;
        let mut duration_count = 0usize;
        let mut errored = 0usize;

        for row in metrics.values() {
            if let Some(cutoff) = cutoff {
                if row.start_time_ms < cutoff {
                    continue;
                }
            }
            stats.total_executions += 1;
            match row.status {
                ExecutionStatus::Running => stats.running += 1,
                ExecutionStatus::Completed => stats.completed += 1,
                ExecutionStatus::Failed => stats.failed += 1,
                ExecutionStatus::Cancelled => stats.cancelled += 1,
                ExecutionStatus::Timeout => stats.timed_out += 1,
            }
            if let Some(duration) = row.duration_ms {
                duration_sum += duration;
                duration_count += 1;
                stats.min_duration_ms =
                    Some(stats.min_duration_ms.map_or(duration, |d| d.min(duration)));
                stats.max_duration_ms =
                    Some(stats.max_duration_ms.map_or(duration, |d| d.max(duration)));
            }
            stats.total_api_time_ms += row.total_api_time_ms;
            if row.error_count > 0 {
                errored += 1;
            }
        }

        if duration_count > 0 {
            stats.avg_duration_ms = Some(duration_sum as f64 / duration_count as f64);
        }
        if stats.total_executions > 0 {
            stats.avg_api_time_ms = stats.total_api_time_ms as f64 / stats.total_executions as f64;
            stats.error_rate = errored as f64 / stats.total_executions as f64;
        }
        stats
    }

    /// Advisory comparison of process memory/CPU and running count against
    /// the configured thresholds. Logs warnings; never blocks.
    pub fn check_resource_limits(&self) -> ResourceLimitStatus {
        if !self.config.enabled {
            return ResourceLimitStatus::default();
        }
        let (memory_bytes, cpu_percent) = self.sample_process();
        let running = self.running_count();

        let status = ResourceLimitStatus {
            memory_exceeded: memory_bytes > self.config.memory_threshold_bytes,
            cpu_exceeded: cpu_percent > self.config.cpu_threshold_percent,
            concurrency_exceeded: running > self.config.max_concurrent_executions,
        };
        if status.memory_exceeded {
            warn!(
                memory_bytes,
                threshold = self.config.memory_threshold_bytes,
                "process memory above threshold"
            );
        }
        if status.cpu_exceeded {
            warn!(
                cpu_percent,
                threshold = self.config.cpu_threshold_percent,
                "process CPU above threshold"
            );
        }
        if status.concurrency_exceeded {
            warn!(
                running,
                max = self.config.max_concurrent_executions,
                "concurrent executions above configured maximum"
            );
        }
        status
    }

    /// Drop terminal rows older than the retention window. Running rows are
    /// never removed regardless of age.
    pub fn cleanup_old_metrics(&self) -> usize {
        if !self.config.enabled {
            return 0;
        }
        let cutoff = now_ms() - self.config.retention.as_millis() as i64;
        let mut metrics = self.metrics.lock().unwrap();
        let before = metrics.len();
        metrics.retain(|_, row| !(row.status.is_terminal() && row.start_time_ms < cutoff));
        let removed = before - metrics.len();
        if removed > 0 {
            debug!(removed, "cleaned up old execution metrics");
        }
        removed
    }

    /// Reap rows that have been `RUNNING` longer than the execution timeout.
    /// This is the second line of defense for poll loops that were abandoned
    /// (e.g. a crash mid-poll); it does not cancel any underlying loop.
    pub fn enforce_execution_timeouts(&self) -> usize {
        if !self.config.enabled {
            return 0;
        }
        let now = now_ms();
        let cutoff = now - self.config.execution_timeout.as_millis() as i64;
        let mut metrics = self.metrics.lock().unwrap();
        let mut reaped = 0usize;
        for row in metrics.values_mut() {
            if row.status == ExecutionStatus::Running && row.start_time_ms < cutoff {
                row.status = ExecutionStatus::Timeout;
                row.end_time_ms = Some(now);
                row.duration_ms = Some(now - row.start_time_ms);
                row.error_count += 1;
                row.last_error = Some(format!(
                    "execution exceeded {}ms and was reaped by the monitor",
                    self.config.execution_timeout.as_millis()
                ));
                warn!(
                    workflow_id = %row.workflow_id,
                    instance_id = %row.instance_id,
                    "reaped long-running execution as TIMEOUT"
                );
                reaped += 1;
            }
        }
        reaped
    }

    pub fn running_count(&self) -> usize {
        self.metrics
            .lock()
            .unwrap()
            .values()
            .filter(|row| row.status == ExecutionStatus::Running)
            .count()
    }

    fn sample_process(&self) -> (u64, f32) {
        let mut system = self.system.lock().unwrap();
        let pid = Pid::from_u32(std::process::id());
        system.refresh_process(pid);
        system
            .process(pid)
            .map(|process| (process.memory(), process.cpu_usage()))
            .unwrap_or((0, 0.0))
    }

    /// Start the cleanup tick and the resource-sampling tick. Both are owned
    /// by the monitor and cancelled by [`shutdown`](Self::shutdown).
    pub fn start_background_tasks(self: &Arc<Self>) {
        if !self.config.enabled {
            return;
        }
        let mut tasks = self.tasks.lock().unwrap();

        let monitor = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(monitor.config.cleanup_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                monitor.cleanup_old_metrics();
                monitor.enforce_execution_timeouts();
            }
        }));

        let monitor = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(monitor.config.resource_sample_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let (memory_bytes, cpu_percent) = monitor.sample_process();
                let cutoff = now_ms() - monitor.config.retention.as_millis() as i64;
                let mut history = monitor.resource_history.lock().unwrap();
                history.push_back(ResourceSample {
                    taken_at_ms: now_ms(),
                    memory_bytes,
                    cpu_percent,
                });
                while history
                    .front()
                    .is_some_and(|sample| sample.taken_at_ms < cutoff)
                {
                    history.pop_front();
                }
            }
        }));

        info!("performance monitor background tasks started");
    }

    pub fn shutdown(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        debug!("performance monitor background tasks stopped");
    }
}
