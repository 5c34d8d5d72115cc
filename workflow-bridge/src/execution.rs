//! Workflow execution: submit, poll to a terminal state, assemble a result.
//!
//! The per-execution state machine is submit -> poll -> terminal. Two error
//! channels exist on purpose: [`WorkflowExecutionService::execute_workflow`]
//! never fails — every problem is folded into a
//! `WorkflowExecutionResult { success: false }` — while
//! [`WorkflowExecutionService::get_execution_status`] is the fallible
//! primitive the poll loop is built from.

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use workflow_bridge_sdk::{
    BridgeError, ExecutionStatus, RemoteRunStatus, Result, RunStatusSnapshot,
    WorkflowExecutionResult,
};

use crate::config::MIN_STATUS_CHECK_INTERVAL_MS;
use crate::http::{ApiTransport, Method};
use crate::monitor::WorkflowPerformanceMonitor;

type ExecutionKey = (String, String);

/// Parsed response of the start endpoint.
struct StartedRun {
    correlation_id: String,
    instance_id: String,
    submit_latency_ms: u64,
    raw_response: Value,
}

pub struct WorkflowExecutionService {
    api: Arc<dyn ApiTransport>,
    monitor: Arc<WorkflowPerformanceMonitor>,
    status_check_interval: Duration,
    execution_timeout: Duration,
    /// Cooperative cancellation flags, one per in-flight poll loop.
    cancellations: Mutex<HashMap<ExecutionKey, Arc<AtomicBool>>>,
}

impl WorkflowExecutionService {
    pub fn new(
        api: Arc<dyn ApiTransport>,
        monitor: Arc<WorkflowPerformanceMonitor>,
        status_check_interval: Duration,
        execution_timeout: Duration,
    ) -> Self {
        let floor = Duration::from_millis(MIN_STATUS_CHECK_INTERVAL_MS);
        let status_check_interval = if status_check_interval < floor {
            warn!(
                configured_ms = status_check_interval.as_millis() as u64,
                "status check interval below the remote rate-limit floor, clamping"
            );
            floor
        } else {
            status_check_interval
        };
        WorkflowExecutionService {
            api,
            monitor,
            status_check_interval,
            execution_timeout,
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    /// Run a workflow to a terminal state. Never fails: callers always get a
    /// result object, success or failure.
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        parameters: Value,
    ) -> WorkflowExecutionResult {
        let started = match self.submit(workflow_id, &parameters).await {
            Ok(started) => started,
            Err(e) => {
                warn!(workflow_id, error = %e, "workflow submission failed");
                return failed_result(workflow_id, "", "", parameters, ExecutionStatus::Failed, e, None);
            }
        };

        self.monitor.start_execution(
            workflow_id,
            &started.instance_id,
            Some(&started.correlation_id),
            HashMap::new(),
        );
        self.monitor.record_api_call(
            workflow_id,
            &started.instance_id,
            started.submit_latency_ms,
            true,
            None,
        );
        info!(
            workflow_id,
            instance_id = %started.instance_id,
            correlation_id = %started.correlation_id,
            "workflow submitted"
        );

        match self
            .poll_until_complete(workflow_id, &started.instance_id, self.execution_timeout)
            .await
        {
            Ok(snapshot) => {
                let status = ExecutionStatus::from(snapshot.status);
                self.monitor.complete_execution(
                    workflow_id,
                    &started.instance_id,
                    status,
                    snapshot.error.as_deref(),
                );
                completed_result(workflow_id, &started, snapshot)
            }
            Err(e) => {
                let status = if e.is_timeout() {
                    ExecutionStatus::Timeout
                } else if e.is_cancelled() {
                    ExecutionStatus::Cancelled
                } else {
                    ExecutionStatus::Failed
                };
                self.monitor.complete_execution(
                    workflow_id,
                    &started.instance_id,
                    status,
                    Some(&e.to_string()),
                );
                warn!(workflow_id, instance_id = %started.instance_id, error = %e, "workflow execution failed");
                failed_result(
                    workflow_id,
                    &started.correlation_id,
                    &started.instance_id,
                    parameters,
                    status,
                    e,
                    Some(started.raw_response),
                )
            }
        }
    }

    async fn submit(&self, workflow_id: &str, parameters: &Value) -> Result<StartedRun> {
        let payload = json!({ "input": parameters, "source": "application" });
        let path = format!("/api/v1/service/workflows/{workflow_id}/start");
        let clock = Instant::now();
        let response = self.api.request(Method::POST, &path, Some(&payload)).await?;
        let submit_latency_ms = clock.elapsed().as_millis() as u64;

        let object = response.data.as_object().ok_or_else(|| {
            BridgeError::api("workflow start response is not a JSON object")
        })?;
        let correlation_id = string_field(object, "correlation_id")?;
        let instance_id = string_field(object, "workflow_id")?;

        Ok(StartedRun {
            correlation_id,
            instance_id,
            submit_latency_ms,
            raw_response: response.data,
        })
    }

    /// Fetch one status snapshot. This is the fallible primitive: malformed
    /// or unexpected response shapes surface as API errors.
    pub async fn get_execution_status(
        &self,
        workflow_id: &str,
        instance_id: &str,
    ) -> Result<RunStatusSnapshot> {
        let path =
            format!("/api/v1/service/workflows/{workflow_id}/runs/{instance_id}/status");
        let clock = Instant::now();
        let outcome = self.api.request(Method::GET, &path, None).await;
        let latency_ms = clock.elapsed().as_millis() as u64;

        match outcome.and_then(|response| parse_status_response(&response.data)) {
            Ok(snapshot) => {
                self.monitor
                    .record_api_call(workflow_id, instance_id, latency_ms, true, None);
                Ok(snapshot)
            }
            Err(e) => {
                self.monitor.record_api_call(
                    workflow_id,
                    instance_id,
                    latency_ms,
                    false,
                    Some(&e.to_string()),
                );
                Err(e)
            }
        }
    }

    /// Poll until the remote run leaves `RUNNING`, the wall-clock budget is
    /// spent, or the execution is cancelled locally. The cancellation flag is
    /// deregistered on every exit path.
    pub async fn poll_until_complete(
        &self,
        workflow_id: &str,
        instance_id: &str,
        timeout: Duration,
    ) -> Result<RunStatusSnapshot> {
        let flag = self.register_cancellation(workflow_id, instance_id);
        let outcome = self.poll_loop(workflow_id, instance_id, timeout, &flag).await;
        self.deregister_cancellation(workflow_id, instance_id);
        outcome
    }

    async fn poll_loop(
        &self,
        workflow_id: &str,
        instance_id: &str,
        timeout: Duration,
        cancelled: &AtomicBool,
    ) -> Result<RunStatusSnapshot> {
        let clock = Instant::now();
        loop {
            if clock.elapsed() >= timeout {
                return Err(BridgeError::timeout(timeout.as_millis() as u64));
            }
            if cancelled.load(Ordering::SeqCst) {
                return Err(BridgeError::cancelled());
            }
            let snapshot = self.get_execution_status(workflow_id, instance_id).await?;
            if snapshot.status.is_terminal() {
                debug!(
                    workflow_id,
                    instance_id,
                    status = %snapshot.status,
                    "workflow reached terminal status"
                );
                return Ok(snapshot);
            }
            sleep(self.status_check_interval).await;
        }
    }

    fn register_cancellation(&self, workflow_id: &str, instance_id: &str) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        self.cancellations.lock().unwrap().insert(
            (workflow_id.to_string(), instance_id.to_string()),
            Arc::clone(&flag),
        );
        flag
    }

    fn deregister_cancellation(&self, workflow_id: &str, instance_id: &str) {
        self.cancellations
            .lock()
            .unwrap()
            .remove(&(workflow_id.to_string(), instance_id.to_string()));
    }

    /// Stop polling a single execution. Local-only: no remote cancel endpoint
    /// exists, so the remote run may continue server-side.
    pub fn cancel_execution(&self, workflow_id: &str, instance_id: &str) -> bool {
        let cancellations = self.cancellations.lock().unwrap();
        match cancellations.get(&(workflow_id.to_string(), instance_id.to_string())) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                info!(workflow_id, instance_id, "local cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Cancel every tracked poll loop; used during shutdown.
    pub fn cancel_all_executions(&self) {
        let cancellations = self.cancellations.lock().unwrap();
        for ((workflow_id, instance_id), flag) in cancellations.iter() {
            flag.store(true, Ordering::SeqCst);
            self.monitor.update_execution_status(
                workflow_id,
                instance_id,
                ExecutionStatus::Cancelled,
                Some("cancelled during shutdown"),
            );
        }
        if !cancellations.is_empty() {
            info!(count = cancellations.len(), "cancelled all in-flight executions");
        }
    }

    pub async fn shutdown(&self) {
        self.cancel_all_executions();
        self.monitor.shutdown();
    }
}

fn string_field(object: &Map<String, Value>, name: &str) -> Result<String> {
    object
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            BridgeError::api(format!(
                "workflow start response is missing string field '{name}'"
            ))
        })
}

fn require_i64(object: &Map<String, Value>, name: &str) -> Result<i64> {
    object.get(name).and_then(Value::as_i64).ok_or_else(|| {
        BridgeError::api(format!(
            "workflow status response is missing numeric field '{name}'"
        ))
    })
}

fn parse_status_response(data: &Value) -> Result<RunStatusSnapshot> {
    let object = data
        .as_object()
        .ok_or_else(|| BridgeError::api("workflow status response is not a JSON object"))?;

    let status_text = object
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| BridgeError::api("workflow status response is missing field 'status'"))?;
    let status = RemoteRunStatus::parse(status_text).ok_or_else(|| {
        BridgeError::api(format!("unknown workflow status '{status_text}'"))
    })?;

    let workflow_id = object
        .get("workflow_id")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            BridgeError::api("workflow status response is missing string field 'workflow_id'")
        })?
        .to_string();
    let input = object
        .get("input")
        .cloned()
        .ok_or_else(|| BridgeError::api("workflow status response is missing field 'input'"))?;
    let output = object
        .get("output")
        .cloned()
        .ok_or_else(|| BridgeError::api("workflow status response is missing field 'output'"))?;

    let error = if status == RemoteRunStatus::Failed {
        Some(
            output
                .get("error")
                .or_else(|| output.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("workflow execution failed")
                .to_string(),
        )
    } else {
        None
    };

    Ok(RunStatusSnapshot {
        status,
        create_time: require_i64(object, "create_time")?,
        update_time: require_i64(object, "update_time")?,
        start_time: require_i64(object, "start_time")?,
        end_time: object.get("end_time").and_then(Value::as_i64),
        workflow_id,
        input,
        output,
        error,
    })
}

fn completed_result(
    workflow_id: &str,
    started: &StartedRun,
    snapshot: RunStatusSnapshot,
) -> WorkflowExecutionResult {
    let status = ExecutionStatus::from(snapshot.status);
    let execution_duration = snapshot.end_time.map(|end| end - snapshot.start_time);
    let status_response = serde_json::to_value(&snapshot).ok();
    WorkflowExecutionResult {
        success: status == ExecutionStatus::Completed,
        correlation_id: started.correlation_id.clone(),
        workflow_instance_id: started.instance_id.clone(),
        original_workflow_id: workflow_id.to_string(),
        status,
        input: snapshot.input,
        output: snapshot.output,
        error: snapshot.error,
        create_time: Some(snapshot.create_time),
        start_time: Some(snapshot.start_time),
        end_time: snapshot.end_time,
        update_time: Some(snapshot.update_time),
        execution_duration,
        start_response: Some(started.raw_response.clone()),
        status_response,
    }
}

fn failed_result(
    workflow_id: &str,
    correlation_id: &str,
    instance_id: &str,
    input: Value,
    status: ExecutionStatus,
    error: BridgeError,
    start_response: Option<Value>,
) -> WorkflowExecutionResult {
    WorkflowExecutionResult {
        success: false,
        correlation_id: correlation_id.to_string(),
        workflow_instance_id: instance_id.to_string(),
        original_workflow_id: workflow_id.to_string(),
        status,
        input,
        output: Value::Null,
        error: Some(error.to_string()),
        create_time: None,
        start_time: None,
        end_time: None,
        update_time: None,
        execution_duration: None,
        start_response,
        status_response: None,
    }
}
