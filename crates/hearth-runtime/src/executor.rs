//! Action executor
//!
//! The Executor is responsible for:
//! - Owning the work queue and the fixed worker pool
//! - Per-item retry with exponential backoff
//! - Recursive dispatch for composite action types
//!
//! Shutdown is signalled through a `CancellationToken` rather than a poll
//! timeout: on cancellation each worker drains the already-queued backlog
//! and exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender};
use futures_util::future::{join_all, BoxFuture};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use hearth_core::error::ExecuteError;
use hearth_core::gateway::{GatewayResponse, ServiceGateway};
use hearth_core::state::{ActionState, ActionStateMachine};
use hearth_core::template::TemplateEngine;
use hearth_core::types::{ActionItem, ActionRunResult, BatchSummary, Choice, ParsedAction};

use hearth_config::ExecutorSettings;

const DEFAULT_NUM_WORKERS: usize = 2;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
// One year; anything longer is a malformed delay, not a schedule.
const MAX_DELAY_SECS: f64 = 31_536_000.0;

/// Worker pool size and retry policy.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Number of worker tasks consuming the shared queue.
    pub num_workers: usize,
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// Base backoff delay; attempt n+1 waits `retry_delay * 2^(n-1)`.
    pub retry_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            num_workers: DEFAULT_NUM_WORKERS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl From<&ExecutorSettings> for ExecutorConfig {
    fn from(settings: &ExecutorSettings) -> Self {
        let retry_delay_secs = if settings.retry_delay_secs.is_finite() {
            settings.retry_delay_secs.max(0.0)
        } else {
            DEFAULT_RETRY_DELAY.as_secs_f64()
        };
        Self {
            num_workers: settings.num_workers.max(1),
            max_retries: settings.max_retries,
            retry_delay: Duration::from_secs_f64(retry_delay_secs),
        }
    }
}

/// Awaitable handle for one submitted action.
pub struct ExecutionHandle {
    execution_id: String,
    rx: oneshot::Receiver<ActionRunResult>,
}

impl ExecutionHandle {
    /// Execution id of the submitted item.
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Resolve once the queued item reaches a terminal state.
    pub async fn wait(self) -> Result<ActionRunResult, ExecuteError> {
        self.rx.await.map_err(|_| ExecuteError::Closed)
    }
}

struct QueuedAction {
    item: ActionItem,
    reply: Option<oneshot::Sender<ActionRunResult>>,
}

/// Terminal outcome of one retry-driven execution, before timing metadata.
#[derive(Debug, Default)]
struct CallOutcome {
    success: bool,
    status_code: Option<u16>,
    response_data: Option<Value>,
    error: Option<String>,
}

impl CallOutcome {
    fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    fn from_response(response: GatewayResponse) -> Self {
        Self {
            success: true,
            status_code: Some(response.status),
            response_data: response.body,
            error: None,
        }
    }

    fn failed_response(response: GatewayResponse) -> Self {
        Self {
            success: false,
            status_code: Some(response.status),
            error: Some(format!("service returned status {}", response.status)),
            response_data: response.body,
        }
    }
}

/// Everything a worker needs to drive items; cheap to clone into tasks.
#[derive(Clone)]
struct ExecutorCore {
    gateway: Arc<dyn ServiceGateway>,
    templates: Option<Arc<dyn TemplateEngine>>,
    config: ExecutorConfig,
}

/// The action executor - owns the queue and the worker pool.
pub struct ActionExecutor {
    core: ExecutorCore,
    tx: Sender<QueuedAction>,
    rx: Receiver<QueuedAction>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    shutdown: CancellationToken,
}

impl ActionExecutor {
    /// Create an executor over the given gateway with default settings.
    pub fn new(gateway: Arc<dyn ServiceGateway>) -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self {
            core: ExecutorCore {
                gateway,
                templates: None,
                config: ExecutorConfig::default(),
            },
            tx,
            rx,
            workers: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Attach a template engine for service-call data and choose conditions.
    pub fn with_template_engine(mut self, engine: Arc<dyn TemplateEngine>) -> Self {
        self.core.templates = Some(engine);
        self
    }

    /// Override pool size and retry policy.
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.core.config = ExecutorConfig {
            num_workers: config.num_workers.max(1),
            ..config
        };
        self
    }

    /// Spawn the worker pool. Idempotent; a no-op after shutdown.
    ///
    /// Items queued before `start` wait in the channel until workers exist.
    pub async fn start(&self) {
        if self.shutdown.is_cancelled() {
            warn!("executor already shut down; not restarting");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut workers = self.workers.lock().await;
        for worker_id in 0..self.core.config.num_workers {
            workers.push(tokio::spawn(worker_loop(
                worker_id,
                self.core.clone(),
                self.rx.clone(),
                self.shutdown.clone(),
            )));
        }
        info!(
            num_workers = self.core.config.num_workers,
            "action executor started"
        );
    }

    /// Stop intake, drain queued work, and wait for every worker to finish.
    ///
    /// Idempotent. A panicking worker is logged and does not prevent
    /// shutdown from completing. Restart is not supported.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
        let mut workers = self.workers.lock().await;
        for worker in workers.drain(..) {
            if let Err(join_error) = worker.await {
                error!(%join_error, "worker task ended abnormally");
            }
        }
        info!("action executor stopped");
    }

    /// Whether the worker pool is accepting and processing work.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Fire-and-forget enqueue; returns the execution id immediately.
    ///
    /// The eventual result is visible only in logs; use [`submit`] for an
    /// awaitable handle.
    ///
    /// [`submit`]: ActionExecutor::submit
    pub fn queue_action(
        &self,
        action: ParsedAction,
        context: Value,
        retry_on_failure: bool,
        execution_id: Option<String>,
    ) -> Result<String, ExecuteError> {
        self.enqueue(action, context, retry_on_failure, execution_id, None)
    }

    /// Enqueue an action and return an awaitable handle for its result.
    pub fn submit(
        &self,
        action: ParsedAction,
        context: Value,
        retry_on_failure: bool,
        execution_id: Option<String>,
    ) -> Result<ExecutionHandle, ExecuteError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let execution_id = self.enqueue(
            action,
            context,
            retry_on_failure,
            execution_id,
            Some(reply_tx),
        )?;
        Ok(ExecutionHandle {
            execution_id,
            rx: reply_rx,
        })
    }

    fn enqueue(
        &self,
        action: ParsedAction,
        context: Value,
        retry_on_failure: bool,
        execution_id: Option<String>,
        reply: Option<oneshot::Sender<ActionRunResult>>,
    ) -> Result<String, ExecuteError> {
        if self.shutdown.is_cancelled() {
            return Err(ExecuteError::Closed);
        }
        let mut item = ActionItem::new(action, context).with_retry(retry_on_failure);
        if let Some(execution_id) = execution_id {
            item = item.with_execution_id(execution_id);
        }
        let execution_id = item.execution_id.clone();
        debug!(
            execution_id = %execution_id,
            action = item.action.kind(),
            "action queued"
        );
        self.tx
            .try_send(QueuedAction { item, reply })
            .map_err(|_| ExecuteError::Closed)?;
        Ok(execution_id)
    }

    /// Run a batch of actions through the queue and collect their results.
    ///
    /// Each action is enqueued exactly once with a per-index execution id
    /// derived from a batch id, and the summary is built from the real
    /// queued results in submission order. Always returns a summary;
    /// per-action failures are tallied, never raised. Workers are started
    /// on demand.
    pub async fn execute_actions(&self, actions: Vec<ParsedAction>, context: Value) -> BatchSummary {
        self.start().await;

        let batch_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut summary = BatchSummary {
            total_actions: actions.len(),
            ..Default::default()
        };
        info!(batch_id = %batch_id, total = summary.total_actions, "executing action batch");

        let mut handles = Vec::with_capacity(actions.len());
        for (index, action) in actions.into_iter().enumerate() {
            let execution_id = format!("{}-{}", batch_id, index);
            match self.submit(action, context.clone(), true, Some(execution_id.clone())) {
                Ok(handle) => handles.push(handle),
                Err(e) => summary.record_error(&execution_id, e),
            }
        }

        for handle in handles {
            let execution_id = handle.execution_id().to_string();
            match handle.wait().await {
                Ok(result) => summary.record(result),
                Err(e) => summary.record_error(&execution_id, e),
            }
        }

        summary.total_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        summary
    }
}

impl Drop for ActionExecutor {
    fn drop(&mut self) {
        // Workers unwind on their own once the token fires and the channel
        // closes; nothing to await here.
        self.shutdown.cancel();
    }
}

async fn worker_loop(
    worker_id: usize,
    core: ExecutorCore,
    queue: Receiver<QueuedAction>,
    shutdown: CancellationToken,
) {
    debug!(worker_id, "worker started");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                // Drain whatever was queued before shutdown, then exit.
                while let Ok(queued) = queue.try_recv() {
                    core.process(queued).await;
                }
                break;
            }
            received = queue.recv() => match received {
                Ok(queued) => core.process(queued).await,
                Err(_) => break,
            },
        }
    }
    debug!(worker_id, "worker stopped");
}

impl ExecutorCore {
    /// Drive one queued item to a terminal result.
    ///
    /// Never propagates errors: the worker loop must survive any single bad
    /// item.
    async fn process(&self, queued: QueuedAction) {
        let QueuedAction { mut item, reply } = queued;
        let execution_id = item.execution_id.clone();
        let started = Instant::now();

        let outcome = self.execute_with_retry(&mut item).await;
        let execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        let result = match outcome {
            Ok(outcome) => ActionRunResult {
                success: outcome.success,
                action_id: execution_id.clone(),
                execution_time_ms,
                error: outcome.error,
                status_code: outcome.status_code,
                response_data: outcome.response_data,
                attempts: item.attempts,
            },
            Err(e) => {
                error!(execution_id = %execution_id, error = %e, "action execution failed");
                ActionRunResult {
                    success: false,
                    action_id: execution_id.clone(),
                    execution_time_ms,
                    error: Some(e.to_string()),
                    status_code: None,
                    response_data: None,
                    attempts: item.attempts,
                }
            }
        };

        debug!(
            execution_id = %execution_id,
            success = result.success,
            attempts = result.attempts,
            "action resolved"
        );
        if let Some(reply) = reply {
            // The receiver may have gone away; fire-and-forget is fine.
            let _ = reply.send(result);
        }
    }

    /// Retry driver: up to `max_retries + 1` attempts with exponential
    /// backoff between them.
    ///
    /// Composite actions delegate out and do not consume extra attempts at
    /// this level - only their leaf actions retry, recursively. Structural
    /// errors short-circuit without retrying.
    async fn execute_with_retry(
        &self,
        item: &mut ActionItem,
    ) -> Result<CallOutcome, ExecuteError> {
        let mut machine = ActionStateMachine::new();
        let mut last_error: Option<String> = None;
        let max_retries = self.config.max_retries;

        for attempt in 0..=max_retries {
            item.attempts += 1;
            if attempt > 0 {
                let backoff = self.retry_backoff(attempt);
                debug!(
                    execution_id = %item.execution_id,
                    attempt = item.attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    "backing off before retry"
                );
                sleep(backoff).await;
            }
            machine.transition(ActionState::Executing)?;

            match &item.action {
                ParsedAction::Delay { delay_seconds } => {
                    // Delays are attempted exactly once and never retried.
                    // from_secs_f64 panics past u64 seconds; clamp absurd
                    // parsed values instead of losing a worker to them.
                    let seconds = delay_seconds.max(0.0).min(MAX_DELAY_SECS);
                    sleep(Duration::from_secs_f64(seconds)).await;
                    machine.transition(ActionState::Success)?;
                    return Ok(CallOutcome::ok());
                }

                ParsedAction::ServiceCall { .. } => {
                    match self.execute_service_call(item).await {
                        Ok(response) if response.is_success() => {
                            machine.transition(ActionState::Success)?;
                            return Ok(CallOutcome::from_response(response));
                        }
                        Ok(response) => {
                            warn!(
                                execution_id = %item.execution_id,
                                status = response.status,
                                attempt = item.attempts,
                                "service call returned failure status"
                            );
                            if attempt < max_retries && item.retry_on_failure {
                                machine.transition(ActionState::Retrying)?;
                                last_error =
                                    Some(format!("service returned status {}", response.status));
                                continue;
                            }
                            machine.transition(ActionState::Failed)?;
                            return Ok(CallOutcome::failed_response(response));
                        }
                        Err(error @ ExecuteError::InvalidAction(_)) => {
                            // Structural: retrying cannot change the outcome.
                            machine.transition(ActionState::Failed)?;
                            return Err(error);
                        }
                        Err(error) => {
                            warn!(
                                execution_id = %item.execution_id,
                                %error,
                                attempt = item.attempts,
                                "service call errored"
                            );
                            if attempt < max_retries && item.retry_on_failure {
                                machine.transition(ActionState::Retrying)?;
                                last_error = Some(error.to_string());
                                continue;
                            }
                            machine.transition(ActionState::Failed)?;
                            return Err(ExecuteError::RetryExhausted {
                                attempts: item.attempts,
                                last_error: error.to_string(),
                            });
                        }
                    }
                }

                ParsedAction::Sequence { actions } => {
                    let outcome = self.run_sequence(item, actions).await;
                    machine.transition(terminal_state(outcome.success))?;
                    return Ok(outcome);
                }

                ParsedAction::Parallel { actions } => {
                    let outcome = self.run_parallel(item, actions).await;
                    machine.transition(terminal_state(outcome.success))?;
                    return Ok(outcome);
                }

                ParsedAction::Repeat { count, actions } => {
                    let outcome = self.run_repeat(item, *count, actions).await;
                    machine.transition(terminal_state(outcome.success))?;
                    return Ok(outcome);
                }

                ParsedAction::Choose { choices } => {
                    let outcome = self.run_choose(item, choices).await;
                    machine.transition(terminal_state(outcome.success))?;
                    return Ok(outcome);
                }
            }
        }

        // Only reachable if a retry path neither returned nor continued.
        machine.transition(ActionState::Failed)?;
        Ok(CallOutcome::failed(
            last_error.unwrap_or_else(|| "retry budget exhausted".to_string()),
        ))
    }

    fn retry_backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        self.config.retry_delay.saturating_mul(1u32 << shift)
    }

    /// Boxed recursion point for composite children.
    fn run_child<'a>(
        &'a self,
        item: &'a mut ActionItem,
    ) -> BoxFuture<'a, Result<CallOutcome, ExecuteError>> {
        Box::pin(self.execute_with_retry(item))
    }

    /// Children run strictly in order; the first failure stops the group.
    async fn run_sequence(&self, parent: &ActionItem, actions: &[ParsedAction]) -> CallOutcome {
        for (index, action) in actions.iter().enumerate() {
            let mut child = parent.child(action.clone());
            debug!(
                parent = %parent.execution_id,
                child = %child.execution_id,
                index,
                "running sequence child"
            );
            match self.run_child(&mut child).await {
                Ok(outcome) if outcome.success => {}
                Ok(outcome) => {
                    return CallOutcome::failed(match outcome.error {
                        Some(error) => format!("sequence child {} failed: {}", index, error),
                        None => format!("sequence child {} failed", index),
                    });
                }
                Err(error) => {
                    return CallOutcome::failed(format!(
                        "sequence child {} failed: {}",
                        index, error
                    ));
                }
            }
        }
        CallOutcome::ok()
    }

    /// All children launched concurrently; every one runs to completion and
    /// every one must succeed.
    async fn run_parallel(&self, parent: &ActionItem, actions: &[ParsedAction]) -> CallOutcome {
        let children = actions.iter().map(|action| {
            let mut child = parent.child(action.clone());
            async move {
                let result = self.run_child(&mut child).await;
                (child.execution_id, result)
            }
        });

        let mut failures = Vec::new();
        for (execution_id, result) in join_all(children).await {
            match result {
                Ok(outcome) if outcome.success => {}
                Ok(outcome) => {
                    failures.push(match outcome.error {
                        Some(error) => format!("{}: {}", execution_id, error),
                        None => execution_id,
                    });
                }
                Err(error) => failures.push(format!("{}: {}", execution_id, error)),
            }
        }

        if failures.is_empty() {
            CallOutcome::ok()
        } else {
            CallOutcome::failed(format!(
                "{} parallel child(ren) failed: {}",
                failures.len(),
                failures.join("; ")
            ))
        }
    }

    /// The child sequence executed `count` times, fail-fast across
    /// iterations.
    async fn run_repeat(
        &self,
        parent: &ActionItem,
        count: u32,
        actions: &[ParsedAction],
    ) -> CallOutcome {
        for iteration in 0..count {
            debug!(
                parent = %parent.execution_id,
                iteration,
                count,
                "running repeat iteration"
            );
            let outcome = self.run_sequence(parent, actions).await;
            if !outcome.success {
                return CallOutcome::failed(match outcome.error {
                    Some(error) => format!("repeat iteration {} failed: {}", iteration, error),
                    None => format!("repeat iteration {} failed", iteration),
                });
            }
        }
        CallOutcome::ok()
    }

    /// The first choice whose conditions all match runs; no matching choice
    /// is a successful no-op.
    async fn run_choose(&self, parent: &ActionItem, choices: &[Choice]) -> CallOutcome {
        for (index, choice) in choices.iter().enumerate() {
            if self.conditions_match(&choice.conditions, &parent.context) {
                debug!(parent = %parent.execution_id, branch = index, "choose branch matched");
                return self.run_sequence(parent, &choice.sequence).await;
            }
        }
        debug!(parent = %parent.execution_id, "no choose branch matched");
        CallOutcome::ok()
    }

    fn conditions_match(&self, conditions: &[Value], context: &Value) -> bool {
        conditions
            .iter()
            .all(|condition| self.condition_matches(condition, context))
    }

    fn condition_matches(&self, condition: &Value, context: &Value) -> bool {
        let kind = condition
            .get("condition")
            .and_then(Value::as_str)
            .unwrap_or_default();
        match kind {
            "template" => {
                let Some(template) = condition.get("value_template").and_then(Value::as_str)
                else {
                    warn!("template condition without value_template");
                    return false;
                };
                let Some(engine) = &self.templates else {
                    warn!("template condition but no template engine configured");
                    return false;
                };
                match engine.render(template, context) {
                    Ok(rendered) => is_truthy(&rendered),
                    Err(error) => {
                        warn!(%error, "condition template failed to render");
                        false
                    }
                }
            }
            other => {
                warn!(condition = other, "unsupported condition kind");
                false
            }
        }
    }

    /// One outbound service invocation. Requires both domain and service;
    /// gateway errors are wrapped for the retry path.
    async fn execute_service_call(
        &self,
        item: &ActionItem,
    ) -> Result<GatewayResponse, ExecuteError> {
        let ParsedAction::ServiceCall {
            domain,
            service,
            target,
            data,
            ..
        } = &item.action
        else {
            return Err(ExecuteError::InvalidAction(
                "item is not a service call".to_string(),
            ));
        };
        if domain.is_empty() || service.is_empty() {
            return Err(ExecuteError::InvalidAction(
                "service call requires both domain and service".to_string(),
            ));
        }

        let body = self.build_service_body(item, target.as_ref(), data.as_ref());
        let path = format!("/api/services/{}/{}", domain, service);
        debug!(
            execution_id = %item.execution_id,
            path = %path,
            attempt = item.attempts,
            "dispatching service call"
        );

        self.gateway
            .request("POST", &path, Some(&body))
            .await
            .map_err(|error| ExecuteError::service_call(&error))
    }

    /// Request body: target fields first (entity_id passed through as-is,
    /// list or scalar), then data merged over them with template rendering
    /// for string values.
    fn build_service_body(
        &self,
        item: &ActionItem,
        target: Option<&Value>,
        data: Option<&Value>,
    ) -> Value {
        let mut body = serde_json::Map::new();
        if let Some(Value::Object(fields)) = target {
            for (key, value) in fields {
                body.insert(key.clone(), value.clone());
            }
        }
        if let Some(Value::Object(fields)) = data {
            for (key, value) in fields {
                body.insert(key.clone(), self.render_value(value, &item.context));
            }
        }
        Value::Object(body)
    }

    /// Render `{{ ... }}` templates in string values; fall back to the raw
    /// string when rendering fails.
    fn render_value(&self, value: &Value, context: &Value) -> Value {
        let Value::String(text) = value else {
            return value.clone();
        };
        if !text.contains("{{") {
            return value.clone();
        }
        let Some(engine) = &self.templates else {
            return value.clone();
        };
        match engine.render(text, context) {
            Ok(rendered) => Value::String(rendered),
            Err(error) => {
                warn!(%error, template = %text, "template rendering failed; using raw value");
                value.clone()
            }
        }
    }
}

fn terminal_state(success: bool) -> ActionState {
    if success {
        ActionState::Success
    } else {
        ActionState::Failed
    }
}

fn is_truthy(rendered: &str) -> bool {
    matches!(
        rendered.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "on" | "1"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hearth_core::error::{GatewayError, TemplateError};
    use hearth_core::parser::parse_automation;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    /// Returns a fixed status for every call and counts them.
    struct StaticGateway {
        status: u16,
        calls: AtomicUsize,
    }

    impl StaticGateway {
        fn new(status: u16) -> Arc<Self> {
            Arc::new(Self {
                status,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ServiceGateway for StaticGateway {
        async fn request(
            &self,
            _method: &str,
            _path: &str,
            _body: Option<&Value>,
        ) -> Result<GatewayResponse, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GatewayResponse::new(self.status))
        }
    }

    /// Per-path status overrides plus a record of call order and bodies.
    struct ScriptedGateway {
        default_status: u16,
        overrides: HashMap<String, u16>,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedGateway {
        fn new(default_status: u16) -> Self {
            Self {
                default_status,
                overrides: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with_status(mut self, path: &str, status: u16) -> Self {
            self.overrides.insert(path.to_string(), status);
            self
        }

        async fn paths(&self) -> Vec<String> {
            self.calls
                .lock()
                .await
                .iter()
                .map(|(path, _)| path.clone())
                .collect()
        }

        async fn bodies(&self) -> Vec<Value> {
            self.calls
                .lock()
                .await
                .iter()
                .map(|(_, body)| body.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ServiceGateway for ScriptedGateway {
        async fn request(
            &self,
            _method: &str,
            path: &str,
            body: Option<&Value>,
        ) -> Result<GatewayResponse, GatewayError> {
            self.calls
                .lock()
                .await
                .push((path.to_string(), body.cloned().unwrap_or(Value::Null)));
            let status = self
                .overrides
                .get(path)
                .copied()
                .unwrap_or(self.default_status);
            Ok(GatewayResponse::new(status))
        }
    }

    /// Always errors at the transport layer.
    struct BrokenGateway {
        calls: AtomicUsize,
    }

    impl BrokenGateway {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ServiceGateway for BrokenGateway {
        async fn request(
            &self,
            _method: &str,
            _path: &str,
            _body: Option<&Value>,
        ) -> Result<GatewayResponse, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(GatewayError::Transport("connection reset".to_string()))
        }
    }

    /// Renders every template to a fixed string.
    struct StaticTemplateEngine(&'static str);

    impl TemplateEngine for StaticTemplateEngine {
        fn render(&self, _template: &str, _context: &Value) -> Result<String, TemplateError> {
            Ok(self.0.to_string())
        }
    }

    struct FailingTemplateEngine;

    impl TemplateEngine for FailingTemplateEngine {
        fn render(&self, _template: &str, _context: &Value) -> Result<String, TemplateError> {
            Err(TemplateError("no state available".to_string()))
        }
    }

    fn fast_config(max_retries: u32) -> ExecutorConfig {
        ExecutorConfig {
            num_workers: 2,
            max_retries,
            retry_delay: Duration::from_millis(10),
        }
    }

    fn service(domain: &str, service: &str) -> ParsedAction {
        ParsedAction::service_call(domain, service)
    }

    #[test]
    fn test_delay_actions_run_once_and_succeed() {
        tokio_test::block_on(async {
            let gateway = StaticGateway::new(200);
            let executor =
                ActionExecutor::new(gateway.clone()).with_config(fast_config(3));
            executor.start().await;

            let handle = executor
                .submit(ParsedAction::delay(0.01), json!({}), true, None)
                .unwrap();
            let result = handle.wait().await.unwrap();

            assert!(result.success);
            assert_eq!(result.attempts, 1);
            assert_eq!(gateway.calls(), 0);
            executor.shutdown().await;
        });
    }

    #[test]
    fn test_failing_service_call_retries_with_backoff() {
        tokio_test::block_on(async {
            let gateway = StaticGateway::new(500);
            let executor =
                ActionExecutor::new(gateway.clone()).with_config(fast_config(3));
            executor.start().await;

            let started = Instant::now();
            let handle = executor
                .submit(service("light", "turn_on"), json!({}), true, None)
                .unwrap();
            let result = handle.wait().await.unwrap();

            assert!(!result.success);
            // Initial attempt plus three retries.
            assert_eq!(result.attempts, 4);
            assert_eq!(gateway.calls(), 4);
            assert_eq!(result.status_code, Some(500));
            // Backoff of 10 + 20 + 40 ms between the four attempts.
            assert!(started.elapsed() >= Duration::from_millis(70));
            executor.shutdown().await;
        });
    }

    #[test]
    fn test_retry_disabled_fails_on_first_attempt() {
        tokio_test::block_on(async {
            let gateway = StaticGateway::new(503);
            let executor =
                ActionExecutor::new(gateway.clone()).with_config(fast_config(3));
            executor.start().await;

            let handle = executor
                .submit(service("light", "turn_on"), json!({}), false, None)
                .unwrap();
            let result = handle.wait().await.unwrap();

            assert!(!result.success);
            assert_eq!(result.attempts, 1);
            assert_eq!(gateway.calls(), 1);
            executor.shutdown().await;
        });
    }

    #[test]
    fn test_transport_errors_exhaust_into_retry_exhausted() {
        tokio_test::block_on(async {
            let gateway = BrokenGateway::new();
            let executor =
                ActionExecutor::new(gateway.clone()).with_config(fast_config(1));
            executor.start().await;

            let handle = executor
                .submit(service("light", "turn_on"), json!({}), true, None)
                .unwrap();
            let result = handle.wait().await.unwrap();

            assert!(!result.success);
            assert_eq!(result.attempts, 2);
            assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
            let error = result.error.unwrap();
            assert!(error.contains("retries exhausted after 2 attempt(s)"));
            assert!(error.contains("connection reset"));
            executor.shutdown().await;
        });
    }

    #[test]
    fn test_missing_service_is_structural_and_never_retried() {
        tokio_test::block_on(async {
            let gateway = StaticGateway::new(200);
            let executor =
                ActionExecutor::new(gateway.clone()).with_config(fast_config(3));
            executor.start().await;

            // "light." parses into an empty service name.
            let action = ParsedAction::ServiceCall {
                action: "light.".to_string(),
                domain: "light".to_string(),
                service: String::new(),
                target: None,
                data: None,
            };
            let handle = executor.submit(action, json!({}), true, None).unwrap();
            let result = handle.wait().await.unwrap();

            assert!(!result.success);
            assert_eq!(result.attempts, 1);
            assert_eq!(gateway.calls(), 0);
            assert!(result.error.unwrap().contains("invalid action"));
            executor.shutdown().await;
        });
    }

    #[test]
    fn test_sequence_is_fail_fast() {
        tokio_test::block_on(async {
            let gateway = Arc::new(
                ScriptedGateway::new(200).with_status("/api/services/svc/two", 500),
            );
            let executor =
                ActionExecutor::new(gateway.clone()).with_config(fast_config(3));
            executor.start().await;

            let sequence = ParsedAction::Sequence {
                actions: vec![service("svc", "one"), service("svc", "two"), service("svc", "three")],
            };
            let handle = executor.submit(sequence, json!({}), false, None).unwrap();
            let result = handle.wait().await.unwrap();

            assert!(!result.success);
            assert_eq!(
                gateway.paths().await,
                vec!["/api/services/svc/one", "/api/services/svc/two"]
            );
            executor.shutdown().await;
        });
    }

    #[test]
    fn test_parallel_runs_all_children_and_fails_as_a_group() {
        tokio_test::block_on(async {
            let gateway = Arc::new(
                ScriptedGateway::new(200).with_status("/api/services/svc/two", 500),
            );
            let executor =
                ActionExecutor::new(gateway.clone()).with_config(fast_config(3));
            executor.start().await;

            let parallel = ParsedAction::Parallel {
                actions: vec![service("svc", "one"), service("svc", "two"), service("svc", "three")],
            };
            let handle = executor.submit(parallel, json!({}), false, None).unwrap();
            let result = handle.wait().await.unwrap();

            assert!(!result.success);
            // No sibling is cancelled early: all three were attempted.
            let mut paths = gateway.paths().await;
            paths.sort();
            assert_eq!(
                paths,
                vec![
                    "/api/services/svc/one",
                    "/api/services/svc/three",
                    "/api/services/svc/two"
                ]
            );
            executor.shutdown().await;
        });
    }

    #[test]
    fn test_repeat_runs_its_sequence_count_times() {
        tokio_test::block_on(async {
            let gateway = StaticGateway::new(200);
            let executor =
                ActionExecutor::new(gateway.clone()).with_config(fast_config(0));
            executor.start().await;

            let repeat = ParsedAction::Repeat {
                count: 3,
                actions: vec![service("light", "toggle")],
            };
            let handle = executor.submit(repeat, json!({}), true, None).unwrap();
            let result = handle.wait().await.unwrap();

            assert!(result.success);
            assert_eq!(gateway.calls(), 3);
            executor.shutdown().await;
        });
    }

    #[test]
    fn test_choose_runs_first_matching_branch() {
        tokio_test::block_on(async {
            let gateway = Arc::new(ScriptedGateway::new(200));
            let executor = ActionExecutor::new(gateway.clone())
                .with_config(fast_config(0))
                .with_template_engine(Arc::new(StaticTemplateEngine("true")));
            executor.start().await;

            let choose = ParsedAction::Choose {
                choices: vec![
                    Choice {
                        conditions: vec![json!({
                            "condition": "template",
                            "value_template": "{{ is_home }}"
                        })],
                        sequence: vec![service("light", "turn_on")],
                    },
                    Choice {
                        conditions: Vec::new(),
                        sequence: vec![service("light", "turn_off")],
                    },
                ],
            };
            let handle = executor.submit(choose, json!({}), true, None).unwrap();
            let result = handle.wait().await.unwrap();

            assert!(result.success);
            assert_eq!(gateway.paths().await, vec!["/api/services/light/turn_on"]);
            executor.shutdown().await;
        });
    }

    #[test]
    fn test_choose_without_match_is_a_noop() {
        tokio_test::block_on(async {
            let gateway = StaticGateway::new(200);
            let executor = ActionExecutor::new(gateway.clone())
                .with_config(fast_config(0))
                .with_template_engine(Arc::new(StaticTemplateEngine("false")));
            executor.start().await;

            let choose = ParsedAction::Choose {
                choices: vec![Choice {
                    conditions: vec![json!({
                        "condition": "template",
                        "value_template": "{{ is_home }}"
                    })],
                    sequence: vec![service("light", "turn_on")],
                }],
            };
            let handle = executor.submit(choose, json!({}), true, None).unwrap();
            let result = handle.wait().await.unwrap();

            assert!(result.success);
            assert_eq!(gateway.calls(), 0);
            executor.shutdown().await;
        });
    }

    #[test]
    fn test_service_body_merges_target_and_renders_data() {
        tokio_test::block_on(async {
            let gateway = Arc::new(ScriptedGateway::new(200));
            let executor = ActionExecutor::new(gateway.clone())
                .with_config(fast_config(0))
                .with_template_engine(Arc::new(StaticTemplateEngine("rendered")));
            executor.start().await;

            let action = service("light", "turn_on")
                .with_target(json!({"entity_id": ["light.a", "light.b"]}))
                .with_data(json!({
                    "brightness": 128,
                    "profile": "{{ profile }}",
                    "transition": "2"
                }));
            let handle = executor
                .submit(action, json!({"profile": "evening"}), true, None)
                .unwrap();
            handle.wait().await.unwrap();

            let bodies = gateway.bodies().await;
            assert_eq!(
                bodies[0],
                json!({
                    "entity_id": ["light.a", "light.b"],
                    "brightness": 128,
                    "profile": "rendered",
                    "transition": "2"
                })
            );
            executor.shutdown().await;
        });
    }

    #[test]
    fn test_template_failure_falls_back_to_raw_string() {
        tokio_test::block_on(async {
            let gateway = Arc::new(ScriptedGateway::new(200));
            let executor = ActionExecutor::new(gateway.clone())
                .with_config(fast_config(0))
                .with_template_engine(Arc::new(FailingTemplateEngine));
            executor.start().await;

            let action = service("notify", "mobile")
                .with_data(json!({"message": "{{ greeting }}"}));
            let handle = executor.submit(action, json!({}), true, None).unwrap();
            let result = handle.wait().await.unwrap();

            assert!(result.success);
            let bodies = gateway.bodies().await;
            assert_eq!(bodies[0], json!({"message": "{{ greeting }}"}));
            executor.shutdown().await;
        });
    }

    #[test]
    fn test_execute_actions_end_to_end() {
        tokio_test::block_on(async {
            let gateway = StaticGateway::new(200);
            let executor =
                ActionExecutor::new(gateway.clone()).with_config(fast_config(3));

            let automation = json!({
                "actions": [
                    {"delay": 0.01},
                    {"action": "light.turn_on", "target": {"entity_id": "light.kitchen"}},
                ]
            });
            let actions = parse_automation(&automation);
            assert_eq!(actions.len(), 2);

            let summary = executor.execute_actions(actions, json!({})).await;
            assert_eq!(summary.total_actions, 2);
            assert_eq!(summary.successful, 2);
            assert_eq!(summary.failed, 0);
            assert!(summary.errors.is_empty());
            assert_eq!(summary.results.len(), 2);
            // The fix for the old double-execution defect: the gateway saw
            // the service call exactly once.
            assert_eq!(gateway.calls(), 1);
            assert!(summary.total_time_ms > 0.0);
            executor.shutdown().await;
        });
    }

    #[test]
    fn test_execute_actions_records_failures_in_summary() {
        tokio_test::block_on(async {
            let gateway = BrokenGateway::new();
            let executor =
                ActionExecutor::new(gateway.clone()).with_config(fast_config(0));

            let summary = executor
                .execute_actions(vec![service("light", "turn_on")], json!({}))
                .await;
            assert_eq!(summary.total_actions, 1);
            assert_eq!(summary.successful, 0);
            assert_eq!(summary.failed, 1);
            assert_eq!(summary.errors.len(), 1);
            assert!(summary.errors[0].contains("retries exhausted"));
            executor.shutdown().await;
        });
    }

    #[test]
    fn test_shutdown_drains_queued_work() {
        tokio_test::block_on(async {
            let gateway = StaticGateway::new(200);
            let executor =
                ActionExecutor::new(gateway.clone()).with_config(fast_config(0));
            executor.start().await;

            for _ in 0..3 {
                executor
                    .queue_action(service("light", "toggle"), json!({}), true, None)
                    .unwrap();
            }
            executor.shutdown().await;

            assert_eq!(gateway.calls(), 3);
        });
    }

    #[test]
    fn test_enqueue_after_shutdown_is_rejected() {
        tokio_test::block_on(async {
            let gateway = StaticGateway::new(200);
            let executor =
                ActionExecutor::new(gateway.clone()).with_config(fast_config(0));
            executor.start().await;
            executor.shutdown().await;

            let error = executor
                .queue_action(service("light", "toggle"), json!({}), true, None)
                .unwrap_err();
            assert!(matches!(error, ExecuteError::Closed));
            assert!(!executor.is_running());
        });
    }

    #[test]
    fn test_queue_action_returns_caller_supplied_id() {
        tokio_test::block_on(async {
            let gateway = StaticGateway::new(200);
            let executor =
                ActionExecutor::new(gateway.clone()).with_config(fast_config(0));
            executor.start().await;

            let id = executor
                .queue_action(
                    service("light", "toggle"),
                    json!({}),
                    true,
                    Some("my-id".to_string()),
                )
                .unwrap();
            assert_eq!(id, "my-id");
            executor.shutdown().await;
        });
    }

    #[test]
    fn test_executor_config_bridges_from_settings() {
        let settings = ExecutorSettings {
            num_workers: 0,
            max_retries: 5,
            retry_delay_secs: 0.5,
        };
        let config = ExecutorConfig::from(&settings);
        // A zero-sized pool would never drain the queue.
        assert_eq!(config.num_workers, 1);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_nested_composites_execute_recursively() {
        tokio_test::block_on(async {
            let gateway = Arc::new(ScriptedGateway::new(200));
            let executor =
                ActionExecutor::new(gateway.clone()).with_config(fast_config(0));
            executor.start().await;

            let tree = ParsedAction::Sequence {
                actions: vec![
                    ParsedAction::Parallel {
                        actions: vec![service("svc", "a"), service("svc", "b")],
                    },
                    service("svc", "c"),
                ],
            };
            let handle = executor.submit(tree, json!({}), true, None).unwrap();
            let result = handle.wait().await.unwrap();

            assert!(result.success);
            let paths = gateway.paths().await;
            assert_eq!(paths.len(), 3);
            // The sequential tail runs only after the parallel group.
            assert_eq!(paths[2], "/api/services/svc/c");
            executor.shutdown().await;
        });
    }
}
