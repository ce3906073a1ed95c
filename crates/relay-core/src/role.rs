use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::error::InvokeError;
use crate::invoker::{collect_stream, InvokeRequest, ModelInvoker, ModelResponse, ROLE_TIER};
use crate::master::RoleDefinition;
use crate::task::TaskRequest;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoleStatus {
    Completed,
    Failed,
}

/// Why a role failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ModelInvocation,
    Timeout,
    StructuredOutput,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&InvokeError> for RoleError {
    fn from(e: &InvokeError) -> Self {
        let kind = match e {
            InvokeError::Model(_) => ErrorKind::ModelInvocation,
            InvokeError::StructuredOutput(_) => ErrorKind::StructuredOutput,
        };
        Self {
            kind,
            message: e.to_string(),
        }
    }
}

/// Terminal state of one role. Exactly one is produced per role definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleResult {
    /// Position of the role in the master's list.
    pub ordinal: usize,
    pub role_name: String,
    pub status: RoleStatus,
    pub output: Option<String>,
    pub error: Option<RoleError>,
    pub elapsed_ms: u64,
}

impl RoleResult {
    fn completed(ordinal: usize, role_name: &str, output: String, elapsed_ms: u64) -> Self {
        Self {
            ordinal,
            role_name: role_name.to_string(),
            status: RoleStatus::Completed,
            output: Some(output),
            error: None,
            elapsed_ms,
        }
    }

    fn failed(ordinal: usize, role_name: &str, error: RoleError, elapsed_ms: u64) -> Self {
        Self {
            ordinal,
            role_name: role_name.to_string(),
            status: RoleStatus::Failed,
            output: None,
            error: Some(error),
            elapsed_ms,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RoleStatus::Completed
    }
}

/// Ephemeral context for one role: built, run once, dropped.
struct RoleExecution {
    ordinal: usize,
    role: RoleDefinition,
    task_id: String,
    task_description: String,
}

impl RoleExecution {
    fn new(ordinal: usize, role: &RoleDefinition, task: &TaskRequest) -> Self {
        Self {
            ordinal,
            role: role.clone(),
            task_id: task.id.clone(),
            task_description: task.description.clone(),
        }
    }

    async fn run(self, invoker: &dyn ModelInvoker, timeout: Duration, streaming: bool) -> RoleResult {
        info!(
            "Task {} role #{} ({}) started",
            self.task_id, self.ordinal, self.role.role_name
        );

        // The role's description is its whole system prompt; the user turn
        // is the untouched task.
        let request = InvokeRequest::new(
            ROLE_TIER,
            self.role.role_description.clone(),
            self.task_description.clone(),
        );

        let started = Instant::now();
        let call = async {
            if streaming {
                let chunks = invoker.invoke_stream(request).await?;
                collect_stream(chunks, None).await
            } else {
                invoker.invoke(request).await
            }
        };
        let outcome: Result<Result<ModelResponse, InvokeError>, _> =
            tokio::time::timeout(timeout, call).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(response)) => {
                info!(
                    "Task {} role #{} ({}) completed: {} chars in {elapsed_ms}ms",
                    self.task_id,
                    self.ordinal,
                    self.role.role_name,
                    response.content.len()
                );
                if let Some(reasoning) = &response.reasoning {
                    debug!("Role #{} reasoning: {reasoning}", self.ordinal);
                }
                RoleResult::completed(
                    self.ordinal,
                    &self.role.role_name,
                    response.content,
                    elapsed_ms,
                )
            }
            Ok(Err(e)) => {
                warn!(
                    "Task {} role #{} ({}) failed: {e}",
                    self.task_id, self.ordinal, self.role.role_name
                );
                RoleResult::failed(self.ordinal, &self.role.role_name, (&e).into(), elapsed_ms)
            }
            Err(_) => {
                warn!(
                    "Task {} role #{} ({}) timed out after {:.1}s",
                    self.task_id,
                    self.ordinal,
                    self.role.role_name,
                    timeout.as_secs_f64()
                );
                RoleResult::failed(
                    self.ordinal,
                    &self.role.role_name,
                    RoleError {
                        kind: ErrorKind::Timeout,
                        message: format!("timed out after {:.1}s", timeout.as_secs_f64()),
                    },
                    elapsed_ms,
                )
            }
        }
    }
}

/// Aborts spawned role tasks when dropped, so cancelling `execute_all`
/// leaves nothing running. Aborting a finished task is a no-op.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Runs role sub-agents. Never fails: every problem becomes a failed result.
#[derive(Clone)]
pub struct RoleExecutor {
    invoker: Arc<dyn ModelInvoker>,
    timeout: Duration,
    max_concurrent: usize,
    streaming: bool,
}

impl RoleExecutor {
    pub fn new(invoker: Arc<dyn ModelInvoker>, timeout: Duration) -> Self {
        Self {
            invoker,
            timeout,
            max_concurrent: 4,
            streaming: false,
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Run a single role against the task.
    pub async fn execute(
        &self,
        ordinal: usize,
        role: &RoleDefinition,
        task: &TaskRequest,
    ) -> RoleResult {
        RoleExecution::new(ordinal, role, task)
            .run(self.invoker.as_ref(), self.timeout, self.streaming)
            .await
    }

    /// Run every role, at most `max_concurrent` at a time.
    ///
    /// The returned vector is index-aligned with `roles` whatever order the
    /// roles finish in, and only returns once all of them are terminal.
    pub async fn execute_all(&self, roles: &[RoleDefinition], task: &TaskRequest) -> Vec<RoleResult> {
        if roles.is_empty() {
            return Vec::new();
        }

        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let handles: Vec<JoinHandle<RoleResult>> = roles
            .iter()
            .enumerate()
            .map(|(ordinal, role)| {
                let execution = RoleExecution::new(ordinal, role, task);
                let invoker = self.invoker.clone();
                let permits = permits.clone();
                let timeout = self.timeout;
                let streaming = self.streaming;
                tokio::spawn(async move {
                    // The semaphore is never closed, so acquire only fails if it were.
                    let _permit = permits.acquire_owned().await.ok();
                    execution.run(invoker.as_ref(), timeout, streaming).await
                })
            })
            .collect();
        let _guard = AbortOnDrop(handles.iter().map(JoinHandle::abort_handle).collect());

        let mut results = Vec::with_capacity(roles.len());
        for (ordinal, handle) in handles.into_iter().enumerate() {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!("Task {} role #{ordinal} aborted: {e}", task.id);
                    RoleResult::failed(
                        ordinal,
                        &roles[ordinal].role_name,
                        RoleError {
                            kind: ErrorKind::ModelInvocation,
                            message: format!("role task aborted: {e}"),
                        },
                        0,
                    )
                }
            };
            results.push(result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Reply, ScriptedInvoker};

    fn task() -> TaskRequest {
        TaskRequest::new("Design a login page", "test").unwrap()
    }

    fn role(name: &str, desc: &str) -> RoleDefinition {
        RoleDefinition {
            role_name: name.into(),
            role_description: desc.into(),
        }
    }

    #[tokio::test]
    async fn role_prompt_is_exactly_the_description() {
        let invoker = Arc::new(
            ScriptedInvoker::new().on_system("You are a UX designer.", Reply::Text("mockups".into())),
        );
        let executor = RoleExecutor::new(invoker.clone(), Duration::from_secs(5));
        let result = executor
            .execute(0, &role("UX", "You are a UX designer."), &task())
            .await;

        assert_eq!(result.status, RoleStatus::Completed);
        assert_eq!(result.output.as_deref(), Some("mockups"));
        let calls = invoker.calls();
        assert_eq!(calls[0].system_prompt(), "You are a UX designer.");
        assert_eq!(calls[0].messages.last().unwrap().content, "Design a login page");
        assert!(calls[0].schema.is_none());
    }

    #[tokio::test]
    async fn model_error_becomes_failed_result() {
        let invoker = Arc::new(ScriptedInvoker::new().on_system("boom", Reply::Fail("500".into())));
        let executor = RoleExecutor::new(invoker, Duration::from_secs(5));
        let result = executor.execute(3, &role("X", "boom"), &task()).await;

        assert_eq!(result.ordinal, 3);
        assert_eq!(result.status, RoleStatus::Failed);
        assert!(result.output.is_none());
        assert_eq!(result.error.unwrap().kind, ErrorKind::ModelInvocation);
    }

    #[tokio::test]
    async fn one_failure_does_not_affect_siblings() {
        let invoker = Arc::new(
            ScriptedInvoker::new()
                .on_system("second", Reply::Fail("bad gateway".into()))
                .on_system("first", Reply::Text("one".into()))
                .on_system("third", Reply::Text("three".into())),
        );
        let executor = RoleExecutor::new(invoker, Duration::from_secs(5));
        let roles = vec![role("A", "first"), role("B", "second"), role("C", "third")];
        let results = executor.execute_all(&roles, &task()).await;

        assert_eq!(results.len(), 3);
        let statuses: Vec<RoleStatus> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![RoleStatus::Completed, RoleStatus::Failed, RoleStatus::Completed]
        );
        assert_eq!(results[2].output.as_deref(), Some("three"));
    }

    #[tokio::test]
    async fn results_are_index_aligned_regardless_of_completion_order() {
        let invoker = Arc::new(
            ScriptedInvoker::new()
                .on_system("slow", Reply::Delayed(Duration::from_millis(80), "slow done".into()))
                .on_system("fast", Reply::Text("fast done".into())),
        );
        let executor = RoleExecutor::new(invoker, Duration::from_secs(5)).with_max_concurrent(4);
        let roles = vec![role("Slow", "slow"), role("Fast", "fast"), role("Fast", "fast")];
        let results = executor.execute_all(&roles, &task()).await;

        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.ordinal, i);
            assert_eq!(r.role_name, roles[i].role_name);
        }
        assert_eq!(results[0].output.as_deref(), Some("slow done"));
        assert_eq!(results[1].output.as_deref(), Some("fast done"));
    }

    #[tokio::test]
    async fn expired_role_is_reported_as_timeout() {
        let invoker = Arc::new(
            ScriptedInvoker::new()
                .on_system("stuck", Reply::Delayed(Duration::from_secs(30), "never".into()))
                .on_system("quick", Reply::Text("ok".into())),
        );
        let executor = RoleExecutor::new(invoker, Duration::from_millis(50));
        let roles = vec![role("Stuck", "stuck"), role("Quick", "quick")];
        let results = executor.execute_all(&roles, &task()).await;

        assert_eq!(results[0].status, RoleStatus::Failed);
        assert_eq!(results[0].error.as_ref().unwrap().kind, ErrorKind::Timeout);
        assert_eq!(results[1].status, RoleStatus::Completed);
    }

    #[tokio::test]
    async fn panicking_role_is_isolated() {
        let invoker = Arc::new(
            ScriptedInvoker::new()
                .on_system("explode", Reply::Panic)
                .on_system("calm", Reply::Text("fine".into())),
        );
        let executor = RoleExecutor::new(invoker, Duration::from_secs(5));
        let roles = vec![role("Calm", "calm"), role("Bomb", "explode")];
        let results = executor.execute_all(&roles, &task()).await;

        assert_eq!(results.len(), 2);
        assert!(results[0].is_completed());
        assert_eq!(results[1].status, RoleStatus::Failed);
        assert_eq!(results[1].role_name, "Bomb");
    }

    #[tokio::test]
    async fn streaming_output_matches_full_output() {
        let text = "A fairly long answer that spans several chunks.";
        let invoker = Arc::new(ScriptedInvoker::new().on_system("writer", Reply::Text(text.into())));
        let executor = RoleExecutor::new(invoker.clone(), Duration::from_secs(5)).with_streaming(true);
        let result = executor.execute(0, &role("Writer", "writer"), &task()).await;

        assert_eq!(invoker.stream_calls(), 1);
        assert_eq!(result.output.as_deref(), Some(text));
    }

    #[tokio::test]
    async fn cancelling_execute_all_stops_running_roles() {
        let invoker = Arc::new(
            ScriptedInvoker::new()
                .on_system("slow", Reply::Delayed(Duration::from_millis(100), "late".into())),
        );
        let executor = RoleExecutor::new(invoker.clone(), Duration::from_secs(5));
        let roles = vec![role("A", "slow"), role("B", "slow")];

        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), executor.execute_all(&roles, &task()))
                .await;
        assert!(cancelled.is_err());
        assert_eq!(invoker.calls().len(), 2);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(invoker.completed_replies(), 0);
    }

    #[tokio::test]
    async fn no_roles_means_no_calls() {
        let invoker = Arc::new(ScriptedInvoker::new());
        let executor = RoleExecutor::new(invoker.clone(), Duration::from_secs(5));
        assert!(executor.execute_all(&[], &task()).await.is_empty());
        assert!(invoker.calls().is_empty());
    }
}
