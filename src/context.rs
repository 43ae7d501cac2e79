//! Per-invocation context and the scoped background-task collector.

use crate::error::BoxError;
use crate::invocation::Invocation;
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Per-invocation value handed to the handler.
///
/// Carries the invocation metadata, the absolute deadline, a tracing span
/// scoped to the invocation, and a handle to the background-task scope. The
/// context is constructed by the runtime driver and must not outlive the
/// invocation: the driver drains the task scope after the handler returns
/// and drops the context before reporting.
#[derive(Clone)]
pub struct Context {
    /// Unique identifier assigned by the platform.
    pub request_id: String,

    /// Absolute wall-clock deadline for this invocation.
    pub deadline: DateTime<Utc>,

    /// ARN of the function being invoked.
    pub invoked_function_arn: String,

    /// Raw X-Ray trace header value, verbatim from the platform.
    pub trace_id: String,

    /// Cognito identity (mobile SDK), when present.
    pub cognito_identity: Option<String>,

    /// Client context (mobile SDK), when present.
    pub client_context: Option<String>,

    span: tracing::Span,
    tasks: Arc<TaskScope>,
}

impl Context {
    pub(crate) fn new(invocation: Invocation, tasks: Arc<TaskScope>) -> Self {
        let span = tracing::info_span!("invocation", request_id = %invocation.request_id);
        Self {
            request_id: invocation.request_id,
            deadline: invocation.deadline,
            invoked_function_arn: invocation.invoked_function_arn,
            trace_id: invocation.trace_id,
            cognito_identity: invocation.cognito_identity,
            client_context: invocation.client_context,
            span,
            tasks,
        }
    }

    /// Time left until the platform will forcibly terminate the invocation.
    ///
    /// Zero when the deadline has already passed.
    pub fn remaining_time(&self) -> Duration {
        (self.deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }

    /// The tracing span scoped to this invocation.
    ///
    /// The runtime enters it for the duration of the handler call; handlers
    /// may attach further fields or child spans to it.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Spawns fire-and-forget async work scoped to this invocation.
    ///
    /// The task starts immediately. The runtime waits for every task added
    /// here to finish before the invocation is reported; failures are
    /// logged and do not fail the invocation.
    pub fn add_background_task<F>(&self, task: F)
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.tasks.spawn(task);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("request_id", &self.request_id)
            .field("deadline", &self.deadline)
            .field("invoked_function_arn", &self.invoked_function_arn)
            .field("trace_id", &self.trace_id)
            .finish_non_exhaustive()
    }
}

/// Background-task scope for one invocation.
///
/// Lives in the driver's per-invocation stack frame; the context holds a
/// shared handle for spawning. Draining joins every outstanding task,
/// including tasks spawned by other tasks while the drain is in progress.
#[derive(Default)]
pub(crate) struct TaskScope {
    handles: Mutex<Vec<JoinHandle<Result<(), BoxError>>>>,
}

impl TaskScope {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.lock().push(tokio::spawn(task));
    }

    /// Joins all outstanding tasks, logging failures.
    pub(crate) async fn drain(&self) {
        loop {
            let batch = std::mem::take(&mut *self.lock());
            if batch.is_empty() {
                return;
            }
            for handle in batch {
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => {
                        tracing::warn!(%error, "background task failed");
                    }
                    Err(join_error) => {
                        tracing::warn!(error = %join_error, "background task panicked");
                    }
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<Result<(), BoxError>>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
