//! Long-running server operations.
//!
//! Some endpoints answer `202 Accepted` with a task id instead of a result.
//! [`TaskWaiter`] polls the task's status endpoint until it reports `done`
//! or `error`, or until a timeout elapses.
//!
//! # Payload Schema
//!
//! The initial response is accepted when its HTTP status is 202; its body
//! carries `task_id` (or `id`). Every poll body is read from the top level:
//!
//! ```json
//! { "status": "running", "progress": 0.4, "result": null, "error": null }
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::auth::AuthError;
use crate::transport::{ApiResponse, TransportError};

mod waiter;

pub use waiter::{ProgressCallback, TaskWaiter, WaitOptions};

/// Error type for waiting on a task.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The server reported the task as failed; `payload` is its error value verbatim.
    #[error("task failed: {payload}")]
    Failed { payload: Value },

    /// The task did not finish before the client gave up. It may still finish server-side.
    #[error("task {task_id} did not finish within {elapsed:?}")]
    Timeout { task_id: String, elapsed: Duration },

    /// The wait was cancelled.
    #[error("wait cancelled")]
    Cancelled,

    /// A poll request failed.
    #[error("network error: {0}")]
    Network(#[from] TransportError),

    /// No credential could be obtained for a poll.
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// A response did not follow the task schema.
    #[error("invalid task response: {message}")]
    InvalidResponse { message: String },
}

impl TaskError {
    /// HTTP status of the underlying failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            TaskError::Network(e) => e.status(),
            TaskError::Auth(e) => e.status(),
            _ => None,
        }
    }

    /// The server's error text when the task failed with a string payload.
    pub fn failure_message(&self) -> Option<&str> {
        match self {
            TaskError::Failed { payload } => payload.as_str(),
            _ => None,
        }
    }
}

/// Server-reported task status. Matching is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Done,
    Error,
    /// Any other value; the task is treated as still running.
    Other(String),
}

impl TaskStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "running" => TaskStatus::Running,
            "done" => TaskStatus::Done,
            "error" => TaskStatus::Error,
            other => TaskStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Running => f.write_str("running"),
            TaskStatus::Done => f.write_str("done"),
            TaskStatus::Error => f.write_str("error"),
            TaskStatus::Other(raw) => f.write_str(raw),
        }
    }
}

/// What an operation-initiating call returned.
#[derive(Debug, Clone, PartialEq)]
pub enum InitialResponse {
    /// The operation finished synchronously with this body.
    Immediate(Value),

    /// The operation is running server-side under this task id.
    Accepted { task_id: String },
}

impl InitialResponse {
    pub fn classify(response: ApiResponse) -> Result<Self, TaskError> {
        if response.status != 202 {
            return Ok(InitialResponse::Immediate(response.body));
        }

        let task_id = ["task_id", "id"]
            .iter()
            .find_map(|field| match response.body.get(field) {
                Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
                Some(Value::Number(id)) => Some(id.to_string()),
                _ => None,
            })
            .ok_or_else(|| TaskError::InvalidResponse {
                message: "202 response carries no task_id".to_string(),
            })?;

        Ok(InitialResponse::Accepted { task_id })
    }
}

/// One poll body, as read from the status endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    pub status: TaskStatus,
    pub progress: Option<f64>,
    pub result: Option<Value>,
    pub error: Option<Value>,
}

impl TaskSnapshot {
    pub fn from_body(body: &Value) -> Result<Self, TaskError> {
        let object = body.as_object().ok_or_else(|| TaskError::InvalidResponse {
            message: format!("expected a JSON object, got {}", body),
        })?;

        let status = object
            .get("status")
            .and_then(Value::as_str)
            .map(TaskStatus::parse)
            .ok_or_else(|| TaskError::InvalidResponse {
                message: "task response has no status".to_string(),
            })?;

        let progress = object.get("progress").and_then(|p| match p {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        });

        let present = |field: &str| object.get(field).filter(|v| !v.is_null()).cloned();

        Ok(Self {
            status,
            progress,
            result: present("result"),
            error: present("error"),
        })
    }
}

/// Outcome of applying a poll to a [`TaskHandle`].
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Still running; `progress` is set when the poll reported one.
    Running { progress: Option<f64> },
    Done(Value),
    Failed(Value),
}

/// Client-side view of a running task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskHandle {
    pub task_id: String,
    pub status: TaskStatus,
    /// Fraction complete in `[0, 1]`; never decreases.
    pub progress: f64,
    pub result: Option<Value>,
    pub error: Option<Value>,
    pub polls: u32,
}

impl TaskHandle {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Running,
            progress: 0.0,
            result: None,
            error: None,
            polls: 0,
        }
    }

    /// Fold one poll body into the handle.
    pub fn apply(&mut self, body: Value) -> Result<PollOutcome, TaskError> {
        let snapshot = TaskSnapshot::from_body(&body)?;
        self.polls += 1;
        self.status = snapshot.status.clone();

        if let Some(reported) = snapshot.progress {
            self.progress = self.progress.max(reported.clamp(0.0, 1.0));
        }

        match snapshot.status {
            TaskStatus::Error => {
                let payload = snapshot.error.unwrap_or(body);
                self.error = Some(payload.clone());
                Ok(PollOutcome::Failed(payload))
            }
            TaskStatus::Done => Ok(self.finish(snapshot.result, body)),
            _ if self.progress >= 1.0 => Ok(self.finish(snapshot.result, body)),
            TaskStatus::Other(ref raw) => {
                tracing::warn!("Task {} reported unknown status {:?}, still polling", self.task_id, raw);
                Ok(PollOutcome::Running {
                    progress: snapshot.progress.map(|_| self.progress),
                })
            }
            TaskStatus::Running => Ok(PollOutcome::Running {
                progress: snapshot.progress.map(|_| self.progress),
            }),
        }
    }

    fn finish(&mut self, result: Option<Value>, body: Value) -> PollOutcome {
        let result = result.unwrap_or(body);
        self.status = TaskStatus::Done;
        self.result = Some(result.clone());
        PollOutcome::Done(result)
    }
}

/// Fetches the current status body of a task.
#[async_trait]
pub trait TaskPoller: Send + Sync {
    async fn poll(&self, task_id: &str) -> Result<Value, TaskError>;
}

#[async_trait]
impl<P: TaskPoller + ?Sized> TaskPoller for Arc<P> {
    async fn poll(&self, task_id: &str) -> Result<Value, TaskError> {
        (**self).poll(task_id).await
    }
}
