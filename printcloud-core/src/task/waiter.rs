//! The polling loop.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{InitialResponse, PollOutcome, TaskError, TaskHandle, TaskPoller};
use crate::config::{MIN_POLL_INTERVAL, TaskConfig};
use crate::transport::ApiResponse;

/// Called with the task's progress fraction after each running poll that reports one.
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Poll pacing for one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// Delay between polls. Values below 10ms are raised to 10ms.
    pub poll_interval: Duration,

    /// Give up once this much time has passed since the first poll.
    pub timeout: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self::from(&TaskConfig::default())
    }
}

impl From<&TaskConfig> for WaitOptions {
    fn from(config: &TaskConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            timeout: config.timeout(),
        }
    }
}

impl WaitOptions {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    /// The interval actually slept between polls.
    pub fn effective_interval(&self) -> Duration {
        self.poll_interval.max(MIN_POLL_INTERVAL)
    }
}

/// Turns a possibly-deferred response into a single awaited result.
///
/// Polls for one task are strictly sequential. Waiters for different tasks
/// are independent and may run concurrently.
///
/// # Example
///
/// ```rust,ignore
/// let waiter = TaskWaiter::new(client.clone(), WaitOptions::default())
///     .with_progress(Arc::new(|p| println!("{:.0}%", p * 100.0)));
/// let result = waiter.wait(response).await?;
/// ```
pub struct TaskWaiter<P: TaskPoller> {
    poller: P,
    options: WaitOptions,
    on_progress: Option<ProgressCallback>,
    cancel: CancellationToken,
}

impl<P: TaskPoller> TaskWaiter<P> {
    pub fn new(poller: P, options: WaitOptions) -> Self {
        Self {
            poller,
            options,
            on_progress: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Report progress through `callback`.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// A token that cancels this waiter when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop polling. Any pending or later `wait` fails with [`TaskError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn options(&self) -> &WaitOptions {
        &self.options
    }

    /// Resolve `initial` to a final result, polling if the server deferred it.
    pub async fn wait(&self, initial: ApiResponse) -> Result<Value, TaskError> {
        match InitialResponse::classify(initial)? {
            InitialResponse::Immediate(body) => Ok(body),
            InitialResponse::Accepted { task_id } => self.wait_for(task_id).await,
        }
    }

    /// Poll an already-known task until it finishes.
    ///
    /// The timeout is a wall-clock deadline from the first poll. It also cuts
    /// short a poll that is still in flight; the response is then ignored.
    pub async fn wait_for(&self, task_id: impl Into<String>) -> Result<Value, TaskError> {
        let mut handle = TaskHandle::new(task_id);
        let interval = self.options.effective_interval();
        let started = Instant::now();
        let deadline = started.checked_add(self.options.timeout);

        loop {
            if started.elapsed() > self.options.timeout {
                return Err(timed_out(&handle, started));
            }

            tracing::debug!("Polling task {} (poll {})", handle.task_id, handle.polls + 1);

            let body = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TaskError::Cancelled),
                body = self.poller.poll(&handle.task_id) => body?,
                _ = expire(deadline) => return Err(timed_out(&handle, started)),
            };

            if self.cancel.is_cancelled() {
                return Err(TaskError::Cancelled);
            }

            match handle.apply(body)? {
                PollOutcome::Done(result) => {
                    tracing::debug!("Task {} done after {} polls", handle.task_id, handle.polls);
                    return Ok(result);
                }
                PollOutcome::Failed(payload) => {
                    tracing::debug!("Task {} failed: {}", handle.task_id, payload);
                    return Err(TaskError::Failed { payload });
                }
                PollOutcome::Running { progress } => {
                    if let (Some(progress), Some(callback)) = (progress, &self.on_progress) {
                        callback(progress);
                    }
                }
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TaskError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
                _ = expire(deadline) => return Err(timed_out(&handle, started)),
            }
        }
    }
}

/// Resolves at `deadline`, or never when the timeout does not fit in an [`Instant`].
async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn timed_out(handle: &TaskHandle, started: Instant) -> TaskError {
    let elapsed = started.elapsed();
    tracing::warn!(
        "Giving up on task {} after {} polls ({:?})",
        handle.task_id,
        handle.polls,
        elapsed
    );
    TaskError::Timeout {
        task_id: handle.task_id.clone(),
        elapsed,
    }
}
