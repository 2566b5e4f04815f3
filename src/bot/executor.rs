//! Runs one task through the check routine.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::context::{BotLog, TaskContext};
use super::result::{CheckResult, Status};
use super::{CheckRoutine, Task};
use crate::data::WorkItem;
use crate::error::{CheckError, HttpError};
use crate::http::{HttpSettings, Proxy};

/// How a task ended.
#[derive(Debug)]
pub enum TaskOutcome {
    /// The routine produced a classification (timeouts and transient network
    /// failures are classified as ERROR).
    Checked(CheckResult),
    /// The routine failed unexpectedly. `result` carries ERROR and the log.
    Failed {
        result: CheckResult,
        error: CheckError,
    },
    /// The task was cancelled before it finished. Nothing is counted.
    Cancelled {
        item: WorkItem,
        proxy: Option<Proxy>,
    },
}

enum Finished {
    Cancelled,
    TimedOut,
    Panicked(String),
    Done(Result<Status, CheckError>),
}

/// Shared by every task of a job.
pub struct BotExecutor {
    routine: Arc<dyn CheckRoutine>,
    http: Arc<HttpSettings>,
    inputs: Arc<HashMap<String, String>>,
    timeout: Duration,
    bot_log: bool,
}

impl BotExecutor {
    pub fn new(routine: Arc<dyn CheckRoutine>, timeout: Duration) -> Self {
        Self {
            routine,
            http: Arc::new(HttpSettings::default()),
            inputs: Arc::new(HashMap::new()),
            timeout,
            bot_log: true,
        }
    }

    pub fn with_http_settings(mut self, settings: Arc<HttpSettings>) -> Self {
        self.http = settings;
        self
    }

    pub fn with_inputs(mut self, inputs: Arc<HashMap<String, String>>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_bot_log(mut self, enabled: bool) -> Self {
        self.bot_log = enabled;
        self
    }

    /// Run `task` to completion, a timeout, or cancellation.
    ///
    /// Panics inside the routine are caught here so one task can't take
    /// down its siblings.
    pub async fn run(&self, task: Task, cancel: CancellationToken) -> TaskOutcome {
        let mut ctx = TaskContext::new(task.item, cancel.clone())
            .with_proxy(task.proxy)
            .with_attempt(task.attempt)
            .with_inputs(Arc::clone(&self.inputs))
            .with_http_settings(Arc::clone(&self.http))
            .with_timeout(self.timeout)
            .with_log(BotLog::new(self.bot_log));

        let finished = {
            let check = AssertUnwindSafe(self.routine.check(&mut ctx)).catch_unwind();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Finished::Cancelled,
                outcome = tokio::time::timeout(self.timeout, check) => match outcome {
                    Err(_) => Finished::TimedOut,
                    Ok(Err(panic)) => Finished::Panicked(panic_message(panic.as_ref())),
                    Ok(Ok(result)) => Finished::Done(result),
                },
            }
        };

        let status = match finished {
            Finished::Cancelled | Finished::Done(Err(CheckError::Http(HttpError::Cancelled))) => {
                debug!(item = %ctx.item, "Task cancelled");
                return TaskOutcome::Cancelled {
                    item: ctx.item,
                    proxy: ctx.proxy,
                };
            }
            Finished::TimedOut => {
                debug!(item = %ctx.item, timeout = ?self.timeout, "Task timed out");
                ctx.log.warn(format!("Task timed out after {:?}", self.timeout));
                Status::Error
            }
            Finished::Done(Ok(status)) => status,
            Finished::Done(Err(e)) if e.is_transient() => {
                debug!(item = %ctx.item, error = %e, "Transient failure");
                ctx.log.warn(e.to_string());
                Status::Error
            }
            Finished::Done(Err(error)) => {
                warn!(item = %ctx.item, error = %error, "Check routine failed");
                return TaskOutcome::Failed {
                    result: into_result(ctx, Status::Error),
                    error,
                };
            }
            Finished::Panicked(message) => {
                warn!(item = %ctx.item, panic = %message, "Check routine panicked");
                return TaskOutcome::Failed {
                    result: into_result(ctx, Status::Error),
                    error: CheckError::Panicked(message),
                };
            }
        };

        debug!(item = %ctx.item, status = %status, attempt = ctx.attempt, "Task checked");
        TaskOutcome::Checked(into_result(ctx, status))
    }
}

fn into_result(ctx: TaskContext, status: Status) -> CheckResult {
    CheckResult {
        item: ctx.item,
        proxy: ctx.proxy,
        status,
        attempt: ctx.attempt,
        captures: ctx.captures,
        log: ctx.log,
        finished_at: Utc::now(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    struct Scripted;

    #[async_trait]
    impl CheckRoutine for Scripted {
        async fn check(&self, ctx: &mut TaskContext) -> Result<Status, CheckError> {
            match ctx.item.data.as_str() {
                "ok" => {
                    ctx.capture("seen", "yes");
                    Ok(Status::Success)
                }
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Status::Success)
                }
                "net" => Err(HttpError::Connect("refused".into()).into()),
                "bug" => Err(CheckError::Routine("missing key".into())),
                "panic" => panic!("routine exploded"),
                _ => Ok(Status::Fail),
            }
        }
    }

    fn executor(timeout: Duration) -> BotExecutor {
        BotExecutor::new(Arc::new(Scripted), timeout)
    }

    fn task(data: &str) -> Task {
        Task::new(WorkItem::new(data, "Default", 0))
    }

    #[tokio::test]
    async fn classifies_and_keeps_captures() {
        let outcome = executor(Duration::from_secs(5))
            .run(task("ok"), CancellationToken::new())
            .await;
        let TaskOutcome::Checked(result) = outcome else {
            panic!("expected a checked outcome");
        };
        assert_eq!(result.status, Status::Success);
        assert_eq!(result.captures.get("seen").map(String::as_str), Some("yes"));
    }

    #[tokio::test]
    async fn timeout_is_error() {
        let outcome = executor(Duration::from_millis(20))
            .run(task("slow"), CancellationToken::new())
            .await;
        assert!(matches!(outcome, TaskOutcome::Checked(r) if r.status == Status::Error));
    }

    #[tokio::test]
    async fn transient_failure_is_error() {
        let outcome = executor(Duration::from_secs(5))
            .run(task("net"), CancellationToken::new())
            .await;
        assert!(matches!(outcome, TaskOutcome::Checked(r) if r.status == Status::Error));
    }

    #[tokio::test]
    async fn routine_failure_and_panic_are_reported() {
        let exec = executor(Duration::from_secs(5));
        let outcome = exec.run(task("bug"), CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            TaskOutcome::Failed { error: CheckError::Routine(_), .. }
        ));

        let outcome = exec.run(task("panic"), CancellationToken::new()).await;
        match outcome {
            TaskOutcome::Failed {
                error: CheckError::Panicked(message),
                result,
            } => {
                assert_eq!(message, "routine exploded");
                assert_eq!(result.status, Status::Error);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_wins_over_running_check() {
        let cancel = CancellationToken::new();
        let exec = executor(Duration::from_secs(60));
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { exec.run(task("slow"), cancel).await })
        };
        cancel.cancel();
        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Cancelled { ref item, .. } if item.data == "slow"));
    }
}
