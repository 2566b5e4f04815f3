//! Bot execution: a task context, the check routine seam and the executor
//! that runs one task to a classified result.

mod context;
mod executor;
mod result;

pub use context::{BotLog, LogEntry, LogKind, TaskContext};
pub use executor::{BotExecutor, TaskOutcome};
pub use result::{CheckResult, Status};

use async_trait::async_trait;

use crate::data::WorkItem;
use crate::error::CheckError;
use crate::http::Proxy;

/// The opaque unit of work run for every item.
///
/// Implementations inspect `ctx.item`, typically call [`TaskContext::send`]
/// one or more times, and classify what they saw. Captured values go into
/// `ctx.captures`.
#[async_trait]
pub trait CheckRoutine: Send + Sync {
    async fn check(&self, ctx: &mut TaskContext) -> Result<Status, CheckError>;
}

/// A work item paired with its proxy lease, ready to dispatch.
#[derive(Debug, Clone)]
pub struct Task {
    pub item: WorkItem,
    pub proxy: Option<Proxy>,
    /// Zero for the first dispatch, incremented on every requeue.
    pub attempt: u32,
}

impl Task {
    pub fn new(item: WorkItem) -> Self {
        Self {
            item,
            proxy: None,
            attempt: 0,
        }
    }

    pub fn with_proxy(mut self, proxy: Option<Proxy>) -> Self {
        self.proxy = proxy;
        self
    }

    /// The same item, queued for another attempt without a proxy.
    pub fn requeued(item: WorkItem, attempt: u32) -> Self {
        Self {
            item,
            proxy: None,
            attempt: attempt + 1,
        }
    }
}
