//! Job events.
//!
//! A job publishes every event on one broadcast channel. Subscribers hold a
//! receiver for as long as they care and unsubscribe by dropping it.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;
use uuid::Uuid;

use super::state::JobState;
use super::stats::JobStats;
use crate::bot::CheckResult;
use crate::data::WorkItem;

/// Default broadcast channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Everything a job reports to the outside.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// A task finished with a classification.
    Result {
        job_id: Uuid,
        result: Arc<CheckResult>,
    },
    /// A check routine failed unexpectedly. The job carries on.
    TaskError {
        job_id: Uuid,
        item: WorkItem,
        proxy: Option<String>,
        error: String,
    },
    /// The job cannot continue and is aborting.
    FatalError { job_id: Uuid, error: String },
    /// Teardown finished.
    Completed {
        job_id: Uuid,
        state: JobState,
        stats: JobStats,
    },
    /// Periodic heartbeat, sent with every checkpoint.
    TimerTick {
        job_id: Uuid,
        offset: u64,
        stats: JobStats,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> Uuid {
        match self {
            Self::Result { job_id, .. }
            | Self::TaskError { job_id, .. }
            | Self::FatalError { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::TimerTick { job_id, .. } => *job_id,
        }
    }
}

/// Wrap a receiver as a stream. Lagged gaps are logged and skipped.
pub fn into_stream(
    rx: broadcast::Receiver<JobEvent>,
) -> impl futures::Stream<Item = JobEvent> + Send + 'static {
    BroadcastStream::new(rx).filter_map(|event| match event {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "Event subscriber lagged");
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_ends_when_sender_drops() {
        let (tx, rx) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        let id = Uuid::new_v4();
        let mut stream = Box::pin(into_stream(rx));

        tx.send(JobEvent::FatalError {
            job_id: id,
            error: "boom".into(),
        })
        .unwrap();
        drop(tx);

        let first = stream.next().await.unwrap();
        assert_eq!(first.job_id(), id);
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = JobEvent::TimerTick {
            job_id: Uuid::nil(),
            offset: 7,
            stats: JobStats::default(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "timer_tick");
        assert_eq!(json["offset"], 7);
    }
}
