//! Counters, the hit list and the checks-per-minute window.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use tokio::time::{Duration, Instant};

use crate::bot::{CheckResult, Status};

const CPM_WINDOW: Duration = Duration::from_secs(60);

/// Which retained hits to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitFilter {
    Success,
    /// Inconclusive results kept for review.
    None,
    /// Custom labels.
    Custom,
}

impl HitFilter {
    pub fn matches(&self, status: &Status) -> bool {
        matches!(
            (self, status),
            (Self::Success, Status::Success)
                | (Self::None, Status::None)
                | (Self::Custom, Status::Custom(_))
        )
    }
}

/// Snapshot of a job's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    /// Items with a final classification.
    pub tested: u64,
    pub hits: u64,
    pub success: u64,
    pub to_check: u64,
    pub custom: u64,
    pub fails: u64,
    /// RETRY outcomes that were requeued.
    pub retries: u64,
    pub bans: u64,
    pub errors: u64,
    pub in_flight: usize,
    /// Requeued items waiting for a slot.
    pub queued_retries: usize,
    /// Checks per minute over the last 60 seconds.
    pub cpm: u32,
}

/// Mutable progress of a running job. Written only by the dispatcher.
#[derive(Debug, Default)]
pub(crate) struct Progress {
    pub stats: JobStats,
    /// Items pulled from the source since start.
    pub consumed: u64,
    /// Bans since the last start or resume.
    pub recent_bans: u32,
    pub hits: Vec<Arc<CheckResult>>,
    completions: VecDeque<Instant>,
}

impl Progress {
    /// Record a final classification.
    pub fn confirm(&mut self, result: &Arc<CheckResult>) {
        let stats = &mut self.stats;
        stats.tested += 1;
        match &result.status {
            Status::Success => stats.success += 1,
            Status::None => stats.to_check += 1,
            Status::Custom(_) => stats.custom += 1,
            Status::Fail => stats.fails += 1,
            Status::Error => stats.errors += 1,
            // counted by the dispatcher as they happen
            Status::Ban | Status::Retry => {}
        }
        if result.status.is_hit() {
            stats.hits += 1;
            self.hits.push(Arc::clone(result));
        }
        self.record_completion(Instant::now());
    }

    fn record_completion(&mut self, at: Instant) {
        self.completions.push_back(at);
        self.prune(at);
    }

    fn prune(&mut self, now: Instant) {
        while let Some(first) = self.completions.front() {
            if now.duration_since(*first) < CPM_WINDOW {
                break;
            }
            self.completions.pop_front();
        }
    }

    pub fn snapshot(&mut self) -> JobStats {
        self.prune(Instant::now());
        JobStats {
            cpm: self.completions.len() as u32,
            ..self.stats.clone()
        }
    }

    pub fn hits(&self, filter: HitFilter) -> Vec<Arc<CheckResult>> {
        self.hits
            .iter()
            .filter(|hit| filter.matches(&hit.status))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::bot::BotLog;
    use crate::data::WorkItem;

    fn result(data: &str, status: Status) -> Arc<CheckResult> {
        Arc::new(CheckResult {
            item: WorkItem::new(data, "Default", 0),
            proxy: None,
            status,
            attempt: 0,
            captures: BTreeMap::new(),
            log: BotLog::new(false),
            finished_at: Utc::now(),
        })
    }

    #[test]
    fn confirm_counts_by_status() {
        let mut progress = Progress::default();
        progress.confirm(&result("a", Status::Success));
        progress.confirm(&result("b", Status::Fail));
        progress.confirm(&result("c", Status::Custom("FREE".into())));
        progress.confirm(&result("d", Status::None));
        progress.confirm(&result("e", Status::Error));

        let stats = progress.snapshot();
        assert_eq!(stats.tested, 5);
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.custom, 1);
        assert_eq!(stats.to_check, 1);
        assert_eq!(stats.fails, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.cpm, 5);
    }

    #[test]
    fn hits_filter_by_kind() {
        let mut progress = Progress::default();
        progress.confirm(&result("a", Status::Success));
        progress.confirm(&result("b", Status::Custom("2FA".into())));
        progress.confirm(&result("c", Status::Fail));

        let success = progress.hits(HitFilter::Success);
        assert_eq!(success.len(), 1);
        assert_eq!(success[0].item.data, "a");
        assert_eq!(progress.hits(HitFilter::Custom).len(), 1);
        assert!(progress.hits(HitFilter::None).is_empty());
    }

    #[test]
    fn cpm_window_forgets_old_completions() {
        let mut progress = Progress::default();
        let start = Instant::now();
        progress.record_completion(start);
        progress.record_completion(start + Duration::from_secs(30));
        progress.prune(start + Duration::from_secs(61));
        assert_eq!(progress.completions.len(), 1);
    }
}
