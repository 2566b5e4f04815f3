//! Check outcomes.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::context::BotLog;
use crate::data::WorkItem;
use crate::http::Proxy;

/// Classification of a finished check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Fail,
    Ban,
    Retry,
    Error,
    /// Inconclusive; kept as a hit for manual review.
    None,
    Custom(String),
}

impl Status {
    /// Whether results with this status are retained as hits.
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Success | Self::None | Self::Custom(_))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "SUCCESS",
            Self::Fail => "FAIL",
            Self::Ban => "BAN",
            Self::Retry => "RETRY",
            Self::Error => "ERROR",
            Self::None => "NONE",
            Self::Custom(label) => label,
        };
        f.write_str(s)
    }
}

/// Everything a finished task reports back to its job.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub item: WorkItem,
    #[serde(serialize_with = "proxy_address")]
    pub proxy: Option<Proxy>,
    pub status: Status,
    /// Zero-based attempt that produced this result.
    pub attempt: u32,
    pub captures: BTreeMap<String, String>,
    pub log: BotLog,
    pub finished_at: DateTime<Utc>,
}

fn proxy_address<S: serde::Serializer>(proxy: &Option<Proxy>, s: S) -> Result<S::Ok, S::Error> {
    match proxy {
        Some(proxy) => s.serialize_some(&proxy.to_string()),
        None => s.serialize_none(),
    }
}
