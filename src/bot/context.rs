//! Per-task execution context.
//!
//! Everything a check routine touches lives here as a typed field: the work
//! item, the leased proxy, the task's cookie state, captured variables, the
//! last response and the bot log. A context is owned by exactly one task.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::data::WorkItem;
use crate::error::HttpError;
use crate::http::{self, HttpRequest, HttpResponse, HttpSettings, Proxy};

/// Category of a bot log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Info,
    Request,
    Response,
    Warning,
    Error,
}

/// One line of a bot log.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub kind: LogKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Diagnostic log of a single task, kept with its hit.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BotLog {
    entries: Vec<LogEntry>,
    enabled: bool,
}

impl BotLog {
    pub fn new(enabled: bool) -> Self {
        Self {
            entries: Vec::new(),
            enabled,
        }
    }

    pub fn log(&mut self, kind: LogKind, message: impl Into<String>) {
        if !self.enabled {
            return;
        }
        self.entries.push(LogEntry {
            kind,
            message: message.into(),
            at: Utc::now(),
        });
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.log(LogKind::Info, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.log(LogKind::Warning, message);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whole log as text.
    pub fn text(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Context handed to a check routine.
#[derive(Debug)]
pub struct TaskContext {
    pub item: WorkItem,
    pub proxy: Option<Proxy>,
    /// Which attempt this is (0 for the first dispatch).
    pub attempt: u32,
    /// Answers to the job's custom inputs, keyed by variable name.
    pub inputs: Arc<HashMap<String, String>>,
    /// Cookies carried from request to request.
    pub cookies: BTreeMap<String, String>,
    /// Data captured by the routine; retained with hits.
    pub captures: BTreeMap<String, String>,
    /// Most recent response.
    pub response: Option<HttpResponse>,
    pub log: BotLog,
    pub timeout: Duration,
    http: Arc<HttpSettings>,
    cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(item: WorkItem, cancel: CancellationToken) -> Self {
        Self {
            item,
            proxy: None,
            attempt: 0,
            inputs: Arc::new(HashMap::new()),
            cookies: BTreeMap::new(),
            captures: BTreeMap::new(),
            response: None,
            log: BotLog::new(true),
            timeout: Duration::from_secs(30),
            http: Arc::new(HttpSettings::default()),
            cancel,
        }
    }

    pub fn with_proxy(mut self, proxy: Option<Proxy>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_inputs(mut self, inputs: Arc<HashMap<String, String>>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_http_settings(mut self, settings: Arc<HttpSettings>) -> Self {
        self.http = settings;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_log(mut self, log: BotLog) -> Self {
        self.log = log;
        self
    }

    /// Signal fired when this task or the whole job is cancelled.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn http_settings(&self) -> &Arc<HttpSettings> {
        &self.http
    }

    /// Answer to a custom input.
    pub fn input(&self, variable: &str) -> Option<&str> {
        self.inputs.get(variable).map(String::as_str)
    }

    /// Record a captured value.
    pub fn capture(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.captures.insert(name.into(), value.into());
    }

    /// Send a request through the HTTP layer, returning the captured
    /// response. The response also stays available as `self.response`.
    pub async fn send(&mut self, request: &HttpRequest) -> Result<&HttpResponse, HttpError> {
        http::send(self, request).await?;
        self.response
            .as_ref()
            .ok_or_else(|| HttpError::Body("no response captured".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_log_records_nothing() {
        let mut log = BotLog::new(false);
        log.info("hidden");
        assert!(log.entries().is_empty());
    }

    #[test]
    fn log_text_joins_lines() {
        let mut log = BotLog::new(true);
        log.info("one");
        log.log(LogKind::Request, "GET / HTTP/1.1");
        assert_eq!(log.text(), "one\nGET / HTTP/1.1");
        assert_eq!(log.entries()[1].kind, LogKind::Request);
    }

    #[test]
    fn inputs_and_captures() {
        let inputs = Arc::new(HashMap::from([("DOMAIN".to_string(), "example.com".to_string())]));
        let mut ctx = TaskContext::new(WorkItem::new("a:b", "Default", 0), CancellationToken::new())
            .with_inputs(inputs);
        assert_eq!(ctx.input("DOMAIN"), Some("example.com"));
        assert_eq!(ctx.input("MISSING"), None);
        ctx.capture("plan", "gold");
        assert_eq!(ctx.captures.get("plan").map(String::as_str), Some("gold"));
    }
}
