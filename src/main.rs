use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use reqwest::Method;

use probe_engine::bot::{CheckRoutine, Status, TaskContext};
use probe_engine::config::JobConfig;
use probe_engine::data::{DataSource, FileSource};
use probe_engine::error::CheckError;
use probe_engine::http::{HttpRequest, ProxyKind, RequestOptions};
use probe_engine::job::{FileCheckpointStore, Job, JobEvent, ProxyPool};

/// Posts each `user:pass` line to a login form and classifies the response
/// body by keyword.
struct KeywordCheck {
    url: String,
    body: String,
    success: Regex,
    fail: Regex,
}

impl KeywordCheck {
    fn fill(&self, template: &str, line: &str) -> String {
        let (user, pass) = line.split_once(':').unwrap_or((line, ""));
        template.replace("<USER>", user).replace("<PASS>", pass)
    }
}

#[async_trait]
impl CheckRoutine for KeywordCheck {
    async fn check(&self, ctx: &mut TaskContext) -> Result<Status, CheckError> {
        let request = HttpRequest::standard(
            RequestOptions::new(self.fill(&self.url, &ctx.item.data)),
            Method::POST,
            self.fill(&self.body, &ctx.item.data),
            "application/x-www-form-urlencoded",
        );
        let response = ctx.send(&request).await?;

        let status = if response.status == 429 {
            Status::Ban
        } else if response.status >= 500 {
            Status::Retry
        } else if self.success.is_match(&response.source) {
            Status::Success
        } else if self.fail.is_match(&response.source) {
            Status::Fail
        } else {
            Status::None
        };
        Ok(status)
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow!("{key} not set"))
}

fn pattern(key: &str, default: &str) -> anyhow::Result<Regex> {
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    Regex::new(&raw).with_context(|| format!("{key} is not a valid pattern"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let wordlist = required("PROBE_WORDLIST")?;
    let routine = KeywordCheck {
        url: required("PROBE_URL")?,
        body: std::env::var("PROBE_BODY")
            .unwrap_or_else(|_| "username=<USER>&password=<PASS>".to_string()),
        success: pattern("PROBE_SUCCESS", "(?i)welcome")?,
        fail: pattern("PROBE_FAIL", "(?i)invalid")?,
    };

    let mut config = JobConfig::from_env();
    let pool = match std::env::var("PROBE_PROXIES") {
        Ok(path) => {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read proxies from {path}"))?;
            let pool = ProxyPool::from_lines(&text, ProxyKind::Http)?;
            eprintln!("   Proxies: {} loaded from {path}", pool.available().await);
            config.use_proxies = true;
            Some(pool)
        }
        Err(_) => None,
    };

    let source = FileSource::open(&wordlist)
        .await
        .with_context(|| format!("Failed to open wordlist {wordlist}"))?;
    let source_ref = source.reference();
    let mut builder = Job::builder(config, source, Arc::new(routine));
    if let Some(pool) = pool {
        builder = builder.proxies(Arc::new(pool));
    }

    if let Ok(dir) = std::env::var("PROBE_CHECKPOINT") {
        let store = FileCheckpointStore::new(&dir);
        if let Some(checkpoint) = store.latest_for(&source_ref).await? {
            eprintln!(
                "   Resuming job {} at offset {}",
                checkpoint.job_id, checkpoint.offset
            );
            builder = builder.resume_from(&checkpoint);
        }
        builder = builder.checkpoint_store(Arc::new(store));
    }

    let job = Arc::new(builder.build());
    eprintln!("probe-engine v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Job: {}", job.id());
    eprintln!("   Wordlist: {wordlist}");
    eprintln!("   Bots: {}", job.bots());

    let mut events = Box::pin(job.event_stream());
    job.start().await?;

    {
        let job = Arc::clone(&job);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, stopping after in-flight checks");
                if let Err(e) = job.stop().await {
                    tracing::warn!(error = %e, "Stop failed");
                }
            }
        });
    }

    while let Some(event) = events.next().await {
        match event {
            JobEvent::Result { result, .. } if result.status.is_hit() => {
                println!("{} {}", result.status, result.item);
            }
            JobEvent::TaskError { item, error, .. } => {
                tracing::warn!(item = %item, error = %error, "Check failed");
            }
            JobEvent::FatalError { error, .. } => {
                tracing::error!(error = %error, "Job failed");
            }
            JobEvent::TimerTick { offset, stats, .. } => {
                tracing::info!(
                    offset,
                    tested = stats.tested,
                    hits = stats.hits,
                    cpm = stats.cpm,
                    "Progress"
                );
            }
            JobEvent::Completed { state, stats, .. } => {
                eprintln!(
                    "Finished ({state}): {} tested, {} hits, {} fails, {} errors, {} bans",
                    stats.tested, stats.hits, stats.fails, stats.errors, stats.bans
                );
                break;
            }
            JobEvent::Result { .. } => {}
        }
    }

    job.wait().await;
    Ok(())
}
