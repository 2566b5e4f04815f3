//! Probe engine: the execution core of a network-probing engine.
//!
//! A [`job::Job`] pulls work items from a [`data::DataSource`], pairs each
//! with a leased proxy and runs it through a [`bot::CheckRoutine`] on a
//! resizable pool of bots. Routines talk to targets through the [`http`]
//! layer and classify what they see; the job counts, retries, pauses and
//! checkpoints accordingly.

pub mod bot;
pub mod config;
pub mod data;
pub mod error;
pub mod http;
pub mod job;

pub use bot::{CheckResult, CheckRoutine, Status, TaskContext};
pub use config::JobConfig;
pub use error::{Error, Result};
pub use job::{HitFilter, Job, JobEvent, JobState};
