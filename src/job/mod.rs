//! Job orchestration.
//!
//! A [`Job`] owns a resizable pool of bots fed from a [`DataSource`]. It
//! exposes control operations (start, stop, abort, pause, resume,
//! change_bots, skip_wait), a status surface, an event stream and periodic
//! checkpointing so a later run can pick up where this one stopped.
//!
//! [`DataSource`]: crate::data::DataSource

mod checkpoint;
mod dispatcher;
mod events;
mod inputs;
mod orchestrator;
mod proxies;
mod state;
mod stats;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, JobCheckpoint, MemoryCheckpointStore};
pub use events::{DEFAULT_EVENT_CAPACITY, JobEvent};
pub use inputs::{CustomInput, InputProvider, StaticInputs, collect as collect_inputs};
pub use orchestrator::{Job, JobBuilder};
pub use proxies::{ProxyOutcome, ProxyPool, ProxySource};
pub use state::JobState;
pub use stats::{HitFilter, JobStats};
