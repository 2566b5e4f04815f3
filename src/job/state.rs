//! Job state machine.

use serde::{Deserialize, Serialize};

/// State of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created, not yet started.
    Idle,
    /// Collecting inputs and validating configuration.
    Starting,
    /// Dispatching work.
    Running,
    /// Dispatch halted, waiting for in-flight tasks to drain.
    Pausing,
    Paused,
    /// Soft stop: no new dispatch, in-flight tasks finish naturally.
    Stopping,
    Resuming,
    /// Source exhausted or soft stop drained.
    Completed,
    /// Hard abort or fatal error.
    Aborted,
}

impl JobState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        use JobState::*;

        matches!(
            (self, target),
            (Idle, Starting) |
            // validation failure returns to Idle
            (Starting, Running) | (Starting, Idle) |
            (Running, Pausing) | (Running, Stopping) |
            (Running, Completed) | (Running, Aborted) |
            (Pausing, Paused) | (Pausing, Stopping) | (Pausing, Aborted) |
            (Paused, Resuming) | (Paused, Stopping) | (Paused, Aborted) |
            (Resuming, Running) | (Resuming, Aborted) |
            (Stopping, Completed) | (Stopping, Aborted)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Started and not yet terminal.
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && !matches!(self, Self::Idle | Self::Starting)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Pausing => "pausing",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Resuming => "resuming",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [JobState; 9] = [
        JobState::Idle,
        JobState::Starting,
        JobState::Running,
        JobState::Pausing,
        JobState::Paused,
        JobState::Stopping,
        JobState::Resuming,
        JobState::Completed,
        JobState::Aborted,
    ];

    #[test]
    fn test_state_transitions() {
        assert!(JobState::Idle.can_transition_to(JobState::Starting));
        assert!(JobState::Starting.can_transition_to(JobState::Running));
        assert!(JobState::Running.can_transition_to(JobState::Pausing));
        assert!(JobState::Pausing.can_transition_to(JobState::Paused));
        assert!(JobState::Paused.can_transition_to(JobState::Resuming));
        assert!(JobState::Resuming.can_transition_to(JobState::Running));
        assert!(JobState::Running.can_transition_to(JobState::Stopping));
        assert!(JobState::Stopping.can_transition_to(JobState::Completed));

        assert!(!JobState::Idle.can_transition_to(JobState::Running));
        assert!(!JobState::Running.can_transition_to(JobState::Paused));
        assert!(!JobState::Paused.can_transition_to(JobState::Running));
        assert!(!JobState::Idle.can_transition_to(JobState::Aborted));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [JobState::Completed, JobState::Aborted] {
            assert!(terminal.is_terminal());
            for target in ALL {
                assert!(!terminal.can_transition_to(target), "{terminal} -> {target}");
            }
        }
    }

    #[test]
    fn test_every_active_state_can_abort() {
        for state in ALL.into_iter().filter(JobState::is_active) {
            assert!(state.can_transition_to(JobState::Aborted), "{state}");
        }
    }

    #[test]
    fn test_no_self_transitions() {
        for state in ALL {
            assert!(!state.can_transition_to(state), "{state}");
        }
    }
}
