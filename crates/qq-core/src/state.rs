//! The three-layer job state model: what qq last wrote, what the batch
//! system currently reports, and the reconciled state a user actually sees.

use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use strum::EnumString;

/// The state qq itself last recorded for the job, independent of what the
/// batch system currently reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NaiveState {
    /// Submitted, not yet started.
    Queued,
    /// Currently executing.
    Running,
    /// The user script exited with a failure.
    Failed,
    /// The user script completed successfully.
    Finished,
    /// Killed by explicit user action.
    Killed,
    /// State could not be determined.
    Unknown,
}

impl NaiveState {
    /// Parses a `NaiveState` name, case-insensitively, falling back to
    /// `Unknown` for anything unrecognized rather than failing.
    pub fn parse_or_unknown(s: &str) -> Self {
        s.parse().unwrap_or(NaiveState::Unknown)
    }
}

/// The state reported by the underlying batch system (PBS/Slurm/VBS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    /// Executing on allocated resources.
    Running,
    /// Waiting in the queue.
    Queued,
    /// Completed, according to the batch system.
    Finished,
    /// Completed with a non-zero batch-level exit status.
    Failed,
    /// Held by an administrator or dependency.
    Held,
    /// Wrapping up after the job's process exited.
    Exiting,
    /// Waiting for a scheduled start time.
    Waiting,
    /// Being relocated between queues.
    Moving,
    /// Temporarily suspended.
    Suspended,
    /// State could not be determined.
    Unknown,
}

impl BatchState {
    /// Maps a PBS/Slurm one-letter status code to a `BatchState`.
    pub fn from_code(code: &str) -> Self {
        match code.to_ascii_uppercase().as_str() {
            "E" => BatchState::Exiting,
            "H" => BatchState::Held,
            "Q" => BatchState::Queued,
            "R" => BatchState::Running,
            "T" => BatchState::Moving,
            "W" => BatchState::Waiting,
            "S" => BatchState::Suspended,
            "F" => BatchState::Finished,
            "X" => BatchState::Failed,
            _ => BatchState::Unknown,
        }
    }

    /// Returns the one-letter status code for this state, or `?` for states
    /// with no single-letter encoding.
    pub fn to_code(self) -> char {
        match self {
            BatchState::Exiting => 'E',
            BatchState::Held => 'H',
            BatchState::Queued => 'Q',
            BatchState::Running => 'R',
            BatchState::Moving => 'T',
            BatchState::Waiting => 'W',
            BatchState::Suspended => 'S',
            BatchState::Finished => 'F',
            BatchState::Failed => 'X',
            BatchState::Unknown => '?',
        }
    }
}

/// The reconciled, user-facing job state, derived from a [`NaiveState`] and
/// a [`BatchState`] pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RealState {
    /// Waiting in the queue.
    Queued,
    /// Held by an administrator or dependency.
    Held,
    /// Temporarily suspended.
    Suspended,
    /// Waiting for a scheduled start time.
    Waiting,
    /// Currently executing.
    Running,
    /// Batch-allocated but the user script has not yet started.
    Booting,
    /// Killed by explicit user action.
    Killed,
    /// The user script exited with a failure.
    Failed,
    /// The user script completed successfully.
    Finished,
    /// Wrapping up after the job's process exited.
    Exiting,
    /// The naive and batch states disagree in a way that cannot be reconciled.
    InAnInconsistentState,
    /// State could not be determined.
    Unknown,
}

impl RealState {
    /// Derives the reconciled state from the last qq-recorded state and the
    /// batch system's current report.
    pub fn from_states(naive: NaiveState, batch: BatchState) -> Self {
        use BatchState as B;
        use NaiveState as N;

        match (naive, batch) {
            (N::Unknown, _) => RealState::Unknown,

            (N::Queued, B::Queued | B::Moving) => RealState::Queued,
            (N::Queued, B::Held) => RealState::Held,
            (N::Queued, B::Suspended) => RealState::Suspended,
            (N::Queued, B::Waiting) => RealState::Waiting,
            (N::Queued, B::Running) => RealState::Booting,
            (N::Queued, _) => RealState::InAnInconsistentState,

            (N::Running, B::Running) => RealState::Running,
            (N::Running, B::Suspended) => RealState::Suspended,
            (N::Running, _) => RealState::InAnInconsistentState,

            (N::Killed, B::Running) => RealState::Exiting,
            (N::Killed, _) => RealState::Killed,

            (N::Finished, B::Running) => RealState::Exiting,
            (N::Finished, B::Queued | B::Waiting | B::Held | B::Failed) => {
                RealState::InAnInconsistentState
            }
            (N::Finished, _) => RealState::Finished,

            (N::Failed, B::Running) => RealState::Exiting,
            (N::Failed, B::Queued | B::Waiting | B::Held | B::Finished) => {
                RealState::InAnInconsistentState
            }
            (N::Failed, _) => RealState::Failed,
        }
    }

    /// True once the job will never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RealState::Killed | RealState::Failed | RealState::Finished
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips() {
        for code in ["E", "H", "Q", "R", "T", "W", "S", "F", "X"] {
            let state = BatchState::from_code(code);
            assert_eq!(state.to_code().to_string(), code);
        }
    }

    #[test]
    fn unknown_naive_state_always_wins() {
        assert_eq!(
            RealState::from_states(NaiveState::Unknown, BatchState::Running),
            RealState::Unknown
        );
    }

    #[test]
    fn queued_running_is_booting() {
        assert_eq!(
            RealState::from_states(NaiveState::Queued, BatchState::Running),
            RealState::Booting
        );
    }

    #[test]
    fn finished_naive_but_still_batch_queued_is_inconsistent() {
        assert_eq!(
            RealState::from_states(NaiveState::Finished, BatchState::Queued),
            RealState::InAnInconsistentState
        );
    }

    #[test]
    fn killed_while_batch_running_is_exiting() {
        assert_eq!(
            RealState::from_states(NaiveState::Killed, BatchState::Running),
            RealState::Exiting
        );
    }

    #[test]
    fn terminal_states() {
        assert!(RealState::Finished.is_terminal());
        assert!(!RealState::Booting.is_terminal());
    }
}
