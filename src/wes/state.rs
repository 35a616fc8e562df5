//! Run State Machine
//!
//! The WES run states and the transitions Metis allows between them.
//! The store consults [`State::can_transition`] before every update so
//! that a late report from an agent cannot resurrect a finished or
//! cancelled run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// State of a workflow run, as defined by WES 1.1.0.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    Unknown,
    Queued,
    Initializing,
    Running,
    Paused,
    Complete,
    ExecutorError,
    SystemError,
    Canceled,
    Canceling,
    Preempted,
}

impl State {
    /// Every state, in declaration order.
    pub const ALL: [State; 11] = [
        State::Unknown,
        State::Queued,
        State::Initializing,
        State::Running,
        State::Paused,
        State::Complete,
        State::ExecutorError,
        State::SystemError,
        State::Canceled,
        State::Canceling,
        State::Preempted,
    ];

    /// Wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Queued => "QUEUED",
            Self::Initializing => "INITIALIZING",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Complete => "COMPLETE",
            Self::ExecutorError => "EXECUTOR_ERROR",
            Self::SystemError => "SYSTEM_ERROR",
            Self::Canceled => "CANCELED",
            Self::Canceling => "CANCELING",
            Self::Preempted => "PREEMPTED",
        }
    }

    /// Returns true once the run can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete
                | Self::ExecutorError
                | Self::SystemError
                | Self::Canceled
                | Self::Preempted
        )
    }

    /// Returns true if a run in `self` may move to `next`.
    ///
    /// Re-reporting the current state is always allowed so that agents
    /// can retry an update safely.
    pub fn can_transition(&self, next: State) -> bool {
        if *self == next {
            return true;
        }

        use State::*;
        match self {
            Unknown => true,
            Queued => matches!(next, Initializing | Running | Canceling | Canceled | SystemError),
            Initializing => matches!(
                next,
                Running | ExecutorError | SystemError | Canceling | Canceled
            ),
            Running => matches!(
                next,
                Complete | ExecutorError | SystemError | Paused | Canceling | Canceled | Preempted
            ),
            Paused => matches!(next, Running | Canceling | Canceled | SystemError),
            Canceling => matches!(next, Canceled | SystemError),
            Complete | ExecutorError | SystemError | Canceled | Preempted => false,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        State::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown run state: {}", s))
    }
}
