//! Observable replay mode.

use serde::{Deserialize, Serialize};

/// Scheduler run state.
///
/// ```text
/// Uninitialized --initialize--> Ready --start--> Running <--pause/resume--> Paused
///                                 ^                 |  \                      |
///                                 +------stop-------+   +--exhausted--> Completed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Uninitialized,
    Ready,
    Running,
    Paused,
    Completed,
}

impl RunState {
    /// Whether the periodic tick should be armed in this state.
    pub fn is_armed(&self) -> bool {
        matches!(self, RunState::Running | RunState::Paused)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Uninitialized => "uninitialized",
            RunState::Ready => "ready",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Completed => "completed",
        };
        f.write_str(s)
    }
}
