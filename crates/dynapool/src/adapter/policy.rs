//! Overflow policies applied when a pool cannot accept a task

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What a pool does with a task when every worker is busy and the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectPolicy {
    /// Fail the submission with an error
    #[default]
    Abort,

    /// Drop the task silently
    Discard,

    /// Drop the oldest queued task and enqueue the new one
    DiscardOldest,

    /// Run the task on the submitter's runtime, outside the pool's bounds
    CallerRuns,
}

impl RejectPolicy {
    /// Stable tag used in snapshots and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Discard => "discard",
            Self::DiscardOldest => "discard_oldest",
            Self::CallerRuns => "caller_runs",
        }
    }
}

impl std::fmt::Display for RejectPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RejectPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "abort" => Ok(Self::Abort),
            "discard" => Ok(Self::Discard),
            "discard_oldest" => Ok(Self::DiscardOldest),
            "caller_runs" => Ok(Self::CallerRuns),
            other => Err(format!("unknown reject policy: {other}")),
        }
    }
}
