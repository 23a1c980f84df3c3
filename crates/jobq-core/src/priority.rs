use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Scheduling priority of a job.
/// Higher values are claimed first; unbounded in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(i64);

impl Priority {
    /// Priority assigned when the producer does not pick one.
    pub const DEFAULT: i64 = 1;

    pub fn new(value: i64) -> Self {
        Priority(value)
    }

    /// Get the raw priority value
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority(Self::DEFAULT)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Priority {
    fn from(value: i64) -> Self {
        Priority(value)
    }
}

impl From<Priority> for i64 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}
