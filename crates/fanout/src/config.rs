//! Foreach executor configuration.

use serde::{Deserialize, Serialize};

/// What cancellation does to workers that have already started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// Stop dispatching new items; running transforms finish and keep their results.
    #[default]
    FinishInFlight,
    /// Also drop running async transforms at their next await point. Blocking
    /// transforms cannot be interrupted, so a result that arrives after
    /// cancellation is discarded instead.
    AbortInFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForeachConfig {
    /// Requested number of concurrent workers. Values below one mean one.
    pub concurrency: i64,
    pub cancel_policy: CancelPolicy,
}

impl Default for ForeachConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            cancel_policy: CancelPolicy::default(),
        }
    }
}

impl ForeachConfig {
    pub fn new(concurrency: i64) -> Self {
        Self::default().with_concurrency(concurrency)
    }

    pub fn with_concurrency(mut self, concurrency: i64) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_cancel_policy(mut self, policy: CancelPolicy) -> Self {
        self.cancel_policy = policy;
        self
    }

    /// Number of workers actually used for `items` inputs: at least one, at
    /// most `items` (and zero only when there is nothing to do).
    pub fn effective_concurrency(&self, items: usize) -> usize {
        if items == 0 {
            return 0;
        }
        let requested = usize::try_from(self.concurrency).unwrap_or(0).max(1);
        requested.min(items)
    }
}
