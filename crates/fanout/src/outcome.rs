//! Per-item outcomes of a foreach run.

use serde::{Deserialize, Serialize};

/// Why an item produced no value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ItemError<E> {
    /// The transform returned an error.
    #[error("transform failed: {0}")]
    Failed(E),

    /// The transform panicked. Holds the panic message when it was a string.
    #[error("transform panicked: {0}")]
    Panicked(String),

    /// Cancellation was observed before the item started (or, under
    /// `CancelPolicy::AbortInFlight`, before it finished).
    #[error("cancelled")]
    Cancelled,
}

pub type ItemResult<R, E> = Result<R, ItemError<E>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Succeeded,
    Failed,
    Panicked,
    Cancelled,
}

impl ItemStatus {
    pub fn of<R, E>(result: &ItemResult<R, E>) -> Self {
        match result {
            Ok(_) => Self::Succeeded,
            Err(ItemError::Failed(_)) => Self::Failed,
            Err(ItemError::Panicked(_)) => Self::Panicked,
            Err(ItemError::Cancelled) => Self::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Panicked => "panicked",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts of each outcome in a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ForeachSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub panicked: usize,
    pub cancelled: usize,
}

impl ForeachSummary {
    pub fn of<R, E>(results: &[ItemResult<R, E>]) -> Self {
        results
            .iter()
            .fold(Self::default(), |mut summary, result| {
                summary.record(ItemStatus::of(result));
                summary
            })
    }

    pub fn record(&mut self, status: ItemStatus) {
        self.total += 1;
        match status {
            ItemStatus::Succeeded => self.succeeded += 1,
            ItemStatus::Failed => self.failed += 1,
            ItemStatus::Panicked => self.panicked += 1,
            ItemStatus::Cancelled => self.cancelled += 1,
        }
    }

    /// True when every item produced a value.
    pub fn is_clean(&self) -> bool {
        self.succeeded == self.total
    }
}
