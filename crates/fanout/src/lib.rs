//! fanout: bounded-concurrency, order-preserving parallel map.
//!
//! [`go_foreach`] applies a fallible transform to every item of a collection
//! with at most N transforms in flight, and returns one result per input in
//! input order. Failed, panicked and cancelled items take a caller-supplied
//! default; [`Foreach::try_map`] keeps the reason instead.

pub mod admission;
pub mod config;
pub mod foreach;
pub mod outcome;
pub mod presence;
pub mod telemetry;

pub use tokio_util::sync::CancellationToken;

pub use admission::{AdmissionError, AdmissionPermit, AdmissionPool};
pub use config::{CancelPolicy, ForeachConfig};
pub use foreach::{Foreach, go_foreach, go_foreach_blocking};
pub use outcome::{ForeachSummary, ItemError, ItemResult, ItemStatus};
pub use presence::{PresenceGuard, PresenceSet};
