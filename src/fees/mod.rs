//! Fee recovery for cached rune transactions.

pub mod backfill;
pub mod pacing;
pub mod resolver;

pub use backfill::{BackfillConfig, BackfillError, BackfillJob, BackfillReport};
pub use pacing::Pacer;
pub use resolver::{FeeBounds, FeeBreakdown, FeeError, FeeResolver, TransactionSource};
