//! Power-state reconciliation
//!
//! Each cycle works over the nodes this conductor owns: lock the node, ask
//! the BMC, settle any disagreement per the configured policy, notify, and
//! release. Nodes whose BMC keeps failing are handed to fault recovery.

mod engine;
mod fault;
mod pool;

pub use engine::{CycleReport, Correction, NodeOutcome, ReconciliationEngine, SkipReason};
pub use fault::FaultTracker;
pub use pool::WorkerPool;
