pub mod cli;
pub mod conductor;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod lock;
pub mod logging;
pub mod membership;
pub mod notify;
pub mod operator;
pub mod recovery;
pub mod store;
pub mod sync;
pub mod types;

// Re-export common types
pub use conductor::Conductor;
pub use config::{ConductorConfig, ConfigHandle, SyncPolicy};
pub use error::{ConductorError, GatewayError, Result};
pub use gateway::{HardwareGateway, SimulatedGateway};
pub use lock::{LockOutcome, NodeLock, NodeLockGuard};
pub use membership::{responsible_conductor, MembershipRing, RingSnapshot};
pub use notify::{ChangeOrigin, NotificationDispatcher, PowerEvent, PowerEventSink};
pub use recovery::FaultRecoveryScheduler;
pub use store::{Datastore, InMemoryStore};
pub use sync::{CycleReport, NodeOutcome, ReconciliationEngine};
pub use types::{MaintenanceReason, Node, OnlineConductors, PowerAction, PowerState};
