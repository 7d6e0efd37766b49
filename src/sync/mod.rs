//! Background sync of queued mutations.

mod connectivity;
mod scheduler;

pub use connectivity::{ConnectivityMonitor, ConnectivityState};
pub use scheduler::{SyncReport, SyncScheduler, SyncTrigger};
