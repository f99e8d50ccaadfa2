//! Health stream contract
//!
//! The proxy runs a peer-to-peer health check against every tablet it knows
//! about. The watcher only consumes the resulting stream; the probe
//! implementation lives elsewhere.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use topo::{TabletAlias, Target};

/// One report from the health probe stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletHealth {
    /// Target the reporting tablet serves
    pub target: Target,
    /// Identity of the reporting tablet
    pub tablet: TabletAlias,
    /// Whether the tablet reports itself able to serve queries
    pub serving: bool,
    /// Start timestamp of the tablet's current primary term; zero if the
    /// tablet has never held a primary term
    pub primary_term_start_time: i64,
}

/// Contract between the watcher and the health probe layer.
///
/// `subscribe` registers a named subscriber and returns the channel its
/// updates arrive on; the channel closing means the health check is shutting
/// down.
pub trait HealthCheck: Send + Sync + 'static {
    /// Register a named subscriber and return its update stream
    fn subscribe(&self, name: &str) -> mpsc::Receiver<TabletHealth>;
}
