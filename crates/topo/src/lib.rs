//! Topology data model and server contract for the shardgate proxy
//!
//! The topology server is the external consensus store (etcd or similar)
//! holding the authoritative cluster view: which keyspaces and shards exist,
//! which shards carry writes, and the routing rules in force. This crate
//! defines those records, the watch/fetch contract the proxy programs
//! against, and an in-memory server used by tests and single-process
//! deployments.

pub mod keyrange;
pub mod memory;
pub mod shard;
pub mod srv_keyspace;
pub mod tablet;
pub mod vschema;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use keyrange::{parse_key_range_parts, parse_shard_name, KeyRange, KeyRangeError};
pub use memory::MemoryTopoServer;
pub use shard::{ShardInfo, TabletControl};
pub use srv_keyspace::{KeyspacePartition, ShardReference, ShardTabletControl, SrvKeyspace};
pub use tablet::{TabletAlias, TabletType, Target};
pub use vschema::{
    shard_routing_rule_key, RoutingRule, RoutingRules, ShardRoutingRule, ShardRoutingRules,
    SrvVSchema,
};

/// Default deadline for one remote topology operation
pub const REMOTE_OPERATION_TIMEOUT: Duration = Duration::from_secs(15);

/// Topology server error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopoError {
    /// The node does not exist, or was deleted while being watched
    #[error("node doesn't exist: {0}")]
    NoNode(String),
    /// The operation ran past its deadline
    #[error("deadline exceeded: {0}")]
    Timeout(String),
    /// The topology server was unreachable
    #[error("connection error: {0}")]
    Connection(String),
    /// The operation was interrupted by shutdown
    #[error("interrupted: {0}")]
    Interrupted(String),
}

impl TopoError {
    /// Whether this error means the watched node was deleted
    pub fn is_no_node(&self) -> bool {
        matches!(self, TopoError::NoNode(_))
    }
}

/// One update delivered by a SrvKeyspace watch
pub type SrvKeyspaceUpdate = Result<SrvKeyspace, TopoError>;

/// One update delivered by a SrvVSchema watch
pub type SrvVSchemaUpdate = Result<SrvVSchema, TopoError>;

/// Contract between the proxy and the topology server.
///
/// Watches deliver the current value first and every change after it. An
/// `Err(NoNode)` update means the watched node is gone (watching a
/// SrvKeyspace that does not exist yields it immediately); channel close
/// means the server is shutting down. Transient errors are delivered
/// in-stream and the watch keeps running.
#[async_trait]
pub trait SrvTopoServer: Send + Sync + 'static {
    /// List the keyspace names served in a cell
    async fn get_srv_keyspace_names(
        &self,
        cell: &str,
        stale_ok: bool,
    ) -> Result<Vec<String>, TopoError>;

    /// Fetch one global shard record
    async fn get_shard(&self, keyspace: &str, shard: &str) -> Result<ShardInfo, TopoError>;

    /// Watch the SrvKeyspace record of one keyspace in a cell
    fn watch_srv_keyspace(&self, cell: &str, keyspace: &str) -> mpsc::Receiver<SrvKeyspaceUpdate>;

    /// Watch the cell-wide SrvVSchema
    fn watch_srv_vschema(&self, cell: &str) -> mpsc::Receiver<SrvVSchemaUpdate>;
}
