//! Serving keyspace records
//!
//! The SrvKeyspace record is the consensus store's per-cell view of a
//! keyspace: which shards serve each tablet type, and which of them are
//! frozen mid topology change.

use serde::{Deserialize, Serialize};

use crate::keyrange::{parse_shard_name, KeyRange};
use crate::tablet::TabletType;

/// Reference to one shard in a serving partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardReference {
    /// Shard name
    pub name: String,
    /// Key range the shard covers; None for unsharded keyspaces
    pub key_range: Option<KeyRange>,
}

impl ShardReference {
    /// Build a reference, deriving the key range from the shard name
    pub fn new(name: &str) -> Self {
        let key_range = parse_shard_name(name).ok().and_then(|(_, range)| range);
        Self {
            name: name.to_string(),
            key_range,
        }
    }
}

/// Marks a shard whose query service is being toggled during a topology
/// change such as a resharding cut-over
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardTabletControl {
    /// Shard name
    pub name: String,
    /// Key range the shard covers
    pub key_range: Option<KeyRange>,
    /// Whether the query service is disabled on the shard
    pub query_service_disabled: bool,
}

/// The shards serving one tablet type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyspacePartition {
    /// Tablet type this partition serves
    pub served_type: TabletType,
    /// Shards currently designated to serve this type
    pub shard_references: Vec<ShardReference>,
    /// Shards frozen by an in-flight topology change
    #[serde(default)]
    pub shard_tablet_controls: Vec<ShardTabletControl>,
}

impl KeyspacePartition {
    /// Partition with the given shards and no tablet controls
    pub fn new(served_type: TabletType, shard_names: &[&str]) -> Self {
        Self {
            served_type,
            shard_references: shard_names.iter().map(|name| ShardReference::new(name)).collect(),
            shard_tablet_controls: Vec::new(),
        }
    }
}

/// Per-cell serving view of a keyspace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrvKeyspace {
    /// One partition per served tablet type
    pub partitions: Vec<KeyspacePartition>,
}

impl SrvKeyspace {
    /// The partition serving the given tablet type, if any
    pub fn partition(&self, tablet_type: TabletType) -> Option<&KeyspacePartition> {
        self.partitions
            .iter()
            .find(|partition| partition.served_type == tablet_type)
    }
}
