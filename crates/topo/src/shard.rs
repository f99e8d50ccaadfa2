//! Global shard records
//!
//! Unlike the per-cell SrvKeyspace, the Shard record is global to the
//! cluster. It carries the tablet controls the traffic switcher writes
//! during a MoveTables cut-over, in particular the denied tables that block
//! writes on the migration source.

use serde::{Deserialize, Serialize};

use crate::keyrange::{parse_shard_name, KeyRange};
use crate::tablet::TabletType;

/// Write restrictions applied to one tablet type of a shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletControl {
    /// Tablet type the control applies to
    pub tablet_type: TabletType,
    /// Tables whose writes are currently blocked on this shard
    #[serde(default)]
    pub denied_tables: Vec<String>,
}

impl TabletControl {
    /// Control denying writes to the given tables on the primary
    pub fn denying(tables: &[&str]) -> Self {
        Self {
            tablet_type: TabletType::Primary,
            denied_tables: tables.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Global shard record as stored in the topology server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInfo {
    /// Keyspace the shard belongs to
    pub keyspace: String,
    /// Shard name within the keyspace
    pub shard_name: String,
    /// Key range the shard covers; None for unsharded keyspaces
    pub key_range: Option<KeyRange>,
    /// Active write restrictions, if any
    #[serde(default)]
    pub tablet_controls: Vec<TabletControl>,
}

impl ShardInfo {
    /// New shard record, deriving the key range from the shard name
    pub fn new(keyspace: impl Into<String>, shard_name: &str) -> Self {
        let key_range = parse_shard_name(shard_name).ok().and_then(|(_, range)| range);
        Self {
            keyspace: keyspace.into(),
            shard_name: shard_name.to_string(),
            key_range,
            tablet_controls: Vec::new(),
        }
    }

    /// Attach a tablet control to the record
    pub fn with_control(mut self, control: TabletControl) -> Self {
        self.tablet_controls.push(control);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_record() {
        let shard = ShardInfo::new("customer", "-80")
            .with_control(TabletControl::denying(&["orders"]));
        assert_eq!(shard.key_range, Some(KeyRange::new(vec![], vec![0x80])));
        assert_eq!(shard.tablet_controls[0].denied_tables, vec!["orders"]);

        let unsharded = ShardInfo::new("customer", "0");
        assert!(unsharded.key_range.is_none());
    }
}
