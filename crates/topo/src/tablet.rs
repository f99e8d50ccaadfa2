//! Tablet identity and query targets

use serde::{Deserialize, Serialize};

/// Role a tablet plays within its shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TabletType {
    /// Serves writes; at most one per shard
    Primary,
    /// Replicates from the primary, eligible for promotion
    Replica,
    /// Read-only replica excluded from promotion
    Rdonly,
}

impl std::fmt::Display for TabletType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TabletType::Primary => write!(f, "primary"),
            TabletType::Replica => write!(f, "replica"),
            TabletType::Rdonly => write!(f, "rdonly"),
        }
    }
}

/// Cluster-wide unique tablet identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabletAlias {
    /// Cell the tablet lives in
    pub cell: String,
    /// Unique id within the cell
    pub uid: u32,
}

impl TabletAlias {
    pub fn new(cell: impl Into<String>, uid: u32) -> Self {
        Self {
            cell: cell.into(),
            uid,
        }
    }
}

impl std::fmt::Display for TabletAlias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{:010}", self.cell, self.uid)
    }
}

/// A query routing target: one shard of a keyspace at a tablet type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Keyspace name
    pub keyspace: String,
    /// Shard name within the keyspace
    pub shard: String,
    /// Tablet type the query should land on
    pub tablet_type: TabletType,
}

impl Target {
    pub fn new(keyspace: impl Into<String>, shard: impl Into<String>, tablet_type: TabletType) -> Self {
        Self {
            keyspace: keyspace.into(),
            shard: shard.into(),
            tablet_type,
        }
    }

    /// Shorthand for a primary target
    pub fn primary(keyspace: impl Into<String>, shard: impl Into<String>) -> Self {
        Self::new(keyspace, shard, TabletType::Primary)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} ({})", self.keyspace, self.shard, self.tablet_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(TabletAlias::new("aa", 101).to_string(), "aa-0000000101");
        assert_eq!(
            Target::primary("ks", "-80").to_string(),
            "ks/-80 (primary)"
        );
    }
}
