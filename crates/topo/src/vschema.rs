//! Routing rules and the serving vschema
//!
//! Routing rules steer table traffic between keyspaces while a MoveTables
//! workflow is in flight; shard routing rules do the same per shard for
//! shard-by-shard migrations. The cut-over detector reads both maps.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Table-level routing rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Table being routed
    pub from_table: String,
    /// Qualified targets ("keyspace.table"); the first one wins
    pub to_tables: Vec<String>,
}

/// Table-level routing rules in force for a cell
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRules {
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
}

impl RoutingRules {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Map of table name to its routed targets
    pub fn to_map(&self) -> HashMap<String, Vec<String>> {
        self.rules
            .iter()
            .map(|rule| (rule.from_table.clone(), rule.to_tables.clone()))
            .collect()
    }
}

/// Shard-level routing rule used by shard-by-shard migrations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRoutingRule {
    /// Keyspace traffic originates from
    pub from_keyspace: String,
    /// Keyspace traffic is routed to
    pub to_keyspace: String,
    /// Shard the rule applies to
    pub shard: String,
}

/// Shard-level routing rules in force for a cell
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRoutingRules {
    #[serde(default)]
    pub rules: Vec<ShardRoutingRule>,
}

impl ShardRoutingRules {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Map keyed by "from_keyspace.shard", valued by the target keyspace
    pub fn to_map(&self) -> HashMap<String, String> {
        self.rules
            .iter()
            .map(|rule| {
                (
                    shard_routing_rule_key(&rule.from_keyspace, &rule.shard),
                    rule.to_keyspace.clone(),
                )
            })
            .collect()
    }
}

/// Key into the shard routing rules map
pub fn shard_routing_rule_key(keyspace: &str, shard: &str) -> String {
    format!("{keyspace}.{shard}")
}

/// The slice of the serving vschema the proxy cares about
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrvVSchema {
    #[serde(default)]
    pub routing_rules: RoutingRules,
    #[serde(default)]
    pub shard_routing_rules: ShardRoutingRules,
}
