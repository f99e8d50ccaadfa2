//! MoveTables cut-over detection
//!
//! A MoveTables workflow migrates tables between keyspaces (regular) or
//! shard by shard. While one is in flight the keyspace cannot be declared
//! consistent; the detector classifies the workflow from the routing rules
//! and the denied tables recorded on each tracked shard.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::info;

use topo::{shard_routing_rule_key, ShardInfo, SrvTopoServer, SrvVSchema, TopoError};

/// Kind of MoveTables workflow in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveTablesType {
    /// No workflow in flight
    None,
    /// Tables moving between keyspaces
    Regular,
    /// Tables moving shard by shard
    ShardByShard,
}

impl Default for MoveTablesType {
    fn default() -> Self {
        Self::None
    }
}

impl std::fmt::Display for MoveTablesType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MoveTablesType::None => write!(f, "None"),
            MoveTablesType::Regular => write!(f, "Regular"),
            MoveTablesType::ShardByShard => write!(f, "ShardByShard"),
        }
    }
}

/// How far the write cut-over has progressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveTablesStatus {
    /// Not determined
    Unknown,
    /// Write traffic is mid-switch from source to target
    Switching,
    /// Write traffic has fully switched to the target
    Switched,
}

impl Default for MoveTablesStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for MoveTablesStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MoveTablesStatus::Unknown => write!(f, "Unknown"),
            MoveTablesStatus::Switching => write!(f, "Switching"),
            MoveTablesStatus::Switched => write!(f, "Switched"),
        }
    }
}

/// Classification of an in-flight MoveTables workflow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveTablesState {
    pub typ: MoveTablesType,
    pub state: MoveTablesStatus,
}

impl MoveTablesState {
    /// Whether no workflow is in flight
    pub fn is_none(&self) -> bool {
        self.typ == MoveTablesType::None
    }
}

impl std::fmt::Display for MoveTablesState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{Type: {}, State: {}}}", self.typ, self.state)
    }
}

/// Classify the MoveTables workflow touching `keyspace`, if any.
///
/// Shard records for every tracked shard are fetched in parallel under one
/// shared deadline; the first failed fetch cancels the rest.
pub(crate) async fn get_move_tables_status(
    ts: &Arc<dyn SrvTopoServer>,
    keyspace: &str,
    shards: &[String],
    vs: &SrvVSchema,
    timeout: Duration,
) -> Result<MoveTablesState, TopoError> {
    let mut mt_state = MoveTablesState::default();

    // No routing rules at all means no MoveTables is in progress.
    if vs.routing_rules.is_empty() && vs.shard_routing_rules.is_empty() {
        return Ok(mt_state);
    }

    let shard_infos = fetch_shard_records(ts, keyspace, shards, timeout).await?;

    // Record the shards with denied tables, and one denied table to look up
    // in the routing rules.
    let mut shards_with_denied_tables = Vec::new();
    let mut one_denied_table = None;
    for info in &shard_infos {
        for control in &info.tablet_controls {
            if !control.denied_tables.is_empty() {
                one_denied_table = Some(control.denied_tables[0].clone());
                shards_with_denied_tables.push(info.shard_name.clone());
            }
        }
    }
    let Some(one_denied_table) = one_denied_table else {
        return Ok(mt_state);
    };

    // Shard routing rules mean a shard-by-shard migration.
    if !vs.shard_routing_rules.is_empty() {
        let srr = vs.shard_routing_rules.to_map();
        mt_state.typ = MoveTablesType::ShardByShard;
        mt_state.state = MoveTablesStatus::Switched;
        for shard in &shards_with_denied_tables {
            if srr.contains_key(&shard_routing_rule_key(keyspace, shard)) {
                // Still pointing to the source shard.
                mt_state.state = MoveTablesStatus::Switching;
                break;
            }
        }
        info!(
            "keyspace {} declaring shard by shard move tables {}",
            keyspace, mt_state
        );
        return Ok(mt_state);
    }

    // Denied tables without shard routing rules mean a regular MoveTables.
    mt_state.typ = MoveTablesType::Regular;
    mt_state.state = MoveTablesStatus::Switching;
    let rr = vs.routing_rules.to_map();
    if let Some(targets) = rr.get(&one_denied_table) {
        // A rule routing the table away from this keyspace means writes
        // have been switched to the target.
        let source = format!("{keyspace}.{one_denied_table}");
        if targets.first().is_some_and(|target| *target != source) {
            mt_state.state = MoveTablesStatus::Switched;
            info!(
                "keyspace {} writes have been switched for table {}",
                keyspace, one_denied_table
            );
        }
    }
    info!(
        "keyspace {} declaring regular move tables {}",
        keyspace, mt_state
    );
    Ok(mt_state)
}

async fn fetch_shard_records(
    ts: &Arc<dyn SrvTopoServer>,
    keyspace: &str,
    shards: &[String],
    timeout: Duration,
) -> Result<Vec<ShardInfo>, TopoError> {
    let mut set = JoinSet::new();
    for shard in shards {
        let ts = Arc::clone(ts);
        let keyspace = keyspace.to_string();
        let shard = shard.clone();
        set.spawn(async move { ts.get_shard(&keyspace, &shard).await });
    }

    let collect = async {
        let mut infos = Vec::with_capacity(shards.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(info)) => infos.push(info),
                Ok(Err(err)) => {
                    set.abort_all();
                    return Err(err);
                }
                Err(err) => {
                    set.abort_all();
                    return Err(TopoError::Interrupted(err.to_string()));
                }
            }
        }
        Ok(infos)
    };

    tokio::time::timeout(timeout, collect)
        .await
        .map_err(|_| TopoError::Timeout(format!("fetching shard records for {keyspace}")))?
}
