//! In-memory topology server
//!
//! Backs tests and single-process deployments. Mutators update the stored
//! records and fan the change out to live watchers, mirroring how an etcd
//! backed implementation delivers watch events.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use crate::{
    ShardInfo, SrvKeyspace, SrvKeyspaceUpdate, SrvTopoServer, SrvVSchema, SrvVSchemaUpdate,
    TopoError,
};

const WATCH_CHANNEL_SIZE: usize = 32;

/// In-memory implementation of [`SrvTopoServer`]
#[derive(Clone, Default)]
pub struct MemoryTopoServer {
    inner: Arc<Mutex<MemoryTopoState>>,
}

#[derive(Default)]
struct MemoryTopoState {
    // (cell, keyspace) -> serving record
    srv_keyspaces: HashMap<(String, String), SrvKeyspace>,
    // cell -> serving vschema
    srv_vschemas: HashMap<String, SrvVSchema>,
    // (keyspace, shard) -> global record
    shards: HashMap<(String, String), ShardInfo>,
    // (keyspace, shard) -> forced fetch failure
    shard_errors: HashMap<(String, String), TopoError>,
    keyspace_watchers: HashMap<(String, String), Vec<mpsc::Sender<SrvKeyspaceUpdate>>>,
    vschema_watchers: HashMap<String, Vec<mpsc::Sender<SrvVSchemaUpdate>>>,
}

impl MemoryTopoServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace a SrvKeyspace record and notify watchers
    pub fn update_srv_keyspace(&self, cell: &str, keyspace: &str, srv: SrvKeyspace) {
        let mut state = self.inner.lock();
        let key = (cell.to_string(), keyspace.to_string());
        state.srv_keyspaces.insert(key.clone(), srv.clone());
        notify(state.keyspace_watchers.get_mut(&key), Ok(srv));
    }

    /// Delete a keyspace; watchers observe a NoNode error
    pub fn delete_srv_keyspace(&self, cell: &str, keyspace: &str) {
        let mut state = self.inner.lock();
        let key = (cell.to_string(), keyspace.to_string());
        state.srv_keyspaces.remove(&key);
        notify(
            state.keyspace_watchers.get_mut(&key),
            Err(TopoError::NoNode(format!("{cell}/{keyspace}"))),
        );
    }

    /// Deliver a transient error to keyspace watchers without touching the
    /// stored record
    pub fn inject_keyspace_error(&self, cell: &str, keyspace: &str, err: TopoError) {
        let mut state = self.inner.lock();
        let key = (cell.to_string(), keyspace.to_string());
        notify(state.keyspace_watchers.get_mut(&key), Err(err));
    }

    /// Install the cell-wide vschema and notify watchers
    pub fn update_srv_vschema(&self, cell: &str, vs: SrvVSchema) {
        let mut state = self.inner.lock();
        state.srv_vschemas.insert(cell.to_string(), vs.clone());
        notify(state.vschema_watchers.get_mut(cell), Ok(vs));
    }

    /// Install or replace a global shard record
    pub fn upsert_shard(&self, info: ShardInfo) {
        let mut state = self.inner.lock();
        state
            .shards
            .insert((info.keyspace.clone(), info.shard_name.clone()), info);
    }

    /// Force get_shard calls for this shard to fail
    pub fn set_shard_error(&self, keyspace: &str, shard: &str, err: TopoError) {
        let mut state = self.inner.lock();
        state
            .shard_errors
            .insert((keyspace.to_string(), shard.to_string()), err);
    }

    /// Clear a forced get_shard failure
    pub fn clear_shard_error(&self, keyspace: &str, shard: &str) {
        let mut state = self.inner.lock();
        state
            .shard_errors
            .remove(&(keyspace.to_string(), shard.to_string()));
    }
}

fn notify<T: Clone>(
    senders: Option<&mut Vec<mpsc::Sender<Result<T, TopoError>>>>,
    update: Result<T, TopoError>,
) {
    let Some(senders) = senders else {
        return;
    };
    senders.retain(|tx| match tx.try_send(update.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("topo watch channel full, dropping update");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    });
}

#[async_trait]
impl SrvTopoServer for MemoryTopoServer {
    async fn get_srv_keyspace_names(
        &self,
        cell: &str,
        _stale_ok: bool,
    ) -> Result<Vec<String>, TopoError> {
        let state = self.inner.lock();
        let mut names: Vec<String> = state
            .srv_keyspaces
            .keys()
            .filter(|(c, _)| c == cell)
            .map(|(_, keyspace)| keyspace.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn get_shard(&self, keyspace: &str, shard: &str) -> Result<ShardInfo, TopoError> {
        let state = self.inner.lock();
        let key = (keyspace.to_string(), shard.to_string());
        if let Some(err) = state.shard_errors.get(&key) {
            return Err(err.clone());
        }
        state
            .shards
            .get(&key)
            .cloned()
            .ok_or_else(|| TopoError::NoNode(format!("{keyspace}/{shard}")))
    }

    fn watch_srv_keyspace(&self, cell: &str, keyspace: &str) -> mpsc::Receiver<SrvKeyspaceUpdate> {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_SIZE);
        let mut state = self.inner.lock();
        let key = (cell.to_string(), keyspace.to_string());
        // The current value is delivered first; a missing node surfaces as
        // NoNode, exactly as a consensus-store watch would report it.
        match state.srv_keyspaces.get(&key) {
            Some(current) => {
                let _ = tx.try_send(Ok(current.clone()));
            }
            None => {
                let _ = tx.try_send(Err(TopoError::NoNode(format!("{cell}/{keyspace}"))));
            }
        }
        state.keyspace_watchers.entry(key).or_default().push(tx);
        rx
    }

    fn watch_srv_vschema(&self, cell: &str) -> mpsc::Receiver<SrvVSchemaUpdate> {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_SIZE);
        let mut state = self.inner.lock();
        if let Some(current) = state.srv_vschemas.get(cell) {
            let _ = tx.try_send(Ok(current.clone()));
        }
        state
            .vschema_watchers
            .entry(cell.to_string())
            .or_default()
            .push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::srv_keyspace::KeyspacePartition;
    use crate::tablet::TabletType;

    fn srv_with_primary(shards: &[&str]) -> SrvKeyspace {
        SrvKeyspace {
            partitions: vec![KeyspacePartition::new(TabletType::Primary, shards)],
        }
    }

    #[tokio::test]
    async fn test_watch_delivers_current_then_updates() {
        let ts = MemoryTopoServer::new();
        ts.update_srv_keyspace("aa", "ks", srv_with_primary(&["0"]));

        let mut rx = ts.watch_srv_keyspace("aa", "ks");
        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.partitions[0].shard_references[0].name, "0");

        ts.update_srv_keyspace("aa", "ks", srv_with_primary(&["-80", "80-"]));
        let second = rx.recv().await.unwrap().unwrap();
        assert_eq!(second.partitions[0].shard_references.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_yields_no_node() {
        let ts = MemoryTopoServer::new();
        ts.update_srv_keyspace("aa", "ks", srv_with_primary(&["0"]));

        let mut rx = ts.watch_srv_keyspace("aa", "ks");
        rx.recv().await.unwrap().unwrap();

        ts.delete_srv_keyspace("aa", "ks");
        let update = rx.recv().await.unwrap();
        assert!(update.unwrap_err().is_no_node());
    }

    #[tokio::test]
    async fn test_watch_missing_keyspace_yields_no_node() {
        let ts = MemoryTopoServer::new();
        let mut rx = ts.watch_srv_keyspace("aa", "nope");
        assert!(rx.recv().await.unwrap().unwrap_err().is_no_node());
    }

    #[tokio::test]
    async fn test_get_shard() {
        let ts = MemoryTopoServer::new();
        ts.upsert_shard(ShardInfo::new("ks", "-80"));

        assert!(ts.get_shard("ks", "-80").await.is_ok());
        assert!(ts.get_shard("ks", "80-").await.unwrap_err().is_no_node());

        ts.set_shard_error("ks", "-80", TopoError::Timeout("forced".into()));
        assert_eq!(
            ts.get_shard("ks", "-80").await,
            Err(TopoError::Timeout("forced".into()))
        );
    }

    #[tokio::test]
    async fn test_keyspace_names_scoped_to_cell() {
        let ts = MemoryTopoServer::new();
        ts.update_srv_keyspace("aa", "ks1", srv_with_primary(&["0"]));
        ts.update_srv_keyspace("aa", "ks2", srv_with_primary(&["0"]));
        ts.update_srv_keyspace("bb", "ks3", srv_with_primary(&["0"]));

        let names = ts.get_srv_keyspace_names("aa", true).await.unwrap();
        assert_eq!(names, vec!["ks1", "ks2"]);
    }
}
