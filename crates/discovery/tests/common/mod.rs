// Shared fixtures for the keyspace event watcher integration tests.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use discovery::{
    EventSubscription, HealthCheck, IdentifierCache, KeyspaceEvent, KeyspaceEventWatcher,
    KeyspaceEventWatcherConfig, TabletHealth,
};
use topo::{
    KeyspacePartition, MemoryTopoServer, SrvKeyspace, TabletAlias, TabletType, Target,
};

pub const CELL: &str = "aa";

const HEALTH_CHANNEL_SIZE: usize = 64;

/// Health stream stub: fans broadcast reports out to every subscriber.
pub struct MockHealthCheck {
    subscribers: Mutex<Vec<mpsc::Sender<TabletHealth>>>,
}

impl MockHealthCheck {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Deliver one health report to every subscriber.
    pub async fn broadcast(&self, th: TabletHealth) {
        let senders = self.subscribers.lock().clone();
        for tx in senders {
            let _ = tx.send(th.clone()).await;
        }
    }
}

impl HealthCheck for MockHealthCheck {
    fn subscribe(&self, _name: &str) -> mpsc::Receiver<TabletHealth> {
        let (tx, rx) = mpsc::channel(HEALTH_CHANNEL_SIZE);
        self.subscribers.lock().push(tx);
        rx
    }
}

/// Sidecar cache stub recording every eviction.
#[derive(Default)]
pub struct RecordingCache {
    deletes: Mutex<Vec<String>>,
}

impl RecordingCache {
    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().clone()
    }
}

impl IdentifierCache for RecordingCache {
    fn delete(&self, keyspace: &str) {
        self.deletes.lock().push(keyspace.to_string());
    }
}

pub struct TestCluster {
    pub topo: MemoryTopoServer,
    pub health: Arc<MockHealthCheck>,
    pub kew: Arc<KeyspaceEventWatcher>,
    pub cache: Arc<RecordingCache>,
}

/// Fresh watcher over an empty in-memory topology, with test-sized timeouts.
pub fn setup_watcher() -> TestCluster {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let topo = MemoryTopoServer::new();
    let health = Arc::new(MockHealthCheck::new());
    let cache = Arc::new(RecordingCache::default());
    let config = KeyspaceEventWatcherConfig {
        consistency_check_interval: Duration::from_millis(20),
        remote_operation_timeout: Duration::from_secs(5),
    };
    let health_handle: Arc<dyn HealthCheck> = health.clone();
    let cache_handle: Arc<dyn IdentifierCache> = cache.clone();
    let kew = KeyspaceEventWatcher::new(
        Arc::new(topo.clone()),
        health_handle,
        CELL,
        Some(cache_handle),
        config,
    );
    TestCluster {
        topo,
        health,
        kew,
        cache,
    }
}

/// SrvKeyspace with a primary partition over the given shards.
pub fn srv_keyspace_with_primary(shards: &[&str]) -> SrvKeyspace {
    SrvKeyspace {
        partitions: vec![KeyspacePartition::new(TabletType::Primary, shards)],
    }
}

/// Serving report from the primary of `keyspace/shard`.
pub fn primary_health(
    keyspace: &str,
    shard: &str,
    uid: u32,
    serving: bool,
    term: i64,
) -> TabletHealth {
    TabletHealth {
        target: Target::primary(keyspace, shard),
        tablet: TabletAlias::new(CELL, uid),
        serving,
        primary_term_start_time: term,
    }
}

/// Serving report from a replica; the watcher must ignore these.
pub fn replica_health(keyspace: &str, shard: &str, uid: u32, serving: bool) -> TabletHealth {
    TabletHealth {
        target: Target::new(keyspace, shard, TabletType::Replica),
        tablet: TabletAlias::new(CELL, uid),
        serving,
        primary_term_start_time: 0,
    }
}

/// Next event from the subscription, failing the test after five seconds.
pub async fn recv_event(subscription: &mut EventSubscription) -> KeyspaceEvent {
    tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .expect("timed out waiting for keyspace event")
        .expect("event stream closed")
}
