//! Keyspace event watcher
//!
//! Watches every availability incident in one cell and tells subscribers
//! when an incident has resolved: the end of planned and unplanned
//! failovers, of resharding cut-overs, and of MoveTables write switches.
//!
//! The watcher reconciles two streams that disagree during an incident: the
//! peer-to-peer health stream (authoritative for which shards are serving)
//! and the topology server (authoritative for which shards should exist).
//! A keyspace is consistent only when both agree and no workflow is in
//! flight; the transition back to consistent is broadcast exactly once.

use std::collections::{hash_map::Entry, HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use topo::{
    SrvKeyspace, SrvKeyspaceUpdate, SrvTopoServer, SrvVSchemaUpdate, TabletAlias, TabletType,
    Target, TopoError,
};

use crate::health::{HealthCheck, TabletHealth};
use crate::move_tables::{get_move_tables_status, MoveTablesState, MoveTablesStatus, MoveTablesType};
use crate::sidecar::IdentifierCache;

/// Subscriber name the watcher registers on the health stream
pub const KEW_HEALTHCHECK_SUBSCRIBER: &str = "KeyspaceEventWatcher";

// Big enough to absorb a burst of resolutions without losing ordering;
// subscribers must still drain or broadcasts stall.
const EVENT_CHANNEL_SIZE: usize = 10;

/// Watcher configuration
#[derive(Debug, Clone)]
pub struct KeyspaceEventWatcherConfig {
    /// Cadence of re-checks in [`KeyspaceEventWatcher::wait_for_consistent_keyspaces`]
    pub consistency_check_interval: Duration,
    /// Deadline shared by the parallel shard fetches of the MoveTables detector
    pub remote_operation_timeout: Duration,
}

impl Default for KeyspaceEventWatcherConfig {
    fn default() -> Self {
        Self {
            consistency_check_interval: Duration::from_millis(100),
            remote_operation_timeout: topo::REMOTE_OPERATION_TIMEOUT,
        }
    }
}

/// Errors surfaced by the watcher's public surface
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatcherError {
    /// The wait was cancelled before every keyspace became consistent
    #[error("cancelled while waiting for keyspaces to become consistent: {0:?}")]
    WaitCancelled(Vec<String>),
}

/// Snapshot of one shard at resolution time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardEvent {
    /// Identity of the shard's current primary, if one was ever observed
    pub tablet: Option<TabletAlias>,
    /// The shard's target
    pub target: Target,
    /// Whether the shard resolved as serving
    pub serving: bool,
}

/// Broadcast to every subscriber when a keyspace availability incident has
/// been resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyspaceEvent {
    /// Cell the keyspace lives in
    pub cell: String,
    /// The keyspace that was (partially) unavailable and is now healthy
    pub keyspace: String,
    /// Every tracked shard with its state after resolution
    pub shards: Vec<ShardEvent>,
    /// State of the MoveTables workflow the resolution closes, if any
    pub move_tables_state: MoveTablesState,
}

/// Stream of resolved keyspace events handed to one subscriber
pub struct EventSubscription {
    id: u64,
    receiver: mpsc::Receiver<KeyspaceEvent>,
}

impl EventSubscription {
    /// Next resolved event; None once the watcher shuts down
    pub async fn recv(&mut self) -> Option<KeyspaceEvent> {
        self.receiver.recv().await
    }

    /// Non-blocking poll, for drain loops
    pub fn try_recv(&mut self) -> Result<KeyspaceEvent, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }
}

/// Fan-out registry for resolved keyspace events
struct SubscriberRegistry {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(u64, mpsc::Sender<KeyspaceEvent>)>>,
}

impl SubscriberRegistry {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn subscribe(&self) -> EventSubscription {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, tx));
        EventSubscription { id, receiver: rx }
    }

    fn unsubscribe(&self, subscription: &EventSubscription) {
        self.subscribers
            .lock()
            .retain(|(id, _)| *id != subscription.id);
    }

    /// Deliver one event to every subscriber. Sends block once a subscriber
    /// falls a full buffer behind; losing a resolution is worse than a stall.
    async fn broadcast(&self, event: &KeyspaceEvent) {
        let senders = self.subscribers.lock().clone();
        let mut closed = Vec::new();
        for (id, tx) in &senders {
            if tx.send(event.clone()).await.is_err() {
                closed.push(*id);
            }
        }
        if !closed.is_empty() {
            self.subscribers
                .lock()
                .retain(|(id, _)| !closed.contains(id));
        }
    }
}

/// Running view of one shard, tracked only for primaries
#[derive(Debug)]
struct ShardState {
    target: Target,
    serving: bool,
    // While set, a serving report from the incumbent primary is ignored
    // unless it carries a strictly newer term start.
    wait_for_reparent: bool,
    externally_reparented: i64,
    current_primary: Option<TabletAlias>,
}

impl ShardState {
    fn new(target: Target) -> Self {
        Self {
            target,
            serving: false,
            wait_for_reparent: false,
            externally_reparented: 0,
            current_primary: None,
        }
    }
}

struct KeyspaceStateInner {
    consistent: bool,
    last_error: Option<TopoError>,
    last_keyspace: Option<SrvKeyspace>,
    shards: HashMap<String, ShardState>,
    move_tables_state: Option<MoveTablesState>,
}

/// Per-keyspace aggregate: owns the shard map, the last topology snapshot
/// and the consistency bit, and hosts the reconciliation routine.
struct KeyspaceState {
    cell: String,
    keyspace: String,
    ts: Arc<dyn SrvTopoServer>,
    subscribers: Arc<SubscriberRegistry>,
    remote_operation_timeout: Duration,
    deleted: AtomicBool,
    inner: tokio::sync::Mutex<KeyspaceStateInner>,
}

impl KeyspaceState {
    fn new(
        ts: Arc<dyn SrvTopoServer>,
        subscribers: Arc<SubscriberRegistry>,
        cell: String,
        keyspace: String,
        remote_operation_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Arc<Self> {
        info!("created dedicated watcher for keyspace {}/{}", cell, keyspace);
        let kss = Arc::new(Self {
            cell,
            keyspace,
            ts,
            subscribers,
            remote_operation_timeout,
            deleted: AtomicBool::new(false),
            inner: tokio::sync::Mutex::new(KeyspaceStateInner {
                consistent: false,
                last_error: None,
                last_keyspace: None,
                shards: HashMap::new(),
                move_tables_state: None,
            }),
        });
        kss.start_watchers(cancel);
        kss
    }

    /// Spawn the topology watch consumers. Each one drives its callback
    /// serially, so per-keyspace updates stay ordered.
    fn start_watchers(self: &Arc<Self>, cancel: &CancellationToken) {
        let mut keyspace_rx = self.ts.watch_srv_keyspace(&self.cell, &self.keyspace);
        let kss = Arc::clone(self);
        let token = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    update = keyspace_rx.recv() => match update {
                        Some(update) => {
                            if !kss.on_srv_keyspace(update).await {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        let mut vschema_rx = self.ts.watch_srv_vschema(&self.cell);
        let kss = Arc::clone(self);
        let token = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    update = vschema_rx.recv() => match update {
                        Some(update) => {
                            if !kss.on_srv_vschema(update).await {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });
    }

    fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    async fn is_consistent(&self) -> bool {
        self.inner.lock().await.consistent
    }

    /// Whether at least one tracked shard is serving
    async fn is_serving(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.shards.values().any(|sstate| sstate.serving)
    }

    /// Updates this keyspace with one report from the health stream.
    async fn on_health_check(&self, th: &TabletHealth) {
        // Only primary health reports drive availability tracking.
        if th.target.tablet_type != TabletType::Primary {
            return;
        }

        let mut guard = self.inner.lock().await;
        let state = &mut *guard;

        let sstate = match state.shards.entry(th.target.shard.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                // A non-serving report for a shard we have never seen does
                // not start tracking; tracking begins when it serves.
                if !th.serving {
                    return;
                }
                entry.insert(ShardState::new(th.target.clone()))
            }
        };

        // A serving flip in either direction is an availability event.
        if sstate.serving != th.serving {
            state.consistent = false;
            match (th.serving, sstate.wait_for_reparent) {
                (true, true) => {
                    // Accept serving from the incumbent only with a strictly
                    // newer primary term; the demoted primary may still
                    // report serving before it is turned read-only.
                    if th.primary_term_start_time > sstate.externally_reparented {
                        sstate.wait_for_reparent = false;
                        sstate.serving = true;
                    }
                }
                (true, false) => sstate.serving = true,
                (false, _) => sstate.serving = false,
            }
        }
        if !th.serving {
            // A non-serving report from the incumbent means no serving
            // report will arrive from it until the reparent finishes.
            sstate.wait_for_reparent = false;
        }

        // A newer primary term means an external reparent: track the new
        // primary and treat the failover as an availability event.
        if th.primary_term_start_time != 0
            && th.primary_term_start_time > sstate.externally_reparented
        {
            sstate.externally_reparented = th.primary_term_start_time;
            sstate.current_primary = Some(th.tablet.clone());
            state.consistent = false;
        }

        self.ensure_consistent(state).await;
    }

    /// Updates this keyspace with fresh topology data. Returns false when
    /// the watch should stop (the keyspace was deleted).
    async fn on_srv_keyspace(&self, update: SrvKeyspaceUpdate) -> bool {
        let new_keyspace = match update {
            Err(err) if err.is_no_node() => {
                // NoNode means the keyspace was removed from the cluster;
                // the parent map evicts it on the next lookup.
                self.deleted.store(true, Ordering::Release);
                info!("keyspace {} deleted", self.keyspace);
                return false;
            }
            Err(err) => {
                // Assumed temporary and related to the topology server, not
                // the keyspace itself; keep watching.
                error!("error while watching keyspace {}: {}", self.keyspace, err);
                self.inner.lock().await.last_error = Some(err);
                return true;
            }
            Ok(new_keyspace) => new_keyspace,
        };

        let mut guard = self.inner.lock().await;
        if guard.last_keyspace.as_ref() == Some(&new_keyspace) {
            // Same snapshot redelivered by the watch; nothing to do.
            return true;
        }

        // Only a change in the PRIMARY partition marks the keyspace
        // inconsistent; the whole snapshot is stored either way.
        let primary_changed = guard
            .last_keyspace
            .as_ref()
            .and_then(|ks| ks.partition(TabletType::Primary))
            != new_keyspace.partition(TabletType::Primary);
        if primary_changed {
            guard.consistent = false;
        }
        guard.last_keyspace = Some(new_keyspace);

        self.ensure_consistent(&mut guard).await;
        true
    }

    /// Updates this keyspace with a fresh vschema, re-running MoveTables
    /// detection. Always keeps the watch running.
    async fn on_srv_vschema(&self, update: SrvVSchemaUpdate) -> bool {
        let vs = match update {
            Ok(vs) => vs,
            Err(err) => {
                // Transient vschema watch errors never fail the callback.
                error!(
                    "error while watching vschema for keyspace {}: {}",
                    self.keyspace, err
                );
                return true;
            }
        };

        // Snapshot the tracked shard names so the parallel record fetches
        // run without the keyspace lock held.
        let shard_names: Vec<String> = {
            let guard = self.inner.lock().await;
            guard.shards.keys().cloned().collect()
        };
        let status = get_move_tables_status(
            &self.ts,
            &self.keyspace,
            &shard_names,
            &vs,
            self.remote_operation_timeout,
        )
        .await;

        let mut guard = self.inner.lock().await;
        match status {
            Ok(state) => guard.move_tables_state = Some(state),
            Err(err) => {
                // Keep the previous classification; staying inconsistent is
                // the safe direction.
                error!(
                    "keyspace {} failed to get move tables status: {}",
                    self.keyspace, err
                );
            }
        }
        if guard
            .move_tables_state
            .is_some_and(|state| state.typ != MoveTablesType::None)
        {
            // An in-flight workflow keeps the keyspace inconsistent until
            // the detector observes it switched.
            guard.consistent = false;
            self.ensure_consistent(&mut guard).await;
        }
        true
    }

    /// Re-evaluates whether the keyspace has recovered from an availability
    /// event, and if so broadcasts the resolution to every subscriber.
    /// Caller must hold the keyspace lock.
    async fn ensure_consistent(&self, state: &mut KeyspaceStateInner) {
        // A consistent keyspace has no ongoing availability event.
        if state.consistent {
            return;
        }

        if let Some(mts) = state.move_tables_state {
            if mts.typ != MoveTablesType::None && mts.state != MoveTablesStatus::Switched {
                return;
            }
        }

        // The topology watcher refreshes last_keyspace on every change, so
        // the primary partition here is the authoritative membership view.
        let Some(primary) = state
            .last_keyspace
            .as_ref()
            .and_then(|ks| ks.partition(TabletType::Primary))
        else {
            return;
        };
        // Active tablet controls mean a topology change is still in flight.
        if !primary.shard_tablet_controls.is_empty() {
            return;
        }

        // Every shard the partition names must be tracked and serving.
        let mut active_shards_in_partition = HashSet::with_capacity(primary.shard_references.len());
        for shard_ref in &primary.shard_references {
            match state.shards.get(&shard_ref.name) {
                Some(sstate) if sstate.serving => {
                    active_shards_in_partition.insert(shard_ref.name.as_str());
                }
                _ => return,
            }
        }

        // And every serving shard must be named by the partition; a healthy
        // shard the topology hasn't caught up with keeps the event open.
        for (shard, sstate) in &state.shards {
            if sstate.serving && !active_shards_in_partition.contains(shard.as_str()) {
                return;
            }
        }

        // Copy the workflow state before clearing it so the event carries it.
        let move_tables_state = state.move_tables_state.unwrap_or_default();

        state.consistent = true;
        state.move_tables_state = None;
        info!("keyspace {} is now consistent", self.keyspace);

        let mut shard_events: Vec<ShardEvent> = state
            .shards
            .values()
            .map(|sstate| ShardEvent {
                tablet: sstate.current_primary.clone(),
                target: sstate.target.clone(),
                serving: sstate.serving,
            })
            .collect();
        shard_events.sort_by(|a, b| a.target.shard.cmp(&b.target.shard));
        for event in &shard_events {
            debug!(
                "keyspace event resolved: {}/{} is now consistent (serving: {})",
                event.target.keyspace, event.target.shard, event.serving
            );
        }

        // Shards that resolved as non-serving stop being tracked; they are
        // re-added if they report healthy again.
        state.shards.retain(|_, sstate| sstate.serving);

        let event = KeyspaceEvent {
            cell: self.cell.clone(),
            keyspace: self.keyspace.clone(),
            shards: shard_events,
            move_tables_state,
        };
        self.subscribers.broadcast(&event).await;
    }

    /// Whether this keyspace looks mid-resharding from the perspective of
    /// `current_shard` (which must be a primary shard).
    async fn being_resharded(&self, current_shard: &str) -> bool {
        let inner = self.inner.lock().await;

        // A gone keyspace, a quiet one, or one mid-MoveTables is not
        // resharding.
        if self.is_deleted()
            || inner.consistent
            || inner
                .move_tables_state
                .is_some_and(|state| state.typ != MoveTablesType::None)
        {
            return false;
        }

        // Overlapping shards serving at the same time are the signature of
        // a reshard in progress.
        let Ok((_, Some(current_range))) = topo::parse_shard_name(current_shard) else {
            return false;
        };
        for (shard, sstate) in &inner.shards {
            if !sstate.serving || shard == current_shard {
                continue;
            }
            let Ok((_, Some(range))) = topo::parse_shard_name(shard) else {
                return false;
            };
            if current_range.intersects(&range) {
                return true;
            }
        }
        false
    }

    /// Append a human-readable snapshot of this keyspace to `out`.
    async fn format_into(&self, out: &mut String) {
        let inner = self.inner.lock().await;
        let _ = writeln!(
            out,
            "Keyspace({}) = deleted: {}, consistent: {}, last_error: {:?}, shards: [",
            self.keyspace,
            self.is_deleted(),
            inner.consistent,
            inner.last_error
        );
        let mut shards: Vec<_> = inner.shards.iter().collect();
        shards.sort_by_key(|(shard, _)| shard.as_str());
        for (shard, sstate) in shards {
            let primary = sstate
                .current_primary
                .as_ref()
                .map(|alias| alias.to_string())
                .unwrap_or_else(|| "<none>".to_string());
            let _ = writeln!(
                out,
                "  Shard({}) = target: {}, serving: {}, externally_reparented: {}, current_primary: {}",
                shard, sstate.target, sstate.serving, sstate.externally_reparented, primary
            );
        }
        out.push_str("]\n");
    }
}

/// Watches all availability incidents for all keyspaces in one cell and
/// notifies subscribers when each incident has resolved.
///
/// Consolidates [`TabletHealth`] events from the health stream (peer to
/// peer, fast, noisy) with events from the topology server (global,
/// authoritative, slower).
pub struct KeyspaceEventWatcher {
    ts: Arc<dyn SrvTopoServer>,
    local_cell: String,
    config: KeyspaceEventWatcherConfig,
    keyspaces: Mutex<HashMap<String, Arc<KeyspaceState>>>,
    subscribers: Arc<SubscriberRegistry>,
    sidecar_cache: Option<Arc<dyn IdentifierCache>>,
    cancel: CancellationToken,
}

impl KeyspaceEventWatcher {
    /// Start a new watcher for all keyspace events in the given cell.
    ///
    /// Requires the topology server, an existing health check used to
    /// detect unhealthy nodes, and optionally the sidecar identifier cache
    /// to evict on keyspace deletion.
    pub fn new(
        ts: Arc<dyn SrvTopoServer>,
        hc: Arc<dyn HealthCheck>,
        local_cell: impl Into<String>,
        sidecar_cache: Option<Arc<dyn IdentifierCache>>,
        config: KeyspaceEventWatcherConfig,
    ) -> Arc<Self> {
        let local_cell = local_cell.into();
        let kew = Arc::new(Self {
            ts,
            local_cell: local_cell.clone(),
            config,
            keyspaces: Mutex::new(HashMap::new()),
            subscribers: Arc::new(SubscriberRegistry::new()),
            sidecar_cache,
            cancel: CancellationToken::new(),
        });
        kew.run(hc);
        info!("started watching keyspace events in {:?}", local_cell);
        kew
    }

    fn run(self: &Arc<Self>, hc: Arc<dyn HealthCheck>) {
        // Health consumer: muxes every TabletHealth into its keyspace.
        let mut health_rx = hc.subscribe(KEW_HEALTHCHECK_SUBSCRIBER);
        let kew = Arc::clone(self);
        let token = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    result = health_rx.recv() => match result {
                        Some(th) => kew.process_health_check(&th).await,
                        None => break,
                    },
                }
            }
        });

        // Seed the keyspace statuses once at startup.
        let kew = Arc::clone(self);
        tokio::spawn(async move {
            match kew.ts.get_srv_keyspace_names(&kew.local_cell, true).await {
                Ok(keyspaces) => {
                    for keyspace in keyspaces {
                        kew.get_keyspace_status(&keyspace);
                    }
                }
                Err(err) => {
                    error!(
                        "keyspace event watcher: initialize failed for cell {:?}: {}",
                        kew.local_cell, err
                    );
                }
            }
        });
    }

    /// Stop all background tasks. The watcher stops producing events but
    /// its query surface keeps answering from the last known state.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn process_health_check(&self, th: &TabletHealth) {
        let Some(kss) = self.get_keyspace_status(&th.target.keyspace) else {
            return;
        };
        kss.on_health_check(th).await;
    }

    /// The state for the given keyspace, allocated (and its topology
    /// watchers started) on first sight. Returns None for a deleted
    /// keyspace, evicting it and notifying the sidecar cache.
    fn get_keyspace_status(&self, keyspace: &str) -> Option<Arc<KeyspaceState>> {
        let mut keyspaces = self.keyspaces.lock();
        let kss = keyspaces
            .entry(keyspace.to_string())
            .or_insert_with(|| {
                KeyspaceState::new(
                    Arc::clone(&self.ts),
                    Arc::clone(&self.subscribers),
                    self.local_cell.clone(),
                    keyspace.to_string(),
                    self.config.remote_operation_timeout,
                    &self.cancel,
                )
            })
            .clone();
        if kss.is_deleted() {
            keyspaces.remove(keyspace);
            // Errors from the cache mean the entry was already gone, which
            // is the common case.
            if let Some(cache) = &self.sidecar_cache {
                cache.delete(keyspace);
            }
            return None;
        }
        Some(kss)
    }

    /// Returns a subscription receiving every [`KeyspaceEvent`] for all
    /// keyspaces in the cell. The caller must drain it or unsubscribe.
    pub fn subscribe(&self) -> EventSubscription {
        self.subscribers.subscribe()
    }

    /// Removes a subscription previously returned from [`Self::subscribe`].
    /// Idempotent; closes nothing.
    pub fn unsubscribe(&self, subscription: &EventSubscription) {
        self.subscribers.unsubscribe(subscription);
    }

    /// Names of the keyspaces with at least one serving shard.
    pub async fn get_serving_keyspaces(&self) -> Vec<String> {
        let snapshot: Vec<(String, Arc<KeyspaceState>)> = self
            .keyspaces
            .lock()
            .iter()
            .map(|(name, kss)| (name.clone(), Arc::clone(kss)))
            .collect();

        let mut serving = Vec::new();
        for (name, kss) in snapshot {
            if kss.is_serving().await {
                serving.push(name);
            }
        }
        serving.sort();
        serving
    }

    /// Whether the reason the target is unreachable right now is a
    /// (potential) resharding operation on its keyspace. A heuristic, but
    /// good enough to justify buffering the request as transient.
    pub async fn target_is_being_resharded(&self, target: &Target) -> bool {
        if target.tablet_type != TabletType::Primary {
            return false;
        }
        let Some(kss) = self.get_keyspace_status(&target.keyspace) else {
            return false;
        };
        kss.being_resharded(&target.shard).await
    }

    /// Whether buffering should start for the target, and the last known
    /// primary either way.
    ///
    /// Buffering starts only when all three hold: a primary had been
    /// observed (identity and term start recorded), it stopped serving, and
    /// the keyspace is marked inconsistent. A demotion during a planned
    /// reparent satisfies all three; the new primary's serving report ends
    /// them.
    pub async fn should_start_buffering_for_target(
        &self,
        target: &Target,
    ) -> (Option<TabletAlias>, bool) {
        if target.tablet_type != TabletType::Primary {
            // Buffering is only supported for primary targets.
            return (None, false);
        }
        let Some(kss) = self.get_keyspace_status(&target.keyspace) else {
            // A deleted keyspace; nothing worth buffering for.
            return (None, false);
        };
        let inner = kss.inner.lock().await;
        let Some(sstate) = inner.shards.get(&target.shard) else {
            return (None, false);
        };
        let should_buffer = !sstate.serving
            && !inner.consistent
            && sstate.externally_reparented != 0
            && sstate.current_primary.is_some();
        (sstate.current_primary.clone(), should_buffer)
    }

    /// Force the shard non-serving and its keyspace inconsistent, ahead of
    /// the health stream catching up. With `is_reparent_err` the shard also
    /// waits for a strictly newer primary term before serving again.
    /// Returns whether the shard was found.
    pub async fn mark_shard_not_serving(
        &self,
        keyspace: &str,
        shard: &str,
        is_reparent_err: bool,
    ) -> bool {
        let Some(kss) = self.get_keyspace_status(keyspace) else {
            return false;
        };
        let mut guard = kss.inner.lock().await;
        let state = &mut *guard;
        let Some(sstate) = state.shards.get_mut(shard) else {
            // The shard was deleted, or the watcher has never seen it.
            return false;
        };
        state.consistent = false;
        sstate.serving = false;
        if is_reparent_err {
            // Hold serving down until a strictly newer primary term reports;
            // the demoted primary may still announce serving while it is
            // being turned read-only.
            sstate.wait_for_reparent = true;
        }
        true
    }

    /// Block until every named keyspace reports consistent, or `cancel`
    /// fires. Deleted keyspaces count as consistent.
    pub async fn wait_for_consistent_keyspaces(
        &self,
        cancel: &CancellationToken,
        keyspaces: &[String],
    ) -> Result<(), WatcherError> {
        let mut remaining: Vec<String> = keyspaces.to_vec();
        loop {
            let mut still_waiting = Vec::with_capacity(remaining.len());
            for keyspace in remaining {
                match self.get_keyspace_status(&keyspace) {
                    // A deleted keyspace cannot become any more consistent.
                    None => {}
                    Some(kss) => {
                        if !kss.is_consistent().await {
                            still_waiting.push(keyspace);
                        }
                    }
                }
            }
            if still_waiting.is_empty() {
                return Ok(());
            }
            remaining = still_waiting;

            tokio::select! {
                _ = cancel.cancelled() => {
                    for keyspace in &remaining {
                        info!("keyspace {} didn't become consistent", keyspace);
                    }
                    return Err(WatcherError::WaitCancelled(remaining));
                }
                _ = tokio::time::sleep(self.config.consistency_check_interval) => {}
            }
        }
    }

    /// Human-readable snapshot of every tracked keyspace, for debug output.
    pub async fn dump(&self) -> String {
        let mut snapshot: Vec<(String, Arc<KeyspaceState>)> = self
            .keyspaces
            .lock()
            .iter()
            .map(|(name, kss)| (name.clone(), Arc::clone(kss)))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out = String::new();
        for (_, kss) in snapshot {
            kss.format_into(&mut out).await;
        }
        out
    }
}
