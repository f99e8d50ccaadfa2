//! Availability incident tracking for the shardgate proxy
//!
//! The proxy buffers requests while a shard's primary is briefly absent
//! (planned reparents, failovers, resharding cut-overs). This crate houses
//! the keyspace event watcher deciding when buffering may start and when an
//! incident has resolved, by reconciling the peer-to-peer health stream
//! with the topology server's authoritative view.

pub mod health;
pub mod keyspace_events;
pub mod move_tables;
pub mod sidecar;

pub use health::{HealthCheck, TabletHealth};
pub use keyspace_events::{
    EventSubscription, KeyspaceEvent, KeyspaceEventWatcher, KeyspaceEventWatcherConfig,
    ShardEvent, WatcherError, KEW_HEALTHCHECK_SUBSCRIBER,
};
pub use move_tables::{MoveTablesState, MoveTablesStatus, MoveTablesType};
pub use sidecar::IdentifierCache;
