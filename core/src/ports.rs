//! Contracts for the external collaborators §6 calls out of scope: the
//! notification transport, the stream admin, the persistent schedule store,
//! and the program run dispatcher. The core only ever depends on these
//! traits; hosts wire in real implementations (filesystem, SQLite, an HTTP
//! client, a subprocess launcher — see the `agent` and `server` crates).

use crate::ids::{ScheduleId, StreamId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

/// A `(size_bytes, wall_time_ms)` snapshot, taken together so a probe and its
/// timestamp can never drift apart (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeObservation {
    pub size: i64,
    pub ts: i64,
}

/// Wraps the external stream admin (§4.4, §6). A probe failure is reported
/// to the caller, never swallowed here — callers decide whether to log and
/// drop (polling) or surface (seeding).
#[async_trait]
pub trait SizeProbe: Send + Sync {
    async fn probe(&self, stream: &StreamId) -> anyhow::Result<SizeObservation>;
}

/// A live notification subscription. Dropping or calling `cancel` stops
/// delivery; per §5, cancellation is best-effort and does not interrupt
/// delivery already in flight.
pub trait Cancellable: Send + Sync {
    fn cancel(&self);
}

/// One `{timestamp, size}` notification payload (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationEvent {
    pub timestamp: i64,
    pub size: i64,
}

/// A handler notifications are delivered to. Subscribers implement this and
/// hand an `Arc<dyn NotificationHandler>` to `NotificationService::subscribe`.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, event: NotificationEvent);
}

/// The notification transport (§6): subscribes to a per-stream size feed
/// named `"{streamName}Size"` and delivers events to a handler.
#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Subscribes to the named feed in the given namespace. Fails with
    /// `FeedError`/`FeedNotFound` (§7) if the feed cannot be reached.
    async fn subscribe(
        &self,
        namespace: &str,
        feed_name: &str,
        handler: std::sync::Arc<dyn NotificationHandler>,
    ) -> crate::error::Result<Box<dyn Cancellable>>;
}

/// Durable representation of one schedule task, as persisted via
/// `ScheduleStore::upsert` (§6). The concrete on-disk format is opaque to
/// the core — this is just the set of fields a store needs to round-trip a
/// task across a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedTaskState {
    pub schedule_id: ScheduleId,
    pub stream: StreamId,
    pub data_trigger_mb: u32,
    pub base_size: i64,
    pub base_ts: i64,
    pub active: bool,
}

/// The persistent schedule store (§6). The core calls `upsert`/`delete` only
/// when a caller opts in with `persist=true` (§4.1); `load_all` is a
/// supplement used by hosts at startup to restore tasks via
/// `schedule(..., persist=false)`.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn upsert(&self, state: &PersistedTaskState) -> anyhow::Result<()>;
    async fn delete(&self, schedule_id: &ScheduleId) -> anyhow::Result<()>;
    async fn load_all(&self) -> anyhow::Result<Vec<PersistedTaskState>>;
}

/// The arguments a firing dispatch carries (§4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchArgs {
    pub schedule_name: String,
    pub logical_start_time: i64,
    pub run_data_size: i64,
    pub past_run_logical_start_time: i64,
    pub past_run_data_size: i64,
}

impl DispatchArgs {
    /// Flattened `key=value` view, handy for hosts that pass dispatch
    /// arguments as environment variables or a generic string map.
    pub fn as_map(&self) -> HashMap<&'static str, String> {
        let mut map = HashMap::new();
        map.insert("scheduleName", self.schedule_name.clone());
        map.insert("logicalStartTime", self.logical_start_time.to_string());
        map.insert("runDataSize", self.run_data_size.to_string());
        map.insert(
            "pastRunLogicalStartTime",
            self.past_run_logical_start_time.to_string(),
        );
        map.insert("pastRunDataSize", self.past_run_data_size.to_string());
        map
    }
}

/// Failure returned by a dispatch attempt (§6, §7). `refire_immediately`
/// drives the task's inline retry loop (§4.3).
#[derive(Debug, Clone)]
pub struct DispatchFailure {
    pub message: String,
    pub refire_immediately: bool,
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DispatchFailure {}

/// The program run dispatcher (§6). A successful `run` returns without the
/// core awaiting or recording execution outcome (§4.3: "dispatch side
/// effects" are owned entirely by the dispatcher).
#[async_trait]
pub trait ProgramDispatcher: Send + Sync {
    async fn run(
        &self,
        program_ref: &str,
        program_type: &crate::ids::ProgramType,
        args: &DispatchArgs,
    ) -> Result<(), DispatchFailure>;
}
