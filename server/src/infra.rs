//! Concrete `scheduler_core::ports` implementations backed by the local
//! filesystem, SQLite, and subprocesses (see `SPEC_FULL.md` E.5-E.7).
//!
//! Duplicated from `agent`'s module of the same name rather than factored
//! into a shared crate, following the teacher's own precedent of each binary
//! owning its own `database.rs`.

use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use rusqlite::{params, Connection};
use scheduler_core::error::{Result as CoreResult, SchedulerError};
use scheduler_core::ids::{ProgramType, ScheduleId, StreamId};
use scheduler_core::ports::{
    Cancellable, DispatchArgs, DispatchFailure, NotificationEvent, NotificationHandler,
    NotificationService, PersistedTaskState, ProgramDispatcher, ScheduleStore, SizeObservation,
    SizeProbe,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Probes a stream's size as the length of its backing file under
/// `stream_root` (E.6: "stream admin = `std::fs::metadata`").
pub struct FsSizeProbe {
    stream_root: PathBuf,
}

impl FsSizeProbe {
    pub fn new(stream_root: PathBuf) -> Self {
        Self { stream_root }
    }

    fn stream_path(&self, stream: &StreamId) -> PathBuf {
        self.stream_root.join(&stream.name)
    }
}

#[async_trait]
impl SizeProbe for FsSizeProbe {
    async fn probe(&self, stream: &StreamId) -> anyhow::Result<SizeObservation> {
        let path = self.stream_path(stream);
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| anyhow::anyhow!("stat {}: {}", path.display(), e))?;
        Ok(SizeObservation {
            size: meta.len() as i64,
            ts: now_ms(),
        })
    }
}

struct WatchHandle {
    watcher: StdMutex<Option<RecommendedWatcher>>,
}

impl Cancellable for WatchHandle {
    fn cancel(&self) {
        // Dropping the watcher tears down its OS-level subscription.
        self.watcher.lock().unwrap().take();
    }
}

/// Watches a stream's backing file for writes and translates each event into
/// a `NotificationEvent` carrying the file's current size (E.6).
pub struct FsNotificationService {
    stream_root: PathBuf,
}

impl FsNotificationService {
    pub fn new(stream_root: PathBuf) -> Arc<Self> {
        Arc::new(Self { stream_root })
    }
}

#[async_trait]
impl NotificationService for FsNotificationService {
    async fn subscribe(
        &self,
        _namespace: &str,
        feed_name: &str,
        handler: Arc<dyn NotificationHandler>,
    ) -> CoreResult<Box<dyn Cancellable>> {
        let stream_name = feed_name
            .strip_suffix("Size")
            .unwrap_or(feed_name)
            .to_string();
        let path = self.stream_root.join(&stream_name);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    let _ = tx.send(());
                }
            }
        })
        .map_err(|e| SchedulerError::FeedError {
            stream: stream_name.clone(),
            source: e.into(),
        })?;

        let mut watcher = watcher;
        watcher
            .watch(&path, RecursiveMode::NonRecursive)
            .map_err(|_| SchedulerError::FeedNotFound(stream_name.clone()))?;

        let watch_path = path.clone();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                match tokio::fs::metadata(&watch_path).await {
                    Ok(meta) => {
                        handler
                            .handle(NotificationEvent {
                                timestamp: now_ms(),
                                size: meta.len() as i64,
                            })
                            .await;
                    }
                    Err(e) => {
                        debug!(path = %watch_path.display(), error = %e, "stat after notify event failed");
                    }
                }
            }
        });

        Ok(Box::new(WatchHandle {
            watcher: StdMutex::new(Some(watcher)),
        }))
    }
}

/// Persists schedule state in a local SQLite database (E.5).
pub struct SqliteStore {
    conn: StdMutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schedules (
                schedule_id TEXT PRIMARY KEY,
                stream_namespace TEXT NOT NULL,
                stream_name TEXT NOT NULL,
                application TEXT NOT NULL,
                program TEXT NOT NULL,
                program_type TEXT NOT NULL,
                schedule_name TEXT NOT NULL,
                trigger_mb INTEGER NOT NULL,
                base_size INTEGER NOT NULL,
                base_ts INTEGER NOT NULL,
                active INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: StdMutex::new(conn),
        })
    }
}

#[async_trait]
impl ScheduleStore for SqliteStore {
    async fn upsert(&self, state: &PersistedTaskState) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO schedules (
                schedule_id, stream_namespace, stream_name, application, program,
                program_type, schedule_name, trigger_mb, base_size, base_ts, active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(schedule_id) DO UPDATE SET
                base_size = excluded.base_size,
                base_ts = excluded.base_ts,
                active = excluded.active",
            params![
                state.schedule_id.to_string(),
                state.stream.namespace,
                state.stream.name,
                state.schedule_id.application,
                state.schedule_id.program_name,
                state.schedule_id.program_type,
                state.schedule_id.schedule_name,
                state.data_trigger_mb,
                state.base_size,
                state.base_ts,
                state.active as i64,
            ],
        )?;
        Ok(())
    }

    async fn delete(&self, schedule_id: &ScheduleId) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM schedules WHERE schedule_id = ?1",
            params![schedule_id.to_string()],
        )?;
        Ok(())
    }

    async fn load_all(&self) -> anyhow::Result<Vec<PersistedTaskState>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT stream_namespace, stream_name, application, program, program_type,
                    schedule_name, trigger_mb, base_size, base_ts, active
             FROM schedules",
        )?;
        let rows = stmt.query_map([], |row| {
            let namespace: String = row.get(0)?;
            let stream_name: String = row.get(1)?;
            let application: String = row.get(2)?;
            let program: String = row.get(3)?;
            let program_type: String = row.get(4)?;
            let schedule_name: String = row.get(5)?;
            let trigger_mb: u32 = row.get(6)?;
            let base_size: i64 = row.get(7)?;
            let base_ts: i64 = row.get(8)?;
            let active: i64 = row.get(9)?;
            Ok(PersistedTaskState {
                schedule_id: ScheduleId::new(
                    namespace.clone(),
                    application,
                    program_type,
                    program,
                    schedule_name,
                ),
                stream: StreamId::new(namespace, stream_name),
                data_trigger_mb: trigger_mb,
                base_size,
                base_ts,
                active: active != 0,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

/// Dispatches a firing by running the schedule's program as a subprocess,
/// passing `DispatchArgs` as environment variables (E.7). Exit code 75
/// (`EX_TEMPFAIL`) asks the task to refire immediately.
pub struct SubprocessDispatcher {
    program_root: PathBuf,
}

const EX_TEMPFAIL: i32 = 75;

impl SubprocessDispatcher {
    pub fn new(program_root: PathBuf) -> Self {
        Self { program_root }
    }

    fn binary_path(&self, program_ref: &str, program_type: &ProgramType) -> PathBuf {
        let program_name = program_ref.rsplit(':').next().unwrap_or(program_ref);
        self.program_root.join(&program_type.0).join(program_name)
    }
}

#[async_trait]
impl ProgramDispatcher for SubprocessDispatcher {
    async fn run(
        &self,
        program_ref: &str,
        program_type: &ProgramType,
        args: &DispatchArgs,
    ) -> Result<(), DispatchFailure> {
        let binary = self.binary_path(program_ref, program_type);
        let mut cmd = tokio::process::Command::new(&binary);
        for (key, value) in args.as_map() {
            cmd.env(key, value);
        }

        let status = cmd.status().await.map_err(|e| DispatchFailure {
            message: format!("failed to launch {}: {}", binary.display(), e),
            refire_immediately: false,
        })?;

        match status.code() {
            Some(0) => Ok(()),
            Some(EX_TEMPFAIL) => Err(DispatchFailure {
                message: format!("{} requested refire (exit {EX_TEMPFAIL})", binary.display()),
                refire_immediately: true,
            }),
            Some(code) => Err(DispatchFailure {
                message: format!("{} exited with code {code}", binary.display()),
                refire_immediately: false,
            }),
            None => {
                warn!(program = %binary.display(), "program terminated by signal");
                Err(DispatchFailure {
                    message: format!("{} terminated by signal", binary.display()),
                    refire_immediately: false,
                })
            }
        }
    }
}

#[cfg(test)]
mod inline_tests {
    use super::*;

    #[test]
    fn sqlite_store_round_trips_a_persisted_task() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("schedules.sqlite3")).unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();

        let state = PersistedTaskState {
            schedule_id: ScheduleId::new("ns", "app", "batch", "prog", "sched"),
            stream: StreamId::new("ns", "logs"),
            data_trigger_mb: 2,
            base_size: 1000,
            base_ts: 2000,
            active: true,
        };

        rt.block_on(async {
            store.upsert(&state).await.unwrap();
            let loaded = store.load_all().await.unwrap();
            assert_eq!(loaded.len(), 1);
            assert_eq!(loaded[0].data_trigger_mb, 2);
            assert_eq!(loaded[0].base_size, 1000);
            assert!(loaded[0].active);

            store.delete(&state.schedule_id).await.unwrap();
            assert!(store.load_all().await.unwrap().is_empty());
        });
    }

    #[test]
    fn binary_path_uses_program_type_subdirectory_and_program_name() {
        let dispatcher = SubprocessDispatcher::new(PathBuf::from("/opt/programs"));
        let path = dispatcher.binary_path("ns:app:prog", &ProgramType("batch".into()));
        assert_eq!(path, PathBuf::from("/opt/programs/batch/prog"));
    }
}
