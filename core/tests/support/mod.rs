//! In-memory fake collaborators for the end-to-end scenario tests below.
//!
//! These mirror `src/tests/fakes.rs` but live here because integration tests
//! under `tests/` compile as their own crate and cannot reach a `pub(crate)`
//! module of the library.

use async_trait::async_trait;
use scheduler_core::ports::{
    Cancellable, DispatchArgs, DispatchFailure, NotificationEvent, NotificationHandler,
    NotificationService, PersistedTaskState, ProgramDispatcher, ScheduleStore, SizeObservation,
    SizeProbe,
};
use scheduler_core::{ProgramType, Result as CoreResult, ScheduleId, StreamId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Firing {
    pub schedule_name: &'static str,
    pub logical_start_time: i64,
    pub run_data_size: i64,
}

/// Records every firing, tagged by which schedule fired, so one test can
/// assert on several schedules sharing one stream (§8 scenario 4).
#[derive(Default)]
pub struct RecordingDispatcher {
    calls: StdMutex<Vec<Firing>>,
}

impl RecordingDispatcher {
    pub fn firings(&self) -> Vec<Firing> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgramDispatcher for RecordingDispatcher {
    async fn run(
        &self,
        _program_ref: &str,
        _program_type: &ProgramType,
        args: &DispatchArgs,
    ) -> std::result::Result<(), DispatchFailure> {
        // Tests key schedules by name; leaking the short test-local name is fine here.
        let name: &'static str = Box::leak(args.schedule_name.clone().into_boxed_str());
        self.calls.lock().unwrap().push(Firing {
            schedule_name: name,
            logical_start_time: args.logical_start_time,
            run_data_size: args.run_data_size,
        });
        Ok(())
    }
}

enum ProbeOutcome {
    Ok(SizeObservation),
}

#[derive(Default)]
pub struct FakeProbe {
    queue: StdMutex<VecDeque<ProbeOutcome>>,
}

impl FakeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, size: i64, ts: i64) {
        self.queue
            .lock()
            .unwrap()
            .push_back(ProbeOutcome::Ok(SizeObservation { size, ts }));
    }
}

#[async_trait]
impl SizeProbe for FakeProbe {
    async fn probe(&self, _stream: &StreamId) -> anyhow::Result<SizeObservation> {
        match self.queue.lock().unwrap().pop_front() {
            Some(ProbeOutcome::Ok(obs)) => Ok(obs),
            None => Err(anyhow::anyhow!("no more fake probe responses queued")),
        }
    }
}

pub struct FakeCancellable {
    cancelled: Arc<AtomicBool>,
}

impl Cancellable for FakeCancellable {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Captures the handler passed to `subscribe` so a test can push
/// notifications directly, bypassing any real transport.
#[derive(Default)]
pub struct FakeNotificationService {
    handler: StdMutex<Option<Arc<dyn NotificationHandler>>>,
    cancelled: Arc<AtomicBool>,
}

impl FakeNotificationService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn push(&self, size: i64, timestamp: i64) {
        let handler = self.handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler.handle(NotificationEvent { timestamp, size }).await;
        }
    }
}

#[async_trait]
impl NotificationService for FakeNotificationService {
    async fn subscribe(
        &self,
        _namespace: &str,
        _feed_name: &str,
        handler: Arc<dyn NotificationHandler>,
    ) -> CoreResult<Box<dyn Cancellable>> {
        *self.handler.lock().unwrap() = Some(handler);
        Ok(Box::new(FakeCancellable {
            cancelled: self.cancelled.clone(),
        }))
    }
}

#[derive(Default)]
pub struct FakeScheduleStore {
    state: StdMutex<HashMap<ScheduleId, PersistedTaskState>>,
}

impl FakeScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for FakeScheduleStore {
    async fn upsert(&self, state: &PersistedTaskState) -> anyhow::Result<()> {
        self.state
            .lock()
            .unwrap()
            .insert(state.schedule_id.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, schedule_id: &ScheduleId) -> anyhow::Result<()> {
        self.state.lock().unwrap().remove(schedule_id);
        Ok(())
    }

    async fn load_all(&self) -> anyhow::Result<Vec<PersistedTaskState>> {
        Ok(self.state.lock().unwrap().values().cloned().collect())
    }
}
