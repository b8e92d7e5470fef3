//! The per-schedule task state machine (§4.3).
//!
//! A `ScheduleTask` owns its own watermark and active flag and is the unit
//! that turns a stream of `SizeObservation`s into program-run firings. It
//! never talks to the registry or its subscriber directly — observations
//! are pushed in by whatever owns it (the `Subscriber`), and firings go
//! straight out to a `ProgramDispatcher` the task was constructed with.

use crate::ids::{ProgramRef, ProgramType, ScheduleId, ScheduleSpec};
use crate::ports::{DispatchArgs, ProgramDispatcher, SizeObservation};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// The `(baseSize, baseTs)` watermark (§3, glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Watermark {
    base_size: i64,
    base_ts: i64,
}

/// In-memory state of one schedule.
pub struct ScheduleTask {
    id: ScheduleId,
    program: ProgramRef,
    program_type: ProgramType,
    spec: ScheduleSpec,
    active: AtomicBool,
    watermark: Mutex<Watermark>,
    dispatcher: Arc<dyn ProgramDispatcher>,
}

impl ScheduleTask {
    /// Builds a task with an explicit initial watermark. `addTask` (§4.2)
    /// is responsible for probing and supplying `(base_size, base_ts)` when
    /// the caller requested a fresh seed instead.
    pub fn new(
        program: ProgramRef,
        program_type: ProgramType,
        spec: ScheduleSpec,
        base_size: i64,
        base_ts: i64,
        active: bool,
        dispatcher: Arc<dyn ProgramDispatcher>,
    ) -> Self {
        let id = program.schedule_id(&program_type, &spec.schedule_name);
        Self {
            id,
            program,
            program_type,
            spec,
            active: AtomicBool::new(active),
            watermark: Mutex::new(Watermark {
                base_size,
                base_ts,
            }),
            dispatcher,
        }
    }

    pub fn id(&self) -> &ScheduleId {
        &self.id
    }

    pub fn spec(&self) -> &ScheduleSpec {
        &self.spec
    }

    pub fn program(&self) -> &ProgramRef {
        &self.program
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Returns the current watermark, used by the registry for persistence
    /// and by tests asserting invariant 3/4 of §8.
    pub async fn watermark(&self) -> (i64, i64) {
        let w = self.watermark.lock().await;
        (w.base_size, w.base_ts)
    }

    /// ACTIVE -> SUSPENDED compare-and-set. Returns true iff the transition
    /// happened (§4.3).
    pub fn suspend(&self) -> bool {
        self.active
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// SUSPENDED -> ACTIVE compare-and-set. Returns true iff the transition
    /// happened (§4.3). Never touches the watermark: resumption must not
    /// re-fire historical triggers (§4.1, §8 invariant 7).
    pub fn resume(&self) -> bool {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Handles one delivered observation (§4.3, steps 1-4).
    ///
    /// The watermark guard is held for the whole call, including any
    /// dispatch retries: this is what makes a single observation fire at
    /// most once even if delivered twice (§8 invariant 6), and it is what
    /// lets the "advance watermark before dispatch" rule hold even under
    /// concurrent delivery (a second delivery blocks on the same guard and
    /// sees the already-advanced baseline).
    pub async fn received(&self, obs: SizeObservation) {
        if !self.is_active() {
            return;
        }

        let mut watermark = self.watermark.lock().await;

        if obs.size < watermark.base_size {
            // Truncation: rebase without firing (§4.3 step 2).
            debug!(
                schedule = %self.id,
                old_base_size = watermark.base_size,
                new_base_size = obs.size,
                "stream truncated, rebasing watermark"
            );
            watermark.base_size = obs.size;
            watermark.base_ts = obs.ts;
            return;
        }

        let threshold = self.spec.threshold_bytes();
        if obs.size < watermark.base_size + threshold {
            return;
        }

        let past_run_size = watermark.base_size;
        let past_run_ts = watermark.base_ts;
        watermark.base_size = obs.size;
        watermark.base_ts = obs.ts;

        let args = DispatchArgs {
            schedule_name: self.spec.schedule_name.clone(),
            logical_start_time: watermark.base_ts,
            run_data_size: watermark.base_size,
            past_run_logical_start_time: past_run_ts,
            past_run_data_size: past_run_size,
        };

        self.dispatch_with_retry(&args).await;
        // `watermark` (the MutexGuard) is dropped here, after dispatch
        // completes, which is what serializes concurrent firings.
    }

    /// Submits `args` to the dispatcher, retrying in a tight loop while the
    /// dispatcher asks for an immediate refire (§4.3 retry policy, §7).
    async fn dispatch_with_retry(&self, args: &DispatchArgs) {
        loop {
            match self
                .dispatcher
                .run(&self.program.as_ref_string(), &self.program_type, args)
                .await
            {
                Ok(()) => {
                    info!(
                        schedule = %self.id,
                        logical_start_time = args.logical_start_time,
                        run_data_size = args.run_data_size,
                        "dispatched program run"
                    );
                    return;
                }
                Err(failure) if failure.refire_immediately => {
                    warn!(
                        schedule = %self.id,
                        error = %failure,
                        "dispatch requested immediate refire, retrying"
                    );
                    continue;
                }
                Err(failure) => {
                    warn!(
                        schedule = %self.id,
                        error = %failure,
                        "dispatch failed, a later observation may trigger again"
                    );
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod inline_tests {
    use super::*;
    use crate::tests::fakes::RecordingDispatcher;

    fn make_task(base_size: i64, base_ts: i64, active: bool, trigger_mb: u32) -> (Arc<ScheduleTask>, Arc<RecordingDispatcher>) {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let program = ProgramRef::new("ns", "app", "prog");
        let spec = ScheduleSpec {
            stream_name: "s".into(),
            data_trigger_mb: trigger_mb,
            schedule_name: "sched".into(),
        };
        let task = Arc::new(ScheduleTask::new(
            program,
            ProgramType("batch".into()),
            spec,
            base_size,
            base_ts,
            active,
            dispatcher.clone(),
        ));
        (task, dispatcher)
    }

    #[tokio::test]
    async fn suspend_and_resume_are_single_shot_cas() {
        let (task, _d) = make_task(0, 0, true, 1);
        assert!(task.suspend());
        assert!(!task.suspend());
        assert!(task.resume());
        assert!(!task.resume());
    }

    #[tokio::test]
    async fn suspended_task_never_fires() {
        let (task, dispatcher) = make_task(0, 0, false, 1);
        task.received(SizeObservation {
            size: 5 * crate::ids::MB_IN_BYTES,
            ts: 100,
        })
        .await;
        assert_eq!(dispatcher.calls().len(), 0);
    }

    #[tokio::test]
    async fn truncation_rebases_without_firing() {
        let (task, dispatcher) = make_task(10_000_000, 1000, true, 1);
        task.received(SizeObservation {
            size: 5_000_000,
            ts: 1100,
        })
        .await;
        assert_eq!(dispatcher.calls().len(), 0);
        assert_eq!(task.watermark().await, (5_000_000, 1100));
    }

    #[tokio::test]
    async fn duplicate_delivery_fires_once() {
        let (task, dispatcher) = make_task(0, 0, true, 1);
        let obs = SizeObservation {
            size: 1_050_000,
            ts: 300,
        };
        task.received(obs).await;
        task.received(obs).await;
        assert_eq!(dispatcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn refire_failure_retries_without_changing_watermark() {
        let (task, dispatcher) = make_task(0, 0, true, 1);
        dispatcher.fail_next_n_with_refire(2);
        task.received(SizeObservation {
            size: 1_050_000,
            ts: 300,
        })
        .await;
        // Two refire failures followed by a success: three attempts, one
        // successful firing, watermark unchanged by the failures.
        assert_eq!(dispatcher.calls().len(), 3);
        assert_eq!(task.watermark().await, (1_050_000, 300));
    }
}
