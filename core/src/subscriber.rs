//! The per-stream subscriber (§4.2): bridges push notifications and poll
//! fallback into one monotone size/time signal and fans it out to the
//! schedule tasks that target this stream.

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::ids::{ProgramRef, ProgramType, ScheduleId, ScheduleSpec, StreamId};
use crate::ports::{
    Cancellable, NotificationEvent, NotificationHandler, NotificationService, PersistedTaskState,
    ProgramDispatcher, ScheduleStore, SizeObservation, SizeProbe,
};
use crate::task::ScheduleTask;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Sentinel both halves of the watermark carry to request a fresh probe at
/// `addTask` time instead of a supplied seed (§4.1 "Initial-state option").
pub const SEED_FROM_PROBE: i64 = -1;

struct TaskSet {
    tasks: HashMap<ScheduleId, Arc<ScheduleTask>>,
    active_count: usize,
}

impl TaskSet {
    fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            active_count: 0,
        }
    }
}

/// Coordinates one stream's worth of schedule tasks.
pub struct StreamSubscriber {
    stream: StreamId,
    task_set: Mutex<TaskSet>,
    last_observation: Mutex<Option<SizeObservation>>,
    notification_handle: Mutex<Option<Box<dyn Cancellable>>>,
    poll_generation: AtomicU64,
    probe: Arc<dyn SizeProbe>,
    notifications: Arc<dyn NotificationService>,
    store: Arc<dyn ScheduleStore>,
    dispatcher: Arc<dyn ProgramDispatcher>,
    config: SchedulerConfig,
    /// Feeds the single delivery worker spawned in `new` (§9: "a
    /// channel-and-worker implementation... one worker per Subscriber").
    /// Every observation this subscriber sees, push or poll, funnels through
    /// here so deliveries to a given task stay in `ts` order (§5) instead of
    /// racing across independently spawned tasks.
    ///
    /// `None` after `cancel()`: the worker loop holds an `Arc<Self>` of its
    /// own to read `task_set`, so this sender is the only thing keeping its
    /// `recv().await` from blocking forever; dropping it here is what lets
    /// the worker (and this subscriber) actually get deallocated.
    obs_tx: StdMutex<Option<mpsc::UnboundedSender<SizeObservation>>>,
}

impl StreamSubscriber {
    pub fn new(
        stream: StreamId,
        probe: Arc<dyn SizeProbe>,
        notifications: Arc<dyn NotificationService>,
        store: Arc<dyn ScheduleStore>,
        dispatcher: Arc<dyn ProgramDispatcher>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let (obs_tx, obs_rx) = mpsc::unbounded_channel();
        let subscriber = Arc::new(Self {
            stream,
            task_set: Mutex::new(TaskSet::new()),
            last_observation: Mutex::new(None),
            notification_handle: Mutex::new(None),
            poll_generation: AtomicU64::new(0),
            probe,
            notifications,
            store,
            dispatcher,
            config,
            obs_tx: StdMutex::new(Some(obs_tx)),
        });
        let worker = subscriber.clone();
        tokio::spawn(async move { worker.run_delivery_worker(obs_rx).await });
        subscriber
    }

    /// The single consumer draining `obs_tx`: for each observation, delivers
    /// to every currently active task in turn, awaiting each one before
    /// moving to the next task. Serializing through one worker per
    /// Subscriber is what keeps a task's deliveries monotone in `ts` even
    /// though observations can arrive from both the notification handler and
    /// the polling loop concurrently.
    async fn run_delivery_worker(self: Arc<Self>, mut obs_rx: mpsc::UnboundedReceiver<SizeObservation>) {
        while let Some(obs) = obs_rx.recv().await {
            let tasks: Vec<_> = {
                let guard = self.task_set.lock().await;
                guard.tasks.values().filter(|t| t.is_active()).cloned().collect()
            };
            for task in tasks {
                task.received(obs).await;
            }
        }
    }

    pub fn stream(&self) -> &StreamId {
        &self.stream
    }

    /// Subscribes to this stream's notification feed and starts the polling
    /// fallback chain. Failure is fatal for this subscriber (§7): the
    /// caller must not register it in the registry on error.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let feed_name = self.stream.feed_name();
        let handler: Arc<dyn NotificationHandler> = Arc::new(SubscriberHandler(self.clone()));
        let handle = self
            .notifications
            .subscribe(&self.stream.namespace, &feed_name, handler)
            .await?;

        *self.notification_handle.lock().await = Some(handle);
        self.schedule_poll();
        Ok(())
    }

    /// Cancels the pending poll and the notification subscription. Does not
    /// remove this subscriber from any registry map — that is the
    /// registry's job (§4.2 "Shutdown").
    pub async fn cancel(&self) {
        // Bump the generation so any in-flight poll sleep becomes a no-op
        // once it wakes; best-effort per §5 ("an in-flight poll completes").
        self.poll_generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.notification_handle.lock().await.take() {
            handle.cancel();
        }
        // Drop the sender so `run_delivery_worker`'s `recv().await` returns
        // `None` once any queued observations drain, letting that task (and
        // its `Arc<Self>`) exit instead of idling forever.
        self.obs_tx.lock().unwrap().take();
    }

    pub async fn task_count(&self) -> usize {
        self.task_set.lock().await.tasks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.task_set.lock().await.tasks.is_empty()
    }

    /// Whether `schedule_id` names a task here, and if so whether it is
    /// active. Used by the registry's `state` query.
    pub async fn task_active(&self, schedule_id: &ScheduleId) -> Option<bool> {
        let guard = self.task_set.lock().await;
        guard.tasks.get(schedule_id).map(|task| task.is_active())
    }

    pub async fn task(&self, schedule_id: &ScheduleId) -> Option<Arc<ScheduleTask>> {
        self.task_set.lock().await.tasks.get(schedule_id).cloned()
    }

    /// Adds a task for `(program, program_type, spec.schedule_name)` (§4.2
    /// "Adding a task"). `base_size`/`base_ts` of `SEED_FROM_PROBE` request a
    /// fresh probe instead of a supplied watermark.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_task(
        self: &Arc<Self>,
        program: ProgramRef,
        program_type: ProgramType,
        spec: ScheduleSpec,
        base_size: i64,
        base_ts: i64,
        active: bool,
        persist: bool,
    ) -> Result<Arc<ScheduleTask>> {
        let schedule_id = program.schedule_id(&program_type, &spec.schedule_name);

        {
            let guard = self.task_set.lock().await;
            if guard.tasks.contains_key(&schedule_id) {
                return Err(SchedulerError::AlreadyExists(schedule_id));
            }
        }

        // Probing is a blocking external call; do it before taking any lock
        // (§5: probes never happen inside a guard except the documented
        // resume exception).
        let (seeded_size, seeded_ts, fresh_probe) = if base_size == SEED_FROM_PROBE && base_ts == SEED_FROM_PROBE {
            let obs = self.probe_now().await?;
            (obs.size, obs.ts, Some(obs))
        } else {
            (base_size, base_ts, None)
        };

        let task = Arc::new(ScheduleTask::new(
            program,
            program_type,
            spec.clone(),
            seeded_size,
            seeded_ts,
            active,
            self.dispatcher.clone(),
        ));

        let became_sole_active = {
            let mut guard = self.task_set.lock().await;
            // Re-check under the lock: a concurrent add could have beaten us
            // to it while we were probing above.
            if guard.tasks.contains_key(&schedule_id) {
                return Err(SchedulerError::AlreadyExists(schedule_id));
            }
            guard.tasks.insert(schedule_id.clone(), task.clone());
            let became_sole_active = active && guard.active_count == 0;
            if active {
                guard.active_count += 1;
            }
            became_sole_active
        };

        // A 0->1 transition means polling may have been paused (§4.2:
        // "polling pauses automatically while every task is suspended");
        // re-arm it rather than leaving the subscriber waiting on a push
        // notification that may never come.
        if became_sole_active {
            self.schedule_poll();
        }

        if persist {
            self.store
                .upsert(&PersistedTaskState {
                    schedule_id: schedule_id.clone(),
                    stream: self.stream.clone(),
                    data_trigger_mb: task.spec().data_trigger_mb,
                    base_size: seeded_size,
                    base_ts: seeded_ts,
                    active,
                })
                .await
                .map_err(|source| SchedulerError::ProbeError {
                    stream: self.stream.to_string(),
                    source,
                })?;
        }

        if let Some(obs) = fresh_probe {
            *self.last_observation.lock().await = Some(obs);
        }

        self.deliver_last_observation_to_active().await;

        Ok(task)
    }

    /// Removes a task. Returns the removed task and whether the subscriber
    /// is now empty (the registry uses the latter to decide whether to tear
    /// this subscriber down).
    pub async fn remove_task(&self, schedule_id: &ScheduleId) -> Option<(Arc<ScheduleTask>, bool)> {
        let mut guard = self.task_set.lock().await;
        let removed = guard.tasks.remove(schedule_id)?;
        if removed.is_active() {
            guard.active_count = guard.active_count.saturating_sub(1);
        }
        Some((removed, guard.tasks.is_empty()))
    }

    pub async fn suspend_task(&self, schedule_id: &ScheduleId) -> Result<bool> {
        let mut guard = self.task_set.lock().await;
        let task = guard
            .tasks
            .get(schedule_id)
            .ok_or_else(|| SchedulerError::NotFound(schedule_id.clone()))?
            .clone();
        let transitioned = task.suspend();
        if transitioned {
            guard.active_count = guard.active_count.saturating_sub(1);
        }
        Ok(transitioned)
    }

    /// Resumes a task, performing the "resume wake-up" probe (§4.2) if this
    /// resumption is the 0->1 transition and the last observation is stale
    /// or absent.
    pub async fn resume_task(self: &Arc<Self>, schedule_id: &ScheduleId) -> Result<bool> {
        let (task, became_sole_active) = {
            let mut guard = self.task_set.lock().await;
            let task = guard
                .tasks
                .get(schedule_id)
                .ok_or_else(|| SchedulerError::NotFound(schedule_id.clone()))?
                .clone();
            let was_zero = guard.active_count == 0;
            let transitioned = task.resume();
            if transitioned {
                guard.active_count += 1;
            }
            (task, transitioned && was_zero)
        };

        if became_sole_active {
            self.wake_up_on_resume(&task).await?;
            // Same re-arm as `add_task`'s 0->1 transition: resuming the only
            // active task means polling may have been paused since the last
            // suspend and needs restarting.
            self.schedule_poll();
        }

        Ok(task.is_active())
    }

    /// §4.2 "Resume wake-up": probe synchronously, under the observation
    /// guard, if there is no observation yet or the last one predates the
    /// polling delay; then deliver to the just-resumed task only.
    async fn wake_up_on_resume(&self, task: &Arc<ScheduleTask>) -> Result<()> {
        let mut last = self.last_observation.lock().await;
        let needs_probe = match *last {
            None => true,
            Some(obs) => {
                let age = task_age_ms(obs.ts, self.now_ms());
                age >= self.config.polling_delay.as_millis() as i64
            }
        };

        if needs_probe {
            let obs = self
                .probe
                .probe(&self.stream)
                .await
                .map_err(|source| SchedulerError::ProbeError {
                    stream: self.stream.to_string(),
                    source,
                })?;
            *last = Some(obs);
        }
        let obs = last.expect("observation installed above");
        drop(last);

        task.received(obs).await;
        Ok(())
    }

    fn now_ms(&self) -> i64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    async fn probe_now(&self) -> Result<SizeObservation> {
        self.probe
            .probe(&self.stream)
            .await
            .map_err(|source| SchedulerError::ProbeError {
                stream: self.stream.to_string(),
                source,
            })
    }

    /// Delivers the current `lastObservation`, if any, to every currently
    /// active task (§4.2 step 5 of "Adding a task"). Duplicate delivery is
    /// harmless per the task's own idempotence guard.
    async fn deliver_last_observation_to_active(&self) {
        let last = self.last_observation.lock().await;
        let Some(obs) = *last else { return };
        // Sent while still holding the guard, same reasoning as
        // `observation_received`: otherwise a concurrent, newer observation
        // could enqueue on the delivery worker's channel ahead of this one.
        self.fan_out(obs);
    }

    /// Hands `obs` to the single delivery worker (see `run_delivery_worker`)
    /// instead of fanning it out via independently spawned tasks: a bare
    /// `tokio::spawn` per task gives no ordering guarantee, so a later,
    /// larger observation could reach a task's watermark before an earlier,
    /// smaller one and be misread as a truncation (§5, §8 invariants 3/4).
    /// Routing every observation through one ordered channel keeps delivery
    /// monotone in `ts` per task.
    fn fan_out(&self, obs: SizeObservation) {
        let sent = match self.obs_tx.lock().unwrap().as_ref() {
            Some(tx) => tx.send(obs).is_ok(),
            None => false,
        };
        if !sent {
            debug!(stream = %self.stream, "delivery worker gone, dropping observation");
        }
    }

    /// The shared path for both push notifications and poll results (§4.2
    /// "Observation handling").
    async fn observation_received(self: &Arc<Self>, obs: SizeObservation) {
        {
            let mut last = self.last_observation.lock().await;
            if let Some(prev) = *last {
                if obs.ts <= prev.ts {
                    // Strictly-greater-ts filter (§9 open question a):
                    // preserved verbatim even though it silently drops
                    // same-timestamp observations with differing sizes.
                    return;
                }
            }
            *last = Some(obs);
            // Enqueued while still holding the guard: two concurrent
            // observations (one push, one poll) must reach the delivery
            // worker's channel in the same order they were accepted here,
            // or the ordering this lock establishes would be undone by a
            // race on the send below.
            self.fan_out(obs);
        }

        self.schedule_poll();
    }

    /// Cancels any pending poll and schedules the next one `pollingDelay`
    /// in the future, by bumping the generation counter: a stale poll
    /// simply observes a mismatched generation and no-ops (§4.2 step 4).
    fn schedule_poll(self: &Arc<Self>) {
        let generation = self.poll_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let me = self.clone();
        let delay = self.config.polling_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            me.fire_poll(generation).await;
        });
    }

    async fn fire_poll(self: &Arc<Self>, generation: u64) {
        if self.poll_generation.load(Ordering::SeqCst) != generation {
            // Superseded by a more recent observation; this poll is
            // cancelled (§4.2 "Cancellation does not interrupt an in-flight
            // poll", but an uncommitted sleep that hasn't fired yet is free
            // to be dropped).
            return;
        }

        let active_count = self.task_set.lock().await.active_count;
        if active_count == 0 {
            debug!(stream = %self.stream, "polling paused, no active tasks");
            return;
        }

        match self.probe.probe(&self.stream).await {
            Ok(obs) => self.observation_received(obs).await,
            Err(e) => {
                warn!(stream = %self.stream, error = %e, "poll probe failed, will retry");
                self.schedule_poll();
            }
        }
    }
}

/// Adapts a `StreamSubscriber` to the `NotificationHandler` contract.
///
/// Kept as a thin wrapper rather than implemented directly on
/// `StreamSubscriber` because `observation_received`/`schedule_poll` need an
/// owned `Arc<StreamSubscriber>` to re-spawn the poll chain, and the trait
/// method only hands back `&self`; holding the `Arc` here lets us clone it
/// out on every call.
struct SubscriberHandler(Arc<StreamSubscriber>);

#[async_trait]
impl NotificationHandler for SubscriberHandler {
    async fn handle(&self, event: NotificationEvent) {
        let subscriber = self.0.clone();
        let obs = SizeObservation {
            size: event.size,
            ts: event.timestamp,
        };
        subscriber.observation_received(obs).await;
    }
}

fn task_age_ms(observation_ts: i64, now_ms: i64) -> i64 {
    (now_ms - observation_ts).max(0)
}
