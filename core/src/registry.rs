//! The scheduler registry (§4.1): the facade mapping schedule and stream
//! identifiers to subscribers, with create/suspend/resume/delete/query
//! lifecycle safe under concurrent access.

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::ids::{ProgramRef, ProgramType, ScheduleId, ScheduleSpec, StreamId};
use crate::ports::{NotificationService, PersistedTaskState, ProgramDispatcher, ScheduleStore, SizeProbe};
use crate::subscriber::{StreamSubscriber, SEED_FROM_PROBE};
#[cfg(test)]
use crate::task::ScheduleTask;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Query result for [`SchedulerRegistry::state`] (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    NotFound,
    Scheduled,
    Suspended,
}

struct RegistryState {
    streams: HashMap<StreamId, Arc<StreamSubscriber>>,
    schedules: BTreeMap<ScheduleId, Arc<StreamSubscriber>>,
}

impl RegistryState {
    fn new() -> Self {
        Self {
            streams: HashMap::new(),
            schedules: BTreeMap::new(),
        }
    }
}

/// The scheduler facade. Owns exactly one mutual-exclusion region covering
/// "look up or create a subscriber, then add/remove a task" (§4.1); see
/// `DESIGN.md` for the note on why that region spans the one-time
/// subscribe/probe setup calls as well as the map mutation.
pub struct SchedulerRegistry {
    state: Mutex<RegistryState>,
    probe: Arc<dyn SizeProbe>,
    notifications: Arc<dyn NotificationService>,
    store: Arc<dyn ScheduleStore>,
    dispatcher: Arc<dyn ProgramDispatcher>,
    config: SchedulerConfig,
}

impl SchedulerRegistry {
    pub fn new(
        probe: Arc<dyn SizeProbe>,
        notifications: Arc<dyn NotificationService>,
        store: Arc<dyn ScheduleStore>,
        dispatcher: Arc<dyn ProgramDispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            state: Mutex::new(RegistryState::new()),
            probe,
            notifications,
            store,
            dispatcher,
            config,
        }
    }

    /// Creates a schedule with fresh-probe seeding and persistence, active
    /// from the start (§4.1 `schedule`).
    pub async fn schedule(
        &self,
        program: ProgramRef,
        program_type: ProgramType,
        spec: ScheduleSpec,
    ) -> Result<()> {
        self.schedule_with_options(program, program_type, spec, SEED_FROM_PROBE, SEED_FROM_PROBE, true, true)
            .await
    }

    /// `schedule` with the recovery-time "Initial-state option" (§4.1):
    /// explicit `base_size`/`base_ts` (or `SEED_FROM_PROBE` for both to
    /// request a fresh probe), an explicit initial `active` flag, and
    /// `persist=false` to avoid re-persisting what the store already has.
    #[allow(clippy::too_many_arguments)]
    pub async fn schedule_with_options(
        &self,
        program: ProgramRef,
        program_type: ProgramType,
        spec: ScheduleSpec,
        base_size: i64,
        base_ts: i64,
        active: bool,
        persist: bool,
    ) -> Result<()> {
        spec.validate()?;

        let stream_id = program.stream_id(&spec.stream_name);
        let mut state = self.state.lock().await;

        let schedule_id = program.schedule_id(&program_type, &spec.schedule_name);
        if state.schedules.contains_key(&schedule_id) {
            return Err(SchedulerError::AlreadyExists(schedule_id));
        }

        let subscriber = match state.streams.get(&stream_id) {
            Some(sub) => sub.clone(),
            None => {
                let sub = StreamSubscriber::new(
                    stream_id.clone(),
                    self.probe.clone(),
                    self.notifications.clone(),
                    self.store.clone(),
                    self.dispatcher.clone(),
                    self.config,
                );
                sub.start().await?;
                state.streams.insert(stream_id.clone(), sub.clone());
                sub
            }
        };

        let task = subscriber
            .add_task(program, program_type, spec, base_size, base_ts, active, persist)
            .await?;

        state.schedules.insert(task.id().clone(), subscriber);
        info!(schedule = %task.id(), "schedule created");
        Ok(())
    }

    /// Applies `schedule` to each spec in order. Not atomic: a later
    /// failure leaves earlier successes in place (§4.1, §9b).
    pub async fn schedule_many(
        &self,
        program: ProgramRef,
        program_type: ProgramType,
        specs: Vec<ScheduleSpec>,
    ) -> Vec<(String, Result<()>)> {
        let mut results = Vec::with_capacity(specs.len());
        for spec in specs {
            let name = spec.schedule_name.clone();
            let result = self
                .schedule(program.clone(), program_type.clone(), spec)
                .await;
            results.push((name, result));
        }
        results
    }

    pub async fn suspend(
        &self,
        program: &ProgramRef,
        program_type: &ProgramType,
        schedule_name: &str,
    ) -> Result<()> {
        let schedule_id = program.schedule_id(program_type, schedule_name);
        let state = self.state.lock().await;
        let subscriber = state
            .schedules
            .get(&schedule_id)
            .ok_or_else(|| SchedulerError::NotFound(schedule_id.clone()))?
            .clone();
        drop(state);
        subscriber.suspend_task(&schedule_id).await?;
        Ok(())
    }

    pub async fn resume(
        &self,
        program: &ProgramRef,
        program_type: &ProgramType,
        schedule_name: &str,
    ) -> Result<()> {
        let schedule_id = program.schedule_id(program_type, schedule_name);
        let state = self.state.lock().await;
        let subscriber = state
            .schedules
            .get(&schedule_id)
            .ok_or_else(|| SchedulerError::NotFound(schedule_id.clone()))?
            .clone();
        drop(state);
        subscriber.resume_task(&schedule_id).await?;
        Ok(())
    }

    /// Removes one schedule. If its subscriber becomes empty, cancels the
    /// subscription/polling and removes the subscriber too (§4.1 `delete`).
    pub async fn delete(
        &self,
        program: &ProgramRef,
        program_type: &ProgramType,
        schedule_name: &str,
    ) -> Result<()> {
        let schedule_id = program.schedule_id(program_type, schedule_name);
        let mut state = self.state.lock().await;
        let subscriber = state
            .schedules
            .remove(&schedule_id)
            .ok_or_else(|| SchedulerError::NotFound(schedule_id.clone()))?;

        let (_, now_empty) = subscriber
            .remove_task(&schedule_id)
            .await
            .expect("schedule_id present in scheduleMap must be present in its subscriber");

        if now_empty {
            subscriber.cancel().await;
            state.streams.remove(subscriber.stream());
        }

        let _ = self.store.delete(&schedule_id).await;
        Ok(())
    }

    /// Deletes every schedule whose id begins with `ns:app:type:prog:`
    /// (§4.1 `deleteAll`).
    pub async fn delete_all(&self, program: &ProgramRef, program_type: &ProgramType) -> Result<usize> {
        let ids = self.list_ids(program, program_type).await;
        let mut deleted = 0;
        for id in ids {
            self.delete(program, program_type, &id.schedule_name).await?;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Range scan over `scheduleMap` by the `ns:app:type:prog:` prefix,
    /// returned in `ScheduleId`'s natural order (§4.1 `listIds`).
    pub async fn list_ids(&self, program: &ProgramRef, program_type: &ProgramType) -> Vec<ScheduleId> {
        let prefix = program.program_prefix(program_type);
        let state = self.state.lock().await;
        state
            .schedules
            .keys()
            .filter(|id| id.matches_program_prefix(&prefix))
            .cloned()
            .collect()
    }

    pub async fn state(
        &self,
        program: &ProgramRef,
        program_type: &ProgramType,
        schedule_name: &str,
    ) -> ScheduleState {
        let schedule_id = program.schedule_id(program_type, schedule_name);
        let state = self.state.lock().await;
        let Some(subscriber) = state.schedules.get(&schedule_id).cloned() else {
            return ScheduleState::NotFound;
        };
        drop(state);

        match subscriber.task_active(&schedule_id).await {
            Some(true) => ScheduleState::Scheduled,
            Some(false) => ScheduleState::Suspended,
            None => ScheduleState::NotFound,
        }
    }

    /// Size-triggered schedules have no predictable next time (§4.1
    /// `nextRuntimes`).
    pub fn next_runtimes(
        &self,
        _program: &ProgramRef,
        _program_type: &ProgramType,
        _schedule_name: &str,
    ) -> Vec<i64> {
        Vec::new()
    }

    /// Restores a task from the persistent store at startup, without
    /// re-persisting it (`persist=false`), matching the recovery path
    /// referenced by §4.1's "Initial-state option".
    pub async fn restore(&self, persisted: PersistedTaskState, program: ProgramRef) -> Result<()> {
        let program_type = ProgramType(persisted.schedule_id.program_type.clone());
        let spec = ScheduleSpec {
            stream_name: persisted.stream.name.clone(),
            data_trigger_mb: persisted.data_trigger_mb,
            schedule_name: persisted.schedule_id.schedule_name.clone(),
        };
        self.schedule_with_options(
            program,
            program_type,
            spec,
            persisted.base_size,
            persisted.base_ts,
            persisted.active,
            false,
        )
        .await
    }

    /// Loads every persisted task from the store and restores it. Used by
    /// hosts at startup.
    pub async fn restore_all(&self, program_of: impl Fn(&ScheduleId) -> ProgramRef) -> Result<usize> {
        let persisted = self
            .store
            .load_all()
            .await
            .map_err(|source| SchedulerError::ProbeError {
                stream: "schedule-store".to_string(),
                source,
            })?;
        let mut restored = 0;
        for state in persisted {
            let program = program_of(&state.schedule_id);
            self.restore(state, program).await?;
            restored += 1;
        }
        Ok(restored)
    }

    #[cfg(test)]
    pub(crate) async fn task_for_test(&self, schedule_id: &ScheduleId) -> Option<Arc<ScheduleTask>> {
        let state = self.state.lock().await;
        let subscriber = state.schedules.get(schedule_id)?.clone();
        drop(state);
        subscriber.task(schedule_id).await
    }
}
