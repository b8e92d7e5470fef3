//! Identity types for streams and schedules.
//!
//! `ScheduleId` orders lexicographically by its `ns:app:type:prog:sched`
//! string form (§3); the registry's prefix scans (`deleteAll`, `listIds`,
//! §4.1) rely on that ordering and on `:` never appearing inside a
//! component (§9, open question c).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a data stream: a namespace plus a name within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId {
    pub namespace: String,
    pub name: String,
}

impl StreamId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Name of the notification feed this stream's size events arrive on,
    /// per §6: `"{streamName}Size"`.
    pub fn feed_name(&self) -> String {
        format!("{}Size", self.name)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The kind of program a schedule's `programRef` launches. The core never
/// interprets this beyond identity and ordering; it is opaque payload
/// forwarded to the `ProgramDispatcher`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramType(pub String);

impl fmt::Display for ProgramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one schedule: `namespace:application:programType:programName:scheduleName`.
///
/// Total order is the lexicographic order of that concatenation (§3), which
/// `Ord`/`PartialOrd` below implement directly by deriving over the fields in
/// that order — this relies on no component containing `:` (§9c).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScheduleId {
    pub namespace: String,
    pub application: String,
    pub program_type: String,
    pub program_name: String,
    pub schedule_name: String,
}

impl ScheduleId {
    pub fn new(
        namespace: impl Into<String>,
        application: impl Into<String>,
        program_type: impl Into<String>,
        program_name: impl Into<String>,
        schedule_name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            application: application.into(),
            program_type: program_type.into(),
            program_name: program_name.into(),
            schedule_name: schedule_name.into(),
        }
    }

    /// The `ns:app:type:prog:` prefix used by `deleteAll`/`listIds` range
    /// scans (§4.1) to select every schedule of one program.
    pub fn program_prefix(
        namespace: &str,
        application: &str,
        program_type: &str,
        program_name: &str,
    ) -> String {
        format!("{namespace}:{application}:{program_type}:{program_name}:")
    }

    /// Whether this id's string form begins with the given program prefix.
    pub fn matches_program_prefix(&self, prefix: &str) -> bool {
        self.to_string().starts_with(prefix)
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.namespace, self.application, self.program_type, self.program_name, self.schedule_name
        )
    }
}

/// Identifies the program a schedule belongs to: the part of a `ScheduleId`
/// that a caller supplies as one unit (`schedule(program, programType, spec)`
/// in §4.1), and also the value forwarded to the `ProgramDispatcher` as
/// `programRef` (§6) so it can locate what to run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramRef {
    pub namespace: String,
    pub application: String,
    pub name: String,
}

impl ProgramRef {
    pub fn new(
        namespace: impl Into<String>,
        application: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            application: application.into(),
            name: name.into(),
        }
    }

    pub fn schedule_id(&self, program_type: &ProgramType, schedule_name: &str) -> ScheduleId {
        ScheduleId::new(
            self.namespace.clone(),
            self.application.clone(),
            program_type.0.clone(),
            self.name.clone(),
            schedule_name.to_string(),
        )
    }

    pub fn program_prefix(&self, program_type: &ProgramType) -> String {
        ScheduleId::program_prefix(&self.namespace, &self.application, &program_type.0, &self.name)
    }

    /// Opaque reference string passed to `ProgramDispatcher::run` as `programRef`.
    pub fn as_ref_string(&self) -> String {
        format!("{}:{}:{}", self.namespace, self.application, self.name)
    }

    /// The stream a schedule spec names is resolved in the program's own
    /// namespace (§3/§6 do not carry a separate stream namespace).
    pub fn stream_id(&self, stream_name: &str) -> StreamId {
        StreamId::new(self.namespace.clone(), stream_name.to_string())
    }
}

/// Bytes in a megabyte, used to turn `dataTriggerMB` into a byte threshold.
pub const MB_IN_BYTES: i64 = 1 << 20;

/// The immutable, user-supplied definition of a stream-size schedule (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub stream_name: String,
    pub data_trigger_mb: u32,
    pub schedule_name: String,
}

impl ScheduleSpec {
    /// Validates the spec is a well-formed stream-size schedule.
    ///
    /// `dataTriggerMB` must be at least 1 (§3); the registry surfaces a
    /// violation as `InvalidArgument` (§4.1, §7).
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.data_trigger_mb < 1 {
            return Err(crate::error::SchedulerError::InvalidArgument(format!(
                "dataTriggerMB must be >= 1, got {}",
                self.data_trigger_mb
            )));
        }
        if self.stream_name.is_empty() {
            return Err(crate::error::SchedulerError::InvalidArgument(
                "streamName must not be empty".to_string(),
            ));
        }
        if self.schedule_name.is_empty() {
            return Err(crate::error::SchedulerError::InvalidArgument(
                "scheduleName must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The byte threshold that must accumulate before a firing: `dataTriggerMB · 2^20`.
    pub fn threshold_bytes(&self) -> i64 {
        self.data_trigger_mb as i64 * MB_IN_BYTES
    }
}
