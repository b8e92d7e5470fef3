//! Stream-size triggered scheduling core
//!
//! This crate is the in-scope part of the stream-size scheduler: the
//! per-stream [`subscriber`] that fuses push notifications and poll fallback
//! into a single monotone size/time signal, the per-schedule [`task`] state
//! machine that turns that signal into program-run firings, and the
//! [`registry`] facade that ties schedule and stream identifiers together
//! under concurrent access.
//!
//! Everything this crate calls out to — the notification transport, the
//! stream admin, the persistent schedule store, and the program dispatcher —
//! is expressed as a trait in [`ports`]. Hosts (see the `agent` and `server`
//! crates in this workspace) supply real implementations; this crate only
//! depends on the contracts.

pub mod config;
pub mod error;
pub mod ids;
pub mod ports;
pub mod registry;
pub mod subscriber;
pub mod task;

pub use config::SchedulerConfig;
pub use error::{Result, SchedulerError};
pub use ids::{ProgramRef, ProgramType, ScheduleId, ScheduleSpec, StreamId};
pub use registry::{ScheduleState, SchedulerRegistry};
pub use task::ScheduleTask;

#[cfg(test)]
mod tests;
