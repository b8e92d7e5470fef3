//! Error kinds for the stream-size scheduler core.
//!
//! Each variant corresponds to one of the failure kinds the design calls
//! out: schedule lookups fail with [`SchedulerError::NotFound`], a wrongly
//! shaped spec with [`SchedulerError::InvalidArgument`], and the external
//! collaborators each get their own variant so callers can tell a feed
//! outage from a probe outage from a dispatch outage.

use crate::ids::ScheduleId;

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("schedule not found: {0}")]
    NotFound(ScheduleId),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("notification feed error for stream {stream}: {source}")]
    FeedError {
        stream: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("notification feed not found for stream {0}")]
    FeedNotFound(String),

    #[error("stream size probe failed for {stream}: {source}")]
    ProbeError {
        stream: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("program dispatch failed for schedule {0}: {1}")]
    DispatchError(ScheduleId, String),

    #[error("program dispatch requested immediate refire for schedule {0}: {1}")]
    DispatchRefireError(ScheduleId, String),

    #[error("schedule already exists: {0}")]
    AlreadyExists(ScheduleId),
}

impl SchedulerError {
    /// True for the two notification-subscribe failure kinds that are fatal
    /// to a subscriber's `start()` (§7: "fatal for that Subscriber").
    pub fn is_feed_failure(&self) -> bool {
        matches!(self, Self::FeedError { .. } | Self::FeedNotFound(_))
    }
}
