//! Error types for gmem

use crate::types::{QueueId, SegmentId, TeamIndex, UnitId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("segment {segment} not registered for unit {unit}")]
    NotFound { unit: UnitId, segment: SegmentId },

    #[error("unit {unit} is not a member of team {team}")]
    UnknownUnit { unit: UnitId, team: TeamIndex },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("shared memory error: {0}")]
    SharedMemory(String),

    /// Backend queue at capacity; drain it with `wait` and post again
    #[error("queue {0} full")]
    QueueFull(QueueId),

    #[error("no free bind segment: all {0} slots are held by outstanding transfers")]
    NoBindSegment(usize),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn backend(msg: impl Into<String>) -> Self {
        Error::Backend(msg.into())
    }

    /// True for the not-found class of errors (segment or team membership miss)
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. } | Error::UnknownUnit { .. })
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::Backend(format!("lock poisoned: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
