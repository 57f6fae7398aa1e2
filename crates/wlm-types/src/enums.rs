//! Enumeration types shared by every layer of the state store.
//!
//! States are persisted as integer codes; the mappings here are the single
//! source of truth for those codes.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Object types
// ---------------------------------------------------------------------------

/// Kind of persisted object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    /// A batch job.
    Job,
    /// An advance or standing reservation.
    Reservation,
    /// A compute node.
    Node,
    /// The server singleton.
    Server,
    /// A scheduler instance, keyed by name.
    Scheduler,
    /// The mom-info generation counter singleton.
    MomInfoTime,
    /// A job's script payload.
    JobScript,
}

impl ObjectType {
    /// Every object type, in dependency-free order.
    pub const ALL: [Self; 7] = [
        Self::Job,
        Self::Reservation,
        Self::Node,
        Self::Server,
        Self::Scheduler,
        Self::MomInfoTime,
        Self::JobScript,
    ];

    /// Short lowercase name used in statement names and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Job => "job",
            Self::Reservation => "resv",
            Self::Node => "node",
            Self::Server => "server",
            Self::Scheduler => "sched",
            Self::MomInfoTime => "mominfo_time",
            Self::JobScript => "job_script",
        }
    }
}

impl core::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Job state
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum JobState {
    /// Being moved into this server.
    #[default]
    Transit,
    /// Eligible to run.
    Queued,
    /// Held by a user, operator or the system.
    Held,
    /// Waiting for its execution time.
    Waiting,
    /// Running on its assigned nodes.
    Running,
    /// Finished running, end-of-job processing in progress.
    Exiting,
    /// Subjob of an array that has completed.
    Expired,
    /// Array job with at least one subjob started.
    Begun,
    /// Moved to another server.
    Moved,
    /// Completed and retained for history.
    Finished,
}

impl JobState {
    /// Integer code stored in the database.
    pub const fn code(self) -> i32 {
        match self {
            Self::Transit => 0,
            Self::Queued => 1,
            Self::Held => 2,
            Self::Waiting => 3,
            Self::Running => 4,
            Self::Exiting => 5,
            Self::Expired => 6,
            Self::Begun => 7,
            Self::Moved => 8,
            Self::Finished => 9,
        }
    }

    /// Map a stored code back to a state.
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Transit),
            1 => Some(Self::Queued),
            2 => Some(Self::Held),
            3 => Some(Self::Waiting),
            4 => Some(Self::Running),
            5 => Some(Self::Exiting),
            6 => Some(Self::Expired),
            7 => Some(Self::Begun),
            8 => Some(Self::Moved),
            9 => Some(Self::Finished),
            _ => None,
        }
    }

    /// Whether the job has reached a state it never leaves.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Expired | Self::Moved | Self::Finished)
    }
}

// ---------------------------------------------------------------------------
// Reservation state
// ---------------------------------------------------------------------------

/// Lifecycle state of a reservation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ResvState {
    /// No state assigned yet.
    #[default]
    Unset,
    /// Submitted, not yet confirmed by the scheduler.
    Unconfirmed,
    /// Confirmed and waiting for its start time.
    Confirmed,
    /// Waiting on a dependency.
    Waiting,
    /// Start time reached, queue being enabled.
    TimeToRun,
    /// Active.
    Running,
    /// End time reached.
    Finished,
    /// Deletion in progress.
    BeingDeleted,
    /// Deleted.
    Deleted,
    /// Deleting the jobs that ran in it.
    DeletingJobs,
    /// One or more nodes became unavailable.
    Degraded,
    /// An alter request is pending.
    BeingAltered,
    /// Conflicts with another reservation.
    InConflict,
}

impl ResvState {
    /// Integer code stored in the database.
    pub const fn code(self) -> i32 {
        match self {
            Self::Unset => 0,
            Self::Unconfirmed => 1,
            Self::Confirmed => 2,
            Self::Waiting => 3,
            Self::TimeToRun => 4,
            Self::Running => 5,
            Self::Finished => 6,
            Self::BeingDeleted => 7,
            Self::Deleted => 8,
            Self::DeletingJobs => 9,
            Self::Degraded => 10,
            Self::BeingAltered => 11,
            Self::InConflict => 12,
        }
    }

    /// Map a stored code back to a state.
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Unset),
            1 => Some(Self::Unconfirmed),
            2 => Some(Self::Confirmed),
            3 => Some(Self::Waiting),
            4 => Some(Self::TimeToRun),
            5 => Some(Self::Running),
            6 => Some(Self::Finished),
            7 => Some(Self::BeingDeleted),
            8 => Some(Self::Deleted),
            9 => Some(Self::DeletingJobs),
            10 => Some(Self::Degraded),
            11 => Some(Self::BeingAltered),
            12 => Some(Self::InConflict),
            _ => None,
        }
    }

    /// Whether the reservation has reached a state it never leaves.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::BeingDeleted | Self::Deleted)
    }
}
