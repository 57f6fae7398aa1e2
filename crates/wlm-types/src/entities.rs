//! Persisted objects.
//!
//! Every object pairs its quick-save block and attributes with a
//! [`PersistMeta`] holding the last save timestamp seen from the store, the
//! digest of the quick-save block as last written, and the new flag.

use serde::{Deserialize, Serialize};

use crate::attributes::{
    AttributeSet, JOB_ATTRS, NODE_ATTRS, RESV_ATTRS, SCHED_ATTRS, SERVER_ATTRS,
};
use crate::ids::{JobId, NodeName, ResvId, SchedName};
use crate::quick::{
    JobQuickSave, MomInfoQuickSave, NodeQuickSave, ResvQuickSave, ScriptQuickSave,
    ServerQuickSave,
};
use crate::timestamp::SaveTimestamp;

/// SHA-256 digest of a quick-save block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QsDigest(pub [u8; 32]);

impl core::fmt::Display for QsDigest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Persistence bookkeeping carried by every object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistMeta {
    /// Save timestamp from the last write or load. `None` until the object
    /// has been stored or loaded.
    pub savetm: Option<SaveTimestamp>,
    /// Digest of the quick-save block as last written or loaded.
    pub qs_digest: Option<QsDigest>,
    /// Created in memory and not yet inserted.
    pub is_new: bool,
}

impl PersistMeta {
    /// Bookkeeping for an object that has never been stored.
    pub const fn new_object() -> Self {
        Self {
            savetm: None,
            qs_digest: None,
            is_new: true,
        }
    }

    /// Bookkeeping for an object about to be filled from the store.
    pub const fn stored() -> Self {
        Self {
            savetm: None,
            qs_digest: None,
            is_new: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A batch job.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Identity key.
    pub id: JobId,
    /// Quick-save block.
    pub quick: JobQuickSave,
    /// Attributes.
    pub attrs: AttributeSet,
    /// Persistence bookkeeping.
    pub meta: PersistMeta,
    /// Reservation the job runs in, if any. In-memory link only.
    pub reservation: Option<ResvId>,
}

impl Job {
    /// A new job that has not been stored yet.
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            quick: JobQuickSave::default(),
            attrs: AttributeSet::new(&JOB_ATTRS),
            meta: PersistMeta::new_object(),
            reservation: None,
        }
    }

    /// An empty shell to be filled from a stored row.
    pub fn stored(id: JobId) -> Self {
        Self {
            meta: PersistMeta::stored(),
            ..Self::new(id)
        }
    }

    /// Whether the job has reached a terminal state.
    pub const fn is_terminal(&self) -> bool {
        self.quick.state.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// Reservation
// ---------------------------------------------------------------------------

/// An advance or standing reservation.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    /// Identity key.
    pub id: ResvId,
    /// Quick-save block.
    pub quick: ResvQuickSave,
    /// Attributes.
    pub attrs: AttributeSet,
    /// Persistence bookkeeping.
    pub meta: PersistMeta,
}

impl Reservation {
    /// A new reservation that has not been stored yet.
    pub fn new(id: ResvId) -> Self {
        Self {
            id,
            quick: ResvQuickSave::default(),
            attrs: AttributeSet::new(&RESV_ATTRS),
            meta: PersistMeta::new_object(),
        }
    }

    /// An empty shell to be filled from a stored row.
    pub fn stored(id: ResvId) -> Self {
        Self {
            meta: PersistMeta::stored(),
            ..Self::new(id)
        }
    }

    /// Whether the reservation has reached a terminal state.
    pub const fn is_terminal(&self) -> bool {
        self.quick.state.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A compute node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Identity key.
    pub name: NodeName,
    /// Quick-save block.
    pub quick: NodeQuickSave,
    /// Attributes.
    pub attrs: AttributeSet,
    /// Persistence bookkeeping.
    pub meta: PersistMeta,
    /// Marked deleted in the store but not yet purged.
    pub deleted: bool,
}

impl Node {
    /// A new node that has not been stored yet.
    pub fn new(name: NodeName) -> Self {
        Self {
            name,
            quick: NodeQuickSave::default(),
            attrs: AttributeSet::new(&NODE_ATTRS),
            meta: PersistMeta::new_object(),
            deleted: false,
        }
    }

    /// An empty shell to be filled from a stored row.
    pub fn stored(name: NodeName) -> Self {
        Self {
            meta: PersistMeta::stored(),
            ..Self::new(name)
        }
    }
}

// ---------------------------------------------------------------------------
// Singletons and payloads
// ---------------------------------------------------------------------------

/// The server singleton.
#[derive(Debug, Clone, PartialEq)]
pub struct Server {
    /// Quick-save block.
    pub quick: ServerQuickSave,
    /// Attributes.
    pub attrs: AttributeSet,
    /// Persistence bookkeeping.
    pub meta: PersistMeta,
}

impl Server {
    /// A new server record that has not been stored yet.
    pub fn new() -> Self {
        Self {
            quick: ServerQuickSave::default(),
            attrs: AttributeSet::new(&SERVER_ATTRS),
            meta: PersistMeta::new_object(),
        }
    }

    /// An empty shell to be filled from the stored row.
    pub fn stored() -> Self {
        Self {
            meta: PersistMeta::stored(),
            ..Self::new()
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

/// A scheduler instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Scheduler {
    /// Identity key.
    pub name: SchedName,
    /// Attributes.
    pub attrs: AttributeSet,
    /// Persistence bookkeeping.
    pub meta: PersistMeta,
}

impl Scheduler {
    /// A new scheduler that has not been stored yet.
    pub fn new(name: SchedName) -> Self {
        Self {
            name,
            attrs: AttributeSet::new(&SCHED_ATTRS),
            meta: PersistMeta::new_object(),
        }
    }

    /// An empty shell to be filled from a stored row.
    pub fn stored(name: SchedName) -> Self {
        Self {
            meta: PersistMeta::stored(),
            ..Self::new(name)
        }
    }
}

/// Mom-info generation counter singleton.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MomInfoTime {
    /// The counter.
    pub quick: MomInfoQuickSave,
    /// Persistence bookkeeping.
    pub meta: PersistMeta,
}

/// A job's script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobScript {
    /// Job the script belongs to.
    pub job_id: JobId,
    /// Script payload.
    pub quick: ScriptQuickSave,
    /// Persistence bookkeeping.
    pub meta: PersistMeta,
}

impl JobScript {
    /// A new script that has not been stored yet.
    pub fn new(job_id: JobId, script: impl Into<Vec<u8>>) -> Self {
        Self {
            job_id,
            quick: ScriptQuickSave {
                script: script.into(),
            },
            meta: PersistMeta::new_object(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::JobState;

    #[test]
    fn new_and_stored_shells() {
        let job = Job::new(JobId::new("1.svr"));
        assert!(job.meta.is_new);
        let shell = Job::stored(JobId::new("1.svr"));
        assert!(!shell.meta.is_new);
        assert!(shell.meta.savetm.is_none());
    }

    #[test]
    fn terminal_follows_state() {
        let mut job = Job::new(JobId::new("1.svr"));
        assert!(!job.is_terminal());
        job.quick.state = JobState::Finished;
        assert!(job.is_terminal());
    }

    #[test]
    fn digest_displays_as_hex() {
        let digest = QsDigest([0xab; 32]);
        assert_eq!(digest.to_string().len(), 64);
        assert!(digest.to_string().starts_with("abab"));
    }
}
