//! Shared object model for the workload manager state store.
//!
//! This crate defines the in-memory shape of every persisted object (jobs,
//! reservations, nodes, the server and scheduler records, the mom-info
//! counter and job scripts). It has no I/O; the codec and database crates
//! build on it.
//!
//! # Modules
//!
//! - [`ids`] -- Typed identity keys
//! - [`enums`] -- Object kinds and lifecycle states
//! - [`timestamp`] -- Store-assigned save timestamps
//! - [`attributes`] -- Attribute definition tables and attribute sets
//! - [`quick`] -- Quick-save blocks and their stable byte layout
//! - [`entities`] -- The persisted objects

pub mod attributes;
pub mod entities;
pub mod enums;
pub mod ids;
pub mod quick;
pub mod timestamp;

// Re-export all public types at crate root for convenience.
pub use attributes::{
    AttrDef, AttrKey, AttrTable, AttrValue, AttributeSet, JOB_ATTRS, NODE_ATTRS, RESV_ATTRS,
    SCHED_ATTRS, SERVER_ATTRS, UnknownKey,
};
pub use entities::{
    Job, JobScript, MomInfoTime, Node, PersistMeta, QsDigest, Reservation, Scheduler, Server,
};
pub use enums::{JobState, ObjectType, ResvState};
pub use ids::{JobId, NodeName, ResvId, SchedName, strip_server_suffix};
pub use quick::{
    JobQuickSave, JobUnion, LayoutWriter, MomInfoQuickSave, NodeQuickSave, QuickSave,
    ResvQuickSave, ResvUnion, SchedQuickSave, ScriptQuickSave, ServerQuickSave,
};
pub use timestamp::{SAVE_TIMESTAMP_FORMAT, SaveTimestamp, TimestampError};
