//! Quick-save blocks.
//!
//! The quick-save block is the fixed-layout set of frequently-changing fields
//! each object writes to dedicated columns. [`QuickSave::write_layout`]
//! produces a stable byte layout used by the change detector; any field
//! addition or reordering must bump [`QuickSave::LAYOUT_VERSION`].

use crate::enums::{JobState, ResvState};

/// A block with a stable, versioned byte layout.
pub trait QuickSave {
    /// Layout version mixed into the digest.
    const LAYOUT_VERSION: u8;

    /// Append the block's fields in layout order.
    fn write_layout(&self, out: &mut LayoutWriter);
}

/// Little-endian byte sink for quick-save layouts.
#[derive(Debug, Default)]
pub struct LayoutWriter {
    buf: Vec<u8>,
}

impl LayoutWriter {
    /// An empty writer.
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append one byte.
    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    /// Append an `i32`.
    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Append an `i64`.
    pub fn i64(&mut self, value: i64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Append a length-prefixed string.
    pub fn str(&mut self, value: &str) -> &mut Self {
        self.bytes(value.as_bytes())
    }

    /// Append a length-prefixed byte slice.
    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        let len = u32::try_from(value.len()).unwrap_or(u32::MAX);
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(value);
        self
    }

    /// Bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Variant-specific job fields. Only the active variant is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobUnion {
    /// Job still arriving from a client.
    New {
        /// Client socket.
        from_sock: i32,
        /// Client address.
        from_addr: i64,
    },
    /// Job running on a mom.
    Exec {
        /// Mother superior address.
        mom_addr: i64,
        /// Mother superior port.
        mom_port: i32,
        /// Exit status once known.
        exit_stat: i32,
    },
    /// Job in a routing queue.
    Route {
        /// Time it entered the queue.
        queue_time: i64,
        /// Next routing retry time.
        retry_time: i64,
    },
    /// Job as seen by a mom.
    Mom {
        /// Exit status.
        exit_stat: i32,
    },
}

impl JobUnion {
    /// Tag stored in the union-type column.
    pub const fn tag(&self) -> i32 {
        match self {
            Self::New { .. } => 1,
            Self::Exec { .. } => 2,
            Self::Route { .. } => 3,
            Self::Mom { .. } => 4,
        }
    }
}

impl Default for JobUnion {
    fn default() -> Self {
        Self::New {
            from_sock: 0,
            from_addr: 0,
        }
    }
}

/// Job quick-save block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobQuickSave {
    /// Lifecycle state.
    pub state: JobState,
    /// Substate within `state`.
    pub substate: i32,
    /// Server-private flag bits.
    pub svrflags: i32,
    /// Number of attributes.
    pub numattr: i32,
    /// Queue ordering hint.
    pub ordering: i32,
    /// Internal priority.
    pub priority: i32,
    /// Start time.
    pub stime: i64,
    /// End-time boundary.
    pub end_boundary: i64,
    /// Queue name.
    pub queue: String,
    /// Routing destination.
    pub destination: String,
    /// Variant-specific fields.
    pub union: JobUnion,
    /// Extended: job id as known to the execution host.
    pub jid: String,
    /// Extended: accounting session handle.
    pub ash: String,
    /// Extended: credential type.
    pub credential_type: i32,
    /// Queue rank (global submission order).
    pub queue_rank: i64,
    /// Index of the server that created the job.
    pub owner_server: i32,
}

impl QuickSave for JobQuickSave {
    const LAYOUT_VERSION: u8 = 1;

    fn write_layout(&self, out: &mut LayoutWriter) {
        out.i32(self.state.code())
            .i32(self.substate)
            .i32(self.svrflags)
            .i32(self.numattr)
            .i32(self.ordering)
            .i32(self.priority)
            .i64(self.stime)
            .i64(self.end_boundary)
            .str(&self.queue)
            .str(&self.destination)
            .i32(self.union.tag());
        match self.union {
            JobUnion::New {
                from_sock,
                from_addr,
            } => {
                out.i32(from_sock).i64(from_addr);
            }
            JobUnion::Exec {
                mom_addr,
                mom_port,
                exit_stat,
            } => {
                out.i64(mom_addr).i32(mom_port).i32(exit_stat);
            }
            JobUnion::Route {
                queue_time,
                retry_time,
            } => {
                out.i64(queue_time).i64(retry_time);
            }
            JobUnion::Mom { exit_stat } => {
                out.i32(exit_stat);
            }
        }
        out.str(&self.jid)
            .str(&self.ash)
            .i32(self.credential_type)
            .i64(self.queue_rank)
            .i32(self.owner_server);
    }
}

// ---------------------------------------------------------------------------
// Reservation
// ---------------------------------------------------------------------------

/// Variant-specific reservation fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResvUnion {
    /// No variant data.
    #[default]
    Unset,
    /// Reservation still arriving from a client.
    New {
        /// Client socket.
        from_sock: i32,
        /// Client address.
        from_addr: i64,
    },
}

impl ResvUnion {
    /// Tag stored in the union-type column.
    pub const fn tag(&self) -> i32 {
        match self {
            Self::Unset => 0,
            Self::New { .. } => 1,
        }
    }
}

/// Reservation quick-save block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResvQuickSave {
    /// Queue created for the reservation.
    pub queue: String,
    /// Duration in seconds.
    pub duration: i64,
    /// End time.
    pub end_time: i64,
    /// Variant-specific fields.
    pub union: ResvUnion,
    /// Number of attributes.
    pub numattr: i32,
    /// Reservation tag.
    pub resv_tag: i32,
    /// Lifecycle state.
    pub state: ResvState,
    /// Substate.
    pub substate: i32,
    /// Server-private flag bits.
    pub svrflags: i32,
    /// Start time.
    pub start_time: i64,
    /// Time it became active.
    pub active_time: i64,
    /// Reservation type (advance, standing, maintenance).
    pub resv_type: i32,
    /// Index of the server that created the reservation.
    pub owner_server: i32,
}

impl QuickSave for ResvQuickSave {
    const LAYOUT_VERSION: u8 = 1;

    fn write_layout(&self, out: &mut LayoutWriter) {
        out.str(&self.queue)
            .i64(self.duration)
            .i64(self.end_time)
            .i32(self.union.tag());
        if let ResvUnion::New {
            from_sock,
            from_addr,
        } = self.union
        {
            out.i32(from_sock).i64(from_addr);
        }
        out.i32(self.numattr)
            .i32(self.resv_tag)
            .i32(self.state.code())
            .i32(self.substate)
            .i32(self.svrflags)
            .i64(self.start_time)
            .i64(self.active_time)
            .i32(self.resv_type)
            .i32(self.owner_server);
    }
}

// ---------------------------------------------------------------------------
// Node, server, scheduler, mom info
// ---------------------------------------------------------------------------

/// Node quick-save block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeQuickSave {
    /// Creation-order index used for stable listing.
    pub index: i32,
    /// Last mom modification time.
    pub mom_modtime: i64,
    /// Host the node lives on.
    pub hostname: String,
    /// State bits.
    pub state: i32,
    /// Node type.
    pub ntype: i32,
    /// Parent queue, if restricted to one.
    pub parent_queue: String,
}

impl QuickSave for NodeQuickSave {
    const LAYOUT_VERSION: u8 = 1;

    fn write_layout(&self, out: &mut LayoutWriter) {
        out.i32(self.index)
            .i64(self.mom_modtime)
            .str(&self.hostname)
            .i32(self.state)
            .i32(self.ntype)
            .str(&self.parent_queue);
    }
}

/// Server quick-save block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerQuickSave {
    /// Next job sequence number to hand out.
    pub jobid_number: i64,
}

impl QuickSave for ServerQuickSave {
    const LAYOUT_VERSION: u8 = 1;

    fn write_layout(&self, out: &mut LayoutWriter) {
        out.i64(self.jobid_number);
    }
}

/// Schedulers keep everything in attributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedQuickSave;

impl QuickSave for SchedQuickSave {
    const LAYOUT_VERSION: u8 = 1;

    fn write_layout(&self, _out: &mut LayoutWriter) {}
}

/// Mom-info generation counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MomInfoQuickSave {
    /// Time the mom information last changed.
    pub mod_time: i64,
    /// Generation number, bumped on every change.
    pub generation: i32,
}

impl QuickSave for MomInfoQuickSave {
    const LAYOUT_VERSION: u8 = 1;

    fn write_layout(&self, out: &mut LayoutWriter) {
        out.i64(self.mod_time).i32(self.generation);
    }
}

/// Job script payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptQuickSave {
    /// Raw script bytes.
    pub script: Vec<u8>,
}

impl QuickSave for ScriptQuickSave {
    const LAYOUT_VERSION: u8 = 1;

    fn write_layout(&self, out: &mut LayoutWriter) {
        out.bytes(&self.script);
    }
}
