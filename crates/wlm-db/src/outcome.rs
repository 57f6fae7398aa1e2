//! Save flags and operation outcomes.
//!
//! Outcomes are named rather than numeric. `code()` gives the legacy integer
//! for callers that still compare against it.

use core::ops::BitOr;

/// What a save should write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveFlags(u8);

impl SaveFlags {
    /// Nothing requested.
    pub const EMPTY: Self = Self(0);
    /// The object has never been stored; insert it.
    pub const NEW: Self = Self(1);
    /// Write the quick-save block if it changed.
    pub const QUICK: Self = Self(1 << 1);
    /// Write attributes.
    pub const ATTRS: Self = Self(1 << 2);
    /// Encode every attribute, not just modified ones.
    pub const FULL: Self = Self(1 << 3);
    /// Set the soft-delete marker and nothing else.
    pub const MARK_DELETED: Self = Self(1 << 4);

    /// Whether every flag in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SaveFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Result of a save that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Written.
    Saved,
    /// The update matched no row.
    NoRows,
    /// The insert collided with an existing key.
    DuplicateKey,
}

impl SaveOutcome {
    /// Legacy result code.
    pub const fn code(self) -> i32 {
        match self {
            Self::Saved => 0,
            Self::NoRows | Self::DuplicateKey => 1,
        }
    }
}

/// Result of a load that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The object was refreshed from the store.
    Loaded,
    /// The stored row has the save timestamp the object already holds.
    Unchanged,
    /// No row exists.
    NotFound,
}

impl LoadOutcome {
    /// Legacy result code.
    pub const fn code(self) -> i32 {
        match self {
            Self::Loaded => 0,
            Self::Unchanged => -2,
            Self::NotFound => 1,
        }
    }
}

/// Result of a delete that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The row was removed.
    Deleted,
    /// No row matched.
    NotFound,
}

impl DeleteOutcome {
    /// Legacy result code.
    pub const fn code(self) -> i32 {
        match self {
            Self::Deleted => 0,
            Self::NotFound => 1,
        }
    }
}
