//! Binding between the object model and table layouts.
//!
//! [`Persistable`] is what the gateway needs from an object: its schema, its
//! identity key, its quick-save block as positional column values (and back),
//! its attributes and its persistence bookkeeping.

mod job;
mod jobscript;
mod node;
mod resv;
mod singletons;

use wlm_types::{AttributeSet, PersistMeta, QuickSave};

use crate::binder::Param;
use crate::error::DbError;
use crate::schema::EntitySchema;

/// An object the gateway can store and load.
pub trait Persistable: Sized + Send {
    /// Quick-save block type.
    type Quick: QuickSave;

    /// Table layout.
    fn schema() -> &'static EntitySchema;

    /// Identity key; `None` for singletons.
    fn key(&self) -> Option<&str>;

    /// Current quick-save block.
    fn quick(&self) -> &Self::Quick;

    /// Quick-save block as column values, in schema order.
    fn quick_params(&self) -> Vec<Param>;

    /// Rebuild a quick-save block from column values in schema order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidRow`] if a value is missing, has the wrong
    /// type, or names an unknown state or union variant.
    fn decode_quick(values: Vec<Param>) -> Result<Self::Quick, DbError>;

    /// Replace the quick-save block.
    fn set_quick(&mut self, quick: Self::Quick);

    /// Attributes, if the object has any.
    fn attributes(&self) -> Option<&AttributeSet> {
        None
    }

    /// Mutable attributes, if the object has any.
    fn attributes_mut(&mut self) -> Option<&mut AttributeSet> {
        None
    }

    /// Persistence bookkeeping.
    fn meta(&self) -> &PersistMeta;

    /// Mutable persistence bookkeeping.
    fn meta_mut(&mut self) -> &mut PersistMeta;

    /// Whether the object reached a terminal state. Terminal objects always
    /// write their full attribute set.
    fn is_terminal(&self) -> bool {
        false
    }

    /// Record the creating server on first insert.
    fn stamp_owner(&mut self, _server_index: i32) {}

    /// Apply the stored soft-delete marker.
    fn set_deleted(&mut self, _deleted: bool) {}

    /// An empty shell for a stored row with the given key.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidRow`] if a keyed object gets no key.
    fn blank(key: Option<String>) -> Result<Self, DbError>;
}

fn require_key(key: Option<String>, object: &str) -> Result<String, DbError> {
    key.ok_or_else(|| DbError::InvalidRow(format!("{object} row without a key")))
}
