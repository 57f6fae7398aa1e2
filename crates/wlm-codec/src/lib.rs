//! Attribute codec and change detection for the workload manager state store.
//!
//! Sits between the in-memory object model and the storage backends:
//!
//! ```text
//! AttributeSet --encode--> AttrList --WireFormat--> store payload
//!              <--decode--          <------------
//!
//! Quick-save block --hash--> QsDigest (compared before every write)
//! ```
//!
//! # Modules
//!
//! - [`attribute`] -- Delta/full encoding and decoding of attribute sets
//! - [`entry`] -- The store-neutral serialized attribute list
//! - [`wire`] -- Per-store payload formats and wire-boundary length limits
//! - [`digest`] -- Quick-save block digests
//! - [`error`] -- Codec error type

pub mod attribute;
pub mod digest;
pub mod entry;
pub mod error;
pub mod wire;

pub use attribute::{EncodeMode, decode, encode};
pub use entry::{AttrEntry, AttrList, EntryFlags, flat_key, split_flat_key};
pub use error::CodecError;
pub use wire::{HstoreArray, PackedBytes, WireFormat, check_key};
