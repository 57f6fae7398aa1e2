//! Store-specific renditions of an [`AttrList`].
//!
//! Each backing store gets one [`WireFormat`]:
//!
//! - [`HstoreArray`] -- flattened `text[]` (`[k1, v1, k2, v2, ...]`) consumed
//!   by `hstore($n::text[])` and produced by `hstore_to_array(col)`. Keys are
//!   `name` or `name.resource`; values are `<flags>.<value>`.
//! - [`PackedBytes`] -- a length-prefixed little-endian byte layout used by
//!   the in-process store.
//!
//! Length limits are enforced here, at the boundary where owned strings
//! become store payloads.

use crate::entry::{AttrEntry, AttrList, EntryFlags, split_flat_key};
use crate::error::CodecError;

/// Longest attribute name accepted on the wire.
pub const MAX_NAME_LEN: usize = 256;

/// Longest resource qualifier accepted on the wire.
pub const MAX_RESOURCE_LEN: usize = 256;

/// Longest attribute value accepted on the wire.
pub const MAX_VALUE_LEN: usize = 16 * 1024 * 1024;

/// Longest identity key accepted on the wire.
pub const MAX_KEY_LEN: usize = 273;

/// Check an identity key against [`MAX_KEY_LEN`].
///
/// # Errors
///
/// Returns [`CodecError::TooLong`] if the key is longer than the limit.
pub fn check_key(key: &str) -> Result<(), CodecError> {
    check_len("identity key", key.len(), MAX_KEY_LEN)
}

fn check_len(field: &'static str, len: usize, max: usize) -> Result<(), CodecError> {
    if len > max {
        return Err(CodecError::TooLong { field, len, max });
    }
    Ok(())
}

fn check_entry(entry: &AttrEntry) -> Result<(), CodecError> {
    check_len("attribute name", entry.name.len(), MAX_NAME_LEN)?;
    if let Some(resource) = &entry.resource {
        check_len("resource name", resource.len(), MAX_RESOURCE_LEN)?;
    }
    check_len("attribute value", entry.value.len(), MAX_VALUE_LEN)
}

/// Conversion between [`AttrList`] and one store's payload type.
pub trait WireFormat {
    /// What the store consumes and produces.
    type Payload;

    /// Serialize a list.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TooLong`] if any field exceeds its limit.
    fn encode(list: &AttrList) -> Result<Self::Payload, CodecError>;

    /// Deserialize a payload.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the payload is truncated or malformed.
    fn decode(payload: &Self::Payload) -> Result<AttrList, CodecError>;
}

// ============================================================================
// hstore text[]
// ============================================================================

/// Flattened key/value `text[]` for `PostgreSQL` `hstore` columns.
#[derive(Debug, Clone, Copy)]
pub struct HstoreArray;

impl WireFormat for HstoreArray {
    type Payload = Vec<String>;

    fn encode(list: &AttrList) -> Result<Self::Payload, CodecError> {
        let mut out = Vec::with_capacity(list.len().saturating_mul(2));
        for entry in list {
            check_entry(entry)?;
            out.push(entry.flat_key());
            out.push(format!("{}.{}", entry.flags.0, entry.value));
        }
        Ok(out)
    }

    fn decode(payload: &Self::Payload) -> Result<AttrList, CodecError> {
        if payload.len() % 2 != 0 {
            return Err(CodecError::Malformed(format!(
                "hstore array has odd length {}",
                payload.len()
            )));
        }
        let mut list = AttrList::new();
        for pair in payload.chunks_exact(2) {
            let [key, raw] = pair else {
                continue;
            };
            let (name, resource) = split_flat_key(key);
            let (flags, value) = raw
                .split_once('.')
                .ok_or_else(|| CodecError::Malformed(format!("value for {key} has no flag prefix")))?;
            let flags = flags
                .parse::<u8>()
                .map_err(|e| CodecError::Malformed(format!("bad flag prefix for {key}: {e}")))?;
            list.push(AttrEntry {
                name: name.to_owned(),
                resource: resource.map(str::to_owned),
                value: value.to_owned(),
                flags: EntryFlags(flags),
            });
        }
        Ok(list)
    }
}

// ============================================================================
// Packed bytes
// ============================================================================

/// Length-prefixed byte layout.
///
/// ```text
/// u8   version
/// u32  entry count
/// per entry:
///   u16 name len, name bytes
///   u16 resource len, resource bytes (0 = no resource)
///   u32 value len, value bytes
///   u8  flags
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PackedBytes;

/// Current [`PackedBytes`] layout version.
pub const PACKED_VERSION: u8 = 1;

impl WireFormat for PackedBytes {
    type Payload = Vec<u8>;

    fn encode(list: &AttrList) -> Result<Self::Payload, CodecError> {
        let mut out = Vec::new();
        out.push(PACKED_VERSION);
        let count = u32::try_from(list.len())
            .map_err(|_| CodecError::Malformed("too many entries".to_owned()))?;
        out.extend_from_slice(&count.to_le_bytes());
        for entry in list {
            check_entry(entry)?;
            put_u16_str(&mut out, &entry.name)?;
            put_u16_str(&mut out, entry.resource.as_deref().unwrap_or_default())?;
            let value_len = u32::try_from(entry.value.len()).map_err(|_| CodecError::TooLong {
                field: "attribute value",
                len: entry.value.len(),
                max: MAX_VALUE_LEN,
            })?;
            out.extend_from_slice(&value_len.to_le_bytes());
            out.extend_from_slice(entry.value.as_bytes());
            out.push(entry.flags.0);
        }
        Ok(out)
    }

    fn decode(payload: &Self::Payload) -> Result<AttrList, CodecError> {
        let mut reader = Reader::new(payload);
        let version = reader.u8()?;
        if version != PACKED_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let count = reader.u32()?;
        let mut list = AttrList::new();
        for _ in 0..count {
            let name_len = usize::from(reader.u16()?);
            let name = reader.string(name_len)?;
            let resource_len = usize::from(reader.u16()?);
            let resource = reader.string(resource_len)?;
            let value_len = usize::try_from(reader.u32()?)
                .map_err(|_| CodecError::Malformed("value length overflow".to_owned()))?;
            let value = reader.string(value_len)?;
            let flags = EntryFlags(reader.u8()?);
            list.push(AttrEntry {
                name,
                resource: (!resource.is_empty()).then_some(resource),
                value,
                flags,
            });
        }
        if reader.remaining() != 0 {
            return Err(CodecError::Malformed(format!(
                "{} trailing bytes",
                reader.remaining()
            )));
        }
        Ok(list)
    }
}

fn put_u16_str(out: &mut Vec<u8>, value: &str) -> Result<(), CodecError> {
    let len = u16::try_from(value.len()).map_err(|_| CodecError::TooLong {
        field: "name",
        len: value.len(),
        max: usize::from(u16::MAX),
    })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    const fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let truncated = CodecError::Truncated {
            needed: len,
            remaining: self.remaining(),
        };
        let bytes = self
            .pos
            .checked_add(len)
            .and_then(|end| self.buf.get(self.pos..end))
            .ok_or(truncated)?;
        let end = self.pos.saturating_add(len);
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        let bytes = self.take(1)?;
        bytes
            .first()
            .copied()
            .ok_or_else(|| CodecError::Malformed("empty read".to_owned()))
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let bytes: [u8; 2] = self
            .take(2)?
            .try_into()
            .map_err(|_| CodecError::Malformed("short u16".to_owned()))?;
        Ok(u16::from_le_bytes(bytes))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let bytes: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| CodecError::Malformed("short u32".to_owned()))?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn string(&mut self, len: usize) -> Result<String, CodecError> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| CodecError::Malformed(format!("invalid UTF-8: {e}")))
    }
}
