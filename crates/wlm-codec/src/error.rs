//! Error types for the codec.

use wlm_types::ObjectType;

/// Errors raised while encoding or decoding attribute lists.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A value sits at an index its attribute table does not define.
    #[error("{object} attribute table has no definition at index {index}")]
    UnknownIndex {
        /// Object type whose table was consulted.
        object: ObjectType,
        /// The unrecognized index.
        index: usize,
    },

    /// The serialized form ended before a complete entry was read.
    #[error("attribute payload truncated: needed {needed} bytes, {remaining} left")]
    Truncated {
        /// Bytes the next field requires.
        needed: usize,
        /// Bytes remaining in the payload.
        remaining: usize,
    },

    /// The serialized form is structurally invalid.
    #[error("malformed attribute payload: {0}")]
    Malformed(String),

    /// A payload carries a format version this build does not read.
    #[error("unsupported attribute payload version {0}")]
    UnsupportedVersion(u8),

    /// A field exceeds its wire-boundary length limit.
    #[error("{field} is {len} bytes, limit is {max}")]
    TooLong {
        /// Which field overflowed.
        field: &'static str,
        /// Actual length.
        len: usize,
        /// Permitted length.
        max: usize,
    },
}
