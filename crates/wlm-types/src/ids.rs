//! Identity keys for persisted objects.
//!
//! Every keyed object (job, reservation, node, scheduler) carries an owned,
//! immutable string key. Keys are typed so a job id can never be passed
//! where a node name is expected. Length limits are checked where a key
//! crosses into a store, not on construction.

use serde::{Deserialize, Serialize};

/// Generates a newtype wrapper around an owned [`String`] key.
macro_rules! define_key {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a key from any string-like value.
            pub fn new(key: impl Into<String>) -> Self {
                Self(key.into())
            }

            /// Borrow the key as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the key and return the inner string.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(key: String) -> Self {
                Self(key)
            }
        }

        impl From<&str> for $name {
            fn from(key: &str) -> Self {
                Self(key.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl core::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

define_key! {
    /// Job identifier, `<sequence>.<server>`.
    JobId
}

define_key! {
    /// Reservation identifier. Rows written by another server may carry an
    /// `@<server>` suffix.
    ResvId
}

define_key! {
    /// Node (vnode) name.
    NodeName
}

define_key! {
    /// Scheduler name.
    SchedName
}

impl JobId {
    /// Build a job id from a sequence number and the owning server's name.
    pub fn from_sequence(sequence: i64, server: &str) -> Self {
        Self(format!("{sequence}.{server}"))
    }

    /// Sequence number portion of the id, if it has one.
    pub fn sequence(&self) -> Option<i64> {
        self.0
            .split_once('.')
            .map_or(self.0.as_str(), |(seq, _)| seq)
            .parse()
            .ok()
    }
}

impl ResvId {
    /// The id with any `@<server>` suffix removed.
    pub fn local_part(&self) -> &str {
        strip_server_suffix(&self.0)
    }
}

/// Remove an `@<server>` suffix from an identity key.
pub fn strip_server_suffix(key: &str) -> &str {
    key.split_once('@').map_or(key, |(local, _)| local)
}
