//! Attribute set encoding and decoding.
//!
//! [`encode`] turns an [`AttributeSet`] into an [`AttrList`] in one of two
//! modes:
//!
//! - [`EncodeMode::Delta`] -- values modified since the last successful save,
//!   plus a delete marker for every value removed since then.
//! - [`EncodeMode::Full`] -- every persisted value that differs from its
//!   definition's default. No delete markers; the result replaces whatever
//!   the store holds.
//!
//! [`decode`] applies a list to a set without marking anything modified.
//! Names the table does not recognize go to the unknown bucket.

use wlm_types::AttributeSet;

use crate::entry::{AttrEntry, AttrList};
use crate::error::CodecError;

/// Which values [`encode`] emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeMode {
    /// Only what changed since the last successful save.
    Delta,
    /// Everything that differs from its default.
    Full,
}

/// Encode an attribute set.
///
/// # Errors
///
/// Returns [`CodecError::UnknownIndex`] if the set holds a value at an index
/// its table does not define.
pub fn encode(attrs: &AttributeSet, mode: EncodeMode) -> Result<AttrList, CodecError> {
    let table = attrs.table();
    let mut list = AttrList::new();

    for ((index, resource), value) in attrs.iter() {
        let def = table.def(*index).ok_or(CodecError::UnknownIndex {
            object: table.object(),
            index: *index,
        })?;
        if !def.persist {
            continue;
        }
        let include = match mode {
            EncodeMode::Delta => value.modified,
            EncodeMode::Full => resource.is_some() || def.default != Some(value.value.as_str()),
        };
        if include {
            list.push(AttrEntry::set(def.name, resource.as_deref(), value.value.clone()));
        }
    }

    for ((name, resource), value) in attrs.unknown() {
        if mode == EncodeMode::Full || value.modified {
            list.push(AttrEntry::set(name.clone(), resource.as_deref(), value.value.clone()));
        }
    }

    if mode == EncodeMode::Delta {
        for (index, resource) in attrs.removed() {
            let def = table.def(*index).ok_or(CodecError::UnknownIndex {
                object: table.object(),
                index: *index,
            })?;
            if def.persist {
                list.push(AttrEntry::delete(def.name, resource.as_deref()));
            }
        }
    }

    Ok(list)
}

/// Apply a serialized list to an attribute set.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] for an entry without a name. The set may
/// be partially updated when this fails; callers decode into a scratch set.
pub fn decode(list: &AttrList, attrs: &mut AttributeSet) -> Result<(), CodecError> {
    let table = attrs.table();
    for entry in list {
        if entry.name.is_empty() {
            return Err(CodecError::Malformed("entry with empty name".to_owned()));
        }
        let resource = entry.resource.as_deref();
        match (table.index_of(&entry.name), entry.flags.is_delete()) {
            (Some(index), true) => attrs.discard(index, resource),
            (Some(index), false) => {
                attrs.load(index, entry.resource.clone(), entry.value.clone());
            }
            (None, true) => attrs.discard_unknown(&entry.name, resource),
            (None, false) => {
                tracing::debug!(
                    object = %table.object(),
                    name = %entry.name,
                    "Keeping unrecognized attribute"
                );
                attrs.load_unknown(entry.name.clone(), entry.resource.clone(), entry.value.clone());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wlm_types::attributes::{job_attr, node_attr};
    use wlm_types::{JOB_ATTRS, NODE_ATTRS};

    fn sample_job_attrs() -> AttributeSet {
        let mut attrs = AttributeSet::new(&JOB_ATTRS);
        attrs.set(job_attr::JOB_NAME, None, "sim");
        attrs.set(job_attr::RESOURCE_LIST, Some("ncpus"), "4");
        attrs.set(job_attr::RESOURCE_LIST, Some("mem"), "8gb");
        attrs
    }

    #[test]
    fn full_encode_then_decode_reproduces_values() {
        let attrs = sample_job_attrs();
        let list = encode(&attrs, EncodeMode::Full);
        assert!(list.is_ok());
        let list = list.unwrap_or_default();
        assert_eq!(list.len(), 3);

        let mut decoded = AttributeSet::new(&JOB_ATTRS);
        assert!(decode(&list, &mut decoded).is_ok());
        assert_eq!(decoded, attrs);
        assert!(!decoded.is_modified());
    }

    #[test]
    fn full_encode_skips_defaults_and_transients() {
        let mut attrs = AttributeSet::new(&JOB_ATTRS);
        attrs.set(job_attr::HOLD_TYPES, None, "n");
        attrs.set(job_attr::RERUNABLE, None, "False");
        attrs.set(job_attr::TOPJOB, None, "True");

        let list = encode(&attrs, EncodeMode::Full).unwrap_or_default();
        let keys = list.flat_keys();
        assert_eq!(keys, vec!["Rerunable".to_owned()]);
    }

    #[test]
    fn delta_is_empty_after_clear() {
        let mut attrs = sample_job_attrs();
        assert_eq!(encode(&attrs, EncodeMode::Delta).map(|l| l.len()).ok(), Some(3));
        attrs.clear_modified();
        assert!(
            encode(&attrs, EncodeMode::Delta)
                .map(|l| l.is_empty())
                .unwrap_or(false)
        );
    }

    #[test]
    fn delta_carries_only_changes_and_delete_markers() {
        let mut attrs = sample_job_attrs();
        attrs.clear_modified();
        attrs.set(job_attr::JOB_NAME, None, "renamed");
        attrs.unset(job_attr::RESOURCE_LIST, Some("mem"));

        let list = encode(&attrs, EncodeMode::Delta).unwrap_or_default();
        assert_eq!(list.len(), 2);
        let (sets, deletes) = list.partition();
        assert_eq!(sets.flat_keys(), vec!["job_name".to_owned()]);
        assert_eq!(deletes.flat_keys(), vec!["Resource_List.mem".to_owned()]);
    }

    #[test]
    fn delete_marker_removes_on_decode() {
        let mut attrs = sample_job_attrs();
        attrs.clear_modified();
        let list: AttrList = [AttrEntry::delete("Resource_List", Some("ncpus"))]
            .into_iter()
            .collect();
        assert!(decode(&list, &mut attrs).is_ok());
        assert_eq!(attrs.get(job_attr::RESOURCE_LIST, Some("ncpus")), None);
        assert_eq!(attrs.get(job_attr::RESOURCE_LIST, Some("mem")), Some("8gb"));
    }

    #[test]
    fn unknown_names_round_trip_verbatim() {
        let list: AttrList = [
            AttrEntry::set("Mom", None, "host1"),
            AttrEntry::set("newer_server_attr", Some("x"), "kept"),
        ]
        .into_iter()
        .collect();
        let mut attrs = AttributeSet::new(&NODE_ATTRS);
        assert!(decode(&list, &mut attrs).is_ok());
        assert_eq!(attrs.get(node_attr::MOM, None), Some("host1"));

        let again = encode(&attrs, EncodeMode::Full).unwrap_or_default();
        assert!(
            again
                .iter()
                .any(|e| e.name == "newer_server_attr" && e.value == "kept")
        );
    }

    #[test]
    fn out_of_table_index_is_an_encode_error() {
        let mut attrs = AttributeSet::new(&NODE_ATTRS);
        attrs.set(NODE_ATTRS.len(), None, "x");
        assert!(matches!(
            encode(&attrs, EncodeMode::Full),
            Err(CodecError::UnknownIndex { .. })
        ));
    }
}
