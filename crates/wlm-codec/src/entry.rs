//! Serialized attribute entries.
//!
//! An [`AttrList`] is the store-neutral serialized form of an attribute set:
//! a sequence of `(name, resource, value, flags)` tuples. Wire formats turn
//! it into whatever the target store consumes.

/// Flag byte carried by every entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryFlags(pub u8);

impl EntryFlags {
    /// The entry sets a value.
    pub const SET: Self = Self(0x01);
    /// The entry removes a value.
    pub const DELETE: Self = Self(0x02);

    /// Whether the entry is a delete marker.
    pub const fn is_delete(self) -> bool {
        self.0 & Self::DELETE.0 != 0
    }
}

/// One serialized attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrEntry {
    /// Attribute name.
    pub name: String,
    /// Resource qualifier, if any.
    pub resource: Option<String>,
    /// Textual value; empty for delete markers.
    pub value: String,
    /// Set or delete.
    pub flags: EntryFlags,
}

impl AttrEntry {
    /// A value-setting entry.
    pub fn set(name: impl Into<String>, resource: Option<&str>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource: resource.map(str::to_owned),
            value: value.into(),
            flags: EntryFlags::SET,
        }
    }

    /// A delete marker.
    pub fn delete(name: impl Into<String>, resource: Option<&str>) -> Self {
        Self {
            name: name.into(),
            resource: resource.map(str::to_owned),
            value: String::new(),
            flags: EntryFlags::DELETE,
        }
    }

    /// Flat key used by key/value stores: `name` or `name.resource`.
    pub fn flat_key(&self) -> String {
        flat_key(&self.name, self.resource.as_deref())
    }

    fn same_slot(&self, other: &Self) -> bool {
        self.name == other.name && self.resource == other.resource
    }
}

/// Join a name and optional resource into a flat key.
pub fn flat_key(name: &str, resource: Option<&str>) -> String {
    match resource {
        Some(resource) => format!("{name}.{resource}"),
        None => name.to_owned(),
    }
}

/// Split a flat key back into name and resource.
pub fn split_flat_key(key: &str) -> (&str, Option<&str>) {
    match key.split_once('.') {
        Some((name, resource)) => (name, Some(resource)),
        None => (key, None),
    }
}

/// Ordered list of serialized attribute entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttrList {
    entries: Vec<AttrEntry>,
}

impl AttrList {
    /// An empty list.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append an entry.
    pub fn push(&mut self, entry: AttrEntry) {
        self.entries.push(entry);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries.
    pub fn iter(&self) -> core::slice::Iter<'_, AttrEntry> {
        self.entries.iter()
    }

    /// Split into value-setting entries and delete markers.
    pub fn partition(self) -> (Self, Self) {
        let (deletes, sets): (Vec<_>, Vec<_>) = self
            .entries
            .into_iter()
            .partition(|e| e.flags.is_delete());
        (Self { entries: sets }, Self { entries: deletes })
    }

    /// Flat keys of every entry.
    pub fn flat_keys(&self) -> Vec<String> {
        self.entries.iter().map(AttrEntry::flat_key).collect()
    }

    /// Overlay `other` onto this list: matching slots are replaced, new
    /// slots appended, delete markers remove their slot.
    pub fn merge(&mut self, other: Self) {
        for entry in other.entries {
            self.entries.retain(|e| !e.same_slot(&entry));
            if !entry.flags.is_delete() {
                self.entries.push(entry);
            }
        }
    }

    /// Remove every entry whose flat key appears in `keys`.
    pub fn remove_keys(&mut self, keys: &[String]) {
        self.entries.retain(|e| !keys.contains(&e.flat_key()));
    }
}

impl FromIterator<AttrEntry> for AttrList {
    fn from_iter<I: IntoIterator<Item = AttrEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for AttrList {
    type Item = AttrEntry;
    type IntoIter = std::vec::IntoIter<AttrEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a AttrList {
    type Item = &'a AttrEntry;
    type IntoIter = core::slice::Iter<'a, AttrEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_keys_split_on_first_dot() {
        assert_eq!(split_flat_key("Resource_List.ncpus"), ("Resource_List", Some("ncpus")));
        assert_eq!(split_flat_key("queue"), ("queue", None));
        assert_eq!(
            split_flat_key("resources_available.host.domain"),
            ("resources_available", Some("host.domain"))
        );
    }

    #[test]
    fn merge_replaces_and_deletes() {
        let mut base: AttrList = [
            AttrEntry::set("a", None, "1"),
            AttrEntry::set("b", Some("x"), "2"),
        ]
        .into_iter()
        .collect();
        let delta: AttrList = [
            AttrEntry::set("a", None, "10"),
            AttrEntry::delete("b", Some("x")),
            AttrEntry::set("c", None, "3"),
        ]
        .into_iter()
        .collect();

        base.merge(delta);
        let keys = base.flat_keys();
        assert_eq!(keys, vec!["a".to_owned(), "c".to_owned()]);
        assert!(base.iter().any(|e| e.name == "a" && e.value == "10"));
    }

    #[test]
    fn partition_separates_delete_markers() {
        let list: AttrList = [AttrEntry::set("a", None, "1"), AttrEntry::delete("b", None)]
            .into_iter()
            .collect();
        let (sets, deletes) = list.partition();
        assert_eq!(sets.len(), 1);
        assert_eq!(deletes.flat_keys(), vec!["b".to_owned()]);
    }
}
