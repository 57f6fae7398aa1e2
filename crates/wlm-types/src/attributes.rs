//! Attribute definition tables and the per-object attribute set.
//!
//! Each object type has a static [`AttrTable`] listing the attributes it
//! understands. An [`AttributeSet`] holds the values for one object instance,
//! addressed by definition index plus an optional resource qualifier
//! (`Resource_List.ncpus` is index of `Resource_List`, resource `ncpus`).
//!
//! The set tracks which values changed since the last successful save and
//! which were removed, so the codec can produce a delta. Names the table does
//! not know (for example written by a newer server) are kept verbatim in an
//! unknown bucket and survive a load/save cycle untouched.

use std::collections::{BTreeMap, BTreeSet};

use crate::enums::ObjectType;

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// Definition of one attribute in an object's attribute table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrDef {
    /// Attribute name as stored.
    pub name: &'static str,
    /// Value the attribute has when never set. Equal values are not
    /// persisted in full mode.
    pub default: Option<&'static str>,
    /// Whether the attribute is written to the store at all.
    pub persist: bool,
}

impl AttrDef {
    /// A persisted attribute without a default.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            default: None,
            persist: true,
        }
    }

    /// Set the default value.
    #[must_use]
    pub const fn with_default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }

    /// Mark the attribute as in-memory only.
    #[must_use]
    pub const fn transient(mut self) -> Self {
        self.persist = false;
        self
    }
}

/// Ordered attribute definitions for one object type.
#[derive(Debug, PartialEq, Eq)]
pub struct AttrTable {
    object: ObjectType,
    defs: &'static [AttrDef],
}

impl AttrTable {
    /// Create a table over a static definition slice.
    pub const fn new(object: ObjectType, defs: &'static [AttrDef]) -> Self {
        Self { object, defs }
    }

    /// Object type the table describes.
    pub const fn object(&self) -> ObjectType {
        self.object
    }

    /// Definition at `index`, if the table has one.
    pub fn def(&self, index: usize) -> Option<&'static AttrDef> {
        self.defs.get(index)
    }

    /// Index of the definition named `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.defs.iter().position(|d| d.name == name)
    }

    /// Number of definitions.
    pub const fn len(&self) -> usize {
        self.defs.len()
    }

    /// Whether the table is empty.
    pub const fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Standard tables
// ---------------------------------------------------------------------------

/// Indexes into [`JOB_ATTRS`].
pub mod job_attr {
    /// `job_name`
    pub const JOB_NAME: usize = 0;
    /// `job_owner`
    pub const JOB_OWNER: usize = 1;
    /// `queue`
    pub const QUEUE: usize = 2;
    /// `Resource_List`
    pub const RESOURCE_LIST: usize = 3;
    /// `resources_used`
    pub const RESOURCES_USED: usize = 4;
    /// `exec_vnode`
    pub const EXEC_VNODE: usize = 5;
    /// `euser`
    pub const EUSER: usize = 6;
    /// `egroup`
    pub const EGROUP: usize = 7;
    /// `project`
    pub const PROJECT: usize = 8;
    /// `mtime`
    pub const MTIME: usize = 9;
    /// `ctime`
    pub const CTIME: usize = 10;
    /// `Priority`
    pub const PRIORITY: usize = 11;
    /// `Hold_Types`
    pub const HOLD_TYPES: usize = 12;
    /// `Rerunable`
    pub const RERUNABLE: usize = 13;
    /// `comment`
    pub const COMMENT: usize = 14;
    /// `topjob`
    pub const TOPJOB: usize = 15;
}

/// Attribute table for jobs.
pub static JOB_ATTRS: AttrTable = AttrTable::new(
    ObjectType::Job,
    &[
        AttrDef::new("job_name"),
        AttrDef::new("job_owner"),
        AttrDef::new("queue"),
        AttrDef::new("Resource_List"),
        AttrDef::new("resources_used"),
        AttrDef::new("exec_vnode"),
        AttrDef::new("euser"),
        AttrDef::new("egroup"),
        AttrDef::new("project").with_default("_pbs_project_default"),
        AttrDef::new("mtime"),
        AttrDef::new("ctime"),
        AttrDef::new("Priority").with_default("0"),
        AttrDef::new("Hold_Types").with_default("n"),
        AttrDef::new("Rerunable").with_default("True"),
        AttrDef::new("comment"),
        AttrDef::new("topjob").transient(),
    ],
);

/// Indexes into [`RESV_ATTRS`].
pub mod resv_attr {
    /// `Reserve_Name`
    pub const NAME: usize = 0;
    /// `Reserve_Owner`
    pub const OWNER: usize = 1;
    /// `reserve_start`
    pub const START: usize = 2;
    /// `reserve_end`
    pub const END: usize = 3;
    /// `queue`
    pub const QUEUE: usize = 4;
    /// `Resource_List`
    pub const RESOURCE_LIST: usize = 5;
    /// `resv_nodes`
    pub const NODES: usize = 6;
    /// `mtime`
    pub const MTIME: usize = 7;
}

/// Attribute table for reservations.
pub static RESV_ATTRS: AttrTable = AttrTable::new(
    ObjectType::Reservation,
    &[
        AttrDef::new("Reserve_Name"),
        AttrDef::new("Reserve_Owner"),
        AttrDef::new("reserve_start"),
        AttrDef::new("reserve_end"),
        AttrDef::new("queue"),
        AttrDef::new("Resource_List"),
        AttrDef::new("resv_nodes"),
        AttrDef::new("mtime"),
        AttrDef::new("Authorized_Users"),
        AttrDef::new("ctime"),
    ],
);

/// Indexes into [`NODE_ATTRS`].
pub mod node_attr {
    /// `Mom`
    pub const MOM: usize = 0;
    /// `Port`
    pub const PORT: usize = 1;
    /// `resources_available`
    pub const RESOURCES_AVAILABLE: usize = 2;
    /// `resources_assigned`
    pub const RESOURCES_ASSIGNED: usize = 3;
    /// `comment`
    pub const COMMENT: usize = 4;
    /// `sharing`
    pub const SHARING: usize = 5;
}

/// Attribute table for nodes.
pub static NODE_ATTRS: AttrTable = AttrTable::new(
    ObjectType::Node,
    &[
        AttrDef::new("Mom"),
        AttrDef::new("Port").with_default("15002"),
        AttrDef::new("resources_available"),
        AttrDef::new("resources_assigned"),
        AttrDef::new("comment"),
        AttrDef::new("sharing").with_default("default_shared"),
        AttrDef::new("last_state_change_time"),
        AttrDef::new("pcpus").transient(),
    ],
);

/// Indexes into [`SERVER_ATTRS`].
pub mod server_attr {
    /// `scheduling`
    pub const SCHEDULING: usize = 0;
    /// `default_queue`
    pub const DEFAULT_QUEUE: usize = 1;
    /// `resources_default`
    pub const RESOURCES_DEFAULT: usize = 2;
    /// `comment`
    pub const COMMENT: usize = 3;
}

/// Attribute table for the server.
pub static SERVER_ATTRS: AttrTable = AttrTable::new(
    ObjectType::Server,
    &[
        AttrDef::new("scheduling").with_default("True"),
        AttrDef::new("default_queue"),
        AttrDef::new("resources_default"),
        AttrDef::new("comment"),
        AttrDef::new("max_run"),
        AttrDef::new("server_state").transient(),
    ],
);

/// Indexes into [`SCHED_ATTRS`].
pub mod sched_attr {
    /// `sched_host`
    pub const HOST: usize = 0;
    /// `sched_port`
    pub const PORT: usize = 1;
    /// `sched_cycle_length`
    pub const CYCLE_LENGTH: usize = 2;
    /// `partition`
    pub const PARTITION: usize = 3;
}

/// Attribute table for schedulers.
pub static SCHED_ATTRS: AttrTable = AttrTable::new(
    ObjectType::Scheduler,
    &[
        AttrDef::new("sched_host"),
        AttrDef::new("sched_port").with_default("15004"),
        AttrDef::new("sched_cycle_length").with_default("00:20:00"),
        AttrDef::new("partition"),
        AttrDef::new("comment"),
        AttrDef::new("state").transient(),
    ],
);

// ---------------------------------------------------------------------------
// Attribute set
// ---------------------------------------------------------------------------

/// Address of a value inside an [`AttributeSet`].
pub type AttrKey = (usize, Option<String>);

/// Address of a value in the unknown bucket: raw name plus resource.
pub type UnknownKey = (String, Option<String>);

/// A stored attribute value and its dirty flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrValue {
    /// Textual value.
    pub value: String,
    /// Set since the last successful save.
    pub modified: bool,
}

/// Attribute values for one object instance.
#[derive(Debug, Clone)]
pub struct AttributeSet {
    table: &'static AttrTable,
    values: BTreeMap<AttrKey, AttrValue>,
    unknown: BTreeMap<UnknownKey, AttrValue>,
    removed: BTreeSet<AttrKey>,
}

impl AttributeSet {
    /// An empty set over `table`.
    pub const fn new(table: &'static AttrTable) -> Self {
        Self {
            table,
            values: BTreeMap::new(),
            unknown: BTreeMap::new(),
            removed: BTreeSet::new(),
        }
    }

    /// The definition table backing this set.
    pub const fn table(&self) -> &'static AttrTable {
        self.table
    }

    /// Set a value and mark it modified.
    pub fn set(&mut self, index: usize, resource: Option<&str>, value: impl Into<String>) {
        let key = (index, resource.map(str::to_owned));
        self.removed.remove(&key);
        self.values.insert(
            key,
            AttrValue {
                value: value.into(),
                modified: true,
            },
        );
    }

    /// Set a value by attribute name. Names the table does not know land in
    /// the unknown bucket.
    pub fn set_by_name(&mut self, name: &str, resource: Option<&str>, value: impl Into<String>) {
        match self.table.index_of(name) {
            Some(index) => self.set(index, resource, value),
            None => {
                self.unknown.insert(
                    (name.to_owned(), resource.map(str::to_owned)),
                    AttrValue {
                        value: value.into(),
                        modified: true,
                    },
                );
            }
        }
    }

    /// Current value at `index`/`resource`.
    pub fn get(&self, index: usize, resource: Option<&str>) -> Option<&str> {
        self.values
            .get(&(index, resource.map(str::to_owned)))
            .map(|v| v.value.as_str())
    }

    /// Current value by name, looking in the unknown bucket as well.
    pub fn get_by_name(&self, name: &str, resource: Option<&str>) -> Option<&str> {
        match self.table.index_of(name) {
            Some(index) => self.get(index, resource),
            None => self
                .unknown
                .get(&(name.to_owned(), resource.map(str::to_owned)))
                .map(|v| v.value.as_str()),
        }
    }

    /// Remove one value. A removed value that was present is remembered so
    /// the next delta carries a delete marker for it.
    pub fn unset(&mut self, index: usize, resource: Option<&str>) {
        let key = (index, resource.map(str::to_owned));
        if self.values.remove(&key).is_some() {
            self.removed.insert(key);
        }
    }

    /// Remove every value (all resources) of the attribute at `index`.
    pub fn unset_all(&mut self, index: usize) {
        let keys: Vec<AttrKey> = self
            .values
            .keys()
            .filter(|(i, _)| *i == index)
            .cloned()
            .collect();
        for key in keys {
            self.values.remove(&key);
            self.removed.insert(key);
        }
    }

    /// Whether anything changed since the last successful save.
    pub fn is_modified(&self) -> bool {
        !self.removed.is_empty()
            || self.values.values().any(|v| v.modified)
            || self.unknown.values().any(|v| v.modified)
    }

    /// Forget all change tracking. Called after a successful save.
    pub fn clear_modified(&mut self) {
        self.removed.clear();
        for value in self.values.values_mut() {
            value.modified = false;
        }
        for value in self.unknown.values_mut() {
            value.modified = false;
        }
    }

    /// Known values in index order.
    pub fn iter(&self) -> impl Iterator<Item = (&AttrKey, &AttrValue)> {
        self.values.iter()
    }

    /// Values in the unknown bucket.
    pub fn unknown(&self) -> impl Iterator<Item = (&UnknownKey, &AttrValue)> {
        self.unknown.iter()
    }

    /// Keys removed since the last successful save.
    pub fn removed(&self) -> impl Iterator<Item = &AttrKey> {
        self.removed.iter()
    }

    /// Number of stored values, unknown bucket included.
    pub fn len(&self) -> usize {
        self.values.len().saturating_add(self.unknown.len())
    }

    /// Whether no values are stored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.unknown.is_empty()
    }

    /// Store a value read from the store without marking it modified.
    pub fn load(&mut self, index: usize, resource: Option<String>, value: String) {
        self.values.insert(
            (index, resource),
            AttrValue {
                value,
                modified: false,
            },
        );
    }

    /// Store an unrecognized value read from the store.
    pub fn load_unknown(&mut self, name: String, resource: Option<String>, value: String) {
        self.unknown.insert(
            (name, resource),
            AttrValue {
                value,
                modified: false,
            },
        );
    }

    /// Drop a value because the store says it was deleted.
    pub fn discard(&mut self, index: usize, resource: Option<&str>) {
        self.values.remove(&(index, resource.map(str::to_owned)));
    }

    /// Drop an unknown value because the store says it was deleted.
    pub fn discard_unknown(&mut self, name: &str, resource: Option<&str>) {
        self.unknown
            .remove(&(name.to_owned(), resource.map(str::to_owned)));
    }
}

impl PartialEq for AttributeSet {
    fn eq(&self, other: &Self) -> bool {
        let values = |set: &Self| {
            set.values
                .iter()
                .map(|(k, v)| (k.clone(), v.value.clone()))
                .collect::<Vec<_>>()
        };
        let unknown = |set: &Self| {
            set.unknown
                .iter()
                .map(|(k, v)| (k.clone(), v.value.clone()))
                .collect::<Vec<_>>()
        };
        core::ptr::eq(self.table, other.table)
            && values(self) == values(other)
            && unknown(self) == unknown(other)
    }
}
