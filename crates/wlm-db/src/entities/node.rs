use wlm_types::{AttributeSet, Node, NodeName, NodeQuickSave, PersistMeta};

use super::{Persistable, require_key};
use crate::binder::{Param, ParamReader};
use crate::error::DbError;
use crate::schema::{self, EntitySchema};

impl Persistable for Node {
    type Quick = NodeQuickSave;

    fn schema() -> &'static EntitySchema {
        &schema::NODE
    }

    fn key(&self) -> Option<&str> {
        Some(self.name.as_str())
    }

    fn quick(&self) -> &NodeQuickSave {
        &self.quick
    }

    fn quick_params(&self) -> Vec<Param> {
        let q = &self.quick;
        vec![
            Param::Int(q.index),
            Param::BigInt(q.mom_modtime),
            Param::Str(q.hostname.clone()),
            Param::Int(q.state),
            Param::Int(q.ntype),
            Param::Str(q.parent_queue.clone()),
        ]
    }

    fn decode_quick(values: Vec<Param>) -> Result<NodeQuickSave, DbError> {
        let mut r = ParamReader::from_values(values);
        Ok(NodeQuickSave {
            index: r.int()?,
            mom_modtime: r.bigint()?,
            hostname: r.str()?,
            state: r.int()?,
            ntype: r.int()?,
            parent_queue: r.str()?,
        })
    }

    fn set_quick(&mut self, quick: NodeQuickSave) {
        self.quick = quick;
    }

    fn attributes(&self) -> Option<&AttributeSet> {
        Some(&self.attrs)
    }

    fn attributes_mut(&mut self) -> Option<&mut AttributeSet> {
        Some(&mut self.attrs)
    }

    fn meta(&self) -> &PersistMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut PersistMeta {
        &mut self.meta
    }

    fn set_deleted(&mut self, deleted: bool) {
        self.deleted = deleted;
    }

    fn blank(key: Option<String>) -> Result<Self, DbError> {
        Ok(Self::stored(NodeName::new(require_key(key, "node")?)))
    }
}
