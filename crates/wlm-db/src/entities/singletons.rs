//! Server, scheduler and mom-info records.

use wlm_types::{
    AttributeSet, MomInfoQuickSave, MomInfoTime, PersistMeta, SchedName, SchedQuickSave,
    Scheduler, Server, ServerQuickSave,
};

use super::{Persistable, require_key};
use crate::binder::{Param, ParamReader};
use crate::error::DbError;
use crate::schema::{self, EntitySchema};

impl Persistable for Server {
    type Quick = ServerQuickSave;

    fn schema() -> &'static EntitySchema {
        &schema::SERVER
    }

    fn key(&self) -> Option<&str> {
        None
    }

    fn quick(&self) -> &ServerQuickSave {
        &self.quick
    }

    fn quick_params(&self) -> Vec<Param> {
        vec![Param::BigInt(self.quick.jobid_number)]
    }

    fn decode_quick(values: Vec<Param>) -> Result<ServerQuickSave, DbError> {
        let mut r = ParamReader::from_values(values);
        Ok(ServerQuickSave {
            jobid_number: r.bigint()?,
        })
    }

    fn set_quick(&mut self, quick: ServerQuickSave) {
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

    fn blank(_key: Option<String>) -> Result<Self, DbError> {
        Ok(Self::stored())
    }
}

impl Persistable for Scheduler {
    type Quick = SchedQuickSave;

    fn schema() -> &'static EntitySchema {
        &schema::SCHED
    }

    fn key(&self) -> Option<&str> {
        Some(self.name.as_str())
    }

    fn quick(&self) -> &SchedQuickSave {
        &SchedQuickSave
    }

    fn quick_params(&self) -> Vec<Param> {
        Vec::new()
    }

    fn decode_quick(_values: Vec<Param>) -> Result<SchedQuickSave, DbError> {
        Ok(SchedQuickSave)
    }

    fn set_quick(&mut self, _quick: SchedQuickSave) {}

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

    fn blank(key: Option<String>) -> Result<Self, DbError> {
        Ok(Self::stored(SchedName::new(require_key(key, "scheduler")?)))
    }
}

impl Persistable for MomInfoTime {
    type Quick = MomInfoQuickSave;

    fn schema() -> &'static EntitySchema {
        &schema::MOMINFO_TIME
    }

    fn key(&self) -> Option<&str> {
        None
    }

    fn quick(&self) -> &MomInfoQuickSave {
        &self.quick
    }

    fn quick_params(&self) -> Vec<Param> {
        vec![
            Param::BigInt(self.quick.mod_time),
            Param::Int(self.quick.generation),
        ]
    }

    fn decode_quick(values: Vec<Param>) -> Result<MomInfoQuickSave, DbError> {
        let mut r = ParamReader::from_values(values);
        Ok(MomInfoQuickSave {
            mod_time: r.bigint()?,
            generation: r.int()?,
        })
    }

    fn set_quick(&mut self, quick: MomInfoQuickSave) {
        self.quick = quick;
    }

    fn meta(&self) -> &PersistMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut PersistMeta {
        &mut self.meta
    }

    fn blank(_key: Option<String>) -> Result<Self, DbError> {
        Ok(Self {
            quick: MomInfoQuickSave::default(),
            meta: PersistMeta::stored(),
        })
    }
}
