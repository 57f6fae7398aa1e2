use wlm_types::{JobId, JobScript, PersistMeta, ScriptQuickSave};

use super::{Persistable, require_key};
use crate::binder::{Param, ParamReader};
use crate::error::DbError;
use crate::schema::{self, EntitySchema};

impl Persistable for JobScript {
    type Quick = ScriptQuickSave;

    fn schema() -> &'static EntitySchema {
        &schema::JOB_SCRIPT
    }

    fn key(&self) -> Option<&str> {
        Some(self.job_id.as_str())
    }

    fn quick(&self) -> &ScriptQuickSave {
        &self.quick
    }

    fn quick_params(&self) -> Vec<Param> {
        vec![Param::Blob(self.quick.script.clone())]
    }

    fn decode_quick(values: Vec<Param>) -> Result<ScriptQuickSave, DbError> {
        let mut r = ParamReader::from_values(values);
        Ok(ScriptQuickSave { script: r.blob()? })
    }

    fn set_quick(&mut self, quick: ScriptQuickSave) {
        self.quick = quick;
    }

    fn meta(&self) -> &PersistMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut PersistMeta {
        &mut self.meta
    }

    fn blank(key: Option<String>) -> Result<Self, DbError> {
        Ok(Self {
            job_id: JobId::new(require_key(key, "job script")?),
            quick: ScriptQuickSave::default(),
            meta: PersistMeta::stored(),
        })
    }
}
