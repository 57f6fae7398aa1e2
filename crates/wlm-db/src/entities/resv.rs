use wlm_types::{AttributeSet, PersistMeta, Reservation, ResvId, ResvQuickSave, ResvState, ResvUnion};

use super::{Persistable, require_key};
use crate::binder::{Param, ParamReader};
use crate::error::DbError;
use crate::schema::{self, EntitySchema};

impl Persistable for Reservation {
    type Quick = ResvQuickSave;

    fn schema() -> &'static EntitySchema {
        &schema::RESV
    }

    fn key(&self) -> Option<&str> {
        Some(self.id.as_str())
    }

    fn quick(&self) -> &ResvQuickSave {
        &self.quick
    }

    fn quick_params(&self) -> Vec<Param> {
        let q = &self.quick;
        let (from_sock, from_addr) = match q.union {
            ResvUnion::New {
                from_sock,
                from_addr,
            } => (from_sock, from_addr),
            ResvUnion::Unset => (0, 0),
        };
        vec![
            Param::Str(q.queue.clone()),
            Param::BigInt(q.duration),
            Param::BigInt(q.end_time),
            Param::Int(q.union.tag()),
            Param::Int(from_sock),
            Param::BigInt(from_addr),
            Param::Int(q.numattr),
            Param::Int(q.resv_tag),
            Param::Int(q.state.code()),
            Param::Int(q.substate),
            Param::Int(q.svrflags),
            Param::BigInt(q.start_time),
            Param::BigInt(q.active_time),
            Param::Int(q.resv_type),
            Param::Int(q.owner_server),
        ]
    }

    fn decode_quick(values: Vec<Param>) -> Result<ResvQuickSave, DbError> {
        let mut r = ParamReader::from_values(values);
        let queue = r.str()?;
        let duration = r.bigint()?;
        let end_time = r.bigint()?;
        let tag = r.int()?;
        let from_sock = r.int()?;
        let from_addr = r.bigint()?;
        let union = match tag {
            0 => ResvUnion::Unset,
            1 => ResvUnion::New {
                from_sock,
                from_addr,
            },
            other => {
                return Err(DbError::InvalidRow(format!(
                    "unknown reservation union type {other}"
                )));
            }
        };
        let numattr = r.int()?;
        let resv_tag = r.int()?;
        let state_code = r.int()?;
        let state = ResvState::from_code(state_code).ok_or_else(|| {
            DbError::InvalidRow(format!("unknown reservation state {state_code}"))
        })?;
        Ok(ResvQuickSave {
            queue,
            duration,
            end_time,
            union,
            numattr,
            resv_tag,
            state,
            substate: r.int()?,
            svrflags: r.int()?,
            start_time: r.bigint()?,
            active_time: r.bigint()?,
            resv_type: r.int()?,
            owner_server: r.int()?,
        })
    }

    fn set_quick(&mut self, quick: ResvQuickSave) {
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

    fn is_terminal(&self) -> bool {
        Self::is_terminal(self)
    }

    fn stamp_owner(&mut self, server_index: i32) {
        self.quick.owner_server = server_index;
    }

    fn blank(key: Option<String>) -> Result<Self, DbError> {
        Ok(Self::stored(ResvId::new(require_key(key, "reservation")?)))
    }
}
