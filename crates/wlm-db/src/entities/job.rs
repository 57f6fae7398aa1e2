use wlm_types::{AttributeSet, Job, JobId, JobQuickSave, JobState, JobUnion, PersistMeta};

use super::{Persistable, require_key};
use crate::binder::{Param, ParamReader};
use crate::error::DbError;
use crate::schema::{self, EntitySchema};

impl Persistable for Job {
    type Quick = JobQuickSave;

    fn schema() -> &'static EntitySchema {
        &schema::JOB
    }

    fn key(&self) -> Option<&str> {
        Some(self.id.as_str())
    }

    fn quick(&self) -> &JobQuickSave {
        &self.quick
    }

    fn quick_params(&self) -> Vec<Param> {
        let q = &self.quick;
        // Inactive union slots are stored as zero.
        let (mut from_sock, mut from_addr, mut mom_addr, mut mom_port) = (0, 0, 0, 0);
        let (mut exit_stat, mut queue_time, mut retry_time) = (0, 0, 0);
        match q.union {
            JobUnion::New {
                from_sock: sock,
                from_addr: addr,
            } => {
                from_sock = sock;
                from_addr = addr;
            }
            JobUnion::Exec {
                mom_addr: addr,
                mom_port: port,
                exit_stat: exit,
            } => {
                mom_addr = addr;
                mom_port = port;
                exit_stat = exit;
            }
            JobUnion::Route {
                queue_time: queued,
                retry_time: retry,
            } => {
                queue_time = queued;
                retry_time = retry;
            }
            JobUnion::Mom { exit_stat: exit } => exit_stat = exit,
        }
        vec![
            Param::Int(q.state.code()),
            Param::Int(q.substate),
            Param::Int(q.svrflags),
            Param::Int(q.numattr),
            Param::Int(q.ordering),
            Param::Int(q.priority),
            Param::BigInt(q.stime),
            Param::BigInt(q.end_boundary),
            Param::Str(q.queue.clone()),
            Param::Str(q.destination.clone()),
            Param::Int(q.union.tag()),
            Param::Int(from_sock),
            Param::BigInt(from_addr),
            Param::BigInt(mom_addr),
            Param::Int(mom_port),
            Param::Int(exit_stat),
            Param::BigInt(queue_time),
            Param::BigInt(retry_time),
            Param::Str(q.jid.clone()),
            Param::Str(q.ash.clone()),
            Param::Int(q.credential_type),
            Param::BigInt(q.queue_rank),
            Param::Int(q.owner_server),
        ]
    }

    fn decode_quick(values: Vec<Param>) -> Result<JobQuickSave, DbError> {
        let mut r = ParamReader::from_values(values);
        let state_code = r.int()?;
        let state = JobState::from_code(state_code)
            .ok_or_else(|| DbError::InvalidRow(format!("unknown job state {state_code}")))?;
        let substate = r.int()?;
        let svrflags = r.int()?;
        let numattr = r.int()?;
        let ordering = r.int()?;
        let priority = r.int()?;
        let stime = r.bigint()?;
        let end_boundary = r.bigint()?;
        let queue = r.str()?;
        let destination = r.str()?;
        let tag = r.int()?;
        let from_sock = r.int()?;
        let from_addr = r.bigint()?;
        let mom_addr = r.bigint()?;
        let mom_port = r.int()?;
        let exit_stat = r.int()?;
        let queue_time = r.bigint()?;
        let retry_time = r.bigint()?;
        let union = match tag {
            1 => JobUnion::New {
                from_sock,
                from_addr,
            },
            2 => JobUnion::Exec {
                mom_addr,
                mom_port,
                exit_stat,
            },
            3 => JobUnion::Route {
                queue_time,
                retry_time,
            },
            4 => JobUnion::Mom { exit_stat },
            other => {
                return Err(DbError::InvalidRow(format!("unknown job union type {other}")));
            }
        };
        Ok(JobQuickSave {
            state,
            substate,
            svrflags,
            numattr,
            ordering,
            priority,
            stime,
            end_boundary,
            queue,
            destination,
            union,
            jid: r.str()?,
            ash: r.str()?,
            credential_type: r.int()?,
            queue_rank: r.bigint()?,
            owner_server: r.int()?,
        })
    }

    fn set_quick(&mut self, quick: JobQuickSave) {
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
        Ok(Self::stored(JobId::new(require_key(key, "job")?)))
    }
}
