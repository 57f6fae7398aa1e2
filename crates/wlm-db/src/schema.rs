//! Static table layouts for every persisted object.
//!
//! Statement text, parameter shapes and row decoding are all derived from
//! these descriptions. Column names follow the tables created by
//! `migrations/0001_wlm_schema.sql`.

use wlm_types::ObjectType;

/// Rust-side type of a quick-save column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// `TEXT`, bound as `String`.
    Text,
    /// `INTEGER`, bound as `i32`.
    Int,
    /// `BIGINT`, bound as `i64`.
    BigInt,
    /// `BYTEA`, bound as `Vec<u8>`.
    Bytes,
}

/// One quick-save column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: &'static str,
    /// Column type.
    pub ty: ColumnType,
}

const fn text(name: &'static str) -> Column {
    Column {
        name,
        ty: ColumnType::Text,
    }
}

const fn int(name: &'static str) -> Column {
    Column {
        name,
        ty: ColumnType::Int,
    }
}

const fn bigint(name: &'static str) -> Column {
    Column {
        name,
        ty: ColumnType::BigInt,
    }
}

const fn bytes(name: &'static str) -> Column {
    Column {
        name,
        ty: ColumnType::Bytes,
    }
}

/// Layout of one object's table.
#[derive(Debug, PartialEq, Eq)]
pub struct EntitySchema {
    /// Object stored in the table.
    pub object: ObjectType,
    /// Schema-qualified table name.
    pub table: &'static str,
    /// Identity key column; `None` for singletons.
    pub key: Option<&'static str>,
    /// Quick-save columns in binding order.
    pub quick: &'static [Column],
    /// Save timestamp column, if the object is versioned.
    pub savetm: Option<&'static str>,
    /// Creation timestamp column.
    pub creattm: Option<&'static str>,
    /// `hstore` attribute column.
    pub attributes: Option<&'static str>,
    /// Soft-delete marker column.
    pub deleted: Option<&'static str>,
    /// Stable ordering for listings.
    pub order_by: &'static [&'static str],
    /// Secondary lookup column.
    pub secondary: Option<&'static str>,
}

impl EntitySchema {
    /// Position of a quick column by name.
    pub fn quick_position(&self, name: &str) -> Option<usize> {
        self.quick.iter().position(|c| c.name == name)
    }
}

/// `wlm.job`
pub static JOB: EntitySchema = EntitySchema {
    object: ObjectType::Job,
    table: "wlm.job",
    key: Some("ji_jobid"),
    quick: &[
        int("ji_state"),
        int("ji_substate"),
        int("ji_svrflags"),
        int("ji_numattr"),
        int("ji_ordering"),
        int("ji_priority"),
        bigint("ji_stime"),
        bigint("ji_endtbdry"),
        text("ji_queue"),
        text("ji_destin"),
        int("ji_un_type"),
        int("ji_fromsock"),
        bigint("ji_fromaddr"),
        bigint("ji_momaddr"),
        int("ji_momport"),
        int("ji_exitstat"),
        bigint("ji_quetime"),
        bigint("ji_rteretry"),
        text("ji_4jid"),
        text("ji_4ash"),
        int("ji_credtype"),
        bigint("ji_qrank"),
        int("ji_svrindex"),
    ],
    savetm: Some("ji_savetm"),
    creattm: Some("ji_creattm"),
    attributes: Some("attributes"),
    deleted: None,
    order_by: &["ji_qrank", "ji_creattm"],
    secondary: None,
};

/// `wlm.resv`
pub static RESV: EntitySchema = EntitySchema {
    object: ObjectType::Reservation,
    table: "wlm.resv",
    key: Some("ri_resvid"),
    quick: &[
        text("ri_queue"),
        bigint("ri_duration"),
        bigint("ri_etime"),
        int("ri_un_type"),
        int("ri_fromsock"),
        bigint("ri_fromaddr"),
        int("ri_numattr"),
        int("ri_resvtag"),
        int("ri_state"),
        int("ri_substate"),
        int("ri_svrflags"),
        bigint("ri_stime"),
        bigint("ri_tactive"),
        int("ri_type"),
        int("ri_svrindex"),
    ],
    savetm: Some("ri_savetm"),
    creattm: Some("ri_creattm"),
    attributes: Some("attributes"),
    deleted: None,
    order_by: &["ri_creattm"],
    secondary: None,
};

/// `wlm.node`
pub static NODE: EntitySchema = EntitySchema {
    object: ObjectType::Node,
    table: "wlm.node",
    key: Some("nd_name"),
    quick: &[
        int("nd_index"),
        bigint("mom_modtime"),
        text("nd_hostname"),
        int("nd_state"),
        int("nd_ntype"),
        text("nd_pque"),
    ],
    savetm: Some("nd_savetm"),
    creattm: Some("nd_creattm"),
    attributes: Some("attributes"),
    deleted: Some("nd_deleted"),
    order_by: &["nd_index", "nd_creattm"],
    secondary: Some("nd_hostname"),
};

/// `wlm.server`
pub static SERVER: EntitySchema = EntitySchema {
    object: ObjectType::Server,
    table: "wlm.server",
    key: None,
    quick: &[bigint("sv_jobidnumber")],
    savetm: Some("sv_savetm"),
    creattm: Some("sv_creattm"),
    attributes: Some("attributes"),
    deleted: None,
    order_by: &[],
    secondary: None,
};

/// `wlm.sched`
pub static SCHED: EntitySchema = EntitySchema {
    object: ObjectType::Scheduler,
    table: "wlm.sched",
    key: Some("sched_name"),
    quick: &[],
    savetm: Some("sched_savetm"),
    creattm: Some("sched_creattm"),
    attributes: Some("attributes"),
    deleted: None,
    order_by: &["sched_creattm"],
    secondary: None,
};

/// `wlm.mominfo_time`
pub static MOMINFO_TIME: EntitySchema = EntitySchema {
    object: ObjectType::MomInfoTime,
    table: "wlm.mominfo_time",
    key: None,
    quick: &[bigint("mit_time"), int("mit_gen")],
    savetm: None,
    creattm: None,
    attributes: None,
    deleted: None,
    order_by: &[],
    secondary: None,
};

/// `wlm.job_scr`
pub static JOB_SCRIPT: EntitySchema = EntitySchema {
    object: ObjectType::JobScript,
    table: "wlm.job_scr",
    key: Some("ji_jobid"),
    quick: &[bytes("script")],
    savetm: None,
    creattm: None,
    attributes: None,
    deleted: None,
    order_by: &["ji_jobid"],
    secondary: None,
};

/// Every schema, one per [`ObjectType`].
pub static ALL: [&EntitySchema; 7] = [
    &JOB,
    &RESV,
    &NODE,
    &SERVER,
    &SCHED,
    &MOMINFO_TIME,
    &JOB_SCRIPT,
];

/// Schema for an object type.
pub fn schema_for(object: ObjectType) -> &'static EntitySchema {
    match object {
        ObjectType::Job => &JOB,
        ObjectType::Reservation => &RESV,
        ObjectType::Node => &NODE,
        ObjectType::Server => &SERVER,
        ObjectType::Scheduler => &SCHED,
        ObjectType::MomInfoTime => &MOMINFO_TIME,
        ObjectType::JobScript => &JOB_SCRIPT,
    }
}
