// mlx5 RegEx Engine Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Command layouts.
//!
//! Each module describes one structure of the mlx5 Programmer's Reference
//! Manual: its size in bits (`BITS`), its fields as [`Field`] descriptors, and
//! a `FIELDS` table listing them for layout checks. Nested structures are
//! placed into their parent with [`Field::within`].

use crate::codec::{dwords, Command, Field};

/// Header shared by every command output.
pub mod out_header {
    use super::Field;

    pub const STATUS: Field = Field::new("status", 0x00, 0x08);
    pub const SYNDROME: Field = Field::new("syndrome", 0x20, 0x20);

    pub const FIELDS: &[Field] = &[STATUS, SYNDROME];
}

/// QUERY_HCA_CAP input.
pub mod query_hca_cap_in {
    use super::Field;

    pub const BITS: u32 = 0x80;

    pub const OPCODE: Field = Field::new("opcode", 0x00, 0x10);
    pub const OP_MOD: Field = Field::new("op_mod", 0x30, 0x10);

    pub const FIELDS: &[Field] = &[OPCODE, OP_MOD];
}

/// General device capabilities (the `capability` union of QUERY_HCA_CAP output).
pub mod cmd_hca_cap {
    use super::Field;

    pub const BITS: u32 = 0x8000;

    pub const REGEXP_VERSION: Field = Field::new("regexp_version", 0xa3, 0x1);
    pub const REGEXP_NUM_OF_ENGINES: Field = Field::new("regexp_num_of_engines", 0xa4, 0x4);
    pub const REGEXP_PARAMS: Field = Field::new("regexp_params", 0x1c1, 0x1);
    pub const REGEXP_LOG_CRSPACE_SIZE: Field = Field::new("regexp_log_crspace_size", 0x1cc, 0x4);

    pub const FIELDS: &[Field] = &[
        REGEXP_VERSION,
        REGEXP_NUM_OF_ENGINES,
        REGEXP_PARAMS,
        REGEXP_LOG_CRSPACE_SIZE,
    ];
}

/// QUERY_HCA_CAP output.
pub mod query_hca_cap_out {
    use super::{cmd_hca_cap, Field};

    pub const CAPABILITY: u32 = 0x80;
    pub const BITS: u32 = CAPABILITY + cmd_hca_cap::BITS;

    pub const REGEXP_PARAMS: Field = cmd_hca_cap::REGEXP_PARAMS.within(CAPABILITY);
    pub const REGEXP_NUM_OF_ENGINES: Field =
        cmd_hca_cap::REGEXP_NUM_OF_ENGINES.within(CAPABILITY);
    pub const REGEXP_LOG_CRSPACE_SIZE: Field =
        cmd_hca_cap::REGEXP_LOG_CRSPACE_SIZE.within(CAPABILITY);
    pub const REGEXP_VERSION: Field = cmd_hca_cap::REGEXP_VERSION.within(CAPABILITY);

    pub const FIELDS: &[Field] = &[
        REGEXP_PARAMS,
        REGEXP_NUM_OF_ENGINES,
        REGEXP_LOG_CRSPACE_SIZE,
        REGEXP_VERSION,
    ];
}

/// Memory key context.
pub mod mkc {
    use super::Field;

    pub const BITS: u32 = 0x200;

    pub const FREE: Field = Field::new("free", 0x01, 0x1);
    pub const RELAXED_ORDERING_WRITE: Field = Field::new("relaxed_ordering_write", 0x0d, 0x1);
    pub const UMR_EN: Field = Field::new("umr_en", 0x10, 0x1);
    pub const RW: Field = Field::new("rw", 0x12, 0x1);
    pub const RR: Field = Field::new("rr", 0x13, 0x1);
    pub const LW: Field = Field::new("lw", 0x14, 0x1);
    pub const LR: Field = Field::new("lr", 0x15, 0x1);
    pub const ACCESS_MODE_1_0: Field = Field::new("access_mode_1_0", 0x16, 0x2);
    pub const QPN: Field = Field::new("qpn", 0x20, 0x18);
    pub const MKEY_7_0: Field = Field::new("mkey_7_0", 0x38, 0x8);
    pub const PD: Field = Field::new("pd", 0x68, 0x18);
    pub const START_ADDR: Field = Field::new("start_addr", 0x80, 0x40);
    pub const LEN: Field = Field::new("len", 0xc0, 0x40);
    pub const TRANSLATIONS_OCTWORD_SIZE: Field =
        Field::new("translations_octword_size", 0x1a0, 0x20);
    pub const RELAXED_ORDERING_READ: Field = Field::new("relaxed_ordering_read", 0x1d9, 0x1);
    pub const LOG_PAGE_SIZE: Field = Field::new("log_page_size", 0x1db, 0x5);

    pub const FIELDS: &[Field] = &[
        FREE,
        RELAXED_ORDERING_WRITE,
        UMR_EN,
        RW,
        RR,
        LW,
        LR,
        ACCESS_MODE_1_0,
        QPN,
        MKEY_7_0,
        PD,
        START_ADDR,
        LEN,
        TRANSLATIONS_OCTWORD_SIZE,
        RELAXED_ORDERING_READ,
        LOG_PAGE_SIZE,
    ];

    /// Access mode: memory translation table (direct VA to PA).
    pub const ACCESS_MODE_MTT: u32 = 0x1;

    /// `qpn` value that leaves the key usable by any queue pair.
    pub const QPN_ANY: u32 = 0xff_ffff;
}

/// CREATE_MKEY input.
pub mod create_mkey_in {
    use super::{mkc, Field};

    pub const MKEY_ENTRY: u32 = 0x80;
    pub const BITS: u32 = 0x880;

    pub const OPCODE: Field = Field::new("opcode", 0x00, 0x10);
    pub const PG_ACCESS: Field = Field::new("pg_access", 0x60, 0x1);
    pub const MKEY_UMEM_VALID: Field = Field::new("mkey_umem_valid", 0x61, 0x1);
    pub const TRANSLATIONS_OCTWORD_ACTUAL_SIZE: Field =
        Field::new("translations_octword_actual_size", 0x300, 0x20);
    pub const MKEY_UMEM_ID: Field = Field::new("mkey_umem_id", 0x320, 0x20);
    pub const MKEY_UMEM_OFFSET: Field = Field::new("mkey_umem_offset", 0x340, 0x40);

    /// A field of the embedded memory key context.
    pub const fn entry(field: Field) -> Field {
        field.within(MKEY_ENTRY)
    }

    pub const FIELDS: &[Field] = &[
        OPCODE,
        PG_ACCESS,
        MKEY_UMEM_VALID,
        TRANSLATIONS_OCTWORD_ACTUAL_SIZE,
        MKEY_UMEM_ID,
        MKEY_UMEM_OFFSET,
    ];

    const _: () = assert!(MKEY_ENTRY + mkc::BITS <= TRANSLATIONS_OCTWORD_ACTUAL_SIZE.bit_offset);
}

/// CREATE_MKEY output.
pub mod create_mkey_out {
    use super::Field;

    pub const BITS: u32 = 0x80;

    pub const MKEY_INDEX: Field = Field::new("mkey_index", 0x48, 0x18);

    pub const FIELDS: &[Field] = &[MKEY_INDEX];
}

/// Field-select mask of SET_REGEX_PARAMS.
pub mod regexp_params_field_select {
    use super::Field;

    pub const BITS: u32 = 0x20;

    pub const STOP_ENGINE: Field = Field::new("stop_engine", 0x1e, 0x1);
    pub const DB_MKEY: Field = Field::new("db_mkey", 0x1f, 0x1);

    pub const FIELDS: &[Field] = &[STOP_ENGINE, DB_MKEY];
}

/// Per-engine regex parameters.
pub mod regexp_params {
    use super::Field;

    pub const BITS: u32 = 0x180;

    pub const STOP_ENGINE: Field = Field::new("stop_engine", 0x1e, 0x1);
    pub const DB_MKEY_FREE: Field = Field::new("db_mkey_free", 0x1f, 0x1);
    pub const DB_MKEY: Field = Field::new("db_mkey", 0x80, 0x20);
    pub const DB_MKEY_VA: Field = Field::new("db_mkey_va", 0xc0, 0x40);

    pub const FIELDS: &[Field] = &[STOP_ENGINE, DB_MKEY_FREE, DB_MKEY, DB_MKEY_VA];
}

/// SET_REGEX_PARAMS input.
pub mod set_regexp_params_in {
    use super::{regexp_params, regexp_params_field_select, Field};

    pub const FIELD_SELECT: u32 = 0x60;
    pub const PARAMS: u32 = 0x80;
    pub const BITS: u32 = PARAMS + regexp_params::BITS;

    pub const OPCODE: Field = Field::new("opcode", 0x00, 0x10);
    pub const ENGINE_ID: Field = Field::new("engine_id", 0x58, 0x08);

    pub const SELECT_STOP_ENGINE: Field =
        regexp_params_field_select::STOP_ENGINE.within(FIELD_SELECT);
    pub const SELECT_DB_MKEY: Field = regexp_params_field_select::DB_MKEY.within(FIELD_SELECT);

    pub const STOP_ENGINE: Field = regexp_params::STOP_ENGINE.within(PARAMS);
    pub const DB_MKEY_FREE: Field = regexp_params::DB_MKEY_FREE.within(PARAMS);
    pub const DB_MKEY: Field = regexp_params::DB_MKEY.within(PARAMS);
    pub const DB_MKEY_VA: Field = regexp_params::DB_MKEY_VA.within(PARAMS);

    pub const FIELDS: &[Field] = &[
        OPCODE,
        ENGINE_ID,
        SELECT_STOP_ENGINE,
        SELECT_DB_MKEY,
        STOP_ENGINE,
        DB_MKEY_FREE,
        DB_MKEY,
        DB_MKEY_VA,
    ];
}

/// SET_REGEX_PARAMS output.
pub mod set_regexp_params_out {
    pub const BITS: u32 = 0x80;
}

/// QUERY_REGEX_PARAMS input.
pub mod query_regexp_params_in {
    use super::Field;

    pub const BITS: u32 = 0x80;

    pub const OPCODE: Field = Field::new("opcode", 0x00, 0x10);
    pub const ENGINE_ID: Field = Field::new("engine_id", 0x58, 0x08);

    pub const FIELDS: &[Field] = &[OPCODE, ENGINE_ID];
}

/// QUERY_REGEX_PARAMS output.
pub mod query_regexp_params_out {
    use super::{regexp_params, Field};

    pub const PARAMS: u32 = 0x80;
    pub const BITS: u32 = PARAMS + regexp_params::BITS;

    pub const STOP_ENGINE: Field = regexp_params::STOP_ENGINE.within(PARAMS);
    pub const DB_MKEY_FREE: Field = regexp_params::DB_MKEY_FREE.within(PARAMS);
    pub const DB_MKEY: Field = regexp_params::DB_MKEY.within(PARAMS);
    pub const DB_MKEY_VA: Field = regexp_params::DB_MKEY_VA.within(PARAMS);

    pub const FIELDS: &[Field] = &[STOP_ENGINE, DB_MKEY_FREE, DB_MKEY, DB_MKEY_VA];
}

/// SET_REGEX_REGISTERS input.
pub mod set_regexp_register_in {
    use super::Field;

    pub const BITS: u32 = 0x100;

    pub const OPCODE: Field = Field::new("opcode", 0x00, 0x10);
    pub const ENGINE_ID: Field = Field::new("engine_id", 0x58, 0x08);
    pub const REGISTER_ADDRESS: Field = Field::new("register_address", 0x60, 0x20);
    pub const REGISTER_DATA: Field = Field::new("register_data", 0x80, 0x20);

    pub const FIELDS: &[Field] = &[OPCODE, ENGINE_ID, REGISTER_ADDRESS, REGISTER_DATA];
}

/// SET_REGEX_REGISTERS output.
pub mod set_regexp_register_out {
    pub const BITS: u32 = 0x80;
}

/// QUERY_REGEX_REGISTERS input.
pub mod query_regexp_register_in {
    use super::Field;

    pub const BITS: u32 = 0x100;

    pub const OPCODE: Field = Field::new("opcode", 0x00, 0x10);
    pub const ENGINE_ID: Field = Field::new("engine_id", 0x58, 0x08);
    pub const REGISTER_ADDRESS: Field = Field::new("register_address", 0x60, 0x20);

    pub const FIELDS: &[Field] = &[OPCODE, ENGINE_ID, REGISTER_ADDRESS];
}

/// QUERY_REGEX_REGISTERS output.
pub mod query_regexp_register_out {
    use super::Field;

    pub const BITS: u32 = 0x80;

    pub const REGISTER_DATA: Field = Field::new("register_data", 0x60, 0x20);

    pub const FIELDS: &[Field] = &[REGISTER_DATA];
}

pub type QueryHcaCapIn = Command<{ dwords(query_hca_cap_in::BITS) }>;
pub type QueryHcaCapOut = Command<{ dwords(query_hca_cap_out::BITS) }>;
pub type CreateMkeyIn = Command<{ dwords(create_mkey_in::BITS) }>;
pub type CreateMkeyOut = Command<{ dwords(create_mkey_out::BITS) }>;
pub type SetRegexpParamsIn = Command<{ dwords(set_regexp_params_in::BITS) }>;
pub type SetRegexpParamsOut = Command<{ dwords(set_regexp_params_out::BITS) }>;
pub type QueryRegexpParamsIn = Command<{ dwords(query_regexp_params_in::BITS) }>;
pub type QueryRegexpParamsOut = Command<{ dwords(query_regexp_params_out::BITS) }>;
pub type SetRegexpRegisterIn = Command<{ dwords(set_regexp_register_in::BITS) }>;
pub type SetRegexpRegisterOut = Command<{ dwords(set_regexp_register_out::BITS) }>;
pub type QueryRegexpRegisterIn = Command<{ dwords(query_regexp_register_in::BITS) }>;
pub type QueryRegexpRegisterOut = Command<{ dwords(query_regexp_register_out::BITS) }>;
