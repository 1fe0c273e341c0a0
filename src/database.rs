// mlx5 RegEx Engine Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Per-engine databases.
//!
//! Every engine gets its own registered buffer. Binding stops the engine and
//! points it at the buffer's memory key; unbinding stops it again, marks the
//! key free and only then tears the key and buffer down.

use crate::config::RegexConfig;
use crate::device::{execute, Device, PdHandle};
use crate::error::RegexError;
use crate::layout::{
    query_regexp_params_in, query_regexp_params_out, query_regexp_register_in,
    query_regexp_register_out, set_regexp_params_in, set_regexp_register_in, QueryRegexpParamsIn,
    QueryRegexpParamsOut, QueryRegexpRegisterIn, QueryRegexpRegisterOut, SetRegexpParamsIn,
    SetRegexpParamsOut, SetRegexpRegisterIn, SetRegexpRegisterOut,
};
use crate::memory::{register_memory, MemoryKey};
use crate::opcode::Opcode;

/// Engine parameters as reported by QUERY_REGEX_PARAMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegexParams {
    /// The engine is stopped.
    pub stopped: bool,
    /// The database key has been released by the host.
    pub db_mkey_free: bool,
    /// Key of the bound database.
    pub db_mkey: u32,
    /// Virtual base address of the bound database.
    pub db_mkey_va: u64,
}

/// SET_REGEX_PARAMS stopping `engine` and (re)pointing its database.
///
/// Only the stop and database-key fields are selected; every other engine
/// parameter is left as the device has it.
pub(crate) fn params_command(engine: u8, db_mkey: u32, db_mkey_va: u64, free: bool) -> SetRegexpParamsIn {
    let mut input = SetRegexpParamsIn::new();
    input.set(set_regexp_params_in::OPCODE, Opcode::SetRegexParams.as_u16() as u32);
    input.set(set_regexp_params_in::ENGINE_ID, engine as u32);
    input.set(set_regexp_params_in::STOP_ENGINE, 1);
    input.set(set_regexp_params_in::SELECT_STOP_ENGINE, 1);
    input.set(set_regexp_params_in::DB_MKEY, db_mkey);
    input.set64(set_regexp_params_in::DB_MKEY_VA, db_mkey_va);
    input.set(set_regexp_params_in::DB_MKEY_FREE, free as u32);
    input.set(set_regexp_params_in::SELECT_DB_MKEY, 1);
    input
}

/// Stop `engine` and bind the database described by `db_mkey` at `db_mkey_va`.
pub fn set_database<D: Device + ?Sized>(
    device: &D,
    engine: u8,
    db_mkey: u32,
    db_mkey_va: u64,
) -> Result<(), RegexError> {
    let input = params_command(engine, db_mkey, db_mkey_va, false);
    let mut output = SetRegexpParamsOut::new();
    execute(device, Opcode::SetRegexParams, &input, &mut output)
}

/// Stop `engine`, mark its database key free and clear the database pointer.
///
/// Re-issuing this for an already stopped engine is harmless.
pub fn disconnect_database<D: Device + ?Sized>(
    device: &D,
    engine: u8,
    db_mkey: u32,
    db_mkey_va: u64,
) -> Result<(), RegexError> {
    let input = params_command(engine, db_mkey, db_mkey_va, true);
    let mut output = SetRegexpParamsOut::new();
    execute(device, Opcode::SetRegexParams, &input, &mut output)
}

/// Read back the parameters of `engine`.
pub fn query_params<D: Device + ?Sized>(device: &D, engine: u8) -> Result<RegexParams, RegexError> {
    let mut input = QueryRegexpParamsIn::new();
    input.set(query_regexp_params_in::OPCODE, Opcode::QueryRegexParams.as_u16() as u32);
    input.set(query_regexp_params_in::ENGINE_ID, engine as u32);
    let mut output = QueryRegexpParamsOut::new();
    execute(device, Opcode::QueryRegexParams, &input, &mut output)?;

    Ok(RegexParams {
        stopped: output.get(query_regexp_params_out::STOP_ENGINE) != 0,
        db_mkey_free: output.get(query_regexp_params_out::DB_MKEY_FREE) != 0,
        db_mkey: output.get(query_regexp_params_out::DB_MKEY),
        db_mkey_va: output.get64(query_regexp_params_out::DB_MKEY_VA),
    })
}

/// Write an engine control register.
pub fn write_register<D: Device + ?Sized>(
    device: &D,
    engine: u8,
    addr: u32,
    data: u32,
) -> Result<(), RegexError> {
    let mut input = SetRegexpRegisterIn::new();
    input.set(set_regexp_register_in::OPCODE, Opcode::SetRegexRegisters.as_u16() as u32);
    input.set(set_regexp_register_in::ENGINE_ID, engine as u32);
    input.set(set_regexp_register_in::REGISTER_ADDRESS, addr);
    input.set(set_regexp_register_in::REGISTER_DATA, data);
    let mut output = SetRegexpRegisterOut::new();
    execute(device, Opcode::SetRegexRegisters, &input, &mut output)
}

/// Read an engine control register.
pub fn read_register<D: Device + ?Sized>(device: &D, engine: u8, addr: u32) -> Result<u32, RegexError> {
    let mut input = QueryRegexpRegisterIn::new();
    input.set(query_regexp_register_in::OPCODE, Opcode::QueryRegexRegisters.as_u16() as u32);
    input.set(query_regexp_register_in::ENGINE_ID, engine as u32);
    input.set(query_regexp_register_in::REGISTER_ADDRESS, addr);
    let mut output = QueryRegexpRegisterOut::new();
    execute(device, Opcode::QueryRegexRegisters, &input, &mut output)?;
    Ok(output.get(query_regexp_register_out::REGISTER_DATA))
}

/// The database of one engine.
pub struct EngineDatabase<'d, D: Device + ?Sized> {
    device: &'d D,
    engine_id: u8,
    key: Option<MemoryKey<'d, D>>,
    bound: bool,
}

impl<'d, D: Device + ?Sized> EngineDatabase<'d, D> {
    /// Register a database for `engine_id` and bind it.
    ///
    /// # Errors
    ///
    /// Returns [`RegexError::Bind`] wrapping the registration or command
    /// failure. Memory registered by this call is released first.
    pub fn bind(
        device: &'d D,
        pd: PdHandle,
        engine_id: u8,
        config: &RegexConfig,
    ) -> Result<Self, RegexError> {
        let bind_error = |source: RegexError| RegexError::Bind {
            engine: engine_id,
            source: Box::new(source),
        };

        let key = register_memory(
            device,
            pd,
            config.get_database_size(),
            config.get_access(),
            config,
        )
        .map_err(bind_error)?;

        if let Err(e) = set_database(device, engine_id, key.id(), key.addr()) {
            if let Err(release) = key.release() {
                log::warn!("engine {}: releasing unbound database: {}", engine_id, release);
            }
            return Err(bind_error(e));
        }

        log::info!(
            "engine {}: database mkey {:#x} bound at {:#x} ({} bytes)",
            engine_id,
            key.id(),
            key.addr(),
            key.size()
        );

        Ok(Self {
            device,
            engine_id,
            key: Some(key),
            bound: true,
        })
    }

    /// Disconnect the database from its engine and release it.
    ///
    /// The database counts as unbound afterwards whatever the outcome. If the
    /// device refuses the disconnect, the memory stays registered and mapped
    /// since the engine may still reference it. Calling this again is a
    /// no-op.
    pub fn unbind(&mut self) -> Result<(), RegexError> {
        let Some(key) = self.key.take() else {
            return Ok(());
        };

        let disconnected = disconnect_database(self.device, self.engine_id, key.id(), key.addr());
        self.bound = false;

        if let Err(e) = disconnected {
            log::error!(
                "engine {}: disconnect failed, leaving database {:#x} registered",
                self.engine_id,
                key.addr()
            );
            key.leak();
            return Err(e);
        }

        key.release()?;
        log::info!("engine {}: database unbound", self.engine_id);
        Ok(())
    }

    pub fn engine_id(&self) -> u8 {
        self.engine_id
    }

    /// The engine currently uses this database.
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// The database's memory key, until it is unbound.
    pub fn key(&self) -> Option<&MemoryKey<'d, D>> {
        self.key.as_ref()
    }

    /// Read back this engine's parameters.
    pub fn query_params(&self) -> Result<RegexParams, RegexError> {
        query_params(self.device, self.engine_id)
    }

    /// Write one of this engine's control registers.
    pub fn write_register(&self, addr: u32, data: u32) -> Result<(), RegexError> {
        write_register(self.device, self.engine_id, addr, data)
    }

    /// Read one of this engine's control registers.
    pub fn read_register(&self, addr: u32) -> Result<u32, RegexError> {
        read_register(self.device, self.engine_id, addr)
    }
}

impl<D: Device + ?Sized> Drop for EngineDatabase<'_, D> {
    fn drop(&mut self) {
        if let Err(e) = self.unbind() {
            log::warn!("engine {}: unbinding on drop: {}", self.engine_id, e);
        }
    }
}

impl<D: Device + ?Sized> std::fmt::Debug for EngineDatabase<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineDatabase")
            .field("engine_id", &self.engine_id)
            .field("key", &self.key)
            .field("bound", &self.bound)
            .finish()
    }
}
