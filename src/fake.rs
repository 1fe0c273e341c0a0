// mlx5 RegEx Engine Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Resource-accounting fake device for unit tests.
//!
//! Records every call in order, tracks live umems, objects and protection
//! domains, and refuses releases that would violate the hardware ordering
//! (deregistering a umem still used by a key, freeing a PD with live keys).

use crate::codec::Command;
use crate::device::{Device, ObjectHandle, PdHandle, UmemHandle, UmemRequest};
use crate::layout::{
    create_mkey_in, create_mkey_out, query_hca_cap_out, query_regexp_params_in,
    query_regexp_params_out, query_regexp_register_in, query_regexp_register_out, set_regexp_params_in,
    set_regexp_register_in, CreateMkeyIn, CreateMkeyOut, QueryHcaCapOut, QueryRegexpParamsIn,
    QueryRegexpParamsOut, QueryRegexpRegisterIn, QueryRegexpRegisterOut, SetRegexpParamsIn,
    SetRegexpRegisterIn,
};
use crate::opcode::Opcode;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::io;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    QueryCaps,
    AllocPd,
    RegisterUmem { size: usize },
    CreateMkey { umem_id: u32 },
    Bind { engine: u8, mkey: u32, va: u64 },
    Disconnect { engine: u8, mkey: u32 },
    QueryParams { engine: u8 },
    WriteRegister { engine: u8, addr: u32, data: u32 },
    ReadRegister { engine: u8, addr: u32 },
    DestroyObject,
    DeregisterUmem { id: u32 },
    DeallocPd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    QueryCaps,
    AllocPd,
    RegisterUmem,
    CreateMkey,
    Bind(u8),
    Disconnect(u8),
    DestroyObject,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct EngineParams {
    pub stopped: bool,
    pub db_mkey: u32,
    pub db_mkey_va: u64,
    pub free: bool,
}

#[derive(Default)]
struct State {
    next: usize,
    calls: Vec<Call>,
    faults: Vec<Fault>,
    umems: HashMap<usize, u32>,
    objects: HashMap<usize, u32>,
    pds: HashSet<usize>,
    params: HashMap<u8, EngineParams>,
    registers: HashMap<(u8, u32), u32>,
    last_mkey: Option<CreateMkeyIn>,
    umem_requests: Vec<(usize, u64, u32)>,
}

impl State {
    fn handle(&mut self) -> usize {
        self.next += 1;
        self.next
    }

    fn faulted(&self, fault: Fault) -> bool {
        self.faults.contains(&fault)
    }
}

pub(crate) struct FakeDevice {
    supported: bool,
    engines: u8,
    state: RefCell<State>,
}

fn load<const DW: usize>(words: &[u32]) -> Command<DW> {
    let mut cmd = Command::<DW>::new();
    cmd.as_words_mut().copy_from_slice(words);
    cmd
}

fn store<const DW: usize>(cmd: &Command<DW>, words: &mut [u32]) {
    words.copy_from_slice(cmd.as_words());
}

impl FakeDevice {
    pub const FAULT_STATUS: u8 = 0x03;
    pub const FAULT_SYNDROME: u32 = 0x00c0_ffee;

    pub fn new(supported: bool, engines: u8) -> Self {
        Self {
            supported,
            engines,
            state: RefCell::new(State::default()),
        }
    }

    pub fn inject(&self, fault: Fault) {
        self.state.borrow_mut().faults.push(fault);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    pub fn live_umems(&self) -> usize {
        self.state.borrow().umems.len()
    }

    pub fn live_objects(&self) -> usize {
        self.state.borrow().objects.len()
    }

    pub fn live_pds(&self) -> usize {
        self.state.borrow().pds.len()
    }

    /// No umem, object or protection domain is left allocated.
    pub fn is_clean(&self) -> bool {
        self.live_umems() == 0 && self.live_objects() == 0 && self.live_pds() == 0
    }

    pub fn last_mkey(&self) -> Option<CreateMkeyIn> {
        self.state.borrow().last_mkey
    }

    /// `(size, pgsz_bitmap, access bits)` of every umem registration.
    pub fn umem_requests(&self) -> Vec<(usize, u64, u32)> {
        self.state.borrow().umem_requests.clone()
    }

    pub fn params(&self, engine: u8) -> Option<EngineParams> {
        self.state.borrow().params.get(&engine).copied()
    }

    fn fail(output: &mut [u32], errno: i32) -> io::Error {
        output[0] = ((Self::FAULT_STATUS as u32) << 24).to_be();
        output[1] = Self::FAULT_SYNDROME.to_be();
        io::Error::from_raw_os_error(errno)
    }
}

impl Device for FakeDevice {
    fn general_cmd(&self, input: &[u32], output: &mut [u32]) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        let opcode = (u32::from_be(input[0]) >> 16) as u16;
        match Opcode::from_u16(opcode) {
            Some(Opcode::QueryHcaCap) => {
                state.calls.push(Call::QueryCaps);
                if state.faulted(Fault::QueryCaps) {
                    return Err(Self::fail(output, libc::EIO));
                }
                let mut out = QueryHcaCapOut::new();
                out.set(query_hca_cap_out::REGEXP_PARAMS, self.supported as u32);
                out.set(query_hca_cap_out::REGEXP_NUM_OF_ENGINES, self.engines as u32);
                out.set(query_hca_cap_out::REGEXP_LOG_CRSPACE_SIZE, 0xa);
                out.set(query_hca_cap_out::REGEXP_VERSION, 1);
                store(&out, output);
                Ok(())
            }
            Some(Opcode::SetRegexParams) => {
                let cmd: SetRegexpParamsIn = load(input);
                let engine = cmd.get(set_regexp_params_in::ENGINE_ID) as u8;
                let mkey = cmd.get(set_regexp_params_in::DB_MKEY);
                let va = cmd.get64(set_regexp_params_in::DB_MKEY_VA);
                let free = cmd.get(set_regexp_params_in::DB_MKEY_FREE) == 1;
                let fault = if free {
                    state.calls.push(Call::Disconnect { engine, mkey });
                    Fault::Disconnect(engine)
                } else {
                    state.calls.push(Call::Bind { engine, mkey, va });
                    Fault::Bind(engine)
                };
                if state.faulted(fault) || engine >= self.engines {
                    return Err(Self::fail(output, libc::EIO));
                }
                state.params.insert(
                    engine,
                    EngineParams {
                        stopped: cmd.get(set_regexp_params_in::STOP_ENGINE) == 1,
                        db_mkey: mkey,
                        db_mkey_va: va,
                        free,
                    },
                );
                Ok(())
            }
            Some(Opcode::QueryRegexParams) => {
                let cmd: QueryRegexpParamsIn = load(input);
                let engine = cmd.get(query_regexp_params_in::ENGINE_ID) as u8;
                state.calls.push(Call::QueryParams { engine });
                let params = state.params.get(&engine).copied().unwrap_or_default();
                let mut out = QueryRegexpParamsOut::new();
                out.set(query_regexp_params_out::STOP_ENGINE, params.stopped as u32);
                out.set(query_regexp_params_out::DB_MKEY_FREE, params.free as u32);
                out.set(query_regexp_params_out::DB_MKEY, params.db_mkey);
                out.set64(query_regexp_params_out::DB_MKEY_VA, params.db_mkey_va);
                store(&out, output);
                Ok(())
            }
            Some(Opcode::SetRegexRegisters) => {
                let cmd: SetRegexpRegisterIn = load(input);
                let engine = cmd.get(set_regexp_register_in::ENGINE_ID) as u8;
                let addr = cmd.get(set_regexp_register_in::REGISTER_ADDRESS);
                let data = cmd.get(set_regexp_register_in::REGISTER_DATA);
                state.calls.push(Call::WriteRegister { engine, addr, data });
                state.registers.insert((engine, addr), data);
                Ok(())
            }
            Some(Opcode::QueryRegexRegisters) => {
                let cmd: QueryRegexpRegisterIn = load(input);
                let engine = cmd.get(query_regexp_register_in::ENGINE_ID) as u8;
                let addr = cmd.get(query_regexp_register_in::REGISTER_ADDRESS);
                state.calls.push(Call::ReadRegister { engine, addr });
                let data = state.registers.get(&(engine, addr)).copied().unwrap_or(0);
                let mut out = QueryRegexpRegisterOut::new();
                out.set(query_regexp_register_out::REGISTER_DATA, data);
                store(&out, output);
                Ok(())
            }
            _ => Err(Self::fail(output, libc::EOPNOTSUPP)),
        }
    }

    fn create_object(&self, input: &[u32], output: &mut [u32]) -> io::Result<ObjectHandle> {
        let mut state = self.state.borrow_mut();
        let cmd: CreateMkeyIn = load(input);
        let umem_id = cmd.get(create_mkey_in::MKEY_UMEM_ID);
        state.calls.push(Call::CreateMkey { umem_id });
        state.last_mkey = Some(cmd);
        if state.faulted(Fault::CreateMkey) {
            return Err(Self::fail(output, libc::EINVAL));
        }
        if !state.umems.values().any(|id| *id == umem_id) {
            return Err(Self::fail(output, libc::ENOENT));
        }
        let handle = state.handle();
        state.objects.insert(handle, umem_id);
        let mut out = CreateMkeyOut::new();
        out.set(create_mkey_out::MKEY_INDEX, 0x100 + handle as u32);
        store(&out, output);
        Ok(ObjectHandle(handle))
    }

    fn destroy_object(&self, object: ObjectHandle) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::DestroyObject);
        if state.faulted(Fault::DestroyObject) {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        match state.objects.remove(&object.0) {
            Some(_) => Ok(()),
            None => Err(io::Error::from_raw_os_error(libc::ENOENT)),
        }
    }

    fn register_umem(&self, request: &UmemRequest) -> io::Result<UmemHandle> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::RegisterUmem { size: request.size });
        state
            .umem_requests
            .push((request.size, request.pgsz_bitmap, request.access.bits()));
        if state.faulted(Fault::RegisterUmem) {
            return Err(io::Error::from_raw_os_error(libc::EFAULT));
        }
        let raw = state.handle();
        let id = 0x40 + raw as u32;
        state.umems.insert(raw, id);
        Ok(UmemHandle { raw, id })
    }

    fn deregister_umem(&self, umem: UmemHandle) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::DeregisterUmem { id: umem.id });
        if state.objects.values().any(|id| *id == umem.id) {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        match state.umems.remove(&umem.raw) {
            Some(_) => Ok(()),
            None => Err(io::Error::from_raw_os_error(libc::ENOENT)),
        }
    }

    fn alloc_pd(&self) -> io::Result<PdHandle> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::AllocPd);
        if state.faulted(Fault::AllocPd) {
            return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        }
        let raw = state.handle();
        state.pds.insert(raw);
        Ok(PdHandle {
            raw,
            pdn: raw as u32,
        })
    }

    fn dealloc_pd(&self, pd: PdHandle) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::DeallocPd);
        if !state.objects.is_empty() {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        match state.pds.remove(&pd.raw) {
            true => Ok(()),
            false => Err(io::Error::from_raw_os_error(libc::ENOENT)),
        }
    }
}

/// Small, regular-page configuration so tests need no reserved huge pages.
pub(crate) fn test_config() -> crate::config::RegexConfig {
    crate::config::RegexConfig::new()
        .database_size(64 * 1024)
        .page_size(4096)
        .backing(crate::config::Backing::Standard)
}
