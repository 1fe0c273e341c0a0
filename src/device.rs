// mlx5 RegEx Engine Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! The device primitives the control plane is built on.
//!
//! Everything the regex control plane asks of the hardware goes through the
//! [`Device`] trait: synchronous DevX commands, DevX object create/destroy,
//! umem (DMA) registration, and protection domains. The rdma-core backed
//! implementation lives in `verbs` behind the `rdma-core` feature; tests use
//! an in-memory fake.

use crate::codec::{hexdump, Command};
use crate::error::RegexError;
use crate::layout::out_header;
use crate::opcode::Opcode;
use bitflags::bitflags;
use std::io;

bitflags! {
    /// Access rights requested when registering memory (`IBV_ACCESS_*`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u32 {
        /// Device may write local memory.
        const LOCAL_WRITE = 1 << 0;
        /// Remote peers may write.
        const REMOTE_WRITE = 1 << 1;
        /// Remote peers may read.
        const REMOTE_READ = 1 << 2;
        /// Remote peers may issue atomics.
        const REMOTE_ATOMIC = 1 << 3;
    }
}

/// Opaque handle of a DevX object created on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(pub usize);

/// A registered umem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UmemHandle {
    /// Opaque backend handle.
    pub raw: usize,
    /// Kernel-assigned umem id.
    pub id: u32,
}

/// An allocated protection domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PdHandle {
    /// Opaque backend handle.
    pub raw: usize,
    /// Protection domain number used in commands.
    pub pdn: u32,
}

/// Request to register a host buffer for device DMA.
#[derive(Debug, Clone, Copy)]
pub struct UmemRequest {
    /// Start of the buffer.
    pub addr: *mut u8,
    /// Length in bytes.
    pub size: usize,
    /// Requested access rights.
    pub access: Access,
    /// Bitmap of page sizes the buffer may be mapped with.
    pub pgsz_bitmap: u64,
}

/// A device that accepts DevX commands.
///
/// Errors are reported as `io::Error` carrying the errno returned by the
/// kernel or the library.
pub trait Device {
    /// Submit a synchronous command through the device's command channel.
    fn general_cmd(&self, input: &[u32], output: &mut [u32]) -> io::Result<()>;

    /// Create a DevX object (e.g. a memory key) from a command.
    fn create_object(&self, input: &[u32], output: &mut [u32]) -> io::Result<ObjectHandle>;

    /// Destroy an object returned by [`Device::create_object`].
    fn destroy_object(&self, object: ObjectHandle) -> io::Result<()>;

    /// Register a host buffer for DMA.
    fn register_umem(&self, request: &UmemRequest) -> io::Result<UmemHandle>;

    /// Deregister a buffer registered by [`Device::register_umem`].
    fn deregister_umem(&self, umem: UmemHandle) -> io::Result<()>;

    /// Allocate a protection domain.
    fn alloc_pd(&self) -> io::Result<PdHandle>;

    /// Release a protection domain.
    fn dealloc_pd(&self, pd: PdHandle) -> io::Result<()>;
}

/// Log a command buffer at trace level.
pub(crate) fn trace_command(label: &str, opcode: Opcode, bytes: &[u8]) {
    if log::log_enabled!(log::Level::Trace) {
        log::trace!("{} {}", opcode, label);
        for line in hexdump(bytes) {
            log::trace!("{}", line);
        }
    }
}

/// Build the error for a failed command from its errno and output header.
pub(crate) fn command_error<const O: usize>(
    opcode: Opcode,
    output: &Command<O>,
    source: io::Error,
) -> RegexError {
    RegexError::Command {
        opcode,
        status: output.get(out_header::STATUS) as u8,
        syndrome: output.get(out_header::SYNDROME),
        source,
    }
}

/// Submit `input` through the general command channel.
pub(crate) fn execute<D: Device + ?Sized, const I: usize, const O: usize>(
    device: &D,
    opcode: Opcode,
    input: &Command<I>,
    output: &mut Command<O>,
) -> Result<(), RegexError> {
    trace_command("in", opcode, input.as_bytes());
    if let Err(e) = device.general_cmd(input.as_words(), output.as_words_mut()) {
        let err = command_error(opcode, output, e);
        log::error!("{}", err);
        return Err(err);
    }
    trace_command("out", opcode, output.as_bytes());
    Ok(())
}
