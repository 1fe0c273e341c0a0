// mlx5 RegEx Engine Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Error types for regex engine bring-up and teardown.

use crate::config::Backing;
use crate::opcode::Opcode;
use std::process::ExitCode;
use thiserror::Error;

/// Errors that can occur while managing regex engine resources.
#[derive(Debug, Error)]
pub enum RegexError {
    /// Host memory for a database could not be mapped.
    #[error("failed to allocate {size} bytes of {backing} memory: {source}{}", .backing.hint())]
    Allocation {
        size: usize,
        backing: Backing,
        #[source]
        source: std::io::Error,
    },

    /// The kernel or device rejected DMA registration of a buffer.
    #[error("failed to register {size} bytes at {addr:#x} for DMA: {source}")]
    Registration {
        addr: u64,
        size: usize,
        #[source]
        source: std::io::Error,
    },

    /// The device refused to create a hardware object.
    #[error("failed to create {object}: {source}")]
    ObjectCreation {
        object: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// A device command failed.
    #[error("{opcode} failed: status={status:#04x}, syndrome={syndrome:#010x}: {source}")]
    Command {
        opcode: Opcode,
        status: u8,
        syndrome: u32,
        #[source]
        source: std::io::Error,
    },

    /// The device does not offer regex offload.
    #[error("regex offload not supported by device")]
    Unsupported,

    /// Binding a database to an engine failed.
    #[error("failed to bind database to engine {engine}: {source}")]
    Bind {
        engine: u8,
        #[source]
        source: Box<RegexError>,
    },

    /// Releasing a hardware or host resource failed.
    #[error("failed to release {resource}: {source}")]
    Release {
        resource: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// No regex-capable device found on the system.
    #[error("no regex-capable device found")]
    NoDeviceFound,

    /// Invalid argument provided.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error from system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegexError {
    /// Returns the errno that best describes this error.
    pub fn errno(&self) -> i32 {
        match self {
            Self::Allocation { .. } => libc::ENOMEM,
            Self::Registration { .. } | Self::ObjectCreation { .. } => libc::ENODEV,
            Self::Command { source, .. } | Self::Release { source, .. } | Self::Io(source) => {
                source.raw_os_error().unwrap_or(libc::EIO)
            }
            Self::Unsupported => libc::EOPNOTSUPP,
            Self::Bind { source, .. } => source.errno(),
            Self::NoDeviceFound => libc::ENODEV,
            Self::InvalidArgument(_) => libc::EINVAL,
        }
    }

    /// Process exit status reporting this error.
    pub fn exit_code(&self) -> ExitCode {
        errno_exit_code(self.errno())
    }
}

/// Maps an errno to a non-zero process exit status.
pub(crate) fn errno_exit_code(errno: i32) -> ExitCode {
    match u8::try_from(errno.unsigned_abs()) {
        Ok(0) | Err(_) => ExitCode::FAILURE,
        Ok(code) => ExitCode::from(code),
    }
}

/// Result type alias for regex engine operations.
pub type RegexResult<T> = Result<T, RegexError>;
