// mlx5 RegEx Engine Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! # mlx5 RegEx Engine Control Plane
//!
//! Brings up and tears down the hardware regular-expression engines of
//! NVIDIA/Mellanox mlx5 devices (BlueField DPUs) through DevX commands.
//!
//! ## What it does
//!
//! - Negotiates regex capabilities (`QUERY_HCA_CAP`)
//! - Registers one huge-page backed database per engine and creates a memory
//!   key for it
//! - Binds every database to its engine (`SET_REGEX_PARAMS`)
//! - Unbinds and releases everything in reverse order on SIGTERM/SIGINT, or
//!   when start-up fails part way
//!
//! Compiling rules and submitting match jobs is out of scope.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mlx5_regex::{lifecycle, signal, Controller, Device, RegexConfig, RegexError};
//! use std::process::ExitCode;
//!
//! fn serve<D: Device>(device: &D) -> Result<ExitCode, RegexError> {
//!     let (tx, mut rx) = lifecycle::channel();
//!     let _signals = signal::spawn_listener(tx)?;
//!
//!     let mut controller = Controller::new(device, RegexConfig::default());
//!     controller.negotiate()?;
//!     controller.start()?;
//!
//!     // Blocks until SIGTERM or SIGINT.
//!     let report = controller.run(&mut rx);
//!     Ok(report.exit_code())
//! }
//! ```
//!
//! With the `rdma-core` feature, `verbs::open_first_supported()` provides
//! the device.
//!
//! ## Requirements
//!
//! - Linux with rdma-core (libibverbs, libmlx5) and DevX support
//! - An mlx5 device with regex offload (BlueField-2 or later)
//! - Reserved 2 MiB huge pages for the databases
//!   (`/proc/sys/vm/nr_hugepages`), 128 MiB per engine by default

#![cfg(target_os = "linux")]

pub mod caps;
pub mod codec;
pub mod config;
pub mod context;
pub mod database;
pub mod device;
pub mod error;
pub mod layout;
pub mod lifecycle;
pub mod memory;
pub mod opcode;
pub mod signal;
#[cfg(feature = "rdma-core")]
pub mod verbs;

#[cfg(test)]
mod fake;

pub use caps::{is_supported, query_capabilities, DeviceCapabilities};
pub use config::{Backing, RegexConfig};
pub use context::{DeviceContext, ShutdownReport};
pub use database::{EngineDatabase, RegexParams};
pub use device::{Access, Device};
pub use error::{RegexError, RegexResult};
pub use lifecycle::{Controller, Request, State};
pub use memory::{register_memory, MemoryKey};
pub use opcode::Opcode;
