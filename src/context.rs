// mlx5 RegEx Engine Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Device context: the protection domain and the databases of all engines.
//!
//! Resources are acquired in a fixed order (protection domain, then engine
//! databases in ascending engine id) and released in the exact reverse order.

use crate::caps::DeviceCapabilities;
use crate::config::RegexConfig;
use crate::database::EngineDatabase;
use crate::device::{Device, PdHandle};
use crate::error::{errno_exit_code, RegexError};
use std::process::ExitCode;

/// An allocated protection domain.
pub struct ProtectionDomain<'d, D: Device + ?Sized> {
    device: &'d D,
    handle: PdHandle,
    live: bool,
}

impl<'d, D: Device + ?Sized> ProtectionDomain<'d, D> {
    pub fn alloc(device: &'d D) -> Result<Self, RegexError> {
        let handle = device.alloc_pd().map_err(|source| {
            let err = RegexError::ObjectCreation {
                object: "protection domain",
                source,
            };
            log::error!("{}", err);
            err
        })?;
        log::debug!("allocated protection domain {}", handle.pdn);
        Ok(Self {
            device,
            handle,
            live: true,
        })
    }

    pub fn handle(&self) -> PdHandle {
        self.handle
    }

    /// Release the protection domain.
    ///
    /// A refused release is not retried on drop.
    pub fn release(mut self) -> Result<(), RegexError> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<(), RegexError> {
        if !self.live {
            return Ok(());
        }
        self.live = false;
        self.device
            .dealloc_pd(self.handle)
            .map_err(|source| RegexError::Release {
                resource: "protection domain",
                source,
            })?;
        log::debug!("released protection domain {}", self.handle.pdn);
        Ok(())
    }
}

impl<D: Device + ?Sized> Drop for ProtectionDomain<'_, D> {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            log::warn!("dropping protection domain: {}", e);
        }
    }
}

/// Failures collected while shutting down.
///
/// Shutdown never stops at the first failure; every step is attempted and
/// each failure is recorded here in the order it happened.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Engine id (`None` for the protection domain) and what went wrong.
    pub failures: Vec<(Option<u8>, RegexError)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// errno of the first failure, or 0 when clean.
    pub fn errno(&self) -> i32 {
        self.failures.first().map_or(0, |(_, e)| e.errno())
    }

    /// Success only when nothing failed; a failure without an errno still
    /// exits non-zero.
    pub fn exit_code(&self) -> ExitCode {
        if self.is_clean() {
            ExitCode::SUCCESS
        } else {
            errno_exit_code(self.errno())
        }
    }

    fn record(&mut self, engine: Option<u8>, err: RegexError) {
        match engine {
            Some(engine) => log::error!("engine {}: {}", engine, err),
            None => log::error!("{}", err),
        }
        self.failures.push((engine, err));
    }
}

/// Everything a running regex device holds.
pub struct DeviceContext<'d, D: Device + ?Sized> {
    device: &'d D,
    caps: DeviceCapabilities,
    config: RegexConfig,
    databases: Vec<EngineDatabase<'d, D>>,
    pd: Option<ProtectionDomain<'d, D>>,
}

impl<'d, D: Device + ?Sized> DeviceContext<'d, D> {
    /// Validate `config` and allocate the protection domain. No engine is
    /// bound yet.
    pub fn new(
        device: &'d D,
        caps: DeviceCapabilities,
        config: RegexConfig,
    ) -> Result<Self, RegexError> {
        config.validate()?;
        let pd = ProtectionDomain::alloc(device)?;
        Ok(Self {
            device,
            caps,
            config,
            databases: Vec::with_capacity(caps.engine_count as usize),
            pd: Some(pd),
        })
    }

    /// Allocate the protection domain and bind a database to every engine.
    ///
    /// If any engine fails to bind, the engines bound so far are unbound in
    /// reverse order and the protection domain is released before the bind
    /// error is returned.
    pub fn open(
        device: &'d D,
        caps: DeviceCapabilities,
        config: RegexConfig,
    ) -> Result<Self, RegexError> {
        let mut ctx = Self::new(device, caps, config)?;
        for engine in 0..caps.engine_count {
            if let Err(e) = ctx.bind_engine(engine) {
                ctx.abort();
                return Err(e);
            }
        }
        Ok(ctx)
    }

    /// Bind the database of the next engine.
    ///
    /// Engines must be bound in ascending order starting at 0.
    pub fn bind_engine(&mut self, engine: u8) -> Result<(), RegexError> {
        let expected = self.databases.len();
        if engine as usize != expected || engine >= self.caps.engine_count {
            return Err(RegexError::InvalidArgument(format!(
                "engine {} bound out of order (next is {} of {})",
                engine, expected, self.caps.engine_count
            )));
        }
        let pd = match &self.pd {
            Some(pd) => pd.handle(),
            None => {
                return Err(RegexError::InvalidArgument(
                    "device context already torn down".to_string(),
                ))
            }
        };
        let db = EngineDatabase::bind(self.device, pd, engine, &self.config)?;
        self.databases.push(db);
        Ok(())
    }

    /// Unwind a partial start-up.
    pub(crate) fn abort(&mut self) {
        let report = self.teardown();
        if !report.is_clean() {
            log::warn!(
                "{} failure(s) while unwinding start-up",
                report.failures.len()
            );
        }
    }

    /// Unbind every engine in descending order, then release the protection
    /// domain.
    ///
    /// Every step is attempted even if an earlier one failed. Calling this
    /// again is a no-op that returns a clean report.
    pub fn teardown(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        for db in self.databases.iter_mut().rev() {
            if let Err(e) = db.unbind() {
                report.record(Some(db.engine_id()), e);
            }
        }

        if let Some(pd) = self.pd.take() {
            if let Err(e) = pd.release() {
                report.record(None, e);
            }
        }

        report
    }

    pub fn capabilities(&self) -> DeviceCapabilities {
        self.caps
    }

    pub fn config(&self) -> &RegexConfig {
        &self.config
    }

    /// Databases in ascending engine order.
    pub fn databases(&self) -> &[EngineDatabase<'d, D>] {
        &self.databases
    }

    /// The protection domain is still held.
    pub fn is_live(&self) -> bool {
        self.pd.is_some()
    }
}

impl<D: Device + ?Sized> Drop for DeviceContext<'_, D> {
    fn drop(&mut self) {
        if self.is_live() {
            let report = self.teardown();
            for (engine, e) in &report.failures {
                log::warn!("dropping device context (engine {:?}): {}", engine, e);
            }
        }
    }
}

impl<D: Device + ?Sized> std::fmt::Debug for DeviceContext<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("caps", &self.caps)
            .field("databases", &self.databases)
            .field("live", &self.is_live())
            .finish()
    }
}
