// mlx5 RegEx Engine Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Start-up and shutdown sequencing.
//!
//! ```text
//! Uninitialized -> Negotiated -> Binding(0..n) -> Running -> ShuttingDown -> Terminated
//!        \               \             \
//!         +---------------+-------------+--> Failed
//! ```
//!
//! The controller runs on one thread. Requests (usually forwarded signals)
//! arrive over a bounded channel and are handled one at a time, so shutdown
//! can only ever run once.

use crate::caps::{query_capabilities, DeviceCapabilities};
use crate::config::RegexConfig;
use crate::context::{DeviceContext, ShutdownReport};
use crate::database::EngineDatabase;
use crate::device::Device;
use crate::error::RegexError;
use tokio::sync::mpsc;

/// Depth of the request channel.
pub const REQUEST_QUEUE_DEPTH: usize = 8;

/// Lifecycle state of a [`Controller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Uninitialized,
    Negotiated,
    /// Binding the database of the given engine.
    Binding(u8),
    Running,
    ShuttingDown,
    Terminated,
    /// Start-up failed; everything acquired was released again.
    Failed,
}

/// Asynchronous requests delivered to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// SIGTERM.
    Terminate,
    /// SIGINT.
    Interrupt,
    /// SIGHUP.
    Reload,
    /// SIGCHLD.
    ChildExited,
}

/// Create the channel requests are delivered on.
pub fn channel() -> (mpsc::Sender<Request>, mpsc::Receiver<Request>) {
    mpsc::channel(REQUEST_QUEUE_DEPTH)
}

/// Drives one device from capability negotiation to shutdown.
pub struct Controller<'d, D: Device + ?Sized> {
    device: &'d D,
    config: RegexConfig,
    state: State,
    caps: Option<DeviceCapabilities>,
    context: Option<DeviceContext<'d, D>>,
}

impl<'d, D: Device + ?Sized> Controller<'d, D> {
    pub fn new(device: &'d D, config: RegexConfig) -> Self {
        Self {
            device,
            config,
            state: State::Uninitialized,
            caps: None,
            context: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Capabilities found by [`Controller::negotiate`].
    pub fn capabilities(&self) -> Option<DeviceCapabilities> {
        self.caps
    }

    /// Engine databases in ascending engine order; empty before start-up.
    pub fn databases(&self) -> &[EngineDatabase<'d, D>] {
        match &self.context {
            Some(ctx) => ctx.databases(),
            None => &[],
        }
    }

    fn transition(&mut self, next: State) {
        log::info!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn expect_state(&self, expected: State, operation: &str) -> Result<(), RegexError> {
        if self.state != expected {
            return Err(RegexError::InvalidArgument(format!(
                "{} requires state {:?}, controller is {:?}",
                operation, expected, self.state
            )));
        }
        Ok(())
    }

    /// Query the device's regex capabilities.
    pub fn negotiate(&mut self) -> Result<DeviceCapabilities, RegexError> {
        self.expect_state(State::Uninitialized, "negotiate")?;
        match query_capabilities(self.device) {
            Ok(caps) => {
                self.caps = Some(caps);
                self.transition(State::Negotiated);
                Ok(caps)
            }
            Err(e) => {
                self.transition(State::Failed);
                Err(e)
            }
        }
    }

    /// Allocate the protection domain and bind every engine.
    ///
    /// # Errors
    ///
    /// On failure the engines bound so far are unbound in reverse order, the
    /// protection domain is released and the controller ends up `Failed`.
    pub fn start(&mut self) -> Result<(), RegexError> {
        self.expect_state(State::Negotiated, "start")?;
        let caps = match self.caps {
            Some(caps) => caps,
            None => return Err(RegexError::Unsupported),
        };

        let mut ctx = match DeviceContext::new(self.device, caps, self.config.clone()) {
            Ok(ctx) => ctx,
            Err(e) => {
                self.transition(State::Failed);
                return Err(e);
            }
        };

        for engine in 0..caps.engine_count {
            self.transition(State::Binding(engine));
            if let Err(e) = ctx.bind_engine(engine) {
                log::error!("start-up failed at engine {}: {}", engine, e);
                ctx.abort();
                self.context = Some(ctx);
                self.transition(State::Failed);
                return Err(e);
            }
        }

        self.context = Some(ctx);
        self.transition(State::Running);
        Ok(())
    }

    /// Act on a request.
    ///
    /// Returns the shutdown report when the request ended the controller.
    pub fn handle(&mut self, request: Request) -> Option<ShutdownReport> {
        match request {
            Request::Terminate | Request::Interrupt => {
                log::info!("{:?} requested, shutting down", request);
                Some(self.shutdown())
            }
            Request::Reload => {
                log::warn!("reload requested; databases are not reloaded, ignoring");
                None
            }
            Request::ChildExited => {
                log::debug!("child exited, ignoring");
                None
            }
        }
    }

    /// Unbind every engine in descending order and release the protection
    /// domain.
    ///
    /// Failures are logged and collected; shutdown always runs to the end.
    /// Once `Terminated` (or `Failed`) this does nothing.
    pub fn shutdown(&mut self) -> ShutdownReport {
        match self.state {
            State::Terminated | State::Failed => return ShutdownReport::default(),
            _ => {}
        }

        self.transition(State::ShuttingDown);
        let report = self
            .context
            .as_mut()
            .map(|ctx| ctx.teardown())
            .unwrap_or_default();
        if report.is_clean() {
            log::info!("shutdown complete");
        } else {
            log::warn!("shutdown finished with {} failure(s)", report.failures.len());
        }
        self.transition(State::Terminated);
        report
    }

    /// Block on `requests` until one of them ends the controller.
    ///
    /// A closed channel is treated as a termination request. Must not be
    /// called from within an async runtime.
    pub fn run(&mut self, requests: &mut mpsc::Receiver<Request>) -> ShutdownReport {
        loop {
            match requests.blocking_recv() {
                Some(request) => {
                    if let Some(report) = self.handle(request) {
                        return report;
                    }
                }
                None => {
                    log::info!("request channel closed");
                    return self.shutdown();
                }
            }
        }
    }
}

impl<D: Device + ?Sized> std::fmt::Debug for Controller<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("state", &self.state)
            .field("caps", &self.caps)
            .field("databases", &self.databases())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{test_config, Call, FakeDevice, Fault};

    fn running(device: &FakeDevice) -> Controller<'_, FakeDevice> {
        let mut controller = Controller::new(device, test_config());
        controller.negotiate().unwrap();
        controller.start().unwrap();
        assert_eq!(controller.state(), State::Running);
        controller
    }

    #[test]
    fn test_full_lifecycle() {
        let device = FakeDevice::new(true, 2);
        let mut controller = running(&device);
        assert_eq!(controller.databases().len(), 2);
        assert_eq!(controller.capabilities().map(|c| c.engine_count), Some(2));

        let report = controller.handle(Request::Terminate).unwrap();
        assert!(report.is_clean());
        assert_eq!(controller.state(), State::Terminated);
        assert!(controller.databases().iter().all(|db| !db.is_bound()));
        assert!(device.is_clean());
    }

    #[test]
    fn test_unsupported_device_fails_untouched() {
        let device = FakeDevice::new(false, 4);
        let mut controller = Controller::new(&device, test_config());
        assert!(matches!(controller.negotiate(), Err(RegexError::Unsupported)));
        assert_eq!(controller.state(), State::Failed);
        assert!(controller.start().is_err());
        assert_eq!(device.calls(), vec![Call::QueryCaps]);
        assert!(device.is_clean());
    }

    #[test]
    fn test_bind_failure_unwinds_in_reverse() {
        let device = FakeDevice::new(true, 4);
        device.inject(Fault::Bind(3));
        let mut controller = Controller::new(&device, test_config());
        controller.negotiate().unwrap();

        let err = controller.start().unwrap_err();
        assert!(matches!(err, RegexError::Bind { engine: 3, .. }));
        assert_eq!(controller.state(), State::Failed);

        let disconnects: Vec<u8> = device
            .calls()
            .iter()
            .filter_map(|c| match c {
                Call::Disconnect { engine, .. } => Some(*engine),
                _ => None,
            })
            .collect();
        assert_eq!(disconnects, vec![2, 1, 0]);
        assert!(device.is_clean());

        // nothing left to shut down
        device.clear_calls();
        assert!(controller.shutdown().is_clean());
        assert!(device.calls().is_empty());
    }

    #[test]
    fn test_shutdown_survives_failed_unbind() {
        let device = FakeDevice::new(true, 3);
        let mut controller = running(&device);
        device.inject(Fault::Disconnect(1));

        let report = controller.shutdown();
        assert_eq!(report.failures[0].0, Some(1));
        assert_eq!(controller.state(), State::Terminated);
        assert!(controller.databases().iter().all(|db| !db.is_bound()));
    }

    #[test]
    fn test_second_terminate_is_noop() {
        let device = FakeDevice::new(true, 2);
        let mut controller = running(&device);
        controller.handle(Request::Interrupt).unwrap();
        device.clear_calls();

        let report = controller.handle(Request::Terminate).unwrap();
        assert!(report.is_clean());
        assert!(controller.shutdown().is_clean());
        assert!(device.calls().is_empty());
        assert_eq!(controller.state(), State::Terminated);
    }

    #[test]
    fn test_reload_and_child_are_ignored() {
        let device = FakeDevice::new(true, 1);
        let mut controller = running(&device);
        device.clear_calls();
        assert!(controller.handle(Request::Reload).is_none());
        assert!(controller.handle(Request::ChildExited).is_none());
        assert_eq!(controller.state(), State::Running);
        assert!(device.calls().is_empty());
    }

    #[test]
    fn test_out_of_order_operations() {
        let device = FakeDevice::new(true, 1);
        let mut controller = Controller::new(&device, test_config());
        assert!(matches!(controller.start(), Err(RegexError::InvalidArgument(_))));
        controller.negotiate().unwrap();
        assert!(controller.negotiate().is_err());
        assert_eq!(controller.state(), State::Negotiated);
    }

    #[test]
    fn test_run_until_terminate() {
        let device = FakeDevice::new(true, 2);
        let mut controller = running(&device);
        let (tx, mut rx) = channel();
        tx.try_send(Request::Reload).unwrap();
        tx.try_send(Request::ChildExited).unwrap();
        tx.try_send(Request::Terminate).unwrap();
        tx.try_send(Request::Reload).unwrap();

        let report = controller.run(&mut rx);
        assert!(report.is_clean());
        assert_eq!(controller.state(), State::Terminated);
        assert!(device.is_clean());
        // the request after Terminate is never consumed
        assert_eq!(rx.try_recv().ok(), Some(Request::Reload));
    }

    #[test]
    fn test_run_closed_channel_shuts_down() {
        let device = FakeDevice::new(true, 1);
        let mut controller = running(&device);
        let (tx, mut rx) = channel();
        drop(tx);

        assert!(controller.run(&mut rx).is_clean());
        assert_eq!(controller.state(), State::Terminated);
        assert!(device.is_clean());
    }
}
