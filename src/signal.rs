// mlx5 RegEx Engine Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Signal forwarding.
//!
//! Signals are turned into [`Request`]s on a dedicated thread and sent to the
//! controller. Nothing here touches device state, so teardown always runs on
//! the controller thread.

use crate::lifecycle::Request;
use std::io;
use std::thread::{self, JoinHandle};
use tokio::runtime;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc::Sender;

/// Start forwarding SIGTERM, SIGINT, SIGHUP and SIGCHLD to `sender`.
///
/// Handlers are installed before this returns. The thread exits once the
/// receiving side is gone.
///
/// # Errors
///
/// Fails if the runtime cannot be built, a handler cannot be installed or
/// the thread cannot be spawned.
pub fn spawn_listener(sender: Sender<Request>) -> io::Result<JoinHandle<()>> {
    let rt = runtime::Builder::new_current_thread().enable_all().build()?;

    let (mut term, mut int, mut hup, mut child) = {
        let _guard = rt.enter();
        (
            signal(SignalKind::terminate())?,
            signal(SignalKind::interrupt())?,
            signal(SignalKind::hangup())?,
            signal(SignalKind::child())?,
        )
    };

    thread::Builder::new()
        .name("regex-signals".to_string())
        .spawn(move || {
            rt.block_on(async move {
                loop {
                    let request = tokio::select! {
                        Some(()) = term.recv() => Request::Terminate,
                        Some(()) = int.recv() => Request::Interrupt,
                        Some(()) = hup.recv() => Request::Reload,
                        Some(()) = child.recv() => Request::ChildExited,
                        else => break,
                    };
                    log::debug!("forwarding {:?}", request);
                    if sender.send(request).await.is_err() {
                        break;
                    }
                }
            });
            log::debug!("signal listener stopped");
        })
}
