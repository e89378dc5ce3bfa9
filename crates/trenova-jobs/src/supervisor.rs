// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Restarts a long-running loop after it panics or exits early.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::server::panic_message;

/// Restart bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisorState {
    /// Panics recovered so far.
    pub panic_count: u32,
    /// When the last panic happened.
    pub last_panic: Option<DateTime<Utc>>,
    /// Restarts performed (after panics, errors or early exits).
    pub restarts: u32,
}

/// Runs a loop until cancelled, restarting it with a cooldown.
pub struct Supervisor {
    name: &'static str,
    cooldown: Duration,
    state: Mutex<SupervisorState>,
}

impl Supervisor {
    /// Create a supervisor that waits `cooldown` between restarts.
    pub fn new(name: &'static str, cooldown: Duration) -> Self {
        Self {
            name,
            cooldown,
            state: Mutex::new(SupervisorState::default()),
        }
    }

    /// Current bookkeeping.
    pub fn state(&self) -> SupervisorState {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Panics recovered so far.
    pub fn panic_count(&self) -> u32 {
        self.state().panic_count
    }

    fn record_panic(&self) -> u32 {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.panic_count += 1;
        state.last_panic = Some(Utc::now());
        state.panic_count
    }

    fn record_restart(&self) {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).restarts += 1;
    }

    /// Call `run` until `cancel` fires.
    ///
    /// Each call gets the same token. A panic, an error or a return before
    /// cancellation leads to a restart after the cooldown.
    pub async fn supervise<F, Fut>(&self, cancel: CancellationToken, mut run: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        loop {
            let outcome = AssertUnwindSafe(run()).catch_unwind().await;
            if cancel.is_cancelled() {
                break;
            }
            match outcome {
                Ok(Ok(())) => warn!(name = self.name, "Supervised loop exited early, restarting"),
                Ok(Err(e)) => error!(
                    name = self.name,
                    error = %e,
                    "Supervised loop stopped unexpectedly, restarting"
                ),
                Err(payload) => {
                    let total = self.record_panic();
                    error!(
                        name = self.name,
                        panic = %panic_message(payload.as_ref()),
                        total_panics = total,
                        cooldown_secs = self.cooldown.as_secs(),
                        "Supervised loop panicked, attempting restart"
                    );
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.cooldown) => {}
            }
            self.record_restart();
            info!(name = self.name, "Restarting supervised loop");
        }
    }
}
