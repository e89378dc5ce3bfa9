// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! One connected SSE client.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use trenova_core::{TenantScope, id};

use crate::event::SseMessage;

/// Failed enqueues after which a client is reported slow even if the last
/// attempt succeeded.
const SLOW_ERROR_THRESHOLD: u32 = 3;

/// Result of a single enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message is in the client's queue.
    Queued,
    /// The client is closed or its receiver is gone.
    Closed,
    /// The queue stayed full for the whole send timeout.
    Slow,
}

/// A connected client and the sending half of its queue.
///
/// The receiving half is owned by the response loop. `closed` only ever moves
/// from `false` to `true`; once set no send succeeds.
#[derive(Debug)]
pub struct StreamClient {
    id: String,
    stream_key: String,
    scope: TenantScope,
    sender: mpsc::Sender<SseMessage>,
    send_timeout: Duration,
    closed: AtomicBool,
    slow: AtomicBool,
    error_count: AtomicU32,
    last_seen: AtomicI64,
    cancel: CancellationToken,
}

impl StreamClient {
    /// Create a client with a bounded queue, returning the receiver for the
    /// response loop.
    ///
    /// `cancel` should be a child of the owning manager's token.
    pub fn new(
        stream_key: impl Into<String>,
        scope: TenantScope,
        queue_capacity: usize,
        send_timeout: Duration,
        cancel: CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<SseMessage>) {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let client = Arc::new(Self {
            id: id::new_id(id::STREAM_CLIENT),
            stream_key: stream_key.into(),
            scope,
            sender,
            send_timeout,
            closed: AtomicBool::new(false),
            slow: AtomicBool::new(false),
            error_count: AtomicU32::new(0),
            last_seen: AtomicI64::new(Utc::now().timestamp()),
            cancel,
        });
        (client, receiver)
    }

    /// Client ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stream key the client belongs to.
    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    /// Tenant and user the client was admitted for.
    pub fn scope(&self) -> &TenantScope {
        &self.scope
    }

    /// Whether the client has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether a recent enqueue timed out.
    pub fn is_slow(&self) -> bool {
        self.slow.load(Ordering::Relaxed)
    }

    /// Number of enqueues that timed out.
    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Last time the client was seen alive.
    pub fn last_seen(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_seen.load(Ordering::Relaxed), 0).unwrap_or_default()
    }

    /// Record activity at `now`.
    pub fn touch(&self, now: DateTime<Utc>) {
        self.last_seen.store(now.timestamp(), Ordering::Relaxed);
    }

    /// Token cancelled when the client is closed.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Close the client and cancel its context.
    ///
    /// Returns `true` for the call that performed the transition.
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        self.cancel.cancel();
        first
    }

    /// Enqueue a message without ever waiting longer than the send timeout.
    pub async fn send(&self, message: SseMessage) -> SendOutcome {
        if self.is_closed() {
            return SendOutcome::Closed;
        }

        tokio::select! {
            biased;

            _ = self.cancel.cancelled() => SendOutcome::Closed,

            result = tokio::time::timeout(self.send_timeout, self.sender.send(message)) => {
                match result {
                    Ok(Ok(())) => {
                        if self.error_count() <= SLOW_ERROR_THRESHOLD {
                            self.slow.store(false, Ordering::Relaxed);
                        }
                        SendOutcome::Queued
                    }
                    Ok(Err(_)) => SendOutcome::Closed,
                    Err(_) => {
                        self.error_count.fetch_add(1, Ordering::Relaxed);
                        self.slow.store(true, Ordering::Relaxed);
                        SendOutcome::Slow
                    }
                }
            }
        }
    }
}
