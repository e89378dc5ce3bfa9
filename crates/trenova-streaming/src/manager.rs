// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-stream-key client registry and fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::{SendOutcome, StreamClient};
use crate::error::{Result, StreamError};
use crate::event::SseMessage;

/// Snapshot of a manager's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetrics {
    /// Currently connected clients.
    pub active_connections: usize,
    /// Clients admitted since the manager was created.
    pub total_connections: u64,
    /// Broadcast calls received.
    pub broadcasts: u64,
    /// Messages placed in client queues.
    pub messages_queued: u64,
    /// Enqueues that timed out.
    pub slow_marks: u64,
    /// Time of the last broadcast.
    pub last_broadcast: Option<DateTime<Utc>>,
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Clients the message was queued for.
    pub delivered: usize,
    /// Clients whose queue stayed full.
    pub slow: usize,
    /// Clients skipped because they were closed.
    pub skipped: usize,
}

#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    total: AtomicU64,
    broadcasts: AtomicU64,
    queued: AtomicU64,
    slow_marks: AtomicU64,
    last_broadcast: AtomicI64,
}

/// Clients of one stream key.
///
/// The client map sits behind a reader/writer lock that is never held across
/// an await point. Broadcasts snapshot the map and enqueue to every client
/// concurrently, so a full queue delays the call by at most the send timeout.
#[derive(Debug)]
pub struct StreamManager {
    stream_key: String,
    max_connections: usize,
    clients: RwLock<HashMap<String, Arc<StreamClient>>>,
    counters: Counters,
    cancel: CancellationToken,
}

impl StreamManager {
    /// Create a manager whose clients are cancelled together with `cancel`.
    pub fn new(
        stream_key: impl Into<String>,
        max_connections: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stream_key: stream_key.into(),
            max_connections,
            clients: RwLock::new(HashMap::new()),
            counters: Counters::default(),
            cancel,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<StreamClient>>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<StreamClient>>> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stream key served by this manager.
    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    /// Token that new clients should derive their own token from.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the manager has been shut down.
    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Register a client unless the stream is full.
    pub fn add(&self, client: Arc<StreamClient>) -> Result<()> {
        if self.is_shut_down() {
            return Err(StreamError::ShutDown);
        }

        let mut clients = self.write();
        if clients.len() >= self.max_connections {
            return Err(StreamError::StreamQuotaExceeded {
                stream_key: self.stream_key.clone(),
                limit: self.max_connections,
            });
        }
        clients.insert(client.id().to_string(), client);
        self.counters.active.store(clients.len(), Ordering::Relaxed);
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Remove and close a client, returning it if it was registered.
    pub fn remove(&self, client_id: &str) -> Option<Arc<StreamClient>> {
        let mut clients = self.write();
        let client = clients.remove(client_id)?;
        client.close();
        self.counters.active.store(clients.len(), Ordering::Relaxed);
        Some(client)
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.read().len()
    }

    /// Clients currently registered.
    pub fn clients(&self) -> Vec<Arc<StreamClient>> {
        self.read().values().cloned().collect()
    }

    /// Encode `payload` once and enqueue it for every open client.
    pub async fn broadcast(&self, payload: &Value) -> Result<BroadcastReport> {
        let message = SseMessage::from_payload(payload)?;
        Ok(self.broadcast_message(message).await)
    }

    /// Enqueue an already encoded message for every open client.
    pub async fn broadcast_message(&self, message: SseMessage) -> BroadcastReport {
        let now = Utc::now();
        self.counters.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.counters
            .last_broadcast
            .store(now.timestamp(), Ordering::Relaxed);

        let targets = self.clients();
        let outcomes = join_all(targets.iter().map(|client| {
            let message = message.clone();
            async move { client.send(message).await }
        }))
        .await;

        let mut report = BroadcastReport::default();
        for (client, outcome) in targets.iter().zip(outcomes) {
            match outcome {
                SendOutcome::Queued => report.delivered += 1,
                SendOutcome::Slow => {
                    debug!(
                        stream_key = %self.stream_key,
                        client_id = %client.id(),
                        "Client queue full, marked as slow"
                    );
                    report.slow += 1;
                }
                SendOutcome::Closed => report.skipped += 1,
            }
        }

        self.counters
            .queued
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.counters
            .slow_marks
            .fetch_add(report.slow as u64, Ordering::Relaxed);
        report
    }

    /// Remove clients not seen since `now - max_age`, returning them.
    pub fn cleanup_stale(&self, now: DateTime<Utc>, max_age: Duration) -> Vec<Arc<StreamClient>> {
        let cutoff = now.timestamp() - max_age.as_secs() as i64;
        let mut clients = self.write();
        let stale: Vec<String> = clients
            .values()
            .filter(|c| c.last_seen().timestamp() < cutoff)
            .map(|c| c.id().to_string())
            .collect();

        let removed: Vec<Arc<StreamClient>> = stale
            .iter()
            .filter_map(|id| clients.remove(id))
            .inspect(|c| {
                c.close();
            })
            .collect();
        self.counters.active.store(clients.len(), Ordering::Relaxed);

        if !removed.is_empty() {
            info!(
                stream_key = %self.stream_key,
                count = removed.len(),
                "Removed stale stream clients"
            );
        }
        removed
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> StreamMetrics {
        let last = self.counters.last_broadcast.load(Ordering::Relaxed);
        StreamMetrics {
            active_connections: self.counters.active.load(Ordering::Relaxed),
            total_connections: self.counters.total.load(Ordering::Relaxed),
            broadcasts: self.counters.broadcasts.load(Ordering::Relaxed),
            messages_queued: self.counters.queued.load(Ordering::Relaxed),
            slow_marks: self.counters.slow_marks.load(Ordering::Relaxed),
            last_broadcast: (last > 0)
                .then(|| DateTime::from_timestamp(last, 0))
                .flatten(),
        }
    }

    /// Cancel the manager, close every client and empty the map.
    ///
    /// Returns the clients that were connected.
    pub fn shutdown(&self) -> Vec<Arc<StreamClient>> {
        self.cancel.cancel();
        let mut clients = self.write();
        let drained: Vec<Arc<StreamClient>> = clients.drain().map(|(_, c)| c).collect();
        for client in &drained {
            client.close();
        }
        self.counters.active.store(0, Ordering::Relaxed);
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;
    use trenova_core::TenantScope;

    use crate::event::SseMessage;

    fn manager(max: usize) -> StreamManager {
        StreamManager::new("shipments:org:bu", max, CancellationToken::new())
    }

    fn client(
        manager: &StreamManager,
        capacity: usize,
    ) -> (Arc<StreamClient>, mpsc::Receiver<SseMessage>) {
        StreamClient::new(
            manager.stream_key(),
            TenantScope::new("org", "bu", "usr"),
            capacity,
            Duration::from_millis(100),
            manager.cancellation().child_token(),
        )
    }

    #[tokio::test]
    async fn test_add_respects_max_connections() {
        let m = manager(2);
        let (a, _ra) = client(&m, 4);
        let (b, _rb) = client(&m, 4);
        let (c, _rc) = client(&m, 4);
        m.add(a).unwrap();
        m.add(b).unwrap();
        let err = m.add(c).unwrap_err();
        assert!(matches!(err, StreamError::StreamQuotaExceeded { limit: 2, .. }));
        assert_eq!(m.client_count(), 2);
        assert_eq!(m.metrics().total_connections, 2);
    }

    #[tokio::test]
    async fn test_remove_closes_client() {
        let m = manager(4);
        let (a, _ra) = client(&m, 4);
        m.add(a.clone()).unwrap();
        let removed = m.remove(a.id()).unwrap();
        assert!(removed.is_closed());
        assert!(a.cancellation().is_cancelled());
        assert!(m.remove(a.id()).is_none());
        assert_eq!(m.metrics().active_connections, 0);
        assert_eq!(m.metrics().total_connections, 1);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_client() {
        let m = manager(4);
        let (a, mut ra) = client(&m, 4);
        let (b, mut rb) = client(&m, 4);
        m.add(a).unwrap();
        m.add(b).unwrap();

        let report = m.broadcast(&json!({"operation": "update", "id": "shp_1"})).await.unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(ra.recv().await.unwrap().event(), "update");
        assert_eq!(rb.recv().await.unwrap().event(), "update");

        let metrics = m.metrics();
        assert_eq!(metrics.broadcasts, 1);
        assert_eq!(metrics.messages_queued, 2);
        assert!(metrics.last_broadcast.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_client_does_not_block_others() {
        let m = manager(4);
        let (slow, _rs) = client(&m, 1);
        let (fast, mut rf) = client(&m, 8);
        m.add(slow.clone()).unwrap();
        m.add(fast).unwrap();

        m.broadcast(&json!({"n": 1})).await.unwrap();
        let started = tokio::time::Instant::now();
        let report = m.broadcast(&json!({"n": 2})).await.unwrap();
        assert!(started.elapsed() <= Duration::from_millis(150));

        assert_eq!(report, BroadcastReport { delivered: 1, slow: 1, skipped: 0 });
        assert!(slow.is_slow());
        assert_eq!(rf.recv().await.unwrap().data(), r#"{"n":1}"#);
        assert_eq!(rf.recv().await.unwrap().data(), r#"{"n":2}"#);
        assert_eq!(m.metrics().slow_marks, 1);
    }

    #[tokio::test]
    async fn test_closed_client_skipped() {
        let m = manager(4);
        let (a, _ra) = client(&m, 4);
        m.add(a.clone()).unwrap();
        a.close();
        let report = m.broadcast(&json!({})).await.unwrap();
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_cleanup_stale() {
        let m = manager(4);
        let (old, _ro) = client(&m, 4);
        let (fresh, _rf) = client(&m, 4);
        let now = Utc::now();
        old.touch(now - chrono::Duration::minutes(3));
        fresh.touch(now);
        m.add(old.clone()).unwrap();
        m.add(fresh).unwrap();

        let removed = m.cleanup_stale(now, Duration::from_secs(120));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id(), old.id());
        assert!(old.is_closed());
        assert_eq!(m.client_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let m = manager(4);
        let (a, _ra) = client(&m, 4);
        m.add(a.clone()).unwrap();
        let drained = m.shutdown();
        assert_eq!(drained.len(), 1);
        assert!(a.is_closed());
        assert_eq!(m.client_count(), 0);

        let (b, _rb) = client(&m, 4);
        assert!(matches!(m.add(b), Err(StreamError::ShutDown)));
    }
}
