// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stream service: tenant-scoped managers, per-user quotas and the
//! per-client response loop.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::response::sse::Event;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trenova_core::ports::{StreamSummary, StreamingService};
use trenova_core::{TenantScope, tenant};

use crate::client::StreamClient;
use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::event::SseMessage;
use crate::manager::{BroadcastReport, StreamManager, StreamMetrics};

/// One active stream with its clients and counters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveStream {
    /// Composite stream key.
    pub stream_key: String,
    /// Connected clients.
    pub clients: usize,
    /// Manager counters.
    pub metrics: StreamMetrics,
}

/// Owns every stream manager and the per-user connection counts.
pub struct StreamService {
    config: StreamConfig,
    managers: DashMap<String, Arc<StreamManager>>,
    user_connections: DashMap<String, usize>,
    root: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl StreamService {
    /// Create a stream service.
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            managers: DashMap::new(),
            user_connections: DashMap::new(),
            root: CancellationToken::new(),
            sweeper: Mutex::new(None),
        }
    }

    /// Service configuration.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Live connections held by a user across all streams.
    pub fn user_connections(&self, user_id: &str) -> usize {
        self.user_connections.get(user_id).map(|c| *c).unwrap_or(0)
    }

    /// Manager for a stream key, if one exists.
    pub fn manager(&self, stream_key: &str) -> Option<Arc<StreamManager>> {
        self.managers.get(stream_key).map(|m| m.value().clone())
    }

    /// Register a new client on the manager for `stream_key`, creating the
    /// manager if needed.
    ///
    /// Runs under the map entry lock, so [`Self::prune`] cannot drop the
    /// manager between lookup and registration.
    fn admit(
        &self,
        stream_key: &str,
        scope: TenantScope,
    ) -> (Arc<StreamManager>, Result<(Arc<StreamClient>, mpsc::Receiver<SseMessage>)>) {
        let entry = self
            .managers
            .entry(stream_key.to_string())
            .or_insert_with(|| {
                debug!(stream_key = %stream_key, "Creating stream manager");
                Arc::new(StreamManager::new(
                    stream_key,
                    self.config.max_connections,
                    self.root.child_token(),
                ))
            });
        let manager = entry.value().clone();
        let (client, receiver) = StreamClient::new(
            stream_key,
            scope,
            self.config.send_queue_capacity,
            self.config.send_timeout,
            manager.cancellation().child_token(),
        );
        let added = manager.add(client.clone()).map(|()| (client, receiver));
        drop(entry);
        (manager, added)
    }

    /// Drop the manager for a stream once its last client is gone.
    fn prune(&self, manager: &StreamManager) {
        let removed = self
            .managers
            .remove_if(manager.stream_key(), |_, current| {
                std::ptr::eq(current.as_ref(), manager) && current.client_count() == 0
            })
            .is_some();
        if removed {
            debug!(stream_key = %manager.stream_key(), "Removed empty stream manager");
        }
    }

    fn reserve_user_slot(&self, user_id: &str) -> Result<()> {
        let limit = self.config.max_connections_per_user;
        match self.user_connections.entry(user_id.to_string()) {
            Entry::Occupied(mut entry) if *entry.get() < limit => *entry.get_mut() += 1,
            Entry::Vacant(entry) if limit > 0 => {
                entry.insert(1);
            }
            _ => {
                return Err(StreamError::UserQuotaExceeded {
                    user_id: user_id.to_string(),
                    limit,
                });
            }
        }
        Ok(())
    }

    fn release_user_slot(&self, user_id: &str) {
        if let Entry::Occupied(mut entry) = self.user_connections.entry(user_id.to_string()) {
            let count = entry.get_mut();
            *count = count.saturating_sub(1);
            if *count == 0 {
                entry.remove();
            }
        }
    }

    /// Admit a client for `logical_name` within the caller's tenant.
    ///
    /// Per-user quota is checked first, then the stream's own capacity; both
    /// fail with a 429-mapped error.
    pub fn connect(self: &Arc<Self>, logical_name: &str, scope: TenantScope) -> Result<Connection> {
        if self.root.is_cancelled() {
            return Err(StreamError::ShutDown);
        }

        let stream_key = scope.stream_key(logical_name);
        self.reserve_user_slot(&scope.user_id)?;

        let user_id = scope.user_id.clone();
        let (manager, admitted) = self.admit(&stream_key, scope);
        let (client, receiver) = match admitted {
            Ok(admitted) => admitted,
            Err(e) => {
                self.release_user_slot(&user_id);
                self.prune(&manager);
                return Err(e);
            }
        };

        info!(
            stream_key = %stream_key,
            client_id = %client.id(),
            user_id = %user_id,
            "Stream client connected"
        );

        Ok(Connection {
            guard: ConnectionGuard {
                service: self.clone(),
                manager,
                client: client.clone(),
            },
            client,
            receiver,
        })
    }

    fn disconnect(&self, manager: &StreamManager, client_id: &str) {
        if let Some(client) = manager.remove(client_id) {
            self.release_user_slot(&client.scope().user_id);
            debug!(
                stream_key = %manager.stream_key(),
                client_id = %client_id,
                "Stream client disconnected"
            );
        }
        self.prune(manager);
    }

    /// Broadcast to the clients of one stream key.
    ///
    /// A key without a manager yields an empty report.
    pub async fn broadcast(&self, stream_key: &str, payload: &Value) -> Result<BroadcastReport> {
        match self.manager(stream_key) {
            Some(manager) => manager.broadcast(payload).await,
            None => Ok(BroadcastReport::default()),
        }
    }

    /// Streams that currently have clients.
    pub fn active(&self) -> Vec<ActiveStream> {
        let mut streams: Vec<ActiveStream> = self
            .managers
            .iter()
            .filter_map(|entry| {
                let clients = entry.value().client_count();
                (clients > 0).then(|| ActiveStream {
                    stream_key: entry.key().clone(),
                    clients,
                    metrics: entry.value().metrics(),
                })
            })
            .collect();
        streams.sort_by(|a, b| a.stream_key.cmp(&b.stream_key));
        streams
    }

    /// Remove clients not seen within the stale window.
    ///
    /// Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let managers: Vec<Arc<StreamManager>> =
            self.managers.iter().map(|e| e.value().clone()).collect();

        let mut removed = 0usize;
        for manager in managers {
            for client in manager.cleanup_stale(now, self.config.stale_after) {
                self.release_user_slot(&client.scope().user_id);
                removed += 1;
            }
            self.prune(&manager);
        }
        removed
    }

    /// Start the stale-client sweeper.
    pub async fn start(self: &Arc<Self>) {
        let mut slot = self.sweeper.lock().await;
        if slot.is_some() {
            return;
        }

        let service = self.clone();
        let shutdown = self.root.clone();
        let interval = self.config.sweep_interval;
        *slot = Some(tokio::spawn(async move {
            info!(
                sweep_interval_secs = interval.as_secs(),
                "Stream sweeper started"
            );
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => {
                        break;
                    }

                    _ = tokio::time::sleep(interval) => {
                        let removed = service.sweep().await;
                        if removed > 0 {
                            debug!(removed, "Stream sweep finished");
                        }
                    }
                }
            }
            info!("Stream sweeper stopped");
        }));
    }

    /// Cancel every manager, close all clients and stop the sweeper.
    pub async fn stop(&self) {
        self.root.cancel();

        let mut closed = 0usize;
        for entry in self.managers.iter() {
            closed += entry.value().shutdown().len();
        }
        self.managers.clear();
        self.user_connections.clear();

        if let Some(handle) = self.sweeper.lock().await.take()
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Stream sweeper task failed");
        }

        info!(clients = closed, "Stream service shut down");
    }
}

#[async_trait]
impl StreamingService for StreamService {
    async fn broadcast_to_stream(
        &self,
        stream: &str,
        org_id: &str,
        bu_id: &str,
        data: Value,
    ) -> trenova_core::Result<()> {
        let key = tenant::stream_key(stream, org_id, bu_id);
        let report = self.broadcast(&key, &data).await?;
        debug!(
            stream_key = %key,
            delivered = report.delivered,
            slow = report.slow,
            "Broadcast to stream"
        );
        Ok(())
    }

    async fn active_streams(&self) -> Vec<StreamSummary> {
        self.active()
            .into_iter()
            .map(|s| StreamSummary {
                stream_key: s.stream_key,
                client_count: s.clients,
            })
            .collect()
    }

    async fn shutdown(&self) -> trenova_core::Result<()> {
        self.stop().await;
        Ok(())
    }
}

/// Removes its client from the manager and releases the user slot on drop.
struct ConnectionGuard {
    service: Arc<StreamService>,
    manager: Arc<StreamManager>,
    client: Arc<StreamClient>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.service.disconnect(&self.manager, self.client.id());
    }
}

/// An admitted client together with its queue receiver.
///
/// Dropping the connection (or the stream built from it) deregisters the
/// client.
pub struct Connection {
    client: Arc<StreamClient>,
    receiver: mpsc::Receiver<SseMessage>,
    guard: ConnectionGuard,
}

enum Step {
    Close,
    Ping,
    Message(SseMessage),
}

impl Connection {
    /// The admitted client.
    pub fn client(&self) -> &Arc<StreamClient> {
        &self.client
    }

    /// The response loop as a stream of encoded messages.
    ///
    /// Emits `connected` first, then queued messages and a `ping` every
    /// heartbeat interval until the client is cancelled, its queue closes,
    /// or the configured stream timeout elapses.
    pub fn into_messages(self) -> impl Stream<Item = SseMessage> + Send + 'static {
        let Connection {
            client,
            mut receiver,
            guard,
        } = self;
        let heartbeat = guard.service.config.heartbeat_interval;
        let timeout = guard.service.config.stream_timeout;

        async_stream::stream! {
            let _guard = guard;
            yield SseMessage::connected(Utc::now());

            let start = tokio::time::Instant::now();
            let mut ping = tokio::time::interval_at(start + heartbeat, heartbeat);
            let deadline = async move {
                match timeout {
                    Some(limit) => tokio::time::sleep_until(start + limit).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::pin!(deadline);

            loop {
                let step = tokio::select! {
                    biased;

                    _ = client.cancellation().cancelled() => Step::Close,
                    _ = &mut deadline => Step::Close,
                    message = receiver.recv() => match message {
                        Some(message) => Step::Message(message),
                        None => Step::Close,
                    },
                    _ = ping.tick() => Step::Ping,
                };

                match step {
                    Step::Close => break,
                    Step::Ping => {
                        let now = Utc::now();
                        client.touch(now);
                        yield SseMessage::ping(now);
                    }
                    Step::Message(message) => yield message,
                }
            }
        }
    }

    /// The response loop as axum SSE events.
    pub fn into_events(self) -> impl Stream<Item = std::result::Result<Event, Infallible>> + Send {
        use futures::StreamExt;
        self.into_messages().map(|m| Ok(m.to_event()))
    }
}
