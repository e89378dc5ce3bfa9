// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The CDC consumer: ingest loop, worker pool and handler dispatch.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::avro::{AvroDecoder, SchemaRegistry};
use crate::config::{CdcConfig, RetryPolicy};
use crate::error::{CdcError, Result};
use crate::event::{ChangeEvent, unwrap_optional};
use crate::handler::{CdcEventHandler, HandlerRegistry};
use crate::metrics::{CdcCounters, CdcMetrics};
use crate::reader::{BrokerMessage, MessageReader, ReadError, resolve_topics};

const INITIAL_READ_BACKOFF: Duration = Duration::from_secs(1);
const MAX_READ_BACKOFF: Duration = Duration::from_secs(30);

/// Decodes, normalizes and dispatches single messages.
struct Processor {
    decoder: AvroDecoder,
    handlers: HandlerRegistry,
    counters: Arc<CdcCounters>,
    retry: RetryPolicy,
    handler_timeout: Duration,
}

impl Processor {
    /// Process one message. Errors are recorded, never returned.
    async fn process(&self, message: &BrokerMessage, cancel: &CancellationToken) {
        match self.try_process(message, cancel).await {
            Ok(()) => {}
            Err(CdcError::ShortMessage(len)) => {
                self.counters.dropped();
                warn!(topic = %message.topic, offset = message.offset, len, "Dropping short CDC message");
            }
            Err(e) => {
                self.counters.record_error(&e);
                match e {
                    CdcError::Handler { .. } | CdcError::Panic { .. } => error!(
                        topic = %message.topic,
                        partition = message.partition,
                        offset = message.offset,
                        error = %e,
                        "CDC handler failed after retries, moving on"
                    ),
                    _ => warn!(
                        topic = %message.topic,
                        offset = message.offset,
                        error_code = e.error_code(),
                        error = %e,
                        "Failed to process CDC message"
                    ),
                }
            }
        }
    }

    async fn try_process(&self, message: &BrokerMessage, cancel: &CancellationToken) -> Result<()> {
        let envelope = self.decoder.decode(&message.payload).await?;

        let table = table_of(&envelope)?;
        let Some(handler) = self.handlers.get(table) else {
            self.counters.skipped();
            debug!(table = %table, topic = %message.topic, "No CDC handler registered, skipping");
            return Ok(());
        };

        let event = ChangeEvent::from_envelope(&envelope)?;
        self.dispatch(handler.as_ref(), &event, cancel).await?;
        self.counters.processed();
        Ok(())
    }

    /// Invoke the handler with retries and exponential back-off.
    async fn dispatch(
        &self,
        handler: &dyn CdcEventHandler,
        event: &ChangeEvent,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match self.invoke(handler, event).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if matches!(err, CdcError::Panic { .. }) {
                self.counters.panicked();
            }
            if attempt >= max_attempts || !err.kind().is_retriable() {
                return Err(err);
            }

            let backoff = self.retry.backoff(attempt);
            self.counters.retried();
            warn!(
                table = %event.table,
                operation = %event.operation,
                attempt,
                max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "CDC handler failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(err),
                _ = tokio::time::sleep(backoff) => {}
            }
            attempt += 1;
        }
    }

    async fn invoke(&self, handler: &dyn CdcEventHandler, event: &ChangeEvent) -> Result<()> {
        let call = AssertUnwindSafe(handler.handle_event(event)).catch_unwind();
        match tokio::time::timeout(self.handler_timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => Err(CdcError::Panic {
                table: event.table.clone(),
                message: panic_message(payload.as_ref()),
            }),
            Err(_) => Err(CdcError::handler(
                &event.table,
                format!("timed out after {}s", self.handler_timeout.as_secs()),
            )),
        }
    }
}

fn table_of(envelope: &Value) -> Result<&str> {
    envelope
        .get("source")
        .map(unwrap_optional)
        .and_then(|source| source.get("table"))
        .map(unwrap_optional)
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CdcError::invalid("missing source.table"))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

struct Running {
    cancel: CancellationToken,
    ingest: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

/// Consumes Debezium change events and routes them to table handlers.
///
/// A single ingest task reads from the broker. With parallel processing
/// enabled it hands messages to a fixed worker pool over a bounded channel,
/// processing inline whenever the channel is full.
pub struct CdcConsumer {
    config: CdcConfig,
    reader: Arc<dyn MessageReader>,
    processor: Arc<Processor>,
    running: Arc<AtomicBool>,
    state: Mutex<Option<Running>>,
}

impl CdcConsumer {
    /// Create a consumer over `reader`, resolving schemas through `registry`.
    pub fn new(
        config: CdcConfig,
        reader: Arc<dyn MessageReader>,
        registry: Arc<dyn SchemaRegistry>,
    ) -> Self {
        let processor = Processor {
            decoder: AvroDecoder::new(registry, config.schema_cache_size),
            handlers: HandlerRegistry::new(),
            counters: Arc::new(CdcCounters::default()),
            retry: config.retry.clone(),
            handler_timeout: config.handler_timeout,
        };
        Self {
            config,
            reader,
            processor: Arc::new(processor),
            running: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(None),
        }
    }

    /// Create a Kafka-backed consumer using the HTTP schema registry.
    #[cfg(feature = "kafka")]
    pub fn kafka(config: CdcConfig) -> Result<Self> {
        let reader = Arc::new(crate::kafka::KafkaReader::from_config(&config)?);
        let registry = Arc::new(crate::avro::HttpSchemaRegistry::new(
            config.schema_registry_url.clone(),
        ));
        Ok(Self::new(config, reader, registry))
    }

    /// Register a handler for its table.
    pub fn register_handler(&self, handler: Arc<dyn CdcEventHandler>) {
        self.processor.handlers.register(handler);
    }

    /// Whether the consumer is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Snapshot of counters, cache and reader statistics.
    pub fn metrics(&self) -> CdcMetrics {
        CdcMetrics {
            running: self.is_running(),
            handlers_registered: self.processor.handlers.len(),
            tables: self.processor.handlers.tables(),
            schema_cache: self.processor.decoder.cache_stats(),
            reader: self.reader.stats(),
            ..CdcMetrics::from_counters(&self.processor.counters)
        }
    }

    /// Subscribe and start consuming.
    ///
    /// A disabled consumer returns `Ok` without doing anything.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(CdcError::AlreadyRunning);
        }
        if !self.config.enabled {
            info!("CDC consumer disabled, not starting");
            return Ok(());
        }

        let listed = self.reader.list_topics().await;
        let topics = resolve_topics(&self.config.topic_pattern, listed)?;
        self.reader.subscribe(&topics).await?;

        let cancel = CancellationToken::new();
        let mut workers = Vec::new();
        let sender = if self.config.parallel {
            let (tx, rx) = mpsc::channel(self.config.channel_buffer.max(1));
            let rx = Arc::new(Mutex::new(rx));
            for worker_id in 0..self.config.worker_count.max(1) {
                workers.push(tokio::spawn(run_worker(
                    worker_id,
                    rx.clone(),
                    self.processor.clone(),
                    cancel.clone(),
                )));
            }
            Some(tx)
        } else {
            None
        };

        self.running.store(true, Ordering::Release);
        let ingest = tokio::spawn(run_ingest(
            self.reader.clone(),
            self.processor.clone(),
            sender,
            self.running.clone(),
            cancel.clone(),
        ));

        info!(
            topics = ?topics,
            group = %self.config.consumer_group,
            parallel = self.config.parallel,
            workers = workers.len(),
            handlers = self.processor.handlers.len(),
            "CDC consumer started"
        );

        *state = Some(Running {
            cancel,
            ingest,
            workers,
        });
        Ok(())
    }

    /// Stop consuming. Stopping a stopped consumer is a no-op.
    ///
    /// Queued messages are drained for up to the shutdown timeout; workers
    /// still busy after that are aborted.
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.state.lock().await.take() else {
            return Ok(());
        };
        self.running.store(false, Ordering::Release);
        running.cancel.cancel();

        let Running {
            mut ingest,
            mut workers,
            ..
        } = running;

        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            let _ = (&mut ingest).await;
            for worker in &mut workers {
                let _ = worker.await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "CDC workers did not drain in time, aborting"
            );
            ingest.abort();
            for worker in &workers {
                worker.abort();
            }
        }

        self.reader.close().await?;
        info!("CDC consumer stopped");
        Ok(())
    }
}

async fn run_ingest(
    reader: Arc<dyn MessageReader>,
    processor: Arc<Processor>,
    sender: Option<mpsc::Sender<BrokerMessage>>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    info!("CDC ingest loop started");
    let mut backoff = INITIAL_READ_BACKOFF;

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = reader.read() => result,
        };

        match result {
            Ok(message) => {
                backoff = INITIAL_READ_BACKOFF;
                processor.counters.received();
                match &sender {
                    Some(tx) => match tx.try_send(message) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(message)) => {
                            processor.counters.inline_fallback();
                            debug!(topic = %message.topic, "CDC channel full, processing inline");
                            processor.process(&message, &cancel).await;
                        }
                        Err(mpsc::error::TrySendError::Closed(message)) => {
                            processor.process(&message, &cancel).await;
                        }
                    },
                    None => processor.process(&message, &cancel).await,
                }
            }
            Err(ReadError::Closed) => {
                info!("CDC reader closed");
                running.store(false, Ordering::Release);
                break;
            }
            Err(ReadError::Timeout) => {
                debug!("CDC read timed out");
                backoff = INITIAL_READ_BACKOFF;
            }
            Err(e) => {
                if e.is_benign() {
                    debug!(error = %e, "Transient CDC read error");
                } else {
                    error!(error = %e, backoff_secs = backoff.as_secs(), "CDC read failed, backing off");
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_READ_BACKOFF);
            }
        }
    }

    info!("CDC ingest loop stopped");
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<BrokerMessage>>>,
    processor: Arc<Processor>,
    cancel: CancellationToken,
) {
    debug!(worker_id, "CDC worker started");
    loop {
        let next = receiver.lock().await.recv().await;
        match next {
            Some(message) => processor.process(&message, &cancel).await,
            None => break,
        }
    }
    debug!(worker_id, "CDC worker stopped");
}
