// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kafka reader on top of librdkafka.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use tracing::info;

use crate::config::CdcConfig;
use crate::error::{CdcError, Result};
use crate::reader::{BrokerMessage, MessageReader, ReadError, ReaderStats};

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Consumer-group reader over every subscribed topic.
pub struct KafkaReader {
    consumer: Arc<StreamConsumer>,
    topics: Mutex<Vec<String>>,
    messages: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
}

impl KafkaReader {
    /// Create a reader from the consumer configuration.
    pub fn from_config(config: &CdcConfig) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", config.start_offset.as_str())
            .set("enable.auto.commit", "true")
            .set("session.timeout.ms", "30000")
            .create()
            .map_err(broker_error)?;

        info!(
            brokers = %config.brokers.join(","),
            group = %config.consumer_group,
            "Created Kafka consumer"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            topics: Mutex::new(Vec::new()),
            messages: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        })
    }
}

fn broker_error(e: KafkaError) -> CdcError {
    CdcError::Broker(e.to_string())
}

fn read_error(e: KafkaError) -> ReadError {
    let message = e.to_string();
    if message.contains("timed out") {
        ReadError::Timeout
    } else {
        ReadError::Broker(message)
    }
}

#[async_trait]
impl MessageReader for KafkaReader {
    async fn list_topics(&self) -> Result<Vec<String>> {
        let consumer = self.consumer.clone();
        let topics = tokio::task::spawn_blocking(move || {
            consumer
                .fetch_metadata(None, METADATA_TIMEOUT)
                .map(|metadata| {
                    metadata
                        .topics()
                        .iter()
                        .map(|t| t.name().to_string())
                        .collect::<Vec<_>>()
                })
        })
        .await
        .map_err(|e| CdcError::Broker(e.to_string()))?
        .map_err(broker_error)?;
        Ok(topics)
    }

    async fn subscribe(&self, topics: &[String]) -> Result<()> {
        let names: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&names).map_err(broker_error)?;
        *self.topics.lock().unwrap_or_else(PoisonError::into_inner) = topics.to_vec();
        info!(topics = ?topics, "Subscribed to CDC topics");
        Ok(())
    }

    async fn read(&self) -> std::result::Result<BrokerMessage, ReadError> {
        match self.consumer.recv().await {
            Ok(message) => {
                let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
                self.messages.fetch_add(1, Ordering::Relaxed);
                self.bytes.fetch_add(payload.len() as u64, Ordering::Relaxed);
                Ok(BrokerMessage {
                    topic: message.topic().to_string(),
                    partition: message.partition(),
                    offset: message.offset(),
                    key: message.key().map(<[u8]>::to_vec),
                    payload,
                })
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                Err(read_error(e))
            }
        }
    }

    fn stats(&self) -> ReaderStats {
        ReaderStats {
            topics: self
                .topics
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            messages: self.messages.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    async fn close(&self) -> Result<()> {
        self.consumer.unsubscribe();
        info!("Kafka consumer unsubscribed");
        Ok(())
    }
}
