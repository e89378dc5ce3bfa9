// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Broker reader abstraction and topic discovery.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tracing::warn;

use crate::error::{CdcError, Result};

/// Tables published under `trenova.public` when the broker cannot list them.
pub const DEFAULT_TABLES: &[&str] = &[
    "shipments",
    "shipment_moves",
    "stops",
    "assignments",
    "users",
    "workers",
    "customers",
    "tractors",
    "trailers",
    "locations",
];

const DEFAULT_TOPIC_PREFIX: &str = "trenova.public";

/// A message read from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Topic.
    pub topic: String,
    /// Partition.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Message key.
    pub key: Option<Vec<u8>>,
    /// Framed Avro payload.
    pub payload: Vec<u8>,
}

/// Errors surfaced by [`MessageReader::read`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    /// The reader was closed; no more messages will arrive.
    #[error("reader closed")]
    Closed,
    /// No message arrived within the broker timeout.
    #[error("read timed out")]
    Timeout,
    /// Any other broker failure.
    #[error("{0}")]
    Broker(String),
}

impl ReadError {
    /// Whether the error is a consumer-group rebalance.
    pub fn is_rebalance(&self) -> bool {
        matches!(self, Self::Broker(m) if m.contains("Rebalance In Progress") || m.contains("[27]"))
    }

    /// Whether the error is routine and should only be logged at debug.
    pub fn is_benign(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Broker(m) => {
                self.is_rebalance() || m.contains("timed out") || m.contains("timeout")
            }
            Self::Closed => false,
        }
    }
}

/// Reader counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderStats {
    /// Subscribed topics.
    pub topics: Vec<String>,
    /// Messages read.
    pub messages: u64,
    /// Payload bytes read.
    pub bytes: u64,
    /// Read errors.
    pub errors: u64,
}

/// A consumer-group reader over a set of topics.
///
/// Messages are acknowledged as they are read; `read` must be cancel-safe.
#[async_trait]
pub trait MessageReader: Send + Sync {
    /// Topics known to the broker.
    async fn list_topics(&self) -> Result<Vec<String>>;

    /// Subscribe to `topics` with the configured consumer group.
    async fn subscribe(&self, topics: &[String]) -> Result<()>;

    /// Wait for the next message.
    async fn read(&self) -> std::result::Result<BrokerMessage, ReadError>;

    /// Counters.
    fn stats(&self) -> ReaderStats;

    /// Close the reader.
    async fn close(&self) -> Result<()>;
}

/// Compiled topic glob.
///
/// `*` matches any run of characters. A pattern that does not compile
/// matches every topic.
#[derive(Debug, Clone)]
pub struct TopicFilter(Option<Regex>);

impl TopicFilter {
    /// Compile `pattern` into an anchored matcher.
    pub fn new(pattern: &str) -> Self {
        let expression = format!("^{}$", pattern.replace('*', ".*"));
        match Regex::new(&expression) {
            Ok(regex) => Self(Some(regex)),
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Invalid topic pattern, matching all topics");
                Self(None)
            }
        }
    }

    /// Whether `topic` matches.
    pub fn is_match(&self, topic: &str) -> bool {
        self.0.as_ref().is_none_or(|r| r.is_match(topic))
    }
}

/// Default topic set for the `trenova.public` prefix.
pub fn default_topics() -> Vec<String> {
    DEFAULT_TABLES
        .iter()
        .map(|t| format!("{DEFAULT_TOPIC_PREFIX}.{t}"))
        .collect()
}

/// Pick the topics to subscribe to.
///
/// Listed topics are filtered by the glob. When the listing failed or
/// nothing matched, a `trenova.public` pattern falls back to the default set.
pub fn resolve_topics(pattern: &str, listed: Result<Vec<String>>) -> Result<Vec<String>> {
    let mut topics: Vec<String> = match listed {
        Ok(listed) => {
            let matcher = TopicFilter::new(pattern);
            listed
                .into_iter()
                .filter(|t| !t.starts_with("__") && matcher.is_match(t))
                .collect()
        }
        Err(e) => {
            warn!(error = %e, "Failed to list broker topics");
            Vec::new()
        }
    };

    if topics.is_empty() && pattern.contains(DEFAULT_TOPIC_PREFIX) {
        let matcher = TopicFilter::new(pattern);
        topics = default_topics()
            .into_iter()
            .filter(|t| matcher.is_match(t))
            .collect();
    }

    if topics.is_empty() {
        return Err(CdcError::Broker(format!(
            "no topics match pattern '{pattern}'"
        )));
    }

    topics.sort();
    topics.dedup();
    Ok(topics)
}

type Delivery = std::result::Result<BrokerMessage, ReadError>;

/// Channel-backed reader for tests and local development.
pub struct InMemoryReader {
    topics: Vec<String>,
    subscribed: StdMutex<HashSet<String>>,
    receiver: Mutex<mpsc::UnboundedReceiver<Delivery>>,
    closed: AtomicBool,
    messages: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
}

/// Publishing half of an [`InMemoryReader`].
#[derive(Clone)]
pub struct InMemoryPublisher {
    sender: mpsc::UnboundedSender<Delivery>,
    offset: std::sync::Arc<AtomicU64>,
}

impl InMemoryReader {
    /// Create a reader whose broker lists `topics`.
    pub fn new(topics: Vec<String>) -> (Self, InMemoryPublisher) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let reader = Self {
            topics,
            subscribed: StdMutex::new(HashSet::new()),
            receiver: Mutex::new(receiver),
            closed: AtomicBool::new(false),
            messages: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        };
        let publisher = InMemoryPublisher {
            sender,
            offset: std::sync::Arc::new(AtomicU64::new(0)),
        };
        (reader, publisher)
    }

    fn is_subscribed(&self, topic: &str) -> bool {
        self.subscribed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(topic)
    }
}

impl InMemoryPublisher {
    /// Publish a payload on partition 0 of `topic`.
    pub fn publish(&self, topic: impl Into<String>, payload: Vec<u8>) -> bool {
        let offset = self.offset.fetch_add(1, Ordering::Relaxed) as i64;
        self.sender
            .send(Ok(BrokerMessage {
                topic: topic.into(),
                partition: 0,
                offset,
                key: None,
                payload,
            }))
            .is_ok()
    }

    /// Deliver a read error to the consumer.
    pub fn fail(&self, error: ReadError) -> bool {
        self.sender.send(Err(error)).is_ok()
    }
}

#[async_trait]
impl MessageReader for InMemoryReader {
    async fn list_topics(&self) -> Result<Vec<String>> {
        Ok(self.topics.clone())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<()> {
        let mut subscribed = self.subscribed.lock().unwrap_or_else(PoisonError::into_inner);
        subscribed.clear();
        subscribed.extend(topics.iter().cloned());
        Ok(())
    }

    async fn read(&self) -> Delivery {
        let mut receiver = self.receiver.lock().await;
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(ReadError::Closed);
            }
            match receiver.recv().await {
                None => return Err(ReadError::Closed),
                Some(Ok(message)) if !self.is_subscribed(&message.topic) => continue,
                Some(Ok(message)) => {
                    self.messages.fetch_add(1, Ordering::Relaxed);
                    self.bytes
                        .fetch_add(message.payload.len() as u64, Ordering::Relaxed);
                    return Ok(message);
                }
                Some(Err(e)) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    return Err(e);
                }
            }
        }
    }

    fn stats(&self) -> ReaderStats {
        let mut topics: Vec<_> = self
            .subscribed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        topics.sort();
        ReaderStats {
            topics,
            messages: self.messages.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_filter() {
        let matcher = TopicFilter::new("trenova.public.*");
        assert!(matcher.is_match("trenova.public.shipments"));
        assert!(!matcher.is_match("other.public.shipments"));

        let all = TopicFilter::new("trenova.(");
        assert!(all.is_match("anything"));
    }

    #[test]
    fn test_resolve_filters_listing() {
        let listed = Ok(vec![
            "trenova.public.shipments".to_string(),
            "trenova.public.stops".to_string(),
            "__consumer_offsets".to_string(),
            "audit.events".to_string(),
        ]);
        let topics = resolve_topics("trenova.public.*", listed).unwrap();
        assert_eq!(topics, vec!["trenova.public.shipments", "trenova.public.stops"]);
    }

    #[test]
    fn test_resolve_falls_back_to_defaults() {
        let topics =
            resolve_topics("trenova.public.*", Err(CdcError::Broker("down".into()))).unwrap();
        assert_eq!(topics.len(), DEFAULT_TABLES.len());
        assert!(topics.contains(&"trenova.public.shipments".to_string()));

        let topics = resolve_topics("trenova.public.ship*", Ok(vec![])).unwrap();
        assert_eq!(topics, vec!["trenova.public.shipment_moves", "trenova.public.shipments"]);

        assert!(resolve_topics("billing.*", Ok(vec![])).is_err());
    }

    #[test]
    fn test_read_error_classification() {
        assert!(ReadError::Broker("Broker: Rebalance In Progress".into()).is_rebalance());
        assert!(ReadError::Broker("error [27]".into()).is_benign());
        assert!(ReadError::Timeout.is_benign());
        assert!(!ReadError::Broker("connection refused".into()).is_benign());
        assert!(!ReadError::Closed.is_benign());
    }

    #[tokio::test]
    async fn test_in_memory_reader_filters_subscription() {
        let (reader, publisher) = InMemoryReader::new(vec!["a".into(), "b".into()]);
        reader.subscribe(&["b".to_string()]).await.unwrap();

        publisher.publish("a", vec![1]);
        publisher.publish("b", vec![2, 3]);
        publisher.fail(ReadError::Timeout);

        let message = reader.read().await.unwrap();
        assert_eq!(message.topic, "b");
        assert_eq!(message.offset, 1);
        assert_eq!(reader.read().await.unwrap_err(), ReadError::Timeout);

        let stats = reader.stats();
        assert_eq!(stats.messages, 1);
        assert_eq!(stats.bytes, 2);
        assert_eq!(stats.errors, 1);

        reader.close().await.unwrap();
        assert_eq!(reader.read().await.unwrap_err(), ReadError::Closed);
    }
}
