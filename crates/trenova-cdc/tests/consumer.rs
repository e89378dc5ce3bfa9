// Copyright (C) 2025 Trenova contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Consumer lifecycle and dispatch through an in-memory broker.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use common::{Row, TOPIC, config, consumer, envelope, wait_for};
use trenova_cdc::{CdcError, CdcEventHandler, ChangeEvent, ReadError, ShipmentsHandler};
use trenova_core::ports::memory::RecordingStreamingService;

#[tokio::test]
async fn test_create_event_is_broadcast_to_tenant_stream() {
    let (consumer, publisher) = consumer(config(2));
    let streaming = Arc::new(RecordingStreamingService::new());
    consumer.register_handler(Arc::new(ShipmentsHandler::new(streaming.clone())));
    consumer.start().await.unwrap();
    assert!(consumer.is_running());

    publisher.publish(TOPIC, envelope("c", "shipments", None, Some(&Row::new("shp_1", "P001"))));
    let metrics = wait_for(&consumer, |m| m.messages_processed == 1).await;
    assert_eq!(metrics.messages_processed, 1);

    let sent = streaming.broadcasts().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].stream, "shipments");
    assert_eq!(sent[0].org_id, "org_a");
    assert_eq!(sent[0].bu_id, "bu_a");
    assert_eq!(sent[0].data["operation"], "create");
    assert_eq!(sent[0].data["shipment"]["id"], "shp_1");
    assert_eq!(sent[0].data["shipment"]["proNumber"], "P001");
    assert_eq!(sent[0].data["metadata"]["snapshot"], false);
    assert_eq!(sent[0].data["metadata"]["transaction_id"], "771:4242");
    assert_eq!(sent[0].data["timestamp"], 1_700_000_000_000_i64);

    consumer.stop().await.unwrap();
    assert!(!consumer.is_running());
}

#[tokio::test]
async fn test_snapshot_read_is_not_broadcast() {
    let (consumer, publisher) = consumer(config(1));
    let streaming = Arc::new(RecordingStreamingService::new());
    consumer.register_handler(Arc::new(ShipmentsHandler::new(streaming.clone())));
    consumer.start().await.unwrap();

    publisher.publish(TOPIC, envelope("r", "shipments", None, Some(&Row::new("shp_1", "P001"))));
    let metrics = wait_for(&consumer, |m| m.messages_processed == 1).await;
    assert_eq!(metrics.messages_processed, 1);
    assert!(streaming.broadcasts().await.is_empty());

    consumer.stop().await.unwrap();
}

#[tokio::test]
async fn test_update_and_delete_in_order_with_single_worker() {
    let (consumer, publisher) = consumer(config(1));
    let streaming = Arc::new(RecordingStreamingService::new());
    consumer.register_handler(Arc::new(ShipmentsHandler::new(streaming.clone())));
    consumer.start().await.unwrap();

    let before = Row::new("shp_1", "P001");
    let after = Row {
        status: "Assigned",
        ..Row::new("shp_1", "P001")
    };
    publisher.publish(TOPIC, envelope("u", "shipments", Some(&before), Some(&after)));
    publisher.publish(TOPIC, envelope("d", "shipments", Some(&after), None));
    wait_for(&consumer, |m| m.messages_processed == 2).await;

    let sent = streaming.broadcasts().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].data["operation"], "update");
    assert_eq!(sent[0].data["changed_fields"], serde_json::json!(["status"]));
    assert_eq!(sent[1].data["operation"], "delete");
    assert_eq!(sent[1].data["shipment_id"], "shp_1");

    consumer.stop().await.unwrap();
}

#[tokio::test]
async fn test_bad_messages_are_recorded_and_skipped() {
    let (consumer, publisher) = consumer(config(0));
    let streaming = Arc::new(RecordingStreamingService::new());
    consumer.register_handler(Arc::new(ShipmentsHandler::new(streaming.clone())));
    consumer.start().await.unwrap();

    publisher.publish(TOPIC, vec![0, 0, 1]);
    publisher.publish(TOPIC, vec![0, 0, 0, 0, 99, 1, 2]);
    publisher.publish(TOPIC, envelope("c", "workers", None, Some(&Row::new("wrk_1", "-"))));
    publisher.publish(TOPIC, envelope("u", "shipments", None, Some(&Row::new("shp_1", "P001"))));

    let metrics = wait_for(&consumer, |m| m.messages_received == 4 && m.invalid_structures == 1).await;
    assert_eq!(metrics.messages_dropped, 1);
    assert_eq!(metrics.decode_errors, 1);
    assert_eq!(metrics.messages_skipped, 1);
    assert_eq!(metrics.invalid_structures, 1);
    assert_eq!(metrics.messages_processed, 0);
    assert!(metrics.schema_cache.misses >= 2);
    assert!(streaming.broadcasts().await.is_empty());

    consumer.stop().await.unwrap();
}

struct Flaky {
    failures: u32,
    panic: bool,
    calls: AtomicU32,
}

#[async_trait]
impl CdcEventHandler for Flaky {
    fn table_name(&self) -> &str {
        "shipments"
    }

    async fn handle_event(&self, _event: &ChangeEvent) -> trenova_cdc::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            if self.panic {
                panic!("handler blew up");
            }
            return Err(CdcError::handler("shipments", "temporarily unavailable"));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_handler_failures_are_retried() {
    let (consumer, publisher) = consumer(config(1));
    let handler = Arc::new(Flaky {
        failures: 2,
        panic: false,
        calls: AtomicU32::new(0),
    });
    consumer.register_handler(handler.clone());
    consumer.start().await.unwrap();

    publisher.publish(TOPIC, envelope("c", "shipments", None, Some(&Row::new("shp_1", "P001"))));
    let metrics = wait_for(&consumer, |m| m.messages_processed == 1).await;
    assert_eq!(metrics.messages_processed, 1);
    assert_eq!(metrics.retries, 2);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);

    consumer.stop().await.unwrap();
}

#[tokio::test]
async fn test_panicking_handler_is_recovered() {
    let (consumer, publisher) = consumer(config(1));
    let handler = Arc::new(Flaky {
        failures: u32::MAX,
        panic: true,
        calls: AtomicU32::new(0),
    });
    consumer.register_handler(handler.clone());
    consumer.start().await.unwrap();

    publisher.publish(TOPIC, envelope("c", "shipments", None, Some(&Row::new("shp_1", "P001"))));
    let metrics = wait_for(&consumer, |m| m.handler_failures == 1).await;
    assert_eq!(metrics.handler_failures, 1);
    assert_eq!(metrics.handler_panics, 3);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);

    // The worker survived and keeps consuming.
    publisher.publish(TOPIC, envelope("c", "shipments", None, Some(&Row::new("shp_2", "P002"))));
    let metrics = wait_for(&consumer, |m| m.handler_failures == 2).await;
    assert_eq!(metrics.messages_received, 2);

    consumer.stop().await.unwrap();
}

#[tokio::test]
async fn test_read_errors_do_not_stop_ingest() {
    let (consumer, publisher) = consumer(config(1));
    let streaming = Arc::new(RecordingStreamingService::new());
    consumer.register_handler(Arc::new(ShipmentsHandler::new(streaming.clone())));
    consumer.start().await.unwrap();

    publisher.fail(ReadError::Timeout);
    publisher.publish(TOPIC, envelope("c", "shipments", None, Some(&Row::new("shp_1", "P001"))));
    let metrics = wait_for(&consumer, |m| m.messages_processed == 1).await;
    assert_eq!(metrics.messages_processed, 1);
    assert_eq!(metrics.reader.errors, 1);

    consumer.stop().await.unwrap();
}

#[tokio::test]
async fn test_lifecycle() {
    let (consumer, _publisher) = consumer(config(2));
    consumer.stop().await.unwrap();

    consumer.start().await.unwrap();
    assert!(matches!(consumer.start().await, Err(CdcError::AlreadyRunning)));

    let metrics = consumer.metrics();
    assert!(metrics.running);
    assert_eq!(metrics.reader.topics, vec![TOPIC.to_string()]);

    consumer.stop().await.unwrap();
    consumer.stop().await.unwrap();
    assert!(!consumer.metrics().running);
}

#[tokio::test]
async fn test_closed_reader_clears_running() {
    let (consumer, publisher) = consumer(config(2));
    consumer.start().await.unwrap();
    assert!(consumer.is_running());

    drop(publisher);
    let metrics = wait_for(&consumer, |m| !m.running).await;
    assert!(!metrics.running);
    assert!(!consumer.is_running());

    consumer.stop().await.unwrap();
    assert!(!consumer.is_running());
}

#[tokio::test]
async fn test_disabled_consumer_does_not_start() {
    let (consumer, _publisher) = consumer(trenova_cdc::CdcConfig {
        enabled: false,
        ..config(1)
    });
    consumer.start().await.unwrap();
    assert!(!consumer.is_running());
}
