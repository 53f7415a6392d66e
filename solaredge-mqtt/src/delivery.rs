//! Delivery of queued records to MQTT.

use solaredge_bridge_framework::{
    PublishStats, Publisher, QueueConsumer, ShutdownSignal, TelemetryRecord, TopicFields,
    TopicTemplate,
};
use tracing::{debug, info, warn};

/// Drains the handoff queue and publishes each record once.
///
/// Delivery is best effort: a record whose topic cannot be rendered, or
/// whose publish fails, is logged and dropped.
pub struct DeliveryWorker {
    queue: QueueConsumer<TelemetryRecord>,
    publisher: Publisher,
    template: TopicTemplate,
    topic_fields: TopicFields,
    stats: PublishStats,
}

impl DeliveryWorker {
    pub fn new(
        queue: QueueConsumer<TelemetryRecord>,
        publisher: Publisher,
        template: TopicTemplate,
        topic_fields: TopicFields,
    ) -> Self {
        Self {
            queue,
            publisher,
            template,
            topic_fields,
            stats: PublishStats::default(),
        }
    }

    pub fn stats(&self) -> PublishStats {
        self.stats
    }

    /// Publish records in queue order until shutdown or until every
    /// producer is gone.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> anyhow::Result<()> {
        info!(topic = %self.template, "Starting MQTT delivery");

        while let Some(record) = self.queue.pop(&mut shutdown).await {
            self.deliver(&record).await;
        }

        info!(
            published = self.stats.success,
            failed = self.stats.failed,
            unroutable = self.stats.unroutable,
            success_rate = format!("{:.1}%", self.stats.success_rate()),
            pending = self.queue.len(),
            "MQTT delivery stopped"
        );
        Ok(())
    }

    /// Publish one record. Returns whether it was handed to the transport.
    pub async fn deliver(&mut self, record: &TelemetryRecord) -> bool {
        let topic = match self.template.render_record(record, &self.topic_fields) {
            Ok(topic) => topic,
            Err(e) => {
                warn!("Dropping record: {}", e);
                self.stats.unroutable += 1;
                return false;
            }
        };

        match self.publisher.publish_record(&topic, record).await {
            Ok(()) => {
                debug!(topic = %topic, timestamp = ?record.timestamp(), "Published record");
                self.stats.success += 1;
                true
            }
            Err(e) => {
                warn!("Failed to publish to '{}': {}", topic, e);
                self.stats.failed += 1;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use solaredge_bridge_framework::{
        BridgeError, FieldValue, Format, QueueProducer, Reading, Result, Transport,
        handoff_queue, shutdown_channel,
    };
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeTransport {
        sent: Mutex<Vec<(String, serde_json::Value)>>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
            if self.fail {
                return Err(BridgeError::publish(topic, "not connected"));
            }
            let value = serde_json::from_slice(&payload).unwrap();
            self.sent.lock().unwrap().push((topic.to_string(), value));
            Ok(())
        }
    }

    fn record(serial: Option<&str>, timestamp_ms: i64) -> TelemetryRecord {
        let mut reading = Reading::new();
        if let Some(serial) = serial {
            reading.insert("c_serialnumber".to_string(), FieldValue::from(serial));
        }
        reading.insert("c_deviceaddress".to_string(), FieldValue::Integer(1));
        reading.insert("power_ac".to_string(), FieldValue::Float(230.5));
        TelemetryRecord::new(reading, timestamp_ms)
    }

    fn worker(
        transport: Arc<FakeTransport>,
        template: &str,
    ) -> (DeliveryWorker, QueueProducer<TelemetryRecord>) {
        let (producer, consumer) = handoff_queue(16).unwrap();
        let publisher = Publisher::new(transport, Format::Json);
        let worker = DeliveryWorker::new(
            consumer,
            publisher,
            TopicTemplate::parse(template).unwrap(),
            TopicFields::default(),
        );
        (worker, producer)
    }

    #[tokio::test]
    async fn test_deliver_renders_topic() {
        let transport = Arc::new(FakeTransport::default());
        let (mut worker, _producer) = worker(transport.clone(), "tele/%(serial)s/%(channel)s");

        assert!(worker.deliver(&record(Some("SN1"), 5_000)).await);

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0].0, "tele/SN1/1");
        assert_eq!(sent[0].1["power_ac"], 230.5);
        assert_eq!(sent[0].1["solaredge_mqtt_timestamp"], 5_000);
    }

    #[tokio::test]
    async fn test_missing_serial_drops_record() {
        let transport = Arc::new(FakeTransport::default());
        let (mut worker, _producer) = worker(transport.clone(), "tele/%(serial)s/SENSOR");

        assert!(!worker.deliver(&record(None, 5_000)).await);
        assert!(worker.deliver(&record(Some("SN1"), 10_000)).await);

        assert_eq!(transport.sent.lock().unwrap().len(), 1);
        assert_eq!(worker.stats().unroutable, 1);
        assert_eq!(worker.stats().success, 1);
    }

    #[tokio::test]
    async fn test_publish_failure_is_not_fatal() {
        let transport = Arc::new(FakeTransport {
            fail: true,
            ..Default::default()
        });
        let (mut worker, _producer) = worker(transport, "tele/%(serial)s/SENSOR");

        assert!(!worker.deliver(&record(Some("SN1"), 5_000)).await);
        assert!(!worker.deliver(&record(Some("SN1"), 10_000)).await);
        assert_eq!(worker.stats().failed, 2);
    }

    #[tokio::test]
    async fn test_run_preserves_order_and_stops_on_shutdown() {
        let transport = Arc::new(FakeTransport::default());
        let (worker, producer) = worker(transport.clone(), "tele/%(serial)s/SENSOR");
        let (trigger, shutdown) = shutdown_channel();

        for ts in [5_000, 10_000, 15_000] {
            producer.push(record(Some("SN1"), ts));
        }

        let handle = tokio::spawn(worker.run(shutdown));
        while transport.sent.lock().unwrap().len() < 3 {
            tokio::task::yield_now().await;
        }
        trigger.trigger();
        handle.await.unwrap().unwrap();

        let timestamps: Vec<_> = transport
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, v)| v["solaredge_mqtt_timestamp"].as_i64().unwrap())
            .collect();
        assert_eq!(timestamps, vec![5_000, 10_000, 15_000]);
    }

    #[tokio::test]
    async fn test_run_ends_when_producer_dropped() {
        let transport = Arc::new(FakeTransport::default());
        let (worker, producer) = worker(transport.clone(), "tele/%(serial)s/SENSOR");
        let (_trigger, shutdown) = shutdown_channel();

        producer.push(record(Some("SN1"), 5_000));
        drop(producer);

        worker.run(shutdown).await.unwrap();
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }
}
