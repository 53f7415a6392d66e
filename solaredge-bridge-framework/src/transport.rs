//! Publish/subscribe transport abstraction and its MQTT implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, Outgoing, Packet, QoS};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use solaredge_common::{Format, MqttConfig, TelemetryRecord, encode, mqtt_options, qos_from_level};

use crate::error::{BridgeError, Result};

/// Capacity of the MQTT client's request channel.
const REQUEST_CAPACITY: usize = 64;

/// Pause between reconnection attempts of the MQTT event loop.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// How long a disconnect waits for the event loop to flush.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// A publish/subscribe transport.
///
/// Implementations own their reconnect behaviour; callers treat every
/// publish as fire-and-forget and only log failures.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a payload to a topic.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Publish a payload the broker keeps for late subscribers.
    async fn publish_retained(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.publish(topic, payload).await
    }

    /// Close the connection.
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

/// MQTT transport backed by `rumqttc`.
///
/// A background task drives the client's event loop. Connection errors are
/// logged and the loop keeps polling, which makes the client reconnect.
pub struct MqttTransport {
    client: AsyncClient,
    qos: QoS,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    /// Create the client and start its event loop.
    ///
    /// The connection itself is established in the background.
    pub fn connect(config: &MqttConfig, last_will: Option<LastWill>) -> Result<Self> {
        let mut options = mqtt_options(config)?;
        if let Some(will) = last_will {
            options.set_last_will(will);
        }
        let qos = qos_from_level(config.qos)?;

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let handle = tokio::spawn(drive_event_loop(event_loop));

        Ok(Self {
            client,
            qos,
            event_loop: Mutex::new(Some(handle)),
        })
    }

    fn send(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()> {
        // try_publish never waits: a full request channel during an outage
        // surfaces as an error instead of stalling the caller.
        self.client
            .try_publish(topic, self.qos, retain, payload)
            .map_err(|e| BridgeError::publish(topic, e))
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.send(topic, payload, false)
    }

    async fn publish_retained(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.send(topic, payload, true)
    }

    async fn disconnect(&self) -> Result<()> {
        let handle = self.event_loop.lock().await.take();

        if let Err(e) = self.client.try_disconnect() {
            tracing::debug!(error = %e, "MQTT disconnect request not queued");
        }

        if let Some(mut handle) = handle {
            if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut handle)
                .await
                .is_err()
            {
                tracing::warn!("MQTT event loop did not stop in time, aborting");
                handle.abort();
            }
        }

        Ok(())
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop.get_mut().take() {
            handle.abort();
        }
    }
}

async fn drive_event_loop(mut event_loop: EventLoop) {
    let mut connected = false;

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                tracing::info!(code = ?ack.code, "Connected to MQTT broker");
                connected = true;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::info!("Disconnected from MQTT broker");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                if connected {
                    tracing::warn!(error = %e, "MQTT connection lost, reconnecting");
                } else {
                    tracing::warn!(error = %e, "MQTT connection failed, retrying");
                }
                connected = false;
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// Publisher for sending telemetry records through a [`Transport`].
#[derive(Clone)]
pub struct Publisher {
    transport: Arc<dyn Transport>,
    format: Format,
}

impl Publisher {
    /// Create a new publisher.
    pub fn new(transport: Arc<dyn Transport>, format: Format) -> Self {
        Self { transport, format }
    }

    /// Encode and publish a telemetry record.
    pub async fn publish_record(&self, topic: &str, record: &TelemetryRecord) -> Result<()> {
        let payload =
            encode(record, self.format).map_err(|e| BridgeError::Serialization(e.to_string()))?;

        self.transport.publish(topic, payload).await
    }

    /// Publish a retained JSON value (for status messages, etc.).
    pub async fn publish_json<T: serde::Serialize>(&self, topic: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.transport.publish_retained(topic, payload).await
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// Delivery statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    /// Number of successfully published records.
    pub success: u64,
    /// Number of failed publishes.
    pub failed: u64,
    /// Records dropped before publishing (topic could not be rendered).
    pub unroutable: u64,
}

impl PublishStats {
    /// Total number of records handled.
    pub fn total(&self) -> u64 {
        self.success + self.failed + self.unroutable
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            100.0
        } else {
            (self.success as f64 / self.total() as f64) * 100.0
        }
    }
}
