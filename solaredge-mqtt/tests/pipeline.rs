//! End-to-end tests of the acquisition/delivery pipeline with a simulated
//! inverter and broker.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use solaredge_bridge_framework::{
    FieldValue, Format, Publisher, Reading, Result, Supervisor, Termination, TopicFields,
    TopicTemplate, Transport, UnitOutcome, handoff_queue,
};
use solaredge_mqtt::config::ScheduleConfig;
use solaredge_mqtt::delivery::DeliveryWorker;
use solaredge_mqtt::inverter::{DeviceClient, DeviceError};
use solaredge_mqtt::scheduler::{Clock, PollScheduler};
use tokio::time::Instant;

/// Wall clock pinned to tokio's (paused) time.
struct PausedClock {
    base: f64,
    origin: Instant,
}

impl PausedClock {
    fn starting_at(base: f64) -> Self {
        Self {
            base,
            origin: Instant::now(),
        }
    }
}

impl Clock for PausedClock {
    fn now(&self) -> f64 {
        self.base + self.origin.elapsed().as_secs_f64()
    }
}

/// Simulated inverter. Each read takes 50 ms; scripted failures are
/// returned first.
#[derive(Clone, Default)]
struct SimulatedInverter {
    failures: Arc<Mutex<VecDeque<DeviceError>>>,
    reads: Arc<Mutex<u32>>,
    panic_on_read: bool,
}

#[async_trait]
impl DeviceClient for SimulatedInverter {
    async fn read_all(&mut self) -> std::result::Result<Reading, DeviceError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        *self.reads.lock().unwrap() += 1;
        if self.panic_on_read {
            panic!("inverter driver crashed");
        }
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let mut reading = Reading::new();
        reading.insert("c_serialnumber".into(), FieldValue::from("7E1234AB"));
        reading.insert("c_deviceaddress".into(), FieldValue::Integer(1));
        reading.insert("power_ac".into(), FieldValue::Integer(2305));
        reading.insert("power_ac_scale".into(), FieldValue::Integer(-1));
        reading.insert("status".into(), FieldValue::Integer(4));
        Ok(reading)
    }
}

#[derive(Default)]
struct RecordingBroker {
    messages: Mutex<Vec<(String, serde_json::Value)>>,
}

impl RecordingBroker {
    fn timestamps(&self) -> Vec<i64> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|(_, v)| v["solaredge_mqtt_timestamp"].as_i64().unwrap())
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let value = serde_json::from_slice(&payload).unwrap();
        self.messages.lock().unwrap().push((topic.to_string(), value));
        Ok(())
    }
}

/// Wire both units into a supervisor the way the binary does.
fn gateway(
    inverter: SimulatedInverter,
    broker: Arc<RecordingBroker>,
    schedule: ScheduleConfig,
    start: f64,
) -> Supervisor {
    let (producer, consumer) = handoff_queue(100).unwrap();
    let scheduler =
        PollScheduler::with_clock(inverter, PausedClock::starting_at(start), &schedule, producer);
    let worker = DeliveryWorker::new(
        consumer,
        Publisher::new(broker, Format::Json),
        TopicTemplate::parse("solaredge-mqtt/tele/%(serial)s/SENSOR").unwrap(),
        TopicFields::default(),
    );

    let mut supervisor = Supervisor::new("solaredge-mqtt");
    let shutdown = supervisor.shutdown_signal();
    supervisor.spawn_unit("solaredge", scheduler.run(shutdown));
    let shutdown = supervisor.shutdown_signal();
    supervisor.spawn_unit("mqtt", worker.run(shutdown));
    supervisor
}

async fn interrupt_after(duration: Duration) -> &'static str {
    tokio::time::sleep(duration).await;
    "SIGTERM"
}

#[tokio::test(start_paused = true)]
async fn test_readings_published_on_aligned_boundaries() {
    let broker = Arc::new(RecordingBroker::default());
    let schedule = ScheduleConfig {
        read_every: 5.0,
        time_offset: 0.0,
    };

    let supervisor = gateway(
        SimulatedInverter::default(),
        broker.clone(),
        schedule,
        1_000.25,
    );
    let termination = supervisor
        .run_until(interrupt_after(Duration::from_millis(15_500)))
        .await;

    assert_eq!(termination, Termination::Interrupted("SIGTERM"));
    assert_eq!(termination.exit_code(), 1);
    assert_eq!(broker.timestamps(), vec![1_005_000, 1_010_000, 1_015_000]);

    let messages = broker.messages.lock().unwrap();
    let (topic, payload) = &messages[0];
    assert_eq!(topic, "solaredge-mqtt/tele/7E1234AB/SENSOR");
    assert_eq!(payload["power_ac"], 230.5);
    assert_eq!(payload["status"], 4);
    assert!(payload.get("power_ac_scale").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_time_offset_shifts_timestamps() {
    let broker = Arc::new(RecordingBroker::default());
    let schedule = ScheduleConfig {
        read_every: 5.0,
        time_offset: 2.0,
    };

    let supervisor = gateway(
        SimulatedInverter::default(),
        broker.clone(),
        schedule,
        1_000.25,
    );
    supervisor
        .run_until(interrupt_after(Duration::from_millis(5_500)))
        .await;

    assert_eq!(broker.timestamps(), vec![1_003_000]);
}

#[tokio::test(start_paused = true)]
async fn test_read_error_backs_off_and_recovers() {
    let broker = Arc::new(RecordingBroker::default());
    let inverter = SimulatedInverter::default();
    inverter
        .failures
        .lock()
        .unwrap()
        .push_back(DeviceError::Connection("connection refused".to_string()));

    let supervisor = gateway(
        inverter.clone(),
        broker.clone(),
        ScheduleConfig::default(),
        1_000.25,
    );
    supervisor
        .run_until(interrupt_after(Duration::from_millis(15_500)))
        .await;

    // 1005 fails, the 5 s backoff covers 1010, reads resume at 1015
    assert_eq!(broker.timestamps(), vec![1_015_000]);
    assert_eq!(*inverter.reads.lock().unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_acquisition_crash_stops_gateway() {
    let broker = Arc::new(RecordingBroker::default());
    let inverter = SimulatedInverter {
        panic_on_read: true,
        ..Default::default()
    };

    let started = Instant::now();
    let supervisor = gateway(inverter, broker.clone(), ScheduleConfig::default(), 1_000.25);
    let termination = supervisor.run_until(std::future::pending()).await;

    assert_eq!(
        termination,
        Termination::UnitExited {
            unit: "solaredge".to_string(),
            outcome: UnitOutcome::Panicked,
        }
    );
    assert_eq!(termination.exit_code(), 1);
    assert!(started.elapsed() < Duration::from_secs(7));
    assert!(broker.messages.lock().unwrap().is_empty());
}
