//! SolarEdge Bridge Framework
//!
//! Plumbing for bridges that poll a device and publish telemetry over MQTT.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`Supervisor`] for running concurrent units and failing fast when one dies
//! - [`handoff_queue`] for the bounded, drop-on-full buffer between units
//! - [`Transport`] / [`MqttTransport`] and [`Publisher`] for delivering records
//! - [`BridgeArgs`] for common CLI argument parsing
//! - [`BridgeStatus`] for standardized status reporting
//!
//! # Example
//!
//! ```ignore
//! use solaredge_bridge_framework::{handoff_queue, Supervisor};
//!
//! let (producer, consumer) = handoff_queue(config.buffer_size)?;
//!
//! let mut supervisor = Supervisor::new("mybridge");
//! supervisor.spawn_unit("acquisition", poll(producer, supervisor.shutdown_signal()));
//! supervisor.spawn_unit("delivery", deliver(consumer, supervisor.shutdown_signal()));
//!
//! let termination = supervisor.run().await;
//! std::process::exit(termination.exit_code());
//! ```

mod args;
mod config;
mod error;
mod queue;
mod runner;
mod shutdown;
mod status;
mod transport;

pub use args::BridgeArgs;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use queue::{MAX_QUEUE_CAPACITY, PushOutcome, QueueConsumer, QueueProducer, handoff_queue};
pub use runner::{LIVENESS_INTERVAL, Supervisor, Termination, UnitOutcome};
pub use shutdown::{ShutdownSignal, ShutdownTrigger, shutdown_channel};
pub use status::{BridgeStatus, StatusPublisher};
pub use transport::{MqttTransport, PublishStats, Publisher, Transport};

// Re-export commonly used types from solaredge-common
pub use solaredge_common::{
    FieldValue, Format, LoggingConfig, MqttConfig, Reading, TelemetryRecord, TopicFields,
    TopicTemplate,
};
