//! SolarEdge inverter to MQTT gateway.
//!
//! Reads a SolarEdge inverter over Modbus TCP (SunSpec register map) on a
//! fixed, wall-clock aligned schedule and publishes every reading as one
//! MQTT message.
//!
//! Two units run side by side, joined by a bounded queue:
//! - [`scheduler::PollScheduler`] reads the inverter and queues records
//! - [`delivery::DeliveryWorker`] publishes queued records

pub mod config;
pub mod delivery;
pub mod inverter;
pub mod scale;
pub mod scheduler;

/// Name used for logging and status messages.
pub const BRIDGE_NAME: &str = "solaredge-mqtt";
