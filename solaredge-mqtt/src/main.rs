//! SolarEdge inverter to MQTT gateway.
//!
//! Polls a SolarEdge inverter over Modbus TCP on aligned intervals and
//! publishes each scaled reading to an MQTT broker. Any unit stopping, or
//! an interrupt, ends the process with exit status 1.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use solaredge_bridge_framework::{
    BridgeArgs, BridgeConfig, BridgeStatus, MqttTransport, Publisher, StatusPublisher,
    Supervisor, Termination, Transport, handoff_queue,
};
use solaredge_mqtt::BRIDGE_NAME;
use solaredge_mqtt::config::{CliOverrides, GatewayConfig};
use solaredge_mqtt::delivery::DeliveryWorker;
use solaredge_mqtt::inverter::SunSpecInverter;
use solaredge_mqtt::scheduler::PollScheduler;
use tracing::{info, warn};

/// Publish SolarEdge inverter readings to MQTT.
#[derive(Parser, Debug)]
#[command(name = "solaredge-mqtt")]
#[command(about = "Polls a SolarEdge inverter over Modbus TCP and publishes readings to MQTT")]
#[command(version)]
struct Args {
    #[command(flatten)]
    bridge: BridgeArgs,

    #[command(flatten)]
    overrides: CliOverrides,
}

#[tokio::main]
async fn main() -> Result<()> {
    let termination = run(Args::parse()).await?;
    std::process::exit(termination.exit_code());
}

async fn run(args: Args) -> Result<Termination> {
    let mut config = GatewayConfig::load_or_default(args.bridge.config.as_deref())
        .with_context(|| format!("Failed to load config from {:?}", args.bridge.config))?;
    config.apply_overrides(&args.overrides);
    if let Some(level) = args.bridge.log_level_override() {
        config.logging.level = level;
    }

    solaredge_common::init_tracing(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    config.validate().context("Invalid configuration")?;
    let template = config.topic_template()?;
    let host = config.solaredge_host()?.to_string();

    info!("Starting {} {}", BRIDGE_NAME, env!("CARGO_PKG_VERSION"));

    let (producer, consumer) = handoff_queue(config.buffer_size)?;

    // Connect to MQTT
    let last_will = config
        .mqtt
        .status_topic
        .as_deref()
        .map(|topic| BridgeStatus::offline(BRIDGE_NAME, env!("CARGO_PKG_VERSION")).last_will(topic))
        .transpose()?;
    let transport = Arc::new(MqttTransport::connect(&config.mqtt, last_will)?);
    let publisher = Publisher::new(transport.clone(), config.serialization);
    info!(
        "Publishing to {}:{} as '{}'",
        config.mqtt.host.as_deref().unwrap_or_default(),
        config.mqtt.port,
        config.mqtt.client_id
    );

    let status = config.mqtt.status_topic.as_deref().map(|topic| {
        StatusPublisher::new(
            publisher.clone(),
            topic,
            BRIDGE_NAME,
            env!("CARGO_PKG_VERSION"),
        )
    });
    if let Some(status) = &status {
        let metadata = serde_json::json!({
            "inverter": format!("{}:{}", host, config.solaredge.port),
            "read_every": config.schedule.read_every,
            "topic": template.as_str(),
        });
        if let Err(e) = status.publish_running(Some(metadata)).await {
            warn!("Failed to publish status: {}", e);
        }
    }

    let inverter = SunSpecInverter::new(host, &config.solaredge);
    info!("Reading inverter at {}", inverter.address());
    let scheduler = PollScheduler::new(inverter, &config.schedule, producer);
    let worker = DeliveryWorker::new(
        consumer,
        publisher,
        template,
        config.mqtt.topic_fields.clone(),
    );

    let mut supervisor = Supervisor::new(BRIDGE_NAME);
    let acquisition_shutdown = supervisor.shutdown_signal();
    supervisor.spawn_unit("solaredge", scheduler.run(acquisition_shutdown));
    let delivery_shutdown = supervisor.shutdown_signal();
    supervisor.spawn_unit("mqtt", worker.run(delivery_shutdown));

    let termination = supervisor.run().await;

    if let Some(status) = &status {
        if let Err(e) = status.publish_offline().await {
            warn!("Failed to publish offline status: {}", e);
        }
    }
    if let Err(e) = transport.disconnect().await {
        warn!("MQTT disconnect failed: {}", e);
    }

    Ok(termination)
}
