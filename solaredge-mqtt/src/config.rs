//! Configuration for the SolarEdge gateway.

use clap::Args;
use serde::{Deserialize, Serialize};
use solaredge_bridge_framework::{BridgeConfig, BridgeError, MAX_QUEUE_CAPACITY, Result};
use solaredge_common::{Format, LoggingConfig, MqttConfig, TopicTemplate};

/// Complete gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Inverter connection settings
    #[serde(default)]
    pub solaredge: SolarEdgeConfig,

    /// Read schedule
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// MQTT connection settings
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// How many readings to buffer while MQTT is unavailable.
    /// The buffer is not persistent across restarts.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Payload serialization format
    #[serde(default)]
    pub serialization: Format,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_buffer_size() -> usize {
    100_000
}

/// Inverter (Modbus TCP) connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolarEdgeConfig {
    /// Inverter host. Required, but may be supplied on the command line.
    #[serde(default)]
    pub host: Option<String>,

    /// Modbus TCP port (default: 1502)
    #[serde(default = "default_solaredge_port")]
    pub port: u16,

    /// Modbus unit ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Connect/read timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_solaredge_port() -> u16 {
    1502
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_secs() -> u64 {
    5
}

impl Default for SolarEdgeConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_solaredge_port(),
            unit_id: default_unit_id(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// When to read the inverter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Read every N seconds, aligned to multiples of N.
    #[serde(default = "default_read_every")]
    pub read_every: f64,

    /// Seconds subtracted from the aligned read time to form the record
    /// timestamp. Positive values shift timestamps into the past.
    #[serde(default)]
    pub time_offset: f64,
}

fn default_read_every() -> f64 {
    5.0
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            read_every: default_read_every(),
            time_offset: 0.0,
        }
    }
}

/// Command line overrides for individual settings.
#[derive(Args, Debug, Clone, Default)]
pub struct CliOverrides {
    /// Solaredge host to connect to
    #[arg(long)]
    pub solaredge_host: Option<String>,

    /// Solaredge port to connect to (default: 1502)
    #[arg(long)]
    pub solaredge_port: Option<u16>,

    /// Read information from the inverter every N seconds. The timestamp
    /// sent to MQTT is aligned to a multiple of this number.
    #[arg(long)]
    pub read_every: Option<f64>,

    /// Shift the timestamps sent to MQTT into the past by this many
    /// seconds, to line up with devices that stamp their own readings.
    #[arg(long, allow_hyphen_values = true)]
    pub time_offset: Option<f64>,

    /// MQTT server to connect to
    #[arg(long)]
    pub mqtt_host: Option<String>,

    /// MQTT port to connect to (default: 1883)
    #[arg(long)]
    pub mqtt_port: Option<u16>,

    /// MQTT client ID. Needs to be unique between all clients connecting
    /// to the same broker.
    #[arg(long)]
    pub mqtt_client_id: Option<String>,

    /// MQTT topic to publish to. May reference `%(serial)s` and
    /// `%(channel)s` (default: solaredge-mqtt/tele/%(serial)s/SENSOR)
    #[arg(long)]
    pub mqtt_topic: Option<String>,

    /// How many measurements to buffer if the MQTT server is unavailable
    #[arg(long)]
    pub buffer_size: Option<usize>,
}

impl GatewayConfig {
    /// Apply command line overrides on top of file values.
    pub fn apply_overrides(&mut self, overrides: &CliOverrides) {
        if let Some(host) = &overrides.solaredge_host {
            self.solaredge.host = Some(host.clone());
        }
        if let Some(port) = overrides.solaredge_port {
            self.solaredge.port = port;
        }
        if let Some(read_every) = overrides.read_every {
            self.schedule.read_every = read_every;
        }
        if let Some(time_offset) = overrides.time_offset {
            self.schedule.time_offset = time_offset;
        }
        if let Some(host) = &overrides.mqtt_host {
            self.mqtt.host = Some(host.clone());
        }
        if let Some(port) = overrides.mqtt_port {
            self.mqtt.port = port;
        }
        if let Some(client_id) = &overrides.mqtt_client_id {
            self.mqtt.client_id = client_id.clone();
        }
        if let Some(topic) = &overrides.mqtt_topic {
            self.mqtt.topic = topic.clone();
        }
        if let Some(buffer_size) = overrides.buffer_size {
            self.buffer_size = buffer_size;
        }
    }

    /// Inverter host, once validated.
    pub fn solaredge_host(&self) -> Result<&str> {
        self.solaredge
            .host
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| BridgeError::validation("No solaredge host given"))
    }

    /// Parse the configured topic template.
    pub fn topic_template(&self) -> Result<TopicTemplate> {
        TopicTemplate::parse(&self.mqtt.topic).map_err(|e| BridgeError::validation(e.to_string()))
    }
}

impl BridgeConfig for GatewayConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> Result<()> {
        self.solaredge_host()?;

        if self.mqtt.host.as_deref().is_none_or(str::is_empty) {
            return Err(BridgeError::validation("No MQTT host given"));
        }

        if self.solaredge.unit_id == 0 || self.solaredge.unit_id > 247 {
            return Err(BridgeError::validation(format!(
                "unit_id must be 1-247, got {}",
                self.solaredge.unit_id
            )));
        }

        if self.solaredge.timeout_secs == 0 {
            return Err(BridgeError::validation("timeout_secs must be at least 1"));
        }

        let read_every = self.schedule.read_every;
        if !read_every.is_finite() || read_every <= 0.0 {
            return Err(BridgeError::validation(format!(
                "read_every must be a positive number of seconds, got {}",
                read_every
            )));
        }

        if !self.schedule.time_offset.is_finite() {
            return Err(BridgeError::validation(format!(
                "time_offset must be a finite number of seconds, got {}",
                self.schedule.time_offset
            )));
        }

        if self.buffer_size == 0 {
            return Err(BridgeError::validation("buffer_size must be at least 1"));
        }
        if self.buffer_size > MAX_QUEUE_CAPACITY {
            return Err(BridgeError::validation(format!(
                "buffer_size must be at most {}, got {}",
                MAX_QUEUE_CAPACITY, self.buffer_size
            )));
        }

        if self.mqtt.qos > 2 {
            return Err(BridgeError::validation(format!(
                "qos must be 0, 1 or 2, got {}",
                self.mqtt.qos
            )));
        }

        self.topic_template()?;

        Ok(())
    }
}
