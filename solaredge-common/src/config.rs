use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::topic::{DEFAULT_TOPIC, TopicFields};

/// MQTT broker connection and publishing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host. Required, but may be supplied on the command line.
    #[serde(default)]
    pub host: Option<String>,

    /// Broker port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Client ID. Needs to be unique between all clients of the same broker.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Topic template, see [`crate::topic`].
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Record fields resolved for the topic placeholders.
    #[serde(default)]
    pub topic_fields: TopicFields,

    /// Publish QoS level (0, 1 or 2).
    #[serde(default = "default_qos")]
    pub qos: u8,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Optional broker credentials.
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Retained topic for gateway status ("running"/"offline").
    #[serde(default)]
    pub status_topic: Option<String>,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "se-mqtt-gateway".to_string()
}

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

fn default_qos() -> u8 {
    1
}

fn default_keep_alive_secs() -> u64 {
    60
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_mqtt_port(),
            client_id: default_client_id(),
            topic: default_topic(),
            topic_fields: TopicFields::default(),
            qos: default_qos(),
            keep_alive_secs: default_keep_alive_secs(),
            username: None,
            password: None,
            status_topic: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Load a configuration file in JSON5 format.
pub fn load_config<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    json5::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Load a configuration from a JSON5 string.
pub fn parse_config<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Wrapper {
        #[serde(default)]
        mqtt: MqttConfig,
        #[serde(default)]
        logging: LoggingConfig,
    }

    #[test]
    fn test_parse_mqtt_config() {
        let json5 = r#"
        {
            mqtt: {
                host: "broker.local",
                port: 8883,
                client_id: "roof-inverter",
                topic: "pv/%(serial)s",
                topic_fields: { serial: "c_model" },
                qos: 0,
                status_topic: "pv/status",
            },
            logging: {
                level: "debug",
            },
        }
        "#;

        let config: Wrapper = parse_config(json5).unwrap();

        assert_eq!(config.mqtt.host.as_deref(), Some("broker.local"));
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.client_id, "roof-inverter");
        assert_eq!(config.mqtt.topic, "pv/%(serial)s");
        assert_eq!(config.mqtt.topic_fields.serial, "c_model");
        assert_eq!(config.mqtt.topic_fields.channel, "c_deviceaddress");
        assert_eq!(config.mqtt.qos, 0);
        assert_eq!(config.mqtt.status_topic.as_deref(), Some("pv/status"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_default_config() {
        let config: Wrapper = parse_config("{}").unwrap();

        assert_eq!(config.mqtt.host, None);
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.client_id, "se-mqtt-gateway");
        assert_eq!(config.mqtt.topic, "solaredge-mqtt/tele/%(serial)s/SENSOR");
        assert_eq!(config.mqtt.qos, 1);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_json_logging_format() {
        let json5 = r#"
        {
            logging: {
                level: "debug",
                format: "json",
            },
        }
        "#;

        let config: Wrapper = parse_config(json5).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_load_missing_file() {
        let result: Result<Wrapper> = load_config("/nonexistent/gateway.json5");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
