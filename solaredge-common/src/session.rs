use std::time::Duration;

use rumqttc::{MqttOptions, QoS};

use crate::config::MqttConfig;
use crate::error::{Error, Result};

/// Map a numeric QoS level to the MQTT client's type.
pub fn qos_from_level(level: u8) -> Result<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(Error::Config(format!(
            "Invalid MQTT QoS level: {}. Expected 0, 1 or 2",
            other
        ))),
    }
}

/// Build MQTT client options from the gateway configuration.
pub fn mqtt_options(config: &MqttConfig) -> Result<MqttOptions> {
    let host = config
        .host
        .as_deref()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::Config("No MQTT host given".to_string()))?;

    if config.client_id.is_empty() {
        return Err(Error::Config("MQTT client ID cannot be empty".to_string()));
    }

    if config.keep_alive_secs < 5 {
        return Err(Error::Config(format!(
            "MQTT keep-alive must be at least 5 seconds, got {}",
            config.keep_alive_secs
        )));
    }

    let mut options = MqttOptions::new(&config.client_id, host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

    match (&config.username, &config.password) {
        (Some(user), password) => {
            options.set_credentials(user, password.as_deref().unwrap_or_default());
        }
        (None, Some(_)) => {
            return Err(Error::Config(
                "MQTT password given without a username".to_string(),
            ));
        }
        (None, None) => {}
    }

    tracing::info!(
        host = %host,
        port = config.port,
        client_id = %config.client_id,
        "Prepared MQTT connection"
    );

    Ok(options)
}
