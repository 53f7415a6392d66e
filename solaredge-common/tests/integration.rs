//! Integration tests for solaredge-common library.

use solaredge_common::{
    FieldValue, Format, MqttConfig, Reading, TIMESTAMP_FIELD, TelemetryRecord, TopicTemplate,
    encode, mqtt_options, parse_config,
};

fn inverter_reading() -> Reading {
    let mut reading = Reading::new();
    reading.insert("c_manufacturer".to_string(), "SolarEdge".into());
    reading.insert("c_serialnumber".to_string(), "7E0A1B2C".into());
    reading.insert("c_deviceaddress".to_string(), FieldValue::Integer(1));
    reading.insert("power_ac".to_string(), FieldValue::Float(2480.0));
    reading.insert("temperature".to_string(), FieldValue::Float(41.27));
    reading
}

#[test]
fn test_record_to_topic_and_payload() {
    let record = TelemetryRecord::new(inverter_reading(), 1_700_000_005_000);

    let config: MqttConfig = parse_config(r#"{ topic: "solar/%(serial)s/%(channel)s" }"#).unwrap();
    let template = TopicTemplate::parse(&config.topic).unwrap();

    let topic = template
        .render_record(&record, &config.topic_fields)
        .expect("Topic render failed");
    assert_eq!(topic, "solar/7E0A1B2C/1");

    let payload = encode(&record, Format::Json).expect("JSON encode failed");
    let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();

    assert_eq!(json["c_manufacturer"], "SolarEdge");
    assert_eq!(json["power_ac"], 2480.0);
    assert_eq!(json[TIMESTAMP_FIELD], 1_700_000_005_000i64);
}

#[test]
fn test_default_topic_needs_only_serial() {
    let mut reading = Reading::new();
    reading.insert("c_serialnumber".to_string(), "ABC123".into());
    let record = TelemetryRecord::new(reading, 0);

    let config = MqttConfig::default();
    let template = TopicTemplate::parse(&config.topic).unwrap();

    assert_eq!(
        template
            .render_record(&record, &config.topic_fields)
            .unwrap(),
        "solaredge-mqtt/tele/ABC123/SENSOR"
    );
}

#[test]
fn test_mqtt_options_from_parsed_config() {
    let config: MqttConfig = parse_config(
        r#"{
            host: "10.0.0.2",
            port: 1884,
            client_id: "garage",
            username: "pv",
            password: "secret",
        }"#,
    )
    .unwrap();

    let options = mqtt_options(&config).expect("Options build failed");
    assert_eq!(options.broker_address(), ("10.0.0.2".to_string(), 1884));
    assert_eq!(options.client_id(), "garage");
}
