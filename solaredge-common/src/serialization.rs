use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

/// Serialization format for MQTT payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// JSON format (human-readable, good for debugging).
    #[default]
    Json,

    /// CBOR format (compact binary, for constrained consumers).
    Cbor,
}

/// Encode a value to bytes using the specified format.
pub fn encode<T: Serialize>(value: &T, format: Format) -> Result<Vec<u8>> {
    match format {
        Format::Json => serde_json::to_vec(value).map_err(Error::from),
        Format::Cbor => {
            let mut buf = Vec::new();
            ciborium::into_writer(value, &mut buf)?;
            Ok(buf)
        }
    }
}

/// Decode bytes to a value using the specified format.
pub fn decode<T: DeserializeOwned>(data: &[u8], format: Format) -> Result<T> {
    match format {
        Format::Json => serde_json::from_slice(data).map_err(Error::from),
        Format::Cbor => ciborium::from_reader(data).map_err(|e| Error::Cbor(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{FieldValue, Reading, TelemetryRecord};

    fn sample_record() -> TelemetryRecord {
        let mut reading = Reading::new();
        reading.insert("c_serialnumber".to_string(), "7E0A1B2C".into());
        reading.insert("power_ac".to_string(), FieldValue::Float(1520.5));
        reading.insert("status".to_string(), FieldValue::Integer(4));
        TelemetryRecord::new(reading, 1_700_000_000_000)
    }

    #[test]
    fn test_json_payload_shape() {
        let encoded = encode(&sample_record(), Format::Json).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(value["c_serialnumber"], "7E0A1B2C");
        assert_eq!(value["power_ac"], 1520.5);
        assert_eq!(value["status"], 4);
        assert_eq!(value["solaredge_mqtt_timestamp"], 1_700_000_000_000i64);
    }

    #[test]
    fn test_cbor_decodes_back() {
        let record = sample_record();

        let encoded = encode(&record, Format::Cbor).unwrap();
        let decoded: TelemetryRecord = decode(&encoded, Format::Cbor).unwrap();

        assert_eq!(decoded, record);
    }

    #[test]
    fn test_cbor_is_smaller() {
        let record = sample_record();

        let json = encode(&record, Format::Json).unwrap();
        let cbor = encode(&record, Format::Cbor).unwrap();

        assert!(cbor.len() < json.len(), "CBOR should be smaller than JSON");
    }
}
