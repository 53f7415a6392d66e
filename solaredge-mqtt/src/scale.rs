//! SunSpec scale factor handling.
//!
//! SunSpec transports most measurements as integers together with a
//! base-10 exponent register (`*_SF`). A raw reading carries both; the
//! published reading only carries the scaled values.

use solaredge_common::{FieldValue, Reading};

/// Scale factor field and the measurement fields it applies to.
pub const SCALE_FACTORS: &[(&str, &[&str])] = &[
    (
        "current_scale",
        &["current", "p1_current", "p2_current", "p3_current"],
    ),
    (
        "voltage_scale",
        &[
            "p1_voltage",
            "p2_voltage",
            "p3_voltage",
            "p1n_voltage",
            "p2n_voltage",
            "p3n_voltage",
        ],
    ),
    ("power_ac_scale", &["power_ac"]),
    ("frequency_scale", &["frequency"]),
    ("power_apparent_scale", &["power_apparent"]),
    ("power_reactive_scale", &["power_reactive"]),
    ("power_factor_scale", &["power_factor"]),
    ("energy_total_scale", &["energy_total"]),
    ("current_dc_scale", &["current_dc"]),
    ("voltage_dc_scale", &["voltage_dc"]),
    ("power_dc_scale", &["power_dc"]),
    ("temperature_scale", &["temperature"]),
];

/// A reading whose scale factors cannot be applied.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ScaleError {
    #[error("Scale factor '{field}' is not an integer: {value}")]
    InvalidExponent { field: String, value: FieldValue },
    #[error("Field '{field}' is not numeric: {value}")]
    NotNumeric { field: String, value: FieldValue },
}

/// Apply the SunSpec scale factors of [`SCALE_FACTORS`] to a raw reading.
pub fn apply_scale_factors(reading: Reading) -> Result<Reading, ScaleError> {
    apply_with_table(reading, SCALE_FACTORS)
}

/// Apply scale factors from `table` to a reading.
///
/// Every target present alongside its scale factor becomes
/// `value * 10^exponent`. Scale factor fields are always removed, whether
/// or not any target was present. Fields not named in the table pass
/// through untouched.
pub fn apply_with_table(
    mut reading: Reading,
    table: &[(&str, &[&str])],
) -> Result<Reading, ScaleError> {
    for (scale_field, targets) in table {
        let Some(raw_exponent) = reading.remove(*scale_field) else {
            continue;
        };

        let exponent = raw_exponent
            .as_i64()
            .and_then(|e| i32::try_from(e).ok())
            .ok_or_else(|| ScaleError::InvalidExponent {
                field: scale_field.to_string(),
                value: raw_exponent.clone(),
            })?;

        for target in *targets {
            if let Some(value) = reading.get_mut(*target) {
                *value = scale(target, value, exponent)?;
            }
        }
    }

    Ok(reading)
}

fn scale(field: &str, value: &FieldValue, exponent: i32) -> Result<FieldValue, ScaleError> {
    let not_numeric = || ScaleError::NotNumeric {
        field: field.to_string(),
        value: value.clone(),
    };

    // Integers scaled up stay integers as long as they fit.
    if let (FieldValue::Integer(raw), Ok(exp)) = (value, u32::try_from(exponent)) {
        if let Some(scaled) = 10_i64.checked_pow(exp).and_then(|m| raw.checked_mul(m)) {
            return Ok(FieldValue::Integer(scaled));
        }
    }

    let raw = value.as_f64().ok_or_else(not_numeric)?;
    let scaled = if exponent < 0 {
        // dividing keeps decimal results such as 2305 * 10^-1 exact
        raw / 10_f64.powi(-exponent)
    } else {
        raw * 10_f64.powi(exponent)
    };
    Ok(FieldValue::Float(scaled))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(fields: &[(&str, FieldValue)]) -> Reading {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn float(reading: &Reading, field: &str) -> f64 {
        reading[field].as_f64().unwrap()
    }

    #[test]
    fn test_negative_exponent() {
        let raw = reading(&[
            ("power_ac", FieldValue::Integer(2305)),
            ("power_ac_scale", FieldValue::Integer(-1)),
        ]);

        let scaled = apply_scale_factors(raw).unwrap();
        assert_eq!(scaled["power_ac"], FieldValue::Float(230.5));
        assert!(!scaled.contains_key("power_ac_scale"));
    }

    #[test]
    fn test_zero_exponent_keeps_integer() {
        let raw = reading(&[
            ("frequency", FieldValue::Integer(50)),
            ("frequency_scale", FieldValue::Integer(0)),
        ]);

        let scaled = apply_scale_factors(raw).unwrap();
        assert_eq!(scaled["frequency"], FieldValue::Integer(50));
    }

    #[test]
    fn test_shared_scale_factor() {
        let raw = reading(&[
            ("current", FieldValue::Integer(1234)),
            ("p1_current", FieldValue::Integer(411)),
            ("p2_current", FieldValue::Integer(412)),
            ("p3_current", FieldValue::Integer(413)),
            ("current_scale", FieldValue::Integer(-2)),
        ]);

        let scaled = apply_scale_factors(raw).unwrap();
        assert!((float(&scaled, "current") - 12.34).abs() < 1e-9);
        assert!((float(&scaled, "p1_current") - 4.11).abs() < 1e-9);
        assert!((float(&scaled, "p2_current") - 4.12).abs() < 1e-9);
        assert!((float(&scaled, "p3_current") - 4.13).abs() < 1e-9);
        assert_eq!(scaled.len(), 4);
    }

    #[test]
    fn test_scale_field_removed_without_target() {
        let raw = reading(&[
            ("temperature_scale", FieldValue::Integer(-2)),
            ("status", FieldValue::Integer(4)),
        ]);

        let scaled = apply_scale_factors(raw).unwrap();
        assert!(!scaled.contains_key("temperature_scale"));
        assert_eq!(scaled["status"], FieldValue::Integer(4));
    }

    #[test]
    fn test_target_without_scale_field_untouched() {
        let raw = reading(&[("power_dc", FieldValue::Integer(812))]);

        let scaled = apply_scale_factors(raw).unwrap();
        assert_eq!(scaled["power_dc"], FieldValue::Integer(812));
    }

    #[test]
    fn test_unrelated_fields_pass_through() {
        let raw = reading(&[
            ("c_serialnumber", FieldValue::from("7E1234AB")),
            ("c_deviceaddress", FieldValue::Integer(1)),
            ("vendor_status", FieldValue::Integer(0)),
        ]);

        let scaled = apply_scale_factors(raw.clone()).unwrap();
        assert_eq!(scaled, raw);
    }

    #[test]
    fn test_scale_law_holds_for_every_entry() {
        for (scale_field, targets) in SCALE_FACTORS {
            let mut raw = Reading::new();
            raw.insert(scale_field.to_string(), FieldValue::Integer(-3));
            for target in *targets {
                raw.insert(target.to_string(), FieldValue::Integer(4567));
            }

            let scaled = apply_scale_factors(raw).unwrap();
            assert!(!scaled.contains_key(*scale_field));
            for target in *targets {
                assert!((float(&scaled, target) - 4.567).abs() < 1e-9, "{target}");
            }
        }
    }

    #[test]
    fn test_positive_exponent_on_float() {
        let raw = reading(&[
            ("energy_total", FieldValue::Float(1.5)),
            ("energy_total_scale", FieldValue::Integer(3)),
        ]);

        let scaled = apply_scale_factors(raw).unwrap();
        assert_eq!(scaled["energy_total"], FieldValue::Float(1500.0));
    }

    #[test]
    fn test_text_measurement_is_rejected() {
        let raw = reading(&[
            ("power_dc", FieldValue::from("n/a")),
            ("power_dc_scale", FieldValue::Integer(-1)),
        ]);

        assert!(matches!(
            apply_scale_factors(raw),
            Err(ScaleError::NotNumeric { ref field, .. }) if field == "power_dc"
        ));
    }

    #[test]
    fn test_fractional_exponent_is_rejected() {
        let raw = reading(&[
            ("power_dc", FieldValue::Integer(10)),
            ("power_dc_scale", FieldValue::Float(0.5)),
        ]);

        assert!(matches!(
            apply_scale_factors(raw),
            Err(ScaleError::InvalidExponent { .. })
        ));
    }
}
