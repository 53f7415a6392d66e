//! SolarEdge inverter access over Modbus TCP.
//!
//! The inverter exposes the SunSpec common block followed by the inverter
//! model in one contiguous run of holding registers starting at 40000.
//! Both are fetched with a single request and decoded into a flat
//! [`Reading`].

use std::time::Duration;

use async_trait::async_trait;
use tokio_modbus::client::{Context, Reader};
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

use solaredge_common::{FieldValue, Reading};

use crate::config::SolarEdgeConfig;

/// First register of the SunSpec common block.
pub const BASE_ADDRESS: u16 = 40000;

/// Registers covering the common block and the inverter model.
pub const REGISTER_COUNT: u16 = 109;

/// Value of `c_id` on every SunSpec device.
pub const SUNSPEC_ID: &str = "SunS";

/// Error type for device reads.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Read failed: {0}")]
    Read(String),
    #[error("Malformed response: {0}")]
    Malformed(String),
    #[error("Device returned no data")]
    Empty,
}

/// A device that can be read in one go.
///
/// Implementations reconnect on their own: every call either returns a
/// complete reading or an error, and the next call starts afresh.
#[async_trait]
pub trait DeviceClient: Send {
    /// Read every value the device exposes.
    async fn read_all(&mut self) -> Result<Reading, DeviceError>;
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    U16,
    I16,
    U32,
    Text(u16),
}

/// Register layout, offsets relative to [`BASE_ADDRESS`].
const REGISTER_MAP: &[(&str, u16, Kind)] = &[
    ("c_id", 0, Kind::Text(2)),
    ("c_did", 2, Kind::U16),
    ("c_length", 3, Kind::U16),
    ("c_manufacturer", 4, Kind::Text(16)),
    ("c_model", 20, Kind::Text(16)),
    ("c_version", 44, Kind::Text(8)),
    ("c_serialnumber", 52, Kind::Text(16)),
    ("c_deviceaddress", 68, Kind::U16),
    ("c_sunspec_did", 69, Kind::U16),
    ("c_sunspec_length", 70, Kind::U16),
    ("current", 71, Kind::U16),
    ("p1_current", 72, Kind::U16),
    ("p2_current", 73, Kind::U16),
    ("p3_current", 74, Kind::U16),
    ("current_scale", 75, Kind::I16),
    ("p1_voltage", 76, Kind::U16),
    ("p2_voltage", 77, Kind::U16),
    ("p3_voltage", 78, Kind::U16),
    ("p1n_voltage", 79, Kind::U16),
    ("p2n_voltage", 80, Kind::U16),
    ("p3n_voltage", 81, Kind::U16),
    ("voltage_scale", 82, Kind::I16),
    ("power_ac", 83, Kind::I16),
    ("power_ac_scale", 84, Kind::I16),
    ("frequency", 85, Kind::U16),
    ("frequency_scale", 86, Kind::I16),
    ("power_apparent", 87, Kind::I16),
    ("power_apparent_scale", 88, Kind::I16),
    ("power_reactive", 89, Kind::I16),
    ("power_reactive_scale", 90, Kind::I16),
    ("power_factor", 91, Kind::I16),
    ("power_factor_scale", 92, Kind::I16),
    ("energy_total", 93, Kind::U32),
    ("energy_total_scale", 95, Kind::I16),
    ("current_dc", 96, Kind::U16),
    ("current_dc_scale", 97, Kind::I16),
    ("voltage_dc", 98, Kind::U16),
    ("voltage_dc_scale", 99, Kind::I16),
    ("power_dc", 100, Kind::I16),
    ("power_dc_scale", 101, Kind::I16),
    ("temperature", 103, Kind::I16),
    ("temperature_scale", 106, Kind::I16),
    ("status", 107, Kind::U16),
    ("vendor_status", 108, Kind::U16),
];

/// Decode the raw register block starting at [`BASE_ADDRESS`].
pub fn decode_registers(registers: &[u16]) -> Result<Reading, DeviceError> {
    if registers.is_empty() {
        return Err(DeviceError::Empty);
    }
    if registers.len() < REGISTER_COUNT as usize {
        return Err(DeviceError::Malformed(format!(
            "expected {} registers, got {}",
            REGISTER_COUNT,
            registers.len()
        )));
    }

    let mut reading = Reading::new();
    for (name, offset, kind) in REGISTER_MAP {
        let start = *offset as usize;
        let value = match kind {
            Kind::U16 => FieldValue::from(registers[start]),
            Kind::I16 => FieldValue::from(registers[start] as i16),
            Kind::U32 => {
                FieldValue::from(((registers[start] as u32) << 16) | registers[start + 1] as u32)
            }
            Kind::Text(count) => {
                FieldValue::Text(decode_string(&registers[start..start + *count as usize]))
            }
        };
        reading.insert(name.to_string(), value);
    }

    match reading.get("c_id") {
        Some(FieldValue::Text(id)) if id == SUNSPEC_ID => Ok(reading),
        other => Err(DeviceError::Malformed(format!(
            "not a SunSpec device (c_id = {:?})",
            other.map(ToString::to_string).unwrap_or_default()
        ))),
    }
}

/// Two characters per register, high byte first, padding trimmed.
fn decode_string(registers: &[u16]) -> String {
    let bytes: Vec<u8> = registers.iter().flat_map(|r| r.to_be_bytes()).collect();
    String::from_utf8_lossy(&bytes)
        .trim_end_matches(['\0', ' '])
        .to_string()
}

/// A SolarEdge inverter reachable over Modbus TCP.
///
/// The connection is opened on first use and dropped after any failed
/// request, so the next read reconnects. The Modbus context is `Send` but
/// not `Sync`, so every method holding `self` across an await takes
/// `&mut self`.
pub struct SunSpecInverter {
    host: String,
    port: u16,
    unit_id: u8,
    timeout: Duration,
    ctx: Option<Context>,
}

impl SunSpecInverter {
    /// Create a client for the configured inverter. Does not connect.
    pub fn new(host: impl Into<String>, config: &SolarEdgeConfig) -> Self {
        Self {
            host: host.into(),
            port: config.port,
            unit_id: config.unit_id,
            timeout: Duration::from_secs(config.timeout_secs),
            ctx: None,
        }
    }

    /// `host:port` of the inverter.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn connect(&mut self) -> Result<Context, DeviceError> {
        let address = self.address();

        let addr = tokio::time::timeout(self.timeout, tokio::net::lookup_host(&address))
            .await
            .map_err(|_| DeviceError::Timeout(self.timeout))?
            .map_err(|e| DeviceError::Connection(format!("Cannot resolve {}: {}", address, e)))?
            .next()
            .ok_or_else(|| DeviceError::Connection(format!("No address for {}", address)))?;

        let ctx = tokio::time::timeout(
            self.timeout,
            tcp::connect_slave(addr, Slave(self.unit_id)),
        )
        .await
        .map_err(|_| DeviceError::Timeout(self.timeout))?
        .map_err(|e| DeviceError::Connection(e.to_string()))?;

        info!("Connected to inverter at {}", addr);
        Ok(ctx)
    }

    async fn read_registers(&mut self, ctx: &mut Context) -> Result<Vec<u16>, DeviceError> {
        tokio::time::timeout(
            self.timeout,
            ctx.read_holding_registers(BASE_ADDRESS, REGISTER_COUNT),
        )
        .await
        .map_err(|_| DeviceError::Timeout(self.timeout))?
        .map_err(|e| DeviceError::Read(e.to_string()))?
        .map_err(|e| DeviceError::Read(format!("Exception: {:?}", e)))
    }
}

#[async_trait]
impl DeviceClient for SunSpecInverter {
    async fn read_all(&mut self) -> Result<Reading, DeviceError> {
        let mut ctx = match self.ctx.take() {
            Some(ctx) => ctx,
            None => self.connect().await?,
        };

        match self.read_registers(&mut ctx).await {
            Ok(registers) => {
                debug!("Read {} registers from {}", registers.len(), self.address());
                self.ctx = Some(ctx);
                decode_registers(&registers)
            }
            Err(e) => {
                warn!("Dropping inverter connection after failed read: {}", e);
                Err(e)
            }
        }
    }
}
