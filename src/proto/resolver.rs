use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::command::{cmd, encode};
use super::response::{decode, Value};
use super::transport::PortOpener;
use super::{ProtoError, Result};

/// One serial port as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    pub port_name: String,
    pub description: String,
    pub hardware_id: String,
}

impl fmt::Display for PortDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {})",
            self.port_name, self.description, self.hardware_id
        )
    }
}

impl From<tokio_serial::SerialPortInfo> for PortDescriptor {
    fn from(info: tokio_serial::SerialPortInfo) -> Self {
        let (description, hardware_id) = match &info.port_type {
            tokio_serial::SerialPortType::UsbPort(usb) => (
                usb.product.clone().unwrap_or_else(|| "USB Serial Port".into()),
                format!(
                    "USB VID:PID={:04X}:{:04X} SER={}",
                    usb.vid,
                    usb.pid,
                    usb.serial_number.as_deref().unwrap_or("")
                ),
            ),
            tokio_serial::SerialPortType::PciPort => ("PCI Serial".into(), "PCI".into()),
            tokio_serial::SerialPortType::BluetoothPort => {
                ("Bluetooth Serial".into(), "BTH".into())
            }
            _ => ("n/a".into(), "n/a".into()),
        };
        Self {
            port_name: info.port_name,
            description,
            hardware_id,
        }
    }
}

/// Fresh OS enumeration, in OS order. Nothing is cached, ports come and go.
pub fn list_ports() -> Result<Vec<PortDescriptor>> {
    let ports = tokio_serial::available_ports()?;
    debug!("{} serial port(s) found", ports.len());
    Ok(ports.into_iter().map(PortDescriptor::from).collect())
}

/// Finds devices by asking each candidate port for its serial number.
///
/// Ports are probed one after another, each with its own short-lived
/// connection and bounded timeout. Every connection opened here is closed
/// again before returning.
pub struct PortResolver<'a, O: ?Sized> {
    opener: &'a O,
    baud_rate: u32,
    probe_timeout: Duration,
}

impl<'a, O: PortOpener + ?Sized> PortResolver<'a, O> {
    pub fn new(opener: &'a O, baud_rate: u32, probe_timeout: Duration) -> Self {
        Self {
            opener,
            baud_rate,
            probe_timeout,
        }
    }

    /// Serial number reported by the device behind `port_name`.
    pub async fn probe(&self, port_name: &str) -> Result<String> {
        let mut conn = self
            .opener
            .open(port_name, self.baud_rate, self.probe_timeout)?;
        let query = &cmd::SERIAL_NUMBER;
        let reply = async {
            conn.write_line(&encode(query, &[])?).await?;
            let line = conn.read_line().await?;
            decode(query.wire_name, &query.reply, &[line])
        }
        .await;
        conn.close();
        match reply? {
            Value::Text(serial) if !serial.is_empty() => Ok(serial),
            Value::Text(_) => Err(ProtoError::MalformedReply(
                "empty serial number reply".into(),
            )),
            other => Err(ProtoError::MalformedReply(format!(
                "unexpected serial number reply {:?}",
                other
            ))),
        }
    }

    /// First candidate whose device reports `target_serial`. With duplicate
    /// serial numbers the first one in enumeration order wins.
    pub async fn resolve_by_serial(
        &self,
        target_serial: &str,
        candidates: &[PortDescriptor],
    ) -> Result<String> {
        for candidate in candidates {
            match self.probe(&candidate.port_name).await {
                Ok(serial) if serial == target_serial.trim() => {
                    info!(
                        port = %candidate.port_name,
                        "found device with serial number {}", serial
                    );
                    return Ok(candidate.port_name.clone());
                }
                Ok(serial) => {
                    debug!(port = %candidate.port_name, "serial number {} does not match", serial)
                }
                Err(err) => warn!(port = %candidate.port_name, "probe failed: {}", err),
            }
        }
        Err(ProtoError::DeviceNotFound(target_serial.to_string()))
    }

    /// Every candidate that answers with a serial number.
    pub async fn scan(&self, candidates: &[PortDescriptor]) -> Vec<(PortDescriptor, String)> {
        let mut found = Vec::new();
        for candidate in candidates {
            match self.probe(&candidate.port_name).await {
                Ok(serial) => found.push((candidate.clone(), serial)),
                Err(err) => debug!(port = %candidate.port_name, "no device: {}", err),
            }
        }
        found
    }
}
