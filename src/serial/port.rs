//! # Port Module
//!
//! Device configuration and the host-facing half of the transport: opening a
//! `tokio-serial` stream with validated line settings, enumerating ports,
//! and the background watcher that turns hotplug state into [`DeviceEvent`]s.

use std::collections::HashSet;
use std::fmt;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Duration;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::error::{Result, SerialProbeError};

/// Common serial port baud rates, for selection lists.
pub const COMMON_BAUD_RATES: &[u32] = &[
    4800, 9600, 19200, 38400, 57600, 115200, 230400, 460800, 500000, 576000, 921600, 1000000,
    1500000, 2000000,
];

/// How often the port watcher re-enumerates the host's ports.
pub const PORT_SCAN_INTERVAL: Duration = Duration::from_secs(2);

/// Data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    Seven,
    Eight,
}

impl fmt::Display for DataBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataBits::Seven => write!(f, "7"),
            DataBits::Eight => write!(f, "8"),
        }
    }
}

/// Stop bits after each character.
///
/// `OnePointFive` exists on real UARTs and in operator expectations, so the
/// config can carry it; the host stack cannot express it and `open_port`
/// rejects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    OnePointFive,
    Two,
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopBits::One => write!(f, "1"),
            StopBits::OnePointFive => write!(f, "1.5"),
            StopBits::Two => write!(f, "2"),
        }
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Even,
    Odd,
    Mark,
    Space,
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parity::None => write!(f, "none"),
            Parity::Even => write!(f, "even"),
            Parity::Odd => write!(f, "odd"),
            Parity::Mark => write!(f, "mark"),
            Parity::Space => write!(f, "space"),
        }
    }
}

/// Flow control mode, passed through to the driver unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowControl {
    None,
    Hardware,
    Software,
}

impl fmt::Display for FlowControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowControl::None => write!(f, "none"),
            FlowControl::Hardware => write!(f, "hardware"),
            FlowControl::Software => write!(f, "software"),
        }
    }
}

/// Negotiated line settings for one connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            port_name: String::new(),
            baud_rate: 115200,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
        }
    }
}

impl LinkConfig {
    /// Creates a config for the named port with default 115200-8-N-1 settings.
    #[must_use]
    pub fn for_port(port_name: impl Into<String>) -> Self {
        LinkConfig {
            port_name: port_name.into(),
            ..LinkConfig::default()
        }
    }

    /// Range/enum validation, performed before any device call.
    ///
    /// # Errors
    ///
    /// `NoPortSelected` for an empty port name, `ConfigurationRejected` for a
    /// zero baud rate.
    pub fn validate(&self) -> Result<()> {
        if self.port_name.is_empty() {
            return Err(SerialProbeError::NoPortSelected(
                "no port name given".into(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(SerialProbeError::configuration_rejected(
                "baud rate must be non-zero",
            ));
        }
        Ok(())
    }

    /// Maps the config onto driver-level line settings.
    ///
    /// # Errors
    ///
    /// `ConfigurationRejected` for settings the host stack cannot express
    /// (1.5 stop bits, mark/space parity).
    pub fn line_settings(
        &self,
    ) -> Result<(
        tokio_serial::DataBits,
        tokio_serial::StopBits,
        tokio_serial::Parity,
        tokio_serial::FlowControl,
    )> {
        let data_bits = match self.data_bits {
            DataBits::Seven => tokio_serial::DataBits::Seven,
            DataBits::Eight => tokio_serial::DataBits::Eight,
        };
        let stop_bits = match self.stop_bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
            StopBits::OnePointFive => {
                return Err(SerialProbeError::configuration_rejected(
                    "1.5 stop bits are not supported by the host serial stack",
                ));
            }
        };
        let parity = match self.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Mark | Parity::Space => {
                return Err(SerialProbeError::configuration_rejected(format!(
                    "{} parity is not supported by the host serial stack",
                    self.parity
                )));
            }
        };
        let flow_control = match self.flow_control {
            FlowControl::None => tokio_serial::FlowControl::None,
            FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
            FlowControl::Software => tokio_serial::FlowControl::Software,
        };
        Ok((data_bits, stop_bits, parity, flow_control))
    }

    /// Human-readable summary, e.g. `/dev/ttyUSB0 @ 115200 8-none-1`.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "{} @ {} {}-{}-{}",
            self.port_name, self.baud_rate, self.data_bits, self.parity, self.stop_bits
        )
    }
}

/// Opens the configured device.
///
/// # Errors
///
/// Validation and line-setting errors pass through; open failures are mapped
/// onto the crate error kinds (`NoPortSelected` for a missing device,
/// `PermissionDenied` for an access refusal, `DeviceIo` otherwise).
pub async fn open_port(config: &LinkConfig) -> Result<SerialStream> {
    config.validate()?;
    let (data_bits, stop_bits, parity, flow_control) = config.line_settings()?;
    match tokio_serial::new(config.port_name.as_str(), config.baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(flow_control)
        .open_native_async()
    {
        Ok(stream) => {
            info!("opened {}", config.describe());
            Ok(stream)
        }
        Err(e) => Err(map_open_error(&config.port_name, &e)),
    }
}

fn map_open_error(port_name: &str, e: &tokio_serial::Error) -> SerialProbeError {
    match e.kind {
        tokio_serial::ErrorKind::NoDevice => {
            SerialProbeError::NoPortSelected(format!("{port_name}: {}", e.description))
        }
        tokio_serial::ErrorKind::InvalidInput => {
            SerialProbeError::configuration_rejected(e.description.clone())
        }
        tokio_serial::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            SerialProbeError::permission_denied(port_name, e.description.clone())
        }
        _ => SerialProbeError::device_io(format!("{port_name}: {}", e.description)),
    }
}

/// Enumerates the host's serial port names.
///
/// # Errors
///
/// `UnsupportedPlatform` when the host exposes no serial capability at all.
pub fn list_port_names() -> Result<Vec<String>> {
    match tokio_serial::available_ports() {
        Ok(ports) => Ok(ports.into_iter().map(|p| p.port_name).collect()),
        Err(e) => Err(SerialProbeError::UnsupportedPlatform(e.to_string())),
    }
}

/// Out-of-band hotplug notification for a physical device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Attached(String),
    Removed(String),
}

/// Computes the events between two enumeration passes.
fn diff_ports(previous: &HashSet<String>, current: &HashSet<String>) -> Vec<DeviceEvent> {
    let mut events: Vec<DeviceEvent> = previous
        .difference(current)
        .cloned()
        .map(DeviceEvent::Removed)
        .collect();
    events.extend(current.difference(previous).cloned().map(DeviceEvent::Attached));
    events
}

/// Polls the host's port list and broadcasts attach/remove events.
///
/// Runs until every receiver is dropped. Hosts with native hotplug callbacks
/// could feed the same channel directly; polling is the portable fallback.
pub async fn watch_ports(tx: broadcast::Sender<DeviceEvent>) {
    let mut known: HashSet<String> = match list_port_names() {
        Ok(names) => names.into_iter().collect(),
        Err(e) => {
            warn!("port enumeration unavailable: {e}");
            HashSet::new()
        }
    };
    loop {
        tokio::time::sleep(PORT_SCAN_INTERVAL).await;
        let current: HashSet<String> = match list_port_names() {
            Ok(names) => names.into_iter().collect(),
            Err(_) => continue,
        };
        for event in diff_ports(&known, &current) {
            info!("device event: {event:?}");
            if tx.send(event).is_err() {
                return;
            }
        }
        known = current;
    }
}
