//! # Port Discovery
//!
//! Lists OS serial ports and guesses which one is the sensor board.

use serde::Serialize;
use tokio_serial::{SerialPortInfo, SerialPortType};
use tracing::{debug, warn};

/// Description keywords of common microcontroller USB bridges
const DESCRIPTION_HINTS: &[&str] = &[
    "arduino",
    "ch340",
    "ch341",
    "cp210",
    "ftdi",
    "usb serial",
    "usb-serial",
    "wch",
    "silicon labs",
];

/// USB vendor ids of the same bridges
const VENDOR_HINTS: &[u16] = &[
    0x2341, // Arduino
    0x2A03, // Arduino.org
    0x1A86, // WCH (CH340/CH341)
    0x10C4, // Silicon Labs (CP210x)
    0x0403, // FTDI
];

/// Device name fragments used when no description matches
const DEVICE_NAME_HINTS: &[&str] = &["ttyACM", "ttyUSB", "usbmodem", "usbserial"];

/// One OS-visible serial port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub device_name: String,
    pub description: String,
    pub vid: Option<u16>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (description, vid) = match info.port_type {
            SerialPortType::UsbPort(usb) => {
                let parts: Vec<String> = [usb.product, usb.manufacturer].into_iter().flatten().collect();
                let description = if parts.is_empty() {
                    format!("USB Serial Device ({:04X}:{:04X})", usb.vid, usb.pid)
                } else {
                    parts.join(" - ")
                };
                (description, Some(usb.vid))
            }
            SerialPortType::PciPort => ("PCI serial port".to_string(), None),
            SerialPortType::BluetoothPort => ("Bluetooth serial port".to_string(), None),
            SerialPortType::Unknown => ("n/a".to_string(), None),
        };

        Self {
            device_name: info.port_name,
            description,
            vid,
        }
    }
}

impl PortInfo {
    /// Label shown to a user picking a port
    pub fn label(&self) -> String {
        format!("{} - {}", self.device_name, self.description)
    }
}

/// List serial ports in OS order
///
/// Enumeration failures are logged and yield an empty list; an empty list
/// means the user has to name the port.
pub fn list_ports() -> Vec<PortInfo> {
    match tokio_serial::available_ports() {
        Ok(ports) => ports.into_iter().map(PortInfo::from).collect(),
        Err(e) => {
            warn!("Failed to enumerate serial ports: {}", e);
            Vec::new()
        }
    }
}

/// Guess the sensor board's port from the OS port list
pub fn find_candidate_port() -> Option<String> {
    pick_candidate(&list_ports())
}

/// Pick the most likely sensor board port
///
/// Ports whose description or USB vendor id matches a known bridge win;
/// failing that, the first port with a typical USB serial device name.
pub fn pick_candidate(ports: &[PortInfo]) -> Option<String> {
    let by_description = ports.iter().find(|p| {
        let description = p.description.to_lowercase();
        DESCRIPTION_HINTS.iter().any(|hint| description.contains(hint))
            || p.vid.map_or(false, |vid| VENDOR_HINTS.contains(&vid))
    });

    let found = by_description.or_else(|| {
        ports
            .iter()
            .find(|p| DEVICE_NAME_HINTS.iter().any(|hint| p.device_name.contains(hint)))
    });

    match found {
        Some(port) => {
            debug!("Candidate sensor board port: {}", port.label());
            Some(port.device_name.clone())
        }
        None => None,
    }
}
