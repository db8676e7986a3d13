//! Device discovery and feature reporting

use std::ffi::CString;
use std::fmt;

use hidapi::HidApi;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::messages::Features;

pub const LEDGER_VID: u16 = 0x2c97;
pub const TREZOR_ONE_HID_VID: u16 = 0x534c;
pub const TREZOR_ONE_HID_PID: u16 = 0x0001;
pub const TREZOR_WEBUSB_VID: u16 = 0x1209;
pub const TREZOR_WEBUSB_PID: u16 = 0x53c1;
pub const KEEPKEY_VID: u16 = 0x2b24;
pub const KEEPKEY_HID_PID: u16 = 0x0001;
pub const KEEPKEY_WEBUSB_PID: u16 = 0x0002;

/// Usage page of the Ledger APDU interface
const LEDGER_USAGE_PAGE: u16 = 0xffa0;
/// Usage page of the Trezor One wire interface (the other one is U2F)
const TREZOR_USAGE_PAGE: u16 = 0xff00;

/// Supported hardware wallet families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Ledger,
    Trezor,
    #[value(name = "keepkey")]
    KeepKey,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Ledger => write!(f, "Ledger"),
            DeviceKind::Trezor => write!(f, "Trezor"),
            DeviceKind::KeepKey => write!(f, "KeepKey"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UsbInterface {
    Hid,
    WebUsb,
}

/// Classify a USB vendor/product pair
pub fn classify(vid: u16, pid: u16) -> Option<(DeviceKind, UsbInterface)> {
    match (vid, pid) {
        (LEDGER_VID, _) => Some((DeviceKind::Ledger, UsbInterface::Hid)),
        (TREZOR_ONE_HID_VID, TREZOR_ONE_HID_PID) => Some((DeviceKind::Trezor, UsbInterface::Hid)),
        (TREZOR_WEBUSB_VID, TREZOR_WEBUSB_PID) => Some((DeviceKind::Trezor, UsbInterface::WebUsb)),
        (KEEPKEY_VID, KEEPKEY_HID_PID) => Some((DeviceKind::KeepKey, UsbInterface::Hid)),
        (KEEPKEY_VID, KEEPKEY_WEBUSB_PID) => Some((DeviceKind::KeepKey, UsbInterface::WebUsb)),
        _ => None,
    }
}

/// A connected signing device, before it is opened
#[derive(Debug, Clone, Serialize)]
pub struct FriendlyUsbDevice {
    pub unique_id: String,
    pub name: String,
    pub manufacturer: Option<String>,
    pub vid: u16,
    pub pid: u16,
    pub kind: DeviceKind,
    pub interface: UsbInterface,
    #[serde(skip)]
    pub hid_path: Option<CString>,
    #[serde(skip)]
    pub bus_address: Option<(u8, u8)>,
}

/// Enumerate every supported device on HID and WebUSB
pub fn list_connected_devices() -> Result<Vec<FriendlyUsbDevice>> {
    let mut devices = list_hid_devices(&HidApi::new()?);
    devices.extend(list_webusb_devices()?);
    log::debug!("🔍 Found {} supported signing device(s)", devices.len());
    Ok(devices)
}

pub fn list_hid_devices(api: &HidApi) -> Vec<FriendlyUsbDevice> {
    api.device_list()
        .filter_map(|info| {
            let (kind, interface) = classify(info.vendor_id(), info.product_id())?;
            if interface != UsbInterface::Hid {
                return None;
            }
            let wire_interface = match kind {
                DeviceKind::Ledger => {
                    info.usage_page() == LEDGER_USAGE_PAGE || info.interface_number() == 0
                }
                DeviceKind::Trezor => {
                    info.usage_page() == TREZOR_USAGE_PAGE || info.interface_number() == 0
                }
                DeviceKind::KeepKey => info.interface_number() == 0,
            };
            if !wire_interface {
                return None;
            }
            Some(FriendlyUsbDevice {
                unique_id: info
                    .serial_number()
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| info.path().to_string_lossy().into_owned()),
                name: info.product_string().unwrap_or("Unknown").to_string(),
                manufacturer: info.manufacturer_string().map(str::to_string),
                vid: info.vendor_id(),
                pid: info.product_id(),
                kind,
                interface,
                hid_path: Some(info.path().to_owned()),
                bus_address: None,
            })
        })
        .collect()
}

pub fn list_webusb_devices() -> Result<Vec<FriendlyUsbDevice>> {
    let mut found = Vec::new();
    for device in rusb::devices()?.iter() {
        let descriptor = match device.device_descriptor() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                log::debug!("Skipping USB device without descriptor: {}", e);
                continue;
            }
        };
        let Some((kind, UsbInterface::WebUsb)) =
            classify(descriptor.vendor_id(), descriptor.product_id())
        else {
            continue;
        };
        found.push(FriendlyUsbDevice {
            unique_id: format!("usb-{}-{}", device.bus_number(), device.address()),
            name: format!("{} (WebUSB)", kind),
            manufacturer: None,
            vid: descriptor.vendor_id(),
            pid: descriptor.product_id(),
            kind,
            interface: UsbInterface::WebUsb,
            hid_path: None,
            bus_address: Some((device.bus_number(), device.address())),
        });
    }
    Ok(found)
}

/// What a device reports about itself
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFeatures {
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub label: Option<String>,
    pub device_id: Option<String>,
    pub version: String,
    pub bootloader_mode: bool,
    pub initialized: bool,
    pub pin_protection: bool,
    pub passphrase_protection: bool,
    /// Ledger only: whether the Ethereum app accepts contract data
    pub contract_data_enabled: Option<bool>,
}

/// Convert a Trezor/KeepKey `Features` message
pub fn convert_features_to_device_features(features: Features) -> DeviceFeatures {
    let version = format!(
        "{}.{}.{}",
        features.major_version(),
        features.minor_version(),
        features.patch_version()
    );
    log::debug!("🔍 Device features: vendor={:?} model={:?} firmware={}", features.vendor, features.model, version);

    DeviceFeatures {
        vendor: features.vendor,
        model: features.model,
        label: features.label,
        device_id: features.device_id,
        version,
        bootloader_mode: features.bootloader_mode.unwrap_or(false),
        initialized: features.initialized.unwrap_or(false),
        pin_protection: features.pin_protection.unwrap_or(false),
        passphrase_protection: features.passphrase_protection.unwrap_or(false),
        contract_data_enabled: None,
    }
}
