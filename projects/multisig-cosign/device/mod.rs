//! Hardware signers
//!
//! Every supported device family implements [`HardwareSigner`]; the rest of
//! the crate never looks at the wire protocol underneath.

use std::time::Duration;

use ethereum_types::Address;
use ethers_core::types::Signature;
use hidapi::HidApi;

use crate::chains::ethereum::{DerivationPath, UnsignedTransaction};
use crate::errors::{CosignError, Result};
use crate::features::{list_connected_devices, DeviceFeatures, DeviceKind, FriendlyUsbDevice, UsbInterface};
use crate::prompt::Prompt;
use crate::transport::{HidTransport, Transport, WebUsbTransport};

pub mod ledger;
pub mod trezor;

pub use ledger::LedgerDevice;
pub use trezor::TrezorDevice;

/// Default time to wait for a device answer; signing waits on the operator
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// A device that can derive Ethereum addresses and sign legacy transactions
pub trait HardwareSigner: Send {
    fn kind(&self) -> DeviceKind;

    fn get_address(&mut self, path: &DerivationPath, display: bool) -> Result<Address>;

    /// Sign `transaction` with the key at `path`. The returned `v` is the
    /// EIP-155 value for the transaction's chain id.
    fn sign_transaction(
        &mut self,
        path: &DerivationPath,
        transaction: &UnsignedTransaction,
    ) -> Result<Signature>;

    fn features(&mut self) -> Result<DeviceFeatures>;
}

/// Open the first connected device, optionally restricted to one family
pub fn open_signer(
    selection: Option<DeviceKind>,
    prompt: Box<dyn Prompt>,
    timeout: Duration,
) -> Result<Box<dyn HardwareSigner>> {
    let mut candidates = list_connected_devices()?
        .into_iter()
        .filter(|device| selection.map_or(true, |kind| device.kind == kind));

    let chosen = candidates.next().ok_or_else(|| {
        CosignError::DeviceNotFound(match selection {
            Some(kind) => format!(" (looking for {})", kind),
            None => String::new(),
        })
    })?;
    for ignored in candidates {
        log::info!("⏭️  Ignoring additional {} ({})", ignored.name, ignored.unique_id);
    }

    log::info!("🔌 Using {} ({})", chosen.name, chosen.unique_id);
    open_device(&chosen, prompt, timeout)
}

/// Open a specific discovered device
pub fn open_device(
    device: &FriendlyUsbDevice,
    prompt: Box<dyn Prompt>,
    timeout: Duration,
) -> Result<Box<dyn HardwareSigner>> {
    let transport = open_transport(device)?;

    match device.kind {
        DeviceKind::Ledger => Ok(Box::new(LedgerDevice::new(transport, timeout))),
        DeviceKind::Trezor | DeviceKind::KeepKey => {
            let mut signer = TrezorDevice::new(transport, device.kind, prompt, timeout);
            signer.initialize()?;
            Ok(Box::new(signer))
        }
    }
}

fn open_transport(device: &FriendlyUsbDevice) -> Result<Box<dyn Transport>> {
    match device.interface {
        UsbInterface::Hid => {
            let path = device.hid_path.as_ref().ok_or_else(|| {
                CosignError::DeviceNotFound(format!(" ({} has no HID path)", device.name))
            })?;
            let api = HidApi::new()?;
            Ok(Box::new(HidTransport::open_path(&api, path)?))
        }
        UsbInterface::WebUsb => {
            let (bus, address) = device.bus_address.ok_or_else(|| {
                CosignError::DeviceNotFound(format!(" ({} has no USB address)", device.name))
            })?;
            let usb_device = rusb::devices()?
                .iter()
                .find(|d| d.bus_number() == bus && d.address() == address)
                .ok_or_else(|| {
                    CosignError::DeviceNotFound(format!(" ({} was disconnected)", device.name))
                })?;
            Ok(Box::new(WebUsbTransport::open(&usb_device)?))
        }
    }
}
