//! USB device discovery and the bulk channel over rusb.
//!
//! A U3V control interface advertises class 0xEF (Miscellaneous Device),
//! subclass 0x05 (USB3 Vision), protocol 0x00, and carries one bulk IN and
//! one bulk OUT endpoint.

use std::io;
use std::time::Duration;

use log::info;
use rusb::{Context, Device, DeviceHandle, Direction, TransferType, UsbContext};

use crate::error::{Error, Result};
use crate::transport::BulkChannel;

/// Fixed timeout applied to every bulk transfer.
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(10);

/// Default vendor id of the target device.
pub const DEFAULT_VID: u16 = 0x04b4;
/// Default product id of the target device.
pub const DEFAULT_PID: u16 = 0x1003;

/// One enumerated device matching the vendor/product filter.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Bus the device is attached to.
    pub bus: u8,
    /// Address on that bus.
    pub address: u8,
    /// iSerialNumber string, when the device exposes one.
    pub serial: Option<String>,
}

/// A claimed U3V control interface ready for bulk traffic.
pub struct UsbChannel {
    handle: DeviceHandle<Context>,
    iface: u8,
    ep_in: u8,
    ep_out: u8,
}

impl UsbChannel {
    /// Opens a device by vendor/product id and claims its control interface.
    ///
    /// With `serial` set, only the device with that exact iSerialNumber
    /// matches. Without it, a single match is taken directly; multiple
    /// matches are handed to `choose`, which picks an index into the
    /// candidate list or returns `None` to abort.
    pub fn open(
        vid: u16,
        pid: u16,
        serial: Option<&str>,
        choose: impl FnOnce(&[DeviceInfo]) -> Option<usize>,
    ) -> Result<UsbChannel> {
        let ctx = Context::new()?;
        let mut candidates: Vec<(DeviceHandle<Context>, DeviceInfo)> = Vec::new();
        for device in ctx.devices()?.iter() {
            let Ok(desc) = device.device_descriptor() else {
                continue;
            };
            if desc.vendor_id() != vid || desc.product_id() != pid {
                continue;
            }
            let Ok(handle) = device.open() else {
                continue;
            };
            let info = DeviceInfo {
                bus: device.bus_number(),
                address: device.address(),
                serial: handle.read_serial_number_string_ascii(&desc).ok(),
            };
            if let Some(want) = serial {
                if info.serial.as_deref() == Some(want) {
                    return Self::claim(handle, vid, pid);
                }
                continue;
            }
            candidates.push((handle, info));
        }

        if serial.is_some() || candidates.is_empty() {
            return Err(Error::DeviceNotFound {
                vid,
                pid,
                serial: serial.map(str::to_owned),
            });
        }

        let picked = if candidates.len() == 1 {
            0
        } else {
            let infos: Vec<DeviceInfo> = candidates.iter().map(|(_, i)| i.clone()).collect();
            choose(&infos).ok_or(Error::SelectionCancelled)?
        };
        if picked >= candidates.len() {
            return Err(Error::SelectionCancelled);
        }
        let (handle, _) = candidates.swap_remove(picked);
        Self::claim(handle, vid, pid)
    }

    /// Finds the control interface, detaches any kernel driver, claims it.
    fn claim(handle: DeviceHandle<Context>, vid: u16, pid: u16) -> Result<UsbChannel> {
        let (iface, ep_out, ep_in) = find_control_interface(&handle.device())?;
        if handle.kernel_driver_active(iface).unwrap_or(false) {
            handle.detach_kernel_driver(iface)?;
        }
        handle.claim_interface(iface)?;
        info!(
            "claimed USB3 Vision device {vid:04x}:{pid:04x} \
             interface {iface} (OUT=0x{ep_out:02x}, IN=0x{ep_in:02x})"
        );
        Ok(UsbChannel {
            handle,
            iface,
            ep_in,
            ep_out,
        })
    }
}

/// Locates the U3V control interface and its bulk endpoint pair.
fn find_control_interface(device: &Device<Context>) -> Result<(u8, u8, u8)> {
    let config = device.active_config_descriptor()?;
    for interface in config.interfaces() {
        for desc in interface.descriptors() {
            if desc.class_code() != 0xEF
                || desc.sub_class_code() != 0x05
                || desc.protocol_code() != 0x00
            {
                continue;
            }
            let mut ep_in = None;
            let mut ep_out = None;
            for ep in desc.endpoint_descriptors() {
                if ep.transfer_type() != TransferType::Bulk {
                    continue;
                }
                match ep.direction() {
                    Direction::In => ep_in = Some(ep.address()),
                    Direction::Out => ep_out = Some(ep.address()),
                }
            }
            if let (Some(ep_in), Some(ep_out)) = (ep_in, ep_out) {
                return Ok((desc.interface_number(), ep_out, ep_in));
            }
        }
    }
    Err(Error::NoControlInterface)
}

impl BulkChannel for UsbChannel {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        let n = self
            .handle
            .write_bulk(self.ep_out, data, TRANSFER_TIMEOUT)
            .map_err(io::Error::other)?;
        if n != data.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short bulk OUT: {n}/{} bytes", data.len()),
            ));
        }
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self
            .handle
            .read_bulk(self.ep_in, buf, TRANSFER_TIMEOUT)
            .map_err(io::Error::other)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "empty bulk IN transfer",
            ));
        }
        Ok(n)
    }
}

impl Drop for UsbChannel {
    /// Releases the claimed interface; the handle closes itself afterwards.
    fn drop(&mut self) {
        let _ = self.handle.release_interface(self.iface);
    }
}
