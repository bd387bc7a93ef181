//! USB device wrapper owned by the worker thread
//!
//! Wraps an rusb device with its cached summary, the open handle and the
//! claimed interface. Dropping the wrapper releases and closes whatever is
//! still held, and gives any detached kernel driver back.

use crate::usb::transfers::{endpoint_info, read_in};
use bytes::Bytes;
use common::{DeviceIdentity, DeviceSummary, EndpointInfo, InterfaceInfo, UsbError};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::time::Duration;
use tracing::{debug, warn};

/// Handle operations involved in taking over an interface
pub trait InterfaceControl {
    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool>;
    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()>;
    fn attach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()>;
    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()>;
    fn release_interface(&mut self, interface: u8) -> rusb::Result<()>;
}

impl<T: UsbContext> InterfaceControl for DeviceHandle<T> {
    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool> {
        DeviceHandle::kernel_driver_active(self, interface)
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::detach_kernel_driver(self, interface)
    }

    fn attach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::attach_kernel_driver(self, interface)
    }

    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::claim_interface(self, interface)
    }

    fn release_interface(&mut self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::release_interface(self, interface)
    }
}

/// Claimed interface and the kernel driver we still owe a reattach
#[derive(Debug, Default)]
pub struct InterfaceClaim {
    detach_kernel_driver: bool,
    claimed: Option<u8>,
    detached: Option<u8>,
}

impl InterfaceClaim {
    pub fn new(detach_kernel_driver: bool) -> Self {
        Self {
            detach_kernel_driver,
            ..Default::default()
        }
    }

    pub fn claimed(&self) -> Option<u8> {
        self.claimed
    }

    /// Detach an active kernel driver if configured, then claim
    ///
    /// A failed claim hands the interface straight back to its driver.
    pub fn claim<H: InterfaceControl>(&mut self, handle: &mut H, interface: u8) -> rusb::Result<()> {
        if self.detach_kernel_driver {
            match handle.kernel_driver_active(interface) {
                Ok(true) => {
                    debug!("Detaching kernel driver from interface {}", interface);
                    handle.detach_kernel_driver(interface)?;
                    self.detached = Some(interface);
                }
                Ok(false) => {
                    debug!("No kernel driver active on interface {}", interface);
                }
                Err(e) => {
                    debug!(
                        "Could not check kernel driver status for interface {}: {}",
                        interface, e
                    );
                }
            }
        }

        if let Err(e) = handle.claim_interface(interface) {
            self.reattach(handle);
            return Err(e);
        }

        self.claimed = Some(interface);
        Ok(())
    }

    /// Release an interface and give it back to its kernel driver
    ///
    /// The interface counts as released even when libusb reports an error.
    pub fn release<H: InterfaceControl>(&mut self, handle: &mut H, interface: u8) -> rusb::Result<()> {
        let result = handle.release_interface(interface);
        if self.claimed == Some(interface) {
            self.claimed = None;
        }

        self.reattach(handle);
        result
    }

    /// Release whatever is still claimed and reattach any detached driver
    pub fn release_all<H: InterfaceControl>(&mut self, handle: &mut H) {
        if let Some(interface) = self.claimed {
            if let Err(e) = self.release(handle, interface) {
                warn!("Failed to release interface {}: {}", interface, e);
            }
        }
        self.reattach(handle);
    }

    fn reattach<H: InterfaceControl>(&mut self, handle: &mut H) {
        let Some(interface) = self.detached.take() else {
            return;
        };

        match handle.attach_kernel_driver(interface) {
            Ok(()) => debug!("Reattached kernel driver to interface {}", interface),
            Err(e) => warn!(
                "Could not reattach kernel driver to interface {}: {}",
                interface, e
            ),
        }
    }
}

pub struct LibusbDevice {
    /// Underlying rusb device
    device: Device<Context>,
    summary: DeviceSummary,
    /// Device handle (if opened)
    handle: Option<DeviceHandle<Context>>,
    claim: InterfaceClaim,
}

impl LibusbDevice {
    pub fn new(device: Device<Context>, detach_kernel_driver: bool) -> Result<Self, rusb::Error> {
        let summary = describe(&device)?;

        Ok(Self {
            device,
            summary,
            handle: None,
            claim: InterfaceClaim::new(detach_kernel_driver),
        })
    }

    pub fn summary(&self) -> &DeviceSummary {
        &self.summary
    }

    pub fn open(&mut self) -> Result<(), rusb::Error> {
        if self.handle.is_some() {
            return Err(rusb::Error::Busy);
        }

        let handle = self.device.open()?;
        debug!("Opened device {}", self.summary.identity);
        self.handle = Some(handle);
        Ok(())
    }

    /// Interfaces of the active configuration, first alternate setting only
    pub fn interfaces(&self) -> Result<Vec<InterfaceInfo>, rusb::Error> {
        let config = self.device.active_config_descriptor()?;

        Ok(config
            .interfaces()
            .filter_map(|interface| {
                let descriptor = interface.descriptors().next()?;
                Some(InterfaceInfo {
                    number: interface.number(),
                    endpoints: descriptor
                        .endpoint_descriptors()
                        .map(|ep| endpoint_info(&ep))
                        .collect(),
                })
            })
            .collect())
    }

    pub fn claim_interface(&mut self, interface: u8) -> Result<(), rusb::Error> {
        let handle = self.handle.as_mut().ok_or(rusb::Error::InvalidParam)?;
        self.claim.claim(handle, interface)
    }

    pub fn release_interface(&mut self, interface: u8) -> Result<(), rusb::Error> {
        let handle = self.handle.as_mut().ok_or(rusb::Error::InvalidParam)?;
        self.claim.release(handle, interface)
    }

    pub fn read(
        &self,
        endpoint: EndpointInfo,
        length: usize,
        timeout: Duration,
    ) -> Result<Bytes, UsbError> {
        let handle = self.handle.as_ref().ok_or(UsbError::InvalidParam)?;
        read_in(handle, endpoint, length, timeout)
    }

    /// Close the device, releasing anything still claimed
    pub fn close(&mut self) {
        let Some(mut handle) = self.handle.take() else {
            return;
        };

        self.claim.release_all(&mut handle);
        drop(handle);
        debug!("Closed device {}", self.summary.identity);
    }
}

impl Drop for LibusbDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read the bus location and identifier pair of a device
pub fn describe(device: &Device<Context>) -> Result<DeviceSummary, rusb::Error> {
    let descriptor = device.device_descriptor()?;

    Ok(DeviceSummary {
        identity: DeviceIdentity::new(descriptor.vendor_id(), descriptor.product_id()),
        bus_number: device.bus_number(),
        device_address: device.address(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum HandleCall {
        Detach(u8),
        Attach(u8),
        Claim(u8),
        Release(u8),
    }

    #[derive(Default)]
    struct FakeHandle {
        driver_active: bool,
        claim_error: Option<rusb::Error>,
        release_error: Option<rusb::Error>,
        calls: Vec<HandleCall>,
    }

    impl InterfaceControl for FakeHandle {
        fn kernel_driver_active(&self, _interface: u8) -> rusb::Result<bool> {
            Ok(self.driver_active)
        }

        fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
            self.calls.push(HandleCall::Detach(interface));
            Ok(())
        }

        fn attach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
            self.calls.push(HandleCall::Attach(interface));
            Ok(())
        }

        fn claim_interface(&mut self, interface: u8) -> rusb::Result<()> {
            self.calls.push(HandleCall::Claim(interface));
            self.claim_error.map_or(Ok(()), Err)
        }

        fn release_interface(&mut self, interface: u8) -> rusb::Result<()> {
            self.calls.push(HandleCall::Release(interface));
            self.release_error.map_or(Ok(()), Err)
        }
    }

    #[test]
    fn test_claim_and_release_reattach_driver() {
        let mut handle = FakeHandle {
            driver_active: true,
            ..Default::default()
        };
        let mut claim = InterfaceClaim::new(true);

        claim.claim(&mut handle, 0).unwrap();
        assert_eq!(claim.claimed(), Some(0));

        claim.release(&mut handle, 0).unwrap();
        assert_eq!(claim.claimed(), None);
        assert_eq!(
            handle.calls,
            vec![
                HandleCall::Detach(0),
                HandleCall::Claim(0),
                HandleCall::Release(0),
                HandleCall::Attach(0),
            ]
        );
    }

    #[test]
    fn test_failed_claim_reattaches_driver() {
        let mut handle = FakeHandle {
            driver_active: true,
            claim_error: Some(rusb::Error::Busy),
            ..Default::default()
        };
        let mut claim = InterfaceClaim::new(true);

        assert_eq!(claim.claim(&mut handle, 1), Err(rusb::Error::Busy));
        assert_eq!(claim.claimed(), None);
        assert_eq!(
            handle.calls,
            vec![
                HandleCall::Detach(1),
                HandleCall::Claim(1),
                HandleCall::Attach(1),
            ]
        );

        // Nothing left to give back on close
        claim.release_all(&mut handle);
        assert_eq!(handle.calls.len(), 3);
    }

    #[test]
    fn test_release_error_still_reattaches_driver() {
        let mut handle = FakeHandle {
            driver_active: true,
            release_error: Some(rusb::Error::NoDevice),
            ..Default::default()
        };
        let mut claim = InterfaceClaim::new(true);

        claim.claim(&mut handle, 0).unwrap();
        assert_eq!(claim.release(&mut handle, 0), Err(rusb::Error::NoDevice));
        assert_eq!(claim.claimed(), None);
        assert_eq!(handle.calls.last(), Some(&HandleCall::Attach(0)));
    }

    #[test]
    fn test_release_all_on_close() {
        let mut handle = FakeHandle {
            driver_active: true,
            ..Default::default()
        };
        let mut claim = InterfaceClaim::new(true);

        claim.claim(&mut handle, 2).unwrap();
        claim.release_all(&mut handle);

        assert_eq!(claim.claimed(), None);
        assert_eq!(
            &handle.calls[2..],
            &[HandleCall::Release(2), HandleCall::Attach(2)]
        );
    }

    #[test]
    fn test_detach_disabled_leaves_driver_alone() {
        let mut handle = FakeHandle {
            driver_active: true,
            claim_error: Some(rusb::Error::Access),
            ..Default::default()
        };
        let mut claim = InterfaceClaim::new(false);

        assert!(claim.claim(&mut handle, 0).is_err());
        assert_eq!(handle.calls, vec![HandleCall::Claim(0)]);
    }
}
