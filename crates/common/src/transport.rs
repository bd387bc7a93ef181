//! Transport abstraction
//!
//! The acquisition core only talks to USB hardware through these traits.
//! A backend provides device lookup by identifier pair, the open/close and
//! claim/release resource pairs, and asynchronous IN transfers.

use crate::error::UsbError;
use crate::usb_types::{DeviceIdentity, DeviceSummary, EndpointInfo, InterfaceInfo};
use bytes::Bytes;
use std::future::Future;

/// Device enumeration
pub trait Transport {
    type Device: UsbDevice;

    /// Find the first device matching `identity`, in enumeration order
    fn find_by_ids(
        &self,
        identity: DeviceIdentity,
    ) -> impl Future<Output = Result<Option<Self::Device>, UsbError>>;
}

/// A single discovered device
///
/// Methods are only meaningful in lifecycle order: `open`, `claim_interface`,
/// any number of `transfer`s, `release_interface`, `close`.
pub trait UsbDevice {
    fn summary(&self) -> &DeviceSummary;

    fn open(&mut self) -> impl Future<Output = Result<(), UsbError>>;

    /// Close the device handle. Never fails from the caller's point of view.
    fn close(&mut self) -> impl Future<Output = ()>;

    /// Interfaces of the active configuration, in declaration order
    fn interfaces(&self) -> impl Future<Output = Result<Vec<InterfaceInfo>, UsbError>>;

    fn claim_interface(&mut self, interface: u8) -> impl Future<Output = Result<(), UsbError>>;

    /// Release a claimed interface
    ///
    /// `close_endpoints` is advisory: it asks the backend to cancel or close
    /// anything still pending on the interface's endpoints. Backends whose
    /// transfers never outlive their call, such as the libusb worker, have
    /// nothing to cancel and only record it.
    fn release_interface(
        &mut self,
        interface: u8,
        close_endpoints: bool,
    ) -> impl Future<Output = Result<(), UsbError>>;

    /// Read up to `length` bytes from an IN endpoint
    fn transfer(
        &mut self,
        endpoint: EndpointInfo,
        length: usize,
    ) -> impl Future<Output = Result<Bytes, UsbError>>;
}
