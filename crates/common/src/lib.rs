//! Common utilities for usb-acquire
//!
//! This crate provides the pieces shared between the acquisition core and its
//! USB backends: transport traits, USB value types, error handling, logging
//! setup, and the async channel bridge for USB thread communication.

pub mod channel;
pub mod error;
pub mod logging;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transport;
pub mod usb_types;

pub use channel::{UsbBridge, UsbCommand, UsbWorker, create_usb_bridge};
pub use error::{Error, Result, UsbError};
pub use logging::setup_logging;
pub use transport::{Transport, UsbDevice};
pub use usb_types::{
    DeviceIdentity, DeviceSummary, Direction, EndpointInfo, InterfaceInfo, Sample, TransferKind,
    format_bytes,
};
