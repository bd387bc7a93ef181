//! usb-acquire
//!
//! Reads a bounded number of samples from one USB device and releases it.
//! The core is transport-agnostic: [`session`] owns the open/claim/release/close
//! chain, [`acquisition`] drives the single-flight read loop, and [`usb`]
//! provides the libusb backend used by the binary.

pub mod acquisition;
pub mod config;
pub mod session;
pub mod sink;
pub mod usb;

pub use acquisition::{
    AcquisitionLoop, AcquisitionReport, AcquisitionState, TerminationPolicy, run,
};
pub use config::{AcquireConfig, AcquisitionSettings, DeviceSettings};
pub use session::{DeviceSession, SessionState, SetupError, TeardownReport};
pub use sink::{LogSink, SampleSink};
