//! Async channel bridge between the Tokio runtime and the USB thread

use crate::error::UsbError;
use crate::usb_types::{DeviceIdentity, DeviceSummary, EndpointInfo, InterfaceInfo};
use async_channel::{Receiver, Sender, bounded};
use bytes::Bytes;
use tokio::sync::oneshot;

/// Commands from Tokio runtime to USB thread
#[derive(Debug)]
pub enum UsbCommand {
    /// List every device on the bus
    ListDevices {
        response: oneshot::Sender<Result<Vec<DeviceSummary>, UsbError>>,
    },

    /// Select the first device matching an identifier pair
    FindDevice {
        identity: DeviceIdentity,
        response: oneshot::Sender<Result<Option<DeviceSummary>, UsbError>>,
    },

    /// Open the selected device
    Open {
        response: oneshot::Sender<Result<(), UsbError>>,
    },

    /// Read interface descriptors of the active configuration
    Interfaces {
        response: oneshot::Sender<Result<Vec<InterfaceInfo>, UsbError>>,
    },

    /// Claim an interface on the open device
    ClaimInterface {
        interface: u8,
        response: oneshot::Sender<Result<(), UsbError>>,
    },

    /// Release a claimed interface
    ReleaseInterface {
        interface: u8,
        close_endpoints: bool,
        response: oneshot::Sender<Result<(), UsbError>>,
    },

    /// Close the device handle
    Close { response: oneshot::Sender<()> },

    /// Read from an IN endpoint
    Transfer {
        endpoint: EndpointInfo,
        length: usize,
        response: oneshot::Sender<Result<Bytes, UsbError>>,
    },

    /// Shutdown the USB thread gracefully
    Shutdown,
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct UsbBridge {
    cmd_tx: Sender<UsbCommand>,
}

impl UsbBridge {
    /// Send a command to the USB thread
    pub async fn send_command(&self, cmd: UsbCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send a command and wait for the USB thread's reply
    ///
    /// `build` receives the reply sender and returns the command to submit.
    pub async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> UsbCommand,
    ) -> Result<R, UsbError> {
        let (tx, rx) = oneshot::channel();
        self.send_command(build(tx))
            .await
            .map_err(|e| UsbError::WorkerUnavailable(e.to_string()))?;
        rx.await
            .map_err(|_| UsbError::WorkerUnavailable("reply channel closed".to_string()))
    }
}

/// Handle for USB thread (blocking)
pub struct UsbWorker {
    cmd_rx: Receiver<UsbCommand>,
}

impl UsbWorker {
    /// Receive a command from Tokio runtime (blocking)
    ///
    /// Fails once every [`UsbBridge`] has been dropped.
    pub fn recv_command(&self) -> crate::Result<UsbCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the channel bridge between Tokio and USB thread
///
/// Returns (UsbBridge for Tokio, UsbWorker for USB thread)
pub fn create_usb_bridge() -> (UsbBridge, UsbWorker) {
    let (cmd_tx, cmd_rx) = bounded(16);

    (UsbBridge { cmd_tx }, UsbWorker { cmd_rx })
}
