//! libusb transport backend
//!
//! [`RusbTransport`] implements [`Transport`] on top of `rusb`. All libusb
//! calls execute on the `usb-worker` thread so the async acquisition loop
//! never blocks its runtime; each operation is one command on the bridge and
//! one oneshot reply.

pub mod device;
pub mod transfers;
pub mod worker;

use bytes::Bytes;
use common::{
    DeviceIdentity, DeviceSummary, EndpointInfo, InterfaceInfo, Transport, UsbBridge, UsbCommand,
    UsbDevice, UsbError, create_usb_bridge,
};
use std::thread::JoinHandle;
use tracing::warn;

pub use transfers::map_rusb_error;
pub use worker::{UsbWorkerThread, WorkerOptions, spawn_usb_worker};

pub struct RusbTransport {
    bridge: UsbBridge,
    worker: Option<JoinHandle<Result<(), rusb::Error>>>,
}

impl RusbTransport {
    /// Create the libusb context and start the worker thread
    pub fn spawn(options: WorkerOptions) -> common::Result<Self> {
        let (bridge, worker) = create_usb_bridge();
        let worker_thread = UsbWorkerThread::new(worker, options).map_err(map_rusb_error)?;
        let handle = spawn_usb_worker(worker_thread)?;

        Ok(Self {
            bridge,
            worker: Some(handle),
        })
    }

    /// Every device currently on the bus
    pub async fn list_devices(&self) -> Result<Vec<DeviceSummary>, UsbError> {
        self.bridge
            .request(|response| UsbCommand::ListDevices { response })
            .await?
    }

    /// Stop the worker thread and wait for it to exit
    pub async fn shutdown(mut self) -> common::Result<()> {
        self.bridge.send_command(UsbCommand::Shutdown).await?;

        match self.worker.take().map(|handle| handle.join()) {
            Some(Ok(Err(e))) => Err(map_rusb_error(e).into()),
            Some(Err(_)) => Err(common::Error::Channel(
                "USB worker thread panicked".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl Transport for RusbTransport {
    type Device = RusbDevice;

    async fn find_by_ids(&self, identity: DeviceIdentity) -> Result<Option<RusbDevice>, UsbError> {
        let summary = self
            .bridge
            .request(|response| UsbCommand::FindDevice { identity, response })
            .await??;

        Ok(summary.map(|summary| RusbDevice {
            bridge: self.bridge.clone(),
            summary,
        }))
    }
}

/// Async proxy for the device selected on the worker thread
pub struct RusbDevice {
    bridge: UsbBridge,
    summary: DeviceSummary,
}

impl UsbDevice for RusbDevice {
    fn summary(&self) -> &DeviceSummary {
        &self.summary
    }

    async fn open(&mut self) -> Result<(), UsbError> {
        self.bridge
            .request(|response| UsbCommand::Open { response })
            .await?
    }

    async fn close(&mut self) {
        if let Err(e) = self
            .bridge
            .request(|response| UsbCommand::Close { response })
            .await
        {
            warn!("Close request did not reach the USB worker: {}", e);
        }
    }

    async fn interfaces(&self) -> Result<Vec<InterfaceInfo>, UsbError> {
        self.bridge
            .request(|response| UsbCommand::Interfaces { response })
            .await?
    }

    async fn claim_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        self.bridge
            .request(|response| UsbCommand::ClaimInterface {
                interface,
                response,
            })
            .await?
    }

    async fn release_interface(
        &mut self,
        interface: u8,
        close_endpoints: bool,
    ) -> Result<(), UsbError> {
        self.bridge
            .request(|response| UsbCommand::ReleaseInterface {
                interface,
                close_endpoints,
                response,
            })
            .await?
    }

    async fn transfer(&mut self, endpoint: EndpointInfo, length: usize) -> Result<Bytes, UsbError> {
        self.bridge
            .request(|response| UsbCommand::Transfer {
                endpoint,
                length,
                response,
            })
            .await?
    }
}
