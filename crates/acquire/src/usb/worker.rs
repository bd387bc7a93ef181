//! USB worker thread
//!
//! Dedicated thread that owns the libusb context and the selected device.
//! Blocking libusb calls run here; the async side reaches it through the
//! command bridge from `common::channel` and waits on oneshot replies.

use crate::config::AcquireConfig;
use crate::usb::device::{LibusbDevice, describe};
use crate::usb::transfers::map_rusb_error;
use common::{DeviceIdentity, DeviceSummary, UsbCommand, UsbError, UsbWorker};
use rusb::{Context, UsbContext};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Backend tunables
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub detach_kernel_driver: bool,
    pub transfer_timeout: Duration,
}

impl From<&AcquireConfig> for WorkerOptions {
    fn from(config: &AcquireConfig) -> Self {
        Self {
            detach_kernel_driver: config.device.detach_kernel_driver,
            transfer_timeout: config.acquisition.transfer_timeout(),
        }
    }
}

pub struct UsbWorkerThread {
    context: Context,
    worker: UsbWorker,
    options: WorkerOptions,
    /// Device selected by the last `FindDevice`
    device: Option<LibusbDevice>,
}

impl UsbWorkerThread {
    pub fn new(worker: UsbWorker, options: WorkerOptions) -> Result<Self, rusb::Error> {
        let context = Context::new()?;

        Ok(Self {
            context,
            worker,
            options,
            device: None,
        })
    }

    /// Process commands until `Shutdown` arrives or every bridge is dropped
    pub fn run(mut self) -> Result<(), rusb::Error> {
        info!("USB worker thread started");

        loop {
            match self.worker.recv_command() {
                Ok(UsbCommand::Shutdown) => {
                    debug!("USB worker shutting down");
                    break;
                }
                Ok(cmd) => self.handle_command(cmd),
                Err(e) => {
                    debug!("Command channel closed: {}", e);
                    break;
                }
            }
        }

        if let Some(mut device) = self.device.take() {
            device.close();
        }

        info!("USB worker thread stopped");
        Ok(())
    }

    /// Handle a command from the Tokio runtime
    fn handle_command(&mut self, cmd: UsbCommand) {
        // A panic drops the reply sender, which the requester sees as an error
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        if let Err(e) = result {
            error!("Panic in USB command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&mut self, cmd: UsbCommand) {
        match cmd {
            UsbCommand::ListDevices { response } => {
                let _ = response.send(self.list_devices().map_err(map_rusb_error));
            }

            UsbCommand::FindDevice { identity, response } => {
                let _ = response.send(self.find_device(identity).map_err(map_rusb_error));
            }

            UsbCommand::Open { response } => {
                let result = self
                    .device_mut()
                    .and_then(|device| device.open().map_err(map_rusb_error));
                let _ = response.send(result);
            }

            UsbCommand::Interfaces { response } => {
                let result = self
                    .device_mut()
                    .and_then(|device| device.interfaces().map_err(map_rusb_error));
                let _ = response.send(result);
            }

            UsbCommand::ClaimInterface {
                interface,
                response,
            } => {
                let result = self.device_mut().and_then(|device| {
                    device
                        .claim_interface(interface)
                        .map_err(map_rusb_error)
                });
                let _ = response.send(result);
            }

            UsbCommand::ReleaseInterface {
                interface,
                close_endpoints,
                response,
            } => {
                // Transfers never outlive their command, so there is nothing to cancel
                debug!(
                    "Releasing interface {} (close_endpoints={})",
                    interface, close_endpoints
                );
                let result = self.device_mut().and_then(|device| {
                    device
                        .release_interface(interface)
                        .map_err(map_rusb_error)
                });
                let _ = response.send(result);
            }

            UsbCommand::Close { response } => {
                match self.device.as_mut() {
                    Some(device) => device.close(),
                    None => warn!("Close requested with no device selected"),
                }
                let _ = response.send(());
            }

            UsbCommand::Transfer {
                endpoint,
                length,
                response,
            } => {
                let timeout = self.options.transfer_timeout;
                let result = self
                    .device_mut()
                    .and_then(|device| device.read(endpoint, length, timeout));
                let _ = response.send(result);
            }

            UsbCommand::Shutdown => {
                // Already handled in run loop
                unreachable!()
            }
        }
    }

    fn device_mut(&mut self) -> Result<&mut LibusbDevice, UsbError> {
        self.device.as_mut().ok_or(UsbError::NotFound)
    }

    fn list_devices(&self) -> Result<Vec<DeviceSummary>, rusb::Error> {
        let devices = self.context.devices()?;

        let summaries: Vec<DeviceSummary> = devices
            .iter()
            .filter_map(|device| match describe(&device) {
                Ok(summary) => Some(summary),
                Err(e) => {
                    debug!(
                        "Skipping device at bus {:03} address {:03}: {}",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                    None
                }
            })
            .collect();

        debug!("Enumerated {} devices", summaries.len());
        Ok(summaries)
    }

    /// Select the first device matching `identity`, in enumeration order
    fn find_device(&mut self, identity: DeviceIdentity) -> Result<Option<DeviceSummary>, rusb::Error> {
        let devices = self.context.devices()?;

        for device in devices.iter() {
            let Ok(summary) = describe(&device) else {
                continue;
            };
            if summary.identity != identity {
                continue;
            }

            let selected = LibusbDevice::new(device, self.options.detach_kernel_driver)?;
            let summary = selected.summary().clone();
            self.device = Some(selected);
            return Ok(Some(summary));
        }

        Ok(None)
    }
}

/// Spawn the USB worker thread
pub fn spawn_usb_worker(
    worker_thread: UsbWorkerThread,
) -> std::io::Result<JoinHandle<Result<(), rusb::Error>>> {
    std::thread::Builder::new()
        .name("usb-worker".to_string())
        .spawn(move || worker_thread.run())
}
