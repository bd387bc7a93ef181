//! Device session lifecycle
//!
//! A [`DeviceSession`] exists only once the device has been opened, so the
//! value itself carries the obligation to close it. [`DeviceSession::teardown`]
//! consumes the session: the interface is released (if claimed) and the
//! device closed exactly once, whatever the release outcome.
//!
//! Lifecycle:
//! `Unopened -> Opened -> Claimed -> EndpointResolved -> Acquiring -> Releasing -> Closed`

use bytes::Bytes;
use common::{DeviceIdentity, EndpointInfo, InterfaceInfo, Transport, UsbDevice, UsbError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Failures that stop the run before acquisition starts
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Failed to enumerate USB devices: {0}")]
    Enumerate(#[source] UsbError),

    #[error("Device not found ({0})")]
    NotFound(DeviceIdentity),

    #[error("Failed to open device {identity}: {source}")]
    Open {
        identity: DeviceIdentity,
        source: UsbError,
    },

    #[error("Failed to read interface descriptors: {0}")]
    Descriptors(#[source] UsbError),

    #[error("Device has no interfaces to claim")]
    NoInterface,

    #[error("Failed to claim interface {interface}: {source}")]
    Claim { interface: u8, source: UsbError },

    #[error("Endpoint with direction \"in\" not found on interface {interface}")]
    EndpointNotFound { interface: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Opened,
    Claimed,
    EndpointResolved,
    Acquiring,
    Releasing,
    Closed,
}

/// Outcome of [`DeviceSession::teardown`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Set when releasing the interface failed; the device was closed anyway
    pub release_error: Option<UsbError>,
}

/// Query the transport for the first device matching `identity`
pub async fn locate<T: Transport>(
    transport: &T,
    identity: DeviceIdentity,
) -> Result<T::Device, SetupError> {
    let device = transport
        .find_by_ids(identity)
        .await
        .map_err(SetupError::Enumerate)?
        .ok_or(SetupError::NotFound(identity))?;

    let summary = device.summary();
    debug!(
        "Found device {} at bus {:03} address {:03}",
        identity, summary.bus_number, summary.device_address
    );
    Ok(device)
}

/// First endpoint of `interface` whose direction is IN
pub fn find_read_endpoint(interface: &InterfaceInfo) -> Result<EndpointInfo, SetupError> {
    interface
        .endpoints
        .iter()
        .find(|ep| ep.is_in())
        .copied()
        .ok_or(SetupError::EndpointNotFound {
            interface: interface.number,
        })
}

/// Exclusive owner of one opened device and its claimed interface
pub struct DeviceSession<D: UsbDevice> {
    device: D,
    identity: DeviceIdentity,
    state: SessionState,
    claimed: Option<InterfaceInfo>,
}

impl<D: UsbDevice> DeviceSession<D> {
    /// Open `device`. Nothing is held on failure.
    pub async fn open(mut device: D, identity: DeviceIdentity) -> Result<Self, SetupError> {
        device
            .open()
            .await
            .map_err(|source| SetupError::Open { identity, source })?;

        info!("Device opened");

        Ok(Self {
            device,
            identity,
            state: SessionState::Opened,
            claimed: None,
        })
    }

    /// Locate, open and prepare the device for reading
    ///
    /// If anything fails after the open succeeded, the session is torn down
    /// before the error is returned.
    pub async fn start<T>(
        transport: &T,
        identity: DeviceIdentity,
    ) -> Result<(Self, EndpointInfo), SetupError>
    where
        T: Transport<Device = D>,
    {
        let device = locate(transport, identity).await?;
        let mut session = Self::open(device, identity).await?;

        match session.establish().await {
            Ok(endpoint) => Ok((session, endpoint)),
            Err(e) => {
                warn!("Setup failed after open: {}", e);
                session.teardown().await;
                Err(e)
            }
        }
    }

    /// Claim the first interface and resolve its read endpoint
    pub async fn establish(&mut self) -> Result<EndpointInfo, SetupError> {
        let interface = self.claim_first_interface().await?;
        let endpoint = find_read_endpoint(interface)?;

        debug!(
            "Using endpoint {:#04x} ({:?}, max packet {})",
            endpoint.address, endpoint.transfer_kind, endpoint.max_packet_size
        );
        self.state = SessionState::EndpointResolved;
        Ok(endpoint)
    }

    /// Claim the first declared interface, whatever its number
    pub async fn claim_first_interface(&mut self) -> Result<&InterfaceInfo, SetupError> {
        let interfaces = self
            .device
            .interfaces()
            .await
            .map_err(SetupError::Descriptors)?;

        let interface = interfaces
            .into_iter()
            .next()
            .ok_or(SetupError::NoInterface)?;

        self.device
            .claim_interface(interface.number)
            .await
            .map_err(|source| SetupError::Claim {
                interface: interface.number,
                source,
            })?;

        debug!("Claimed interface {}", interface.number);
        self.state = SessionState::Claimed;
        Ok(self.claimed.insert(interface))
    }

    /// Submit one read and wait for it to complete
    pub async fn read(&mut self, endpoint: EndpointInfo, length: usize) -> Result<Bytes, UsbError> {
        self.state = SessionState::Acquiring;
        self.device.transfer(endpoint, length).await
    }

    /// Release the claimed interface, then close the device
    pub async fn teardown(mut self) -> TeardownReport {
        self.state = SessionState::Releasing;

        let release_error = match self.claimed.take() {
            Some(interface) => match self.device.release_interface(interface.number, true).await {
                Ok(()) => {
                    debug!("Released interface {}", interface.number);
                    None
                }
                Err(e) => {
                    error!("Error releasing the interface: {}", e);
                    Some(e)
                }
            },
            None => None,
        };

        self.device.close().await;
        self.state = SessionState::Closed;
        info!("Device closed");

        TeardownReport { release_error }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn claimed_interface(&self) -> Option<&InterfaceInfo> {
        self.claimed.as_ref()
    }
}

impl<D: UsbDevice> Drop for DeviceSession<D> {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            warn!(
                "Session for {} dropped in state {:?} without teardown",
                self.identity, self.state
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{MockDeviceSpec, MockTransport, TEST_IDENTITY, bulk_endpoint};
    use common::{Direction, InterfaceInfo};

    #[test]
    fn test_find_read_endpoint_picks_first_in() {
        let interface = InterfaceInfo {
            number: 0,
            endpoints: vec![
                bulk_endpoint(0x02, Direction::Out),
                bulk_endpoint(0x83, Direction::In),
                bulk_endpoint(0x81, Direction::In),
            ],
        };

        let endpoint = find_read_endpoint(&interface).unwrap();
        assert_eq!(endpoint.address, 0x83);
    }

    #[test]
    fn test_find_read_endpoint_without_in() {
        let interface = InterfaceInfo {
            number: 2,
            endpoints: vec![bulk_endpoint(0x02, Direction::Out)],
        };

        assert!(matches!(
            find_read_endpoint(&interface),
            Err(SetupError::EndpointNotFound { interface: 2 })
        ));
    }

    #[tokio::test]
    async fn test_session_state_progression() {
        let transport = MockTransport::new(vec![MockDeviceSpec::new(TEST_IDENTITY)]);
        let device = locate(&transport, TEST_IDENTITY).await.unwrap();

        let mut session = DeviceSession::open(device, TEST_IDENTITY).await.unwrap();
        assert_eq!(session.state(), SessionState::Opened);

        let endpoint = session.establish().await.unwrap();
        assert_eq!(session.state(), SessionState::EndpointResolved);
        assert_eq!(session.claimed_interface().map(|i| i.number), Some(0));

        session.read(endpoint, 16).await.unwrap();
        assert_eq!(session.state(), SessionState::Acquiring);

        let report = session.teardown().await;
        assert_eq!(report, TeardownReport::default());
    }

    #[tokio::test]
    async fn test_claim_first_interface_uses_declared_order() {
        let spec = MockDeviceSpec::new(TEST_IDENTITY).with_interfaces(vec![
            InterfaceInfo {
                number: 3,
                endpoints: vec![bulk_endpoint(0x84, Direction::In)],
            },
            InterfaceInfo {
                number: 0,
                endpoints: vec![bulk_endpoint(0x81, Direction::In)],
            },
        ]);
        let transport = MockTransport::new(vec![spec]);
        let device = locate(&transport, TEST_IDENTITY).await.unwrap();
        let mut session = DeviceSession::open(device, TEST_IDENTITY).await.unwrap();

        let interface = session.claim_first_interface().await.unwrap();
        assert_eq!(interface.number, 3);

        session.teardown().await;
    }

    #[tokio::test]
    async fn test_open_failure_holds_nothing() {
        let spec = MockDeviceSpec::new(TEST_IDENTITY).fail_open(UsbError::Access);
        let transport = MockTransport::new(vec![spec]);
        let device = locate(&transport, TEST_IDENTITY).await.unwrap();

        let result = DeviceSession::open(device, TEST_IDENTITY).await;
        assert!(matches!(
            result,
            Err(SetupError::Open {
                source: UsbError::Access,
                ..
            })
        ));
    }

    #[test]
    fn test_setup_error_display() {
        let err = SetupError::NotFound(TEST_IDENTITY);
        assert_eq!(err.to_string(), "Device not found (0403:f241)");
    }
}
