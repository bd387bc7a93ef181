//! Test utilities for usb-acquire
//!
//! Provides an instrumented in-memory [`Transport`] so the acquisition core can
//! be exercised without hardware. Every call made through the mock is appended
//! to a shared [`CallLog`], and failures can be injected per operation.
//!
//! Enabled for downstream crates through the `test-utils` feature.

use crate::error::UsbError;
use crate::transport::{Transport, UsbDevice};
use crate::usb_types::{
    DeviceIdentity, DeviceSummary, Direction, EndpointInfo, InterfaceInfo, TransferKind,
};
use bytes::Bytes;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Identifier pair used throughout the tests
pub const TEST_IDENTITY: DeviceIdentity = DeviceIdentity::new(0x0403, 0xf241);

/// One call observed by the mock transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Find(DeviceIdentity),
    Open,
    Interfaces,
    Claim(u8),
    Transfer {
        attempt: u32,
        endpoint: u8,
        length: usize,
    },
    Release {
        interface: u8,
        close_endpoints: bool,
    },
    Close,
}

#[derive(Debug, Default)]
struct Journal {
    calls: Vec<TransportCall>,
    in_flight: u32,
    max_in_flight: u32,
}

/// Shared, ordered record of transport calls
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    inner: Arc<Mutex<Journal>>,
}

impl CallLog {
    fn journal(&self) -> MutexGuard<'_, Journal> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: TransportCall) {
        self.journal().calls.push(call);
    }

    /// Snapshot of all calls so far
    pub fn calls(&self) -> Vec<TransportCall> {
        self.journal().calls.clone()
    }

    /// Number of calls matching `pred`
    pub fn count(&self, pred: impl Fn(&TransportCall) -> bool) -> usize {
        self.journal().calls.iter().filter(|c| pred(c)).count()
    }

    /// Index of the first call matching `pred`
    pub fn position(&self, pred: impl Fn(&TransportCall) -> bool) -> Option<usize> {
        self.journal().calls.iter().position(pred)
    }

    /// Number of transfers submitted
    pub fn transfers(&self) -> usize {
        self.count(|c| matches!(c, TransportCall::Transfer { .. }))
    }

    /// Highest number of transfers observed outstanding at once
    pub fn max_in_flight(&self) -> u32 {
        self.journal().max_in_flight
    }

    fn begin_transfer(&self) {
        let mut journal = self.journal();
        journal.in_flight += 1;
        journal.max_in_flight = journal.max_in_flight.max(journal.in_flight);
        assert!(
            journal.in_flight <= 1,
            "{} transfers outstanding at once",
            journal.in_flight
        );
    }

    fn end_transfer(&self) {
        self.journal().in_flight -= 1;
    }
}

/// Behaviour of one simulated device
#[derive(Debug, Clone)]
pub struct MockDeviceSpec {
    pub summary: DeviceSummary,
    pub interfaces: Vec<InterfaceInfo>,
    pub open_error: Option<UsbError>,
    pub interfaces_error: Option<UsbError>,
    pub claim_error: Option<UsbError>,
    pub release_error: Option<UsbError>,
    /// 1-based transfer attempts that fail with [`UsbError::Io`]
    pub failing_transfers: Vec<u32>,
    /// Every attempt from this one onward fails
    pub failing_from: Option<u32>,
    /// Bytes returned per read; `None` fills the requested length
    pub payload_len: Option<usize>,
}

impl MockDeviceSpec {
    /// A device with one interface exposing a bulk OUT and a bulk IN endpoint
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            summary: DeviceSummary {
                identity,
                bus_number: 1,
                device_address: 4,
            },
            interfaces: vec![InterfaceInfo {
                number: 0,
                endpoints: vec![
                    bulk_endpoint(0x01, Direction::Out),
                    bulk_endpoint(0x81, Direction::In),
                ],
            }],
            open_error: None,
            interfaces_error: None,
            claim_error: None,
            release_error: None,
            failing_transfers: Vec::new(),
            failing_from: None,
            payload_len: None,
        }
    }

    pub fn at_address(mut self, bus_number: u8, device_address: u8) -> Self {
        self.summary.bus_number = bus_number;
        self.summary.device_address = device_address;
        self
    }

    pub fn with_interfaces(mut self, interfaces: Vec<InterfaceInfo>) -> Self {
        self.interfaces = interfaces;
        self
    }

    pub fn fail_open(mut self, error: UsbError) -> Self {
        self.open_error = Some(error);
        self
    }

    pub fn fail_interfaces(mut self, error: UsbError) -> Self {
        self.interfaces_error = Some(error);
        self
    }

    pub fn fail_claim(mut self, error: UsbError) -> Self {
        self.claim_error = Some(error);
        self
    }

    pub fn fail_release(mut self, error: UsbError) -> Self {
        self.release_error = Some(error);
        self
    }

    pub fn fail_transfer(mut self, attempt: u32) -> Self {
        self.failing_transfers.push(attempt);
        self
    }

    pub fn fail_transfers_from(mut self, attempt: u32) -> Self {
        self.failing_from = Some(attempt);
        self
    }

    pub fn with_payload_len(mut self, len: usize) -> Self {
        self.payload_len = Some(len);
        self
    }

    fn transfer_fails(&self, attempt: u32) -> bool {
        self.failing_transfers.contains(&attempt)
            || self.failing_from.is_some_and(|from| attempt >= from)
    }
}

/// Build a bulk endpoint descriptor
pub fn bulk_endpoint(address: u8, direction: Direction) -> EndpointInfo {
    EndpointInfo {
        address,
        direction,
        transfer_kind: TransferKind::Bulk,
        max_packet_size: 64,
    }
}

/// In-memory transport over a fixed list of devices
#[derive(Debug, Default)]
pub struct MockTransport {
    devices: Vec<MockDeviceSpec>,
    enumeration_error: Option<UsbError>,
    log: CallLog,
}

impl MockTransport {
    pub fn new(devices: Vec<MockDeviceSpec>) -> Self {
        Self {
            devices,
            enumeration_error: None,
            log: CallLog::default(),
        }
    }

    /// Transport whose enumeration itself fails
    pub fn failing_enumeration(error: UsbError) -> Self {
        Self {
            devices: Vec::new(),
            enumeration_error: Some(error),
            log: CallLog::default(),
        }
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }
}

impl Transport for MockTransport {
    type Device = MockDevice;

    async fn find_by_ids(&self, identity: DeviceIdentity) -> Result<Option<MockDevice>, UsbError> {
        self.log.record(TransportCall::Find(identity));
        if let Some(error) = &self.enumeration_error {
            return Err(error.clone());
        }

        Ok(self
            .devices
            .iter()
            .find(|spec| spec.summary.identity == identity)
            .map(|spec| MockDevice {
                spec: spec.clone(),
                log: self.log.clone(),
                attempts: 0,
                open: false,
                claimed: None,
            }))
    }
}

/// Device handed out by [`MockTransport`]
///
/// Enforces lifecycle ordering: operations on a closed device or an
/// unclaimed interface fail with [`UsbError::InvalidParam`].
#[derive(Debug)]
pub struct MockDevice {
    spec: MockDeviceSpec,
    log: CallLog,
    attempts: u32,
    open: bool,
    claimed: Option<u8>,
}

impl UsbDevice for MockDevice {
    fn summary(&self) -> &DeviceSummary {
        &self.spec.summary
    }

    async fn open(&mut self) -> Result<(), UsbError> {
        self.log.record(TransportCall::Open);
        if self.open {
            return Err(UsbError::Busy);
        }
        if let Some(error) = &self.spec.open_error {
            return Err(error.clone());
        }
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) {
        self.log.record(TransportCall::Close);
        self.open = false;
        self.claimed = None;
    }

    async fn interfaces(&self) -> Result<Vec<InterfaceInfo>, UsbError> {
        self.log.record(TransportCall::Interfaces);
        if let Some(error) = &self.spec.interfaces_error {
            return Err(error.clone());
        }
        Ok(self.spec.interfaces.clone())
    }

    async fn claim_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        self.log.record(TransportCall::Claim(interface));
        if !self.open {
            return Err(UsbError::InvalidParam);
        }
        if let Some(error) = &self.spec.claim_error {
            return Err(error.clone());
        }
        if !self.spec.interfaces.iter().any(|i| i.number == interface) {
            return Err(UsbError::NotFound);
        }
        self.claimed = Some(interface);
        Ok(())
    }

    async fn release_interface(
        &mut self,
        interface: u8,
        close_endpoints: bool,
    ) -> Result<(), UsbError> {
        self.log.record(TransportCall::Release {
            interface,
            close_endpoints,
        });
        if self.claimed != Some(interface) {
            return Err(UsbError::InvalidParam);
        }
        self.claimed = None;
        match &self.spec.release_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn transfer(&mut self, endpoint: EndpointInfo, length: usize) -> Result<Bytes, UsbError> {
        self.attempts += 1;
        let attempt = self.attempts;
        self.log.record(TransportCall::Transfer {
            attempt,
            endpoint: endpoint.address,
            length,
        });

        self.log.begin_transfer();
        tokio::task::yield_now().await;
        self.log.end_transfer();

        if self.claimed.is_none() || !endpoint.is_in() {
            return Err(UsbError::InvalidParam);
        }
        if self.spec.transfer_fails(attempt) {
            return Err(UsbError::Io);
        }

        let len = self.spec.payload_len.unwrap_or(length).min(length);
        Ok(Bytes::from(vec![attempt as u8; len]))
    }
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
