//! USB transfer execution
//!
//! Blocking IN reads on the worker thread, plus the mapping from rusb
//! descriptors and errors to the transport-neutral types in `common`.

use bytes::Bytes;
use common::{Direction, EndpointInfo, TransferKind, UsbError};
use rusb::{Context, DeviceHandle, EndpointDescriptor};
use std::time::Duration;
use tracing::{debug, warn};

/// Read up to `length` bytes from an IN endpoint
///
/// Bulk and interrupt endpoints are supported; the transfer type is taken
/// from the endpoint descriptor.
pub fn read_in(
    handle: &DeviceHandle<Context>,
    endpoint: EndpointInfo,
    length: usize,
    timeout: Duration,
) -> Result<Bytes, UsbError> {
    if !endpoint.is_in() {
        return Err(UsbError::InvalidParam);
    }

    debug!(
        "{:?} IN transfer: endpoint={:#x}, length={}, timeout={}ms",
        endpoint.transfer_kind,
        endpoint.address,
        length,
        timeout.as_millis()
    );

    let mut buffer = vec![0u8; length];
    let result = match endpoint.transfer_kind {
        TransferKind::Bulk => handle.read_bulk(endpoint.address, &mut buffer, timeout),
        TransferKind::Interrupt => handle.read_interrupt(endpoint.address, &mut buffer, timeout),
        kind => {
            return Err(UsbError::Other {
                message: format!("{:?} endpoints cannot be read", kind),
            });
        }
    };

    match result {
        Ok(len) => {
            buffer.truncate(len);
            debug!("IN transfer succeeded: {} bytes", len);
            Ok(Bytes::from(buffer))
        }
        Err(e) => {
            warn!("IN transfer on endpoint {:#x} failed: {}", endpoint.address, e);
            Err(map_rusb_error(e))
        }
    }
}

/// Convert an rusb endpoint descriptor
pub fn endpoint_info(descriptor: &EndpointDescriptor<'_>) -> EndpointInfo {
    EndpointInfo {
        address: descriptor.address(),
        direction: map_direction(descriptor.direction()),
        transfer_kind: map_transfer_kind(descriptor.transfer_type()),
        max_packet_size: descriptor.max_packet_size(),
    }
}

fn map_direction(direction: rusb::Direction) -> Direction {
    match direction {
        rusb::Direction::In => Direction::In,
        rusb::Direction::Out => Direction::Out,
    }
}

fn map_transfer_kind(kind: rusb::TransferType) -> TransferKind {
    match kind {
        rusb::TransferType::Control => TransferKind::Control,
        rusb::TransferType::Isochronous => TransferKind::Isochronous,
        rusb::TransferType::Bulk => TransferKind::Bulk,
        rusb::TransferType::Interrupt => TransferKind::Interrupt,
    }
}

/// Map rusb::Error to UsbError
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::Access,
        _ => UsbError::Other {
            message: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_rusb_error() {
        assert_eq!(map_rusb_error(rusb::Error::Timeout), UsbError::Timeout);
        assert_eq!(map_rusb_error(rusb::Error::Pipe), UsbError::Pipe);
        assert_eq!(map_rusb_error(rusb::Error::NoDevice), UsbError::NoDevice);
        assert_eq!(map_rusb_error(rusb::Error::Access), UsbError::Access);
        assert!(matches!(
            map_rusb_error(rusb::Error::NotSupported),
            UsbError::Other { .. }
        ));
    }

    #[test]
    fn test_map_direction() {
        assert_eq!(map_direction(rusb::Direction::In), Direction::In);
        assert_eq!(map_direction(rusb::Direction::Out), Direction::Out);
    }

    #[test]
    fn test_map_transfer_kind() {
        assert_eq!(
            map_transfer_kind(rusb::TransferType::Bulk),
            TransferKind::Bulk
        );
        assert_eq!(
            map_transfer_kind(rusb::TransferType::Interrupt),
            TransferKind::Interrupt
        );
    }
}
