//! USB Bridge Integration Tests
//!
//! Tests for the async channel bridge between the Tokio runtime and the USB
//! thread, using a plain thread in place of the libusb worker.
//!
//! Run with: `cargo test -p common --test usb_bridge_tests`

use bytes::Bytes;
use common::{
    DeviceIdentity, DeviceSummary, Direction, EndpointInfo, TransferKind, UsbCommand, UsbError,
    UsbWorker, create_usb_bridge,
};
use std::thread;
use std::time::Duration;

const TEST_IDENTITY: DeviceIdentity = DeviceIdentity::new(0x0403, 0xf241);
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn bulk_in(address: u8) -> EndpointInfo {
    EndpointInfo {
        address,
        direction: Direction::In,
        transfer_kind: TransferKind::Bulk,
        max_packet_size: 64,
    }
}

/// Answer commands like a worker holding one device, until `Shutdown`
fn serve(worker: UsbWorker) -> u32 {
    let mut handled = 0;

    while let Ok(cmd) = worker.recv_command() {
        match cmd {
            UsbCommand::FindDevice { identity, response } => {
                let summary = (identity == TEST_IDENTITY).then_some(DeviceSummary {
                    identity,
                    bus_number: 1,
                    device_address: 9,
                });
                let _ = response.send(Ok(summary));
            }
            UsbCommand::Open { response } => {
                let _ = response.send(Ok(()));
            }
            UsbCommand::Transfer {
                length, response, ..
            } => {
                let _ = response.send(Ok(Bytes::from(vec![0xab; length])));
            }
            UsbCommand::ClaimInterface { response, .. } => {
                let _ = response.send(Err(UsbError::Busy));
            }
            UsbCommand::Close { response } => {
                let _ = response.send(());
            }
            UsbCommand::Shutdown => break,
            // Dropping the reply sender is how a panicking handler looks to the caller
            _ => {}
        }
        handled += 1;
    }

    handled
}

#[tokio::test]
async fn test_request_round_trip() {
    let (bridge, worker) = create_usb_bridge();
    let handle = thread::spawn(move || serve(worker));

    let found = bridge
        .request(|response| UsbCommand::FindDevice {
            identity: TEST_IDENTITY,
            response,
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.map(|s| s.device_address), Some(9));

    bridge
        .request(|response| UsbCommand::Open { response })
        .await
        .unwrap()
        .unwrap();

    let data = bridge
        .request(|response| UsbCommand::Transfer {
            endpoint: bulk_in(0x81),
            length: 32,
            response,
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(data.len(), 32);

    bridge.send_command(UsbCommand::Shutdown).await.unwrap();
    assert_eq!(handle.join().unwrap(), 3);
}

#[tokio::test]
async fn test_device_error_is_forwarded() {
    let (bridge, worker) = create_usb_bridge();
    let handle = thread::spawn(move || serve(worker));

    let result = bridge
        .request(|response| UsbCommand::ClaimInterface {
            interface: 0,
            response,
        })
        .await
        .unwrap();
    assert_eq!(result, Err(UsbError::Busy));

    bridge.send_command(UsbCommand::Shutdown).await.unwrap();
    handle.join().unwrap();
}

#[tokio::test]
async fn test_dropped_reply_reports_worker_unavailable() {
    let (bridge, worker) = create_usb_bridge();
    let handle = thread::spawn(move || serve(worker));

    let result = tokio::time::timeout(
        TEST_TIMEOUT,
        bridge.request(|response| UsbCommand::Interfaces { response }),
    )
    .await
    .expect("request timed out");
    assert!(matches!(result, Err(UsbError::WorkerUnavailable(_))));

    bridge.send_command(UsbCommand::Shutdown).await.unwrap();
    handle.join().unwrap();
}

#[tokio::test]
async fn test_worker_exits_when_bridge_dropped() {
    let (bridge, worker) = create_usb_bridge();
    let handle = thread::spawn(move || serve(worker));

    bridge
        .request(|response| UsbCommand::Close { response })
        .await
        .unwrap();
    drop(bridge);

    assert_eq!(handle.join().unwrap(), 1);
}

#[tokio::test]
async fn test_cloned_bridges_share_worker() {
    let (bridge, worker) = create_usb_bridge();
    let handle = thread::spawn(move || serve(worker));

    let other = bridge.clone();
    for b in [&bridge, &other] {
        b.request(|response| UsbCommand::Open { response })
            .await
            .unwrap()
            .unwrap();
    }

    other.send_command(UsbCommand::Shutdown).await.unwrap();
    assert_eq!(handle.join().unwrap(), 2);
}
