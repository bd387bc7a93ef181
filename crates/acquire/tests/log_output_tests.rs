//! Log output of a full acquisition
//!
//! Captures what [`LogSink`] writes through `tracing` during a run against the
//! mock transport.
//!
//! Run with: `cargo test -p acquire --test log_output_tests`

use acquire::config::AcquisitionSettings;
use acquire::{LogSink, run};
use common::test_utils::{MockDeviceSpec, MockTransport, TEST_IDENTITY};
use std::io;
use std::sync::{Arc, Mutex};

/// Writer that appends everything to a shared buffer
#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl CapturedLog {
    fn lines(&self) -> Vec<String> {
        let buf = self.0.lock().unwrap();
        String::from_utf8_lossy(&buf)
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

impl io::Write for CapturedLog {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture() -> (CapturedLog, tracing::subscriber::DefaultGuard) {
    let log = CapturedLog::default();
    let writer = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_target(false)
        .without_time()
        .finish();
    (log, tracing::subscriber::set_default(subscriber))
}

#[tokio::test]
async fn test_log_lines_for_samples_and_errors() {
    let (log, _guard) = capture();
    let spec = MockDeviceSpec::new(TEST_IDENTITY)
        .fail_transfer(2)
        .with_payload_len(3);
    let transport = MockTransport::new(vec![spec]);
    let settings = AcquisitionSettings {
        read_size: 8,
        total_readings: 3,
        ..Default::default()
    };

    run(&transport, TEST_IDENTITY, &settings, &mut LogSink)
        .await
        .unwrap();

    let lines = log.lines();
    let position = |needle: &str| {
        lines
            .iter()
            .position(|line| line.ends_with(needle))
            .unwrap_or_else(|| panic!("no line ending with {:?} in {:#?}", needle, lines))
    };

    let opened = position("Device opened");
    let first = position("Data read [1]: <Buffer 01 01 01>");
    let error = position("Error reading (attempt 2): Input/output error");
    let second = position("Data read [2]: <Buffer 03 03 03>");
    let closed = position("Device closed");

    assert!(opened < first);
    assert!(first < error);
    assert!(error < second);
    assert!(second < closed);

    assert!(lines[first].contains("INFO"));
    assert!(lines[error].contains("ERROR"));
    assert_eq!(
        lines.iter().filter(|l| l.contains("Data read [")).count(),
        2
    );
}

#[tokio::test]
async fn test_release_error_is_logged() {
    let (log, _guard) = capture();
    let spec = MockDeviceSpec::new(TEST_IDENTITY).fail_release(common::UsbError::NoDevice);
    let transport = MockTransport::new(vec![spec]);
    let settings = AcquisitionSettings {
        total_readings: 1,
        ..Default::default()
    };

    let report = run(&transport, TEST_IDENTITY, &settings, &mut LogSink)
        .await
        .unwrap();

    assert!(report.release_failed);
    let lines = log.lines();
    let release = lines
        .iter()
        .position(|l| l.ends_with("Error releasing the interface: Device disconnected"))
        .expect("release error not logged");
    let closed = lines
        .iter()
        .position(|l| l.ends_with("Device closed"))
        .expect("close not logged");
    assert!(release < closed);
}
