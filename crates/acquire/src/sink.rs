//! Destinations for acquisition results

use common::{Sample, UsbError, format_bytes};
use tracing::{error, info};

/// Consumer of per-transfer outcomes
pub trait SampleSink {
    /// Called once per successful transfer, in completion order
    fn on_sample(&mut self, sample: Sample);

    /// Called once per failed transfer; `attempt` is the 1-based attempt number
    fn on_transfer_error(&mut self, attempt: u32, error: &UsbError);
}

impl<S: SampleSink + ?Sized> SampleSink for &mut S {
    fn on_sample(&mut self, sample: Sample) {
        (**self).on_sample(sample)
    }

    fn on_transfer_error(&mut self, attempt: u32, error: &UsbError) {
        (**self).on_transfer_error(attempt, error)
    }
}

/// `Data read [<n>]: <Buffer ..>`
pub fn sample_line(sample: &Sample) -> String {
    format!("Data read [{}]: {}", sample.sequence, format_bytes(&sample.data))
}

/// `Error reading (attempt <n>): <error>`
pub fn transfer_error_line(attempt: u32, error: &UsbError) -> String {
    format!("Error reading (attempt {}): {}", attempt, error)
}

/// Writes every outcome to the log
#[derive(Debug, Default)]
pub struct LogSink;

impl SampleSink for LogSink {
    fn on_sample(&mut self, sample: Sample) {
        info!("{}", sample_line(&sample));
    }

    fn on_transfer_error(&mut self, attempt: u32, error: &UsbError) {
        error!("{}", transfer_error_line(attempt, error));
    }
}
