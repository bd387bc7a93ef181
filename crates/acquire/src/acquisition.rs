//! Bounded read loop
//!
//! Exactly one transfer is outstanding at any time: the next read is only
//! submitted after the previous completion has been handled. Continuation is
//! a plain loop over an awaited transfer, so the number of readings does not
//! affect stack depth.

use crate::config::AcquisitionSettings;
use crate::session::{DeviceSession, SetupError};
use crate::sink::SampleSink;
use bytes::Bytes;
use clap::ValueEnum;
use common::{DeviceIdentity, EndpointInfo, Sample, Transport, UsbDevice, UsbError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// What counts toward `total_readings`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TerminationPolicy {
    /// Every completion, successful or not, counts. Stops after exactly
    /// `total_readings` transfers.
    #[default]
    Attempts,
    /// Only successful reads count. A device that keeps failing keeps the
    /// loop running.
    Successes,
}

/// Progress counters, mutated only by [`AcquisitionLoop::on_complete`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionState {
    pub completed_count: u32,
    pub attempts: u32,
    pub errors: u32,
    pub bytes_read: u64,
    pub target: u32,
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionReport {
    pub attempts: u32,
    pub successes: u32,
    pub errors: u32,
    pub bytes_read: u64,
    pub release_failed: bool,
}

pub struct AcquisitionLoop {
    read_size: usize,
    termination: TerminationPolicy,
    state: AcquisitionState,
}

impl AcquisitionLoop {
    pub fn new(settings: &AcquisitionSettings) -> Self {
        Self {
            read_size: settings.read_size,
            termination: settings.termination,
            state: AcquisitionState {
                completed_count: 0,
                attempts: 0,
                errors: 0,
                bytes_read: 0,
                target: settings.total_readings,
            },
        }
    }

    pub fn state(&self) -> &AcquisitionState {
        &self.state
    }

    /// Continuation decision taken after every completion
    pub fn should_continue(&self) -> bool {
        let progress = match self.termination {
            TerminationPolicy::Attempts => self.state.attempts,
            TerminationPolicy::Successes => self.state.completed_count,
        };
        progress < self.state.target
    }

    /// Issue one read and wait for its completion
    pub async fn submit_read<D: UsbDevice>(
        &self,
        session: &mut DeviceSession<D>,
        endpoint: EndpointInfo,
    ) -> Result<Bytes, UsbError> {
        session.read(endpoint, self.read_size).await
    }

    /// Record one completion and forward it to `sink`
    ///
    /// Errors are reported and never retried; the next attempt is a new read.
    pub fn on_complete<S: SampleSink>(&mut self, result: Result<Bytes, UsbError>, sink: &mut S) {
        self.state.attempts += 1;

        match result {
            Ok(data) => {
                self.state.completed_count += 1;
                self.state.bytes_read += data.len() as u64;
                if data.len() < self.read_size {
                    debug!(
                        "Short read on attempt {}: {} of {} bytes",
                        self.state.attempts,
                        data.len(),
                        self.read_size
                    );
                }
                sink.on_sample(Sample {
                    sequence: self.state.completed_count,
                    data,
                });
            }
            Err(e) => {
                self.state.errors += 1;
                sink.on_transfer_error(self.state.attempts, &e);
            }
        }
    }

    /// Drive reads until the termination policy is satisfied
    pub async fn run<D: UsbDevice, S: SampleSink>(
        &mut self,
        session: &mut DeviceSession<D>,
        endpoint: EndpointInfo,
        sink: &mut S,
    ) -> AcquisitionState {
        while self.should_continue() {
            let result = self.submit_read(session, endpoint).await;
            self.on_complete(result, sink);
        }

        debug!(
            "Acquisition finished: {} successes, {} errors",
            self.state.completed_count, self.state.errors
        );
        self.state
    }
}

/// Full acquisition: discover, open, claim, read, release, close
///
/// Only setup failures are returned as errors. Transfer and release failures
/// are reported through the sink and the log, and show up in the report.
pub async fn run<T, S>(
    transport: &T,
    identity: DeviceIdentity,
    settings: &AcquisitionSettings,
    sink: &mut S,
) -> Result<AcquisitionReport, SetupError>
where
    T: Transport,
    S: SampleSink,
{
    let (mut session, endpoint) = DeviceSession::start(transport, identity).await?;

    info!(
        "Acquiring {} readings of {} bytes from endpoint {:#04x}",
        settings.total_readings, settings.read_size, endpoint.address
    );

    let mut acquisition = AcquisitionLoop::new(settings);
    let state = acquisition.run(&mut session, endpoint, sink).await;
    let teardown = session.teardown().await;

    Ok(AcquisitionReport {
        attempts: state.attempts,
        successes: state.completed_count,
        errors: state.errors,
        bytes_read: state.bytes_read,
        release_failed: teardown.release_error.is_some(),
    })
}
