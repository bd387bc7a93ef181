//! usb-acquire
//!
//! Reads a fixed number of samples from one USB device over its first IN
//! endpoint, logs each one, then releases and closes the device.

use acquire::config::{AcquireConfig, expand_path, parse_hex_id};
use acquire::usb::{RusbTransport, WorkerOptions};
use acquire::{LogSink, TerminationPolicy};
use anyhow::{Context, Result};
use clap::Parser;
use common::{DeviceIdentity, setup_logging};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "usb-acquire")]
#[command(
    author,
    version,
    about = "USB sample acquisition - read a bounded number of transfers from one device"
)]
#[command(long_about = "
Opens the device matching the configured vendor/product ID, claims its first
interface, and reads a fixed number of transfers from the first IN endpoint.
The interface is released and the device closed once the readings are done.

EXAMPLES:
    # Run with default config
    usb-acquire

    # Read 50 transfers of 64 bytes from a specific device
    usb-acquire --vendor-id 0x0403 --product-id 0xf241 --read-size 64 --readings 50

    # List USB devices without acquiring
    usb-acquire --list-devices

    # Run with debug logging
    usb-acquire --log-level debug

CONFIGURATION:
    The configuration file is looked up in the following order:
    1. Path specified with --config
    2. ~/.config/usb-acquire/acquire.toml
    3. /etc/usb-acquire/acquire.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Vendor ID of the device (e.g. 0x0403)
    #[arg(long, value_name = "HEX", value_parser = parse_hex_id)]
    vendor_id: Option<u16>,

    /// Product ID of the device (e.g. 0xf241)
    #[arg(long, value_name = "HEX", value_parser = parse_hex_id)]
    product_id: Option<u16>,

    /// Bytes requested per transfer
    #[arg(long, value_name = "BYTES")]
    read_size: Option<usize>,

    /// Number of transfers to perform
    #[arg(short = 'n', long, value_name = "COUNT")]
    readings: Option<u32>,

    /// Whether failed transfers count toward --readings
    #[arg(long, value_enum)]
    termination: Option<TerminationPolicy>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

impl Args {
    /// Command line values take precedence over the configuration file
    fn apply_overrides(&self, config: &mut AcquireConfig) {
        if let Some(vendor_id) = self.vendor_id {
            config.device.vendor_id = vendor_id;
        }
        if let Some(product_id) = self.product_id {
            config.device.product_id = product_id;
        }
        if let Some(read_size) = self.read_size {
            config.acquisition.read_size = read_size;
        }
        if let Some(readings) = self.readings {
            config.acquisition.total_readings = readings;
        }
        if let Some(termination) = self.termination {
            config.acquisition.termination = termination;
        }
        if let Some(log_level) = &self.log_level {
            config.logging.log_level = log_level.clone();
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = AcquireConfig::default();
        let path = AcquireConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref raw) = args.config {
        AcquireConfig::load(Some(expand_path(raw))).context("Failed to load configuration")?
    } else {
        AcquireConfig::load_or_default().context("Failed to load configuration")?
    };
    args.apply_overrides(&mut config);
    config.validate().context("Invalid configuration")?;

    setup_logging(&config.logging.log_level).context("Failed to setup logging")?;

    info!("usb-acquire v{}", env!("CARGO_PKG_VERSION"));

    let transport = RusbTransport::spawn(WorkerOptions::from(&config))
        .context("Failed to initialise USB subsystem")?;

    let identity = config.device.identity();
    let result = if args.list_devices {
        list_devices_mode(&transport, identity).await
    } else {
        acquire_mode(&transport, &config).await
    };

    if let Err(e) = transport.shutdown().await {
        error!("Error shutting down USB worker: {:#}", e);
    }

    result
}

/// List USB devices and exit
async fn list_devices_mode(transport: &RusbTransport, identity: DeviceIdentity) -> Result<()> {
    let devices = transport
        .list_devices()
        .await
        .context("Failed to list USB devices")?;

    if devices.is_empty() {
        println!("No USB devices found.");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", devices.len());
    for device in devices {
        let marker = if device.identity == identity { "*" } else { " " };
        println!(
            "{} {}  Bus {:03} Device {:03}",
            marker, device.identity, device.bus_number, device.device_address
        );
    }
    println!("\n* matches the configured device {}", identity);

    Ok(())
}

/// Run one acquisition against the configured device
async fn acquire_mode(transport: &RusbTransport, config: &AcquireConfig) -> Result<()> {
    let identity = config.device.identity();
    let mut sink = LogSink;

    let report = acquire::run(transport, identity, &config.acquisition, &mut sink).await?;

    if report.release_failed {
        warn!("Interface release failed; device was closed regardless");
    }
    info!(
        "Acquisition complete: {} attempts, {} samples, {} errors, {} bytes",
        report.attempts, report.successes, report.errors, report.bytes_read
    );

    Ok(())
}
