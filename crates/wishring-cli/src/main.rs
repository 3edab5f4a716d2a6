//! Development CLI over the WISH RING core.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use wishring_core::channel::DataChannel;
use wishring_core::reconnect::AutoReconnectCoordinator;
use wishring_core::scan::{get_adapter, BtleScanner, RingScanner, ScanMode, ScanOptions};
use wishring_core::store::{JsonFileStore, KnownDeviceStore};
use wishring_core::supervisor::ConnectionSupervisor;
use wishring_core::transport::BtleTransportFactory;
use wishring_core::{session, KnownDevice, RingEvent};

#[derive(Parser)]
#[command(name = "wishring")]
#[command(author, version, about = "CLI for the WISH RING wearable", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path of the last-known-device record
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby devices
    Scan {
        /// Scan timeout in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,

        /// Filter by the ring's advertised service instead of by name
        #[arg(long)]
        service: bool,
    },

    /// Connect to a ring and stream its events until interrupted
    Connect {
        /// Device address (MAC address or UUID). Omit to scan and take the
        /// first ring in range.
        address: Option<String>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Reconnect to the last-known ring
    Reconnect,

    /// Read the battery level
    Battery {
        /// Device address (MAC address or UUID)
        address: String,
    },

    /// Sync the ring's clock to this machine
    SyncTime {
        /// Device address (MAC address or UUID)
        address: String,
    },

    /// Send the factory reset command
    Reset {
        /// Device address (MAC address or UUID)
        address: String,

        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Forget the last-known ring
    Forget,
}

fn store_path(cli: &Cli) -> PathBuf {
    cli.store.clone().unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wishring")
            .join("device.json")
    })
}

async fn session_parts() -> Result<(Arc<ConnectionSupervisor>, Arc<DataChannel>)> {
    let adapter = get_adapter().await.context("no usable bluetooth adapter")?;
    let factory = Arc::new(BtleTransportFactory::new(adapter));
    let supervisor = Arc::new(ConnectionSupervisor::new(factory));
    let channel = Arc::new(DataChannel::new(Arc::clone(&supervisor)));
    Ok((supervisor, channel))
}

/// Scans until the first ring appears and reports progress through the
/// supervisor's phase.
async fn pick_first_ring(supervisor: &ConnectionSupervisor) -> Result<String> {
    let adapter = get_adapter().await.context("no usable bluetooth adapter")?;
    let scanner = BtleScanner::new(adapter);

    supervisor.scan_started();
    let mut devices = scanner
        .scan(ScanOptions::new().with_mode(ScanMode::Service))
        .await?;
    while let Some(device) = devices.next().await {
        if device.is_wish_ring() {
            println!("Found {device}");
            supervisor.device_selected(&device);
            devices.stop();
            return Ok(device.address);
        }
    }
    supervisor.scan_finished();
    anyhow::bail!("no ring found in range; pass an address explicitly")
}

/// Brings a session up and records the device for future reconnects.
async fn connect_and_record(
    supervisor: &Arc<ConnectionSupervisor>,
    channel: &DataChannel,
    store: &JsonFileStore,
    address: &str,
) -> Result<()> {
    session::establish(supervisor, channel, address)
        .await
        .with_context(|| format!("failed to connect to {address}"))?;

    let identity = supervisor.watch_device().borrow().clone();
    if let Some(identity) = identity {
        let record = match store.load().await? {
            Some(mut known) if known.address == identity.address => {
                known.record_connection();
                known
            }
            _ => KnownDevice::new(
                identity.address.clone(),
                identity.name.unwrap_or(identity.address),
            ),
        };
        store.save(&record).await?;
    }
    Ok(())
}

async fn stream_events(supervisor: &ConnectionSupervisor, json: bool) -> Result<()> {
    let mut events = supervisor.events();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                let Ok(event) = event else { continue };
                if json {
                    println!("{}", serde_json::to_string(&event)?);
                } else {
                    print_event(&event);
                }
                if matches!(event, RingEvent::Disconnected { .. }) {
                    break;
                }
            }
        }
    }
    Ok(())
}

fn print_event(event: &RingEvent) {
    match event {
        RingEvent::ButtonPress { press, .. } => {
            println!("{:?} press (count {})", press.press_type, press.press_count);
        }
        RingEvent::Battery { level, .. } => println!("Battery: {level}%"),
        RingEvent::BatteryLow { level, .. } => println!("Battery LOW: {level}%"),
        RingEvent::Disconnected { reason, .. } => println!("Disconnected: {reason:?}"),
        other => tracing::debug!(?other, "event"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store = JsonFileStore::new(store_path(&cli));

    match cli.command {
        Commands::Scan { timeout, service } => {
            let adapter = get_adapter().await.context("no usable bluetooth adapter")?;
            let scanner = BtleScanner::new(adapter);
            let options = ScanOptions::new()
                .with_timeout(Duration::from_secs(timeout))
                .with_mode(if service {
                    ScanMode::Service
                } else {
                    ScanMode::General
                });

            let mut devices = scanner.scan(options).await?;
            while let Some(device) = devices.next().await {
                let marker = if device.is_wish_ring() { " *" } else { "" };
                println!("{device}{marker}");
            }
        }

        Commands::Connect { address, json } => {
            let (supervisor, channel) = session_parts().await?;
            let address = match address {
                Some(address) => address,
                None => pick_first_ring(&supervisor).await?,
            };
            connect_and_record(&supervisor, &channel, &store, &address).await?;
            println!("Connected. Press the ring button; Ctrl-C to exit.");
            stream_events(&supervisor, json).await?;
            supervisor.disconnect().await?;
        }

        Commands::Reconnect => {
            let adapter = get_adapter().await.context("no usable bluetooth adapter")?;
            let scanner = Arc::new(BtleScanner::new(adapter));
            let (supervisor, channel) = session_parts().await?;
            let coordinator = AutoReconnectCoordinator::new(
                Arc::clone(&supervisor),
                Arc::clone(&channel),
                scanner,
                Arc::new(JsonFileStore::new(store_path(&cli))),
            );
            if coordinator.run().await? {
                println!("Reconnected. Press the ring button; Ctrl-C to exit.");
                stream_events(&supervisor, false).await?;
                supervisor.disconnect().await?;
            } else {
                anyhow::bail!("no ring found; run `wishring scan` and connect manually");
            }
        }

        Commands::Battery { address } => {
            let (supervisor, channel) = session_parts().await?;
            supervisor.connect(&address).await?;
            let level = channel.read_battery().await?;
            println!("{level}");
            supervisor.disconnect().await?;
        }

        Commands::SyncTime { address } => {
            let (supervisor, channel) = session_parts().await?;
            supervisor.connect(&address).await?;
            channel.sync_time().await?;
            println!("Device time synced.");
            supervisor.disconnect().await?;
        }

        Commands::Reset { address, yes } => {
            if !yes {
                anyhow::bail!("reset clears the ring's counters; re-run with --yes to confirm");
            }
            let (supervisor, channel) = session_parts().await?;
            supervisor.connect(&address).await?;
            channel.send_reset().await?;
            println!("Reset command sent.");
            supervisor.disconnect().await?;
        }

        Commands::Forget => {
            store.clear().await?;
            println!("Last-known ring forgotten.");
        }
    }

    Ok(())
}
