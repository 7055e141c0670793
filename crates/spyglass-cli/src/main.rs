//! Spyglass CLI
//!
//! Terminal frontend for the Spyglass inspector core: resolves a device
//! selector, connects to the instrumented app, and renders the captured
//! timeline to stdout until interrupted.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use spyglass_core::{
    AdbBridge, BridgeResolver, ClientListener, DeviceSelector, InspectorClient, MessageListener,
    MessageStore, DEVICE_PORT,
};

mod sink;

use sink::TimelineSink;

/// Spyglass - live network-traffic inspection for mobile apps
///
/// Point it at an attached device (or a directly reachable instrumented
/// process) to stream captured HTTP exchanges to your terminal.
#[derive(Parser, Debug)]
#[command(name = "spyglass")]
#[command(version, about, long_about = None)]
struct Args {
    /// Serial of the device to inspect through the adb bridge
    #[arg(short, long, conflicts_with = "address")]
    serial: Option<String>,

    /// Directly reachable host:port of the instrumented process
    #[arg(short, long)]
    address: Option<String>,

    /// Device-side port the instrumented process listens on
    #[arg(short, long, default_value_t = DEVICE_PORT)]
    port: u16,

    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// List attached devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), String> {
    let bridge = AdbBridge::new();

    if args.list_devices {
        return list_devices(&bridge).await;
    }

    let selector = match (&args.serial, &args.address) {
        (Some(serial), None) => DeviceSelector::Device {
            serial: serial.clone(),
            port: args.port,
        },
        (None, Some(address)) => DeviceSelector::Direct(address.clone()),
        _ => return Err("specify one of --serial or --address".to_string()),
    };

    let address = bridge
        .resolve(&selector)
        .await
        .map_err(|e| format!("could not resolve device: {e}"))?;
    tracing::info!("resolved endpoint: {}", address);

    // Fresh store and client per session; the sink observes both.
    let store = Arc::new(MessageStore::new());
    let client = InspectorClient::new();
    let json_output = matches!(args.format, OutputFormat::Json);
    let sink = Arc::new(TimelineSink::new(json_output));

    let sink_as_client_listener: Arc<dyn ClientListener> = sink.clone();
    client.register_client_listener(&sink_as_client_listener);
    let sink_as_store_listener: Arc<dyn MessageListener> = sink.clone();
    store.register_listener(&sink_as_store_listener);
    let store_as_listener: Arc<dyn MessageListener> = store.clone();
    client.register_message_listener(&store_as_listener);

    client
        .connect(&address)
        .await
        .map_err(|e| format!("could not connect to {address}: {e}"))?;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to wait for interrupt: {e}"))?;

    tracing::info!("interrupted, closing session");
    client.close().await;
    if let Err(e) = bridge.release_forward().await {
        tracing::warn!("could not release port forward: {}", e);
    }

    Ok(())
}

async fn list_devices(bridge: &AdbBridge) -> Result<(), String> {
    let devices = bridge
        .list_devices()
        .await
        .map_err(|e| format!("could not list devices: {e}"))?;

    if devices.is_empty() {
        println!("No devices attached");
        return Ok(());
    }
    for device in devices {
        match device.model {
            Some(model) => println!("{}\t{}\t{}", device.serial, device.state, model),
            None => println!("{}\t{}", device.serial, device.state),
        }
    }
    Ok(())
}
