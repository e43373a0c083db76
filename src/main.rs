// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! ODK Sensors command line host.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use odk_sensors::bluetooth::{BluezTransport, Device, DiscoveryController, Transport};
use odk_sensors::config::Config;
use odk_sensors::events::{DiscoveryEvent, EventProcessor};
use odk_sensors::normalize::Normalizer;
use odk_sensors::request::{CallerRequest, CallerResult, CancelReason};
use odk_sensors::state::AppState;

#[derive(Parser)]
#[command(name = "odk-sensors")]
#[command(about = "Read a confirmed tag from a paired Bluetooth RFID reader.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take one reading and print the caller result
    #[command(alias = "r")]
    Read {
        /// Sensor to use (only "bluetooth" is supported)
        #[arg(long)]
        sensor: Option<String>,
        /// Data type to return (only "rfid" is supported)
        #[arg(long)]
        data_type: Option<String>,
        /// Reader address; defaults to the configured device, then a scan
        #[arg(long)]
        device: Option<String>,
    },
    /// List devices paired with this host
    #[command(alias = "d")]
    Devices,
    /// Run one discovery window and list what was found
    #[command(alias = "s")]
    Scan,
    /// Remember a paired reader as the default device
    SetDefault { address: String },
    /// Forget the default device
    ClearDefault,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("odk_sensors=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    info!("Configuration loaded");

    let transport: Arc<dyn Transport> =
        match BluezTransport::new(config.bluetooth.connect_timeout()).await {
            Ok(transport) => Arc::new(transport),
            Err(e) => {
                error!("Bluetooth is unavailable: {}", e);
                if matches!(cli.command, Commands::Read { .. }) {
                    return deliver(CallerResult::Cancelled(CancelReason::TransportUnavailable));
                }
                return Err(e);
            }
        };

    match cli.command {
        Commands::Read {
            sensor,
            data_type,
            device,
        } => {
            let request = CallerRequest::new(sensor.as_deref(), data_type.as_deref());
            let result = read(&mut config, transport, request, device).await?;
            deliver(result)
        }
        Commands::Devices => {
            let paired = transport.bonded_devices().await?;
            for device in &paired {
                let marker = match config.bluetooth.default_device.as_deref() {
                    Some(address) if device.has_address(address) => " (default)",
                    _ => "",
                };
                println!("{}{}", device, marker);
            }
            Ok(())
        }
        Commands::Scan => {
            let (event_tx, mut event_rx) = mpsc::channel(32);
            let controller = DiscoveryController::new(transport, event_tx)
                .with_scan_window(config.bluetooth.scan_window());
            if !controller.start_scan().await {
                error!("Unable to start discovery");
                return Ok(());
            }
            wait_for_scan(&mut event_rx, None).await;
            println!(
                "{}",
                serde_json::to_string_pretty(&controller.available_devices())?
            );
            controller.release().await;
            Ok(())
        }
        Commands::SetDefault { address } => {
            let paired = transport.bonded_devices().await?;
            config.set_default_device(&address, &paired)?;
            config.save()?;
            Ok(())
        }
        Commands::ClearDefault => {
            config.bluetooth.default_device = None;
            config.save()?;
            info!("Default device cleared");
            Ok(())
        }
    }
}

/// Print the caller result on stdout; cancellation exits non-zero.
fn deliver(result: CallerResult) -> Result<()> {
    println!("{}", result.to_json());
    if result.is_cancelled() {
        std::process::exit(1);
    }
    Ok(())
}

/// Full flow: enable, choose a device, run one session, normalize.
async fn read(
    config: &mut Config,
    transport: Arc<dyn Transport>,
    request: CallerRequest,
    address: Option<String>,
) -> Result<CallerResult> {
    if !request.returns_value() {
        warn!("Sensor or data type missing, the reading will only be displayed");
    }

    if let Ok(paired) = transport.bonded_devices().await {
        if config.prune_default_device(&paired) {
            config.save()?;
        }
    }

    let state = AppState::new();
    let mut processor = EventProcessor::new(
        request,
        Normalizer::new(config.rfid.window),
        state.clone(),
    );

    let (event_tx, mut event_rx) = mpsc::channel(32);
    let controller = DiscoveryController::new(transport, event_tx)
        .with_default_device(config.bluetooth.default_device.clone())
        .with_scan_window(config.bluetooth.scan_window())
        .with_session_options(config.bluetooth.session_options());

    if !controller.supports_transport() {
        error!("Bluetooth is not supported on this host");
        return Ok(CallerResult::Cancelled(CancelReason::TransportUnavailable));
    }
    if !controller.is_enabled().await && !controller.request_enable().await? {
        error!("Bluetooth was not enabled");
        return Ok(CallerResult::Cancelled(CancelReason::TransportUnavailable));
    }

    let device = match choose_device(&controller, &mut processor, &mut event_rx, address).await? {
        Some(device) => device,
        None => {
            error!("No paired reader found");
            controller.release().await;
            return Ok(CallerResult::Cancelled(CancelReason::NoReading));
        }
    };

    let mut session = match controller.connect(&device).await {
        Ok(session) => session,
        Err(e) => {
            error!("Unable to start session: {}", e);
            controller.release().await;
            return Ok(CallerResult::Cancelled(CancelReason::NoReading));
        }
    };

    info!("Scan a tag with {}", session.device().name);
    while let Some(event) = session.next_event().await {
        processor.process_session_event(&event);
        match state.get_device_name() {
            Some(name) => info!("Status: {} ({})", state.get_status().as_str(), name),
            None => info!("Status: {}", state.get_status().as_str()),
        }
    }
    match session.outcome().await {
        Ok(_) => {
            if let Some(reading) = state.get_last_reading() {
                info!("Raw reading: {}", reading);
            }
        }
        Err(e) => warn!("Session ended without a reading: {}", e),
    }

    controller.release().await;
    while let Ok(event) = event_rx.try_recv() {
        processor.process_discovery_event(&event);
    }

    Ok(processor.finish())
}

/// Explicit address, then the configured default, then the first paired
/// device seen during one discovery window.
async fn choose_device(
    controller: &DiscoveryController,
    processor: &mut EventProcessor,
    event_rx: &mut mpsc::Receiver<DiscoveryEvent>,
    address: Option<String>,
) -> Result<Option<Device>> {
    if let Some(address) = address {
        let paired = controller.list_paired_devices().await?;
        let device = paired
            .into_iter()
            .find(|d| d.has_address(&address))
            .unwrap_or_else(|| Device::new(address, None, false));
        return Ok(Some(device));
    }

    if let Some(device) = controller.default_device().await {
        info!("Using default device {}", device);
        return Ok(Some(device));
    }

    if !controller.start_scan().await {
        return Ok(None);
    }
    wait_for_scan(event_rx, Some(processor)).await;

    Ok(controller
        .available_devices()
        .into_iter()
        .find(|d| d.paired))
}

/// Drain discovery events until the scan stops.
async fn wait_for_scan(
    event_rx: &mut mpsc::Receiver<DiscoveryEvent>,
    mut processor: Option<&mut EventProcessor>,
) {
    while let Some(event) = event_rx.recv().await {
        if let Some(processor) = processor.as_deref_mut() {
            processor.process_discovery_event(&event);
        } else if let DiscoveryEvent::DeviceFound(device) = &event {
            info!("Device found: {}", device);
        }
        if event == DiscoveryEvent::SearchStopped {
            break;
        }
    }
}
