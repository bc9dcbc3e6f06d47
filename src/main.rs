// Copyright 2026 bleconfd developers
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

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use bleconfd::bluetooth::session::Outbox;
use bleconfd::bluetooth::{BeaconController, GattServer, HciRadio, SessionSlot};
use bleconfd::config::{Config, DEFAULT_CONFIG_PATH};
use bleconfd::provider::PlatformDataProvider;
use bleconfd::storage::MachineInfo;

#[derive(Parser, Debug)]
#[command(name = "bleconfd", version, about = "BLE beacon and GATT transport daemon")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log at debug level
    #[arg(short, long)]
    debug: bool,
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    info!("Starting bleconfd {}", env!("CARGO_PKG_VERSION"));
    let config = Config::load(&args.config)?;

    let machine_info = MachineInfo::from_config(&config.platform);
    match machine_info.pretty_hostname() {
        Ok(Some(name)) => info!("machine-info name: {}", name),
        Ok(None) => debug!("machine-info carries no PRETTY_HOSTNAME"),
        Err(e) => warn!("{:#}", e),
    }

    let provider =
        PlatformDataProvider::with_root(&config.platform.root, &config.platform.devices_db);
    let radio = HciRadio::open().context("Failed to open HCI control socket")?;
    let beacon = Arc::new(BeaconController::new(radio));
    let slot = SessionSlot::new();

    loop {
        let server = GattServer::init(&config.listener, beacon.clone(), slot.clone()).await?;

        let mut session = tokio::select! {
            session = server.accept(&provider, &provider) => session?,
            _ = signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                return Ok(());
            }
        };

        let peer = session.peer().to_string();
        session.set_data_handler(Box::new(move |record: Vec<u8>, outbox: &Outbox| {
            info!(
                "{}: received {} byte record, {} bytes pending",
                peer,
                record.len(),
                outbox.pending()
            );
        }));

        tokio::select! {
            state = session.run() => debug!("session ended in state {:?}", state),
            _ = signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                return Ok(());
            }
        }
    }
}
