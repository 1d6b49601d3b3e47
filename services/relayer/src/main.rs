// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! SEDA Relayer Binary.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use tokio::signal::unix;
use tracing_subscriber::EnvFilter;

use seda_relayer_config::utils::load;
use seda_relayer_context::RelayerContext;

/// The main entry point for the relayer.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logger()?;
    match dotenv::dotenv() {
        Ok(_) => {
            tracing::trace!("Loaded .env file");
        }
        Err(e) => {
            tracing::warn!("Failed to load .env file: {}", e);
        }
    }

    // The configuration is validated and configured from the given directory
    let config_dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config".to_string());
    let config = load(&config_dir)?;

    // The RelayerContext takes a configuration, and populates objects that
    // are needed throughout the lifetime of the relayer, such as wallets
    // and providers.
    let ctx = RelayerContext::new(config);

    // start all background services.
    // this does not block, will fire the services on background tasks.
    let _requests = seda_relayer::service::ignite(&ctx).await?;
    tracing::event!(
        target: seda_relayer_utils::probe::TARGET,
        tracing::Level::DEBUG,
        kind = %seda_relayer_utils::probe::Kind::Lifecycle,
        started = true
    );

    // watch for signals
    let mut ctrlc_signal = unix::signal(unix::SignalKind::interrupt())?;
    let mut termination_signal = unix::signal(unix::SignalKind::terminate())?;
    let mut quit_signal = unix::signal(unix::SignalKind::quit())?;
    let shutdown = || {
        tracing::event!(
            target: seda_relayer_utils::probe::TARGET,
            tracing::Level::DEBUG,
            kind = %seda_relayer_utils::probe::Kind::Lifecycle,
            shutdown = true
        );
        tracing::warn!("Shutting down...");
        // send shutdown signal to all of the application.
        ctx.shutdown();
        std::thread::sleep(std::time::Duration::from_millis(300));
        tracing::info!("Clean Exit ..");
    };
    tokio::select! {
        _ = ctrlc_signal.recv() => {
            tracing::warn!("Interrupted (Ctrl+C) ...");
            shutdown();
        },
        _ = termination_signal.recv() => {
            tracing::warn!("Got Terminate signal ...");
            shutdown();
        },
        _ = quit_signal.recv() => {
            tracing::warn!("Quitting ...");
            shutdown();
        },
    }
    Ok(())
}

fn setup_logger() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("seda_relayer=info,seda_probe=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}
