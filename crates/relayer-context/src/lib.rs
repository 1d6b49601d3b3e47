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

//! # Relayer Context Module
//!
//! A module for managing the context of the relayer: one context per
//! process (or per test), passed down explicitly. There is no ambient
//! global registry.

#![warn(missing_docs)]

use std::time::Duration;

use ethers::providers::Provider;
use ethers::signers::LocalWallet;
use tokio::sync::broadcast;

use seda_chain_query::rest::RestChainClient;
use seda_relayer_config::SedaRelayerConfig;
use seda_relayer_utils::{Error, HttpProvider, Result};

/// RelayerContext contains the relayer's configuration and shutdown signal.
#[derive(Clone)]
pub struct RelayerContext {
    /// The configuration of the relayer.
    pub config: SedaRelayerConfig,
    /// Broadcasts a shutdown signal to all active tasks.
    ///
    /// When a background task is spawned, it is passed a broadcast receiver
    /// handle. When a graceful shutdown is initiated, a `()` value is sent;
    /// each task finishes its in-flight work and returns.
    notify_shutdown: broadcast::Sender<()>,
}

impl RelayerContext {
    /// Creates a new RelayerContext.
    pub fn new(config: SedaRelayerConfig) -> Self {
        let (notify_shutdown, _) = broadcast::channel(2);
        Self {
            config,
            notify_shutdown,
        }
    }

    /// Returns a broadcast receiver handle for the shutdown signal.
    pub fn shutdown_signal(&self) -> Shutdown {
        Shutdown::new(self.notify_shutdown.subscribe())
    }

    /// Sends a shutdown signal to all subscribed tasks.
    pub fn shutdown(&self) {
        let _ = self.notify_shutdown.send(());
    }

    /// Builds the REST client for the configured source chain.
    pub fn source_client(&self) -> RestChainClient {
        RestChainClient::new(self.config.source.http_endpoint.as_url().clone())
    }

    /// Returns a new JSON-RPC provider for a target chain.
    ///
    /// # Arguments
    ///
    /// * `chain_id` - A string representing the chain id.
    pub fn evm_provider(&self, chain_id: &str) -> Result<HttpProvider> {
        let chain_config =
            self.config.evm.get(chain_id).ok_or_else(|| {
                Error::ChainNotFound {
                    chain_id: chain_id.to_string(),
                }
            })?;
        let provider =
            Provider::try_from(chain_config.http_endpoint.as_str())?
                .interval(Duration::from_millis(5u64));
        Ok(provider)
    }

    /// Sets up and returns an EVM wallet for a target chain.
    ///
    /// # Arguments
    ///
    /// * `chain_id` - A string representing the chain id.
    pub fn evm_wallet(&self, chain_id: &str) -> Result<LocalWallet> {
        let chain_config =
            self.config.evm.get(chain_id).ok_or_else(|| {
                Error::ChainNotFound {
                    chain_id: chain_id.to_string(),
                }
            })?;
        let private_key = chain_config
            .private_key
            .as_ref()
            .ok_or(Error::MissingSecrets)?;
        let wallet = LocalWallet::from_bytes(private_key.as_bytes())?;
        Ok(wallet)
    }
}

/// Listens for the relayer shutdown signal.
///
/// Shutdown is signalled using a `broadcast::Receiver`. Only a single value
/// is ever sent. Once a value has been sent via the broadcast channel, every
/// task should shut down.
///
/// The `Shutdown` struct listens for the signal and tracks that the signal
/// has been received. Callers may query for whether the shutdown signal has
/// been received or not.
#[derive(Debug)]
pub struct Shutdown {
    /// `true` if the shutdown signal has been received
    shutdown: bool,

    /// The receive half of the channel used to listen for shutdown.
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    /// Create a new `Shutdown` backed by the given `broadcast::Receiver`.
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            shutdown: false,
            notify,
        }
    }

    /// Receive the shutdown notice, waiting if necessary.
    pub async fn recv(&mut self) {
        // If the shutdown signal has already been received, then return
        // immediately.
        if self.shutdown {
            return;
        }

        // Cannot receive a "lag error" as only one value is ever sent.
        let _ = self.notify.recv().await;

        // Remember that the signal has been received.
        self.shutdown = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::H256;
    use seda_relayer_config::{
        EvmChainConfig, SourceChainConfig, TxQueueConfig,
    };
    use seda_relayer_types::{PrivateKey, RpcUrl};
    use std::collections::HashMap;

    fn context() -> RelayerContext {
        let mut evm = HashMap::new();
        evm.insert(
            "11155111".to_string(),
            EvmChainConfig {
                name: "sepolia".to_string(),
                enabled: true,
                http_endpoint: RpcUrl::from(
                    url::Url::parse("https://sepolia.example/").unwrap(),
                ),
                chain_id: 11155111,
                private_key: Some(PrivateKey::from(H256::from_low_u64_be(
                    42,
                ))),
                core_address: Default::default(),
                duplicate_check: Default::default(),
                explorer: None,
            },
        );
        evm.insert(
            "1337".to_string(),
            EvmChainConfig {
                name: "keyless".to_string(),
                enabled: true,
                http_endpoint: RpcUrl::from(
                    url::Url::parse("https://keyless.example/").unwrap(),
                ),
                chain_id: 1337,
                private_key: None,
                core_address: Default::default(),
                duplicate_check: Default::default(),
                explorer: None,
            },
        );
        RelayerContext::new(SedaRelayerConfig {
            source: SourceChainConfig {
                name: "seda-testnet".to_string(),
                http_endpoint: RpcUrl::from(
                    url::Url::parse("https://rpc.testnet.example/").unwrap(),
                ),
                starting_batch: None,
                batch_poll_interval_ms: 1_000,
                result_poll_interval_ms: 1_000,
                await_result_timeout_secs: 60,
            },
            evm,
            tx_queue: TxQueueConfig::default(),
        })
    }

    #[test]
    fn builds_wallets_for_configured_chains() {
        let ctx = context();
        assert!(ctx.evm_wallet("11155111").is_ok());
        assert!(ctx.evm_provider("11155111").is_ok());
    }

    #[test]
    fn a_missing_private_key_is_a_startup_error() {
        let ctx = context();
        assert!(matches!(
            ctx.evm_wallet("1337").unwrap_err(),
            Error::MissingSecrets
        ));
    }

    #[test]
    fn unknown_chains_are_reported() {
        let ctx = context();
        assert!(matches!(
            ctx.evm_provider("999").unwrap_err(),
            Error::ChainNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn shutdown_reaches_every_subscriber() {
        let ctx = context();
        let mut first = ctx.shutdown_signal();
        let mut second = ctx.shutdown_signal();
        ctx.shutdown();
        first.recv().await;
        second.recv().await;
    }
}
