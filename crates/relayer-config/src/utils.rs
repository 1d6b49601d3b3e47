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

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Config, File};

use crate::SedaRelayerConfig;

/// A helper function that will search for all config files in the given directory and return them as a vec
/// of the paths.
///
/// Supported file extensions are:
/// - `.toml`.
/// - `.json`.
pub fn search_config_files<P: AsRef<Path>>(
    base_dir: P,
) -> seda_relayer_utils::Result<Vec<PathBuf>> {
    // A pattern that covers all toml or json files in the config directory and subdirectories.
    let toml_pattern = format!("{}/**/*.toml", base_dir.as_ref().display());
    let json_pattern = format!("{}/**/*.json", base_dir.as_ref().display());
    tracing::trace!(
        "Loading config files from {} and {}",
        toml_pattern,
        json_pattern
    );
    let toml_files = glob::glob(&toml_pattern)?;
    let json_files = glob::glob(&json_pattern)?;
    toml_files
        .chain(json_files)
        .map(|v| v.map_err(seda_relayer_utils::Error::from))
        .collect()
}

/// Try to parse the [`SedaRelayerConfig`] from the given config file(s).
pub fn parse_from_files(
    files: &[PathBuf],
) -> seda_relayer_utils::Result<SedaRelayerConfig> {
    let mut builder = Config::builder();
    for config_file in files {
        tracing::trace!("Loading config file: {}", config_file.display());
        let ext = config_file
            .extension()
            .map(|e| e.to_str().unwrap_or(""))
            .unwrap_or("");
        let format = match ext {
            "toml" => config::FileFormat::Toml,
            "json" => config::FileFormat::Json,
            _ => {
                tracing::warn!("Unknown file extension: {}", ext);
                continue;
            }
        };
        builder = builder
            .add_source(File::from(config_file.as_path()).format(format));
    }

    // also merge in the environment (with a prefix of SEDA).
    let builder = builder
        .add_source(config::Environment::with_prefix("SEDA").separator("_"));
    let cfg = builder.build()?;
    // and finally deserialize the config and post-process it
    let config: Result<
        SedaRelayerConfig,
        serde_path_to_error::Error<config::ConfigError>,
    > = serde_path_to_error::deserialize(cfg);
    match config {
        Ok(c) => postloading_process(c),
        Err(e) => {
            tracing::error!("{}", e);
            Err(e.into())
        }
    }
}

/// Load the configuration files from the given directory.
///
/// It is the same as using the [`search_config_files`] and
/// [`parse_from_files`] functions combined.
pub fn load<P: AsRef<Path>>(
    path: P,
) -> seda_relayer_utils::Result<SedaRelayerConfig> {
    parse_from_files(&search_config_files(path)?)
}

/// The postloading_process exists to validate configuration and standardize
/// the format of the configuration
pub fn postloading_process(
    mut config: SedaRelayerConfig,
) -> seda_relayer_utils::Result<SedaRelayerConfig> {
    tracing::trace!("Checking configration sanity ...");

    // 1. drain everything, and take enabled chains.
    let old_evm = config
        .evm
        .drain()
        .filter(|(_, chain)| chain.enabled)
        .collect::<HashMap<_, _>>();
    // 2. insert them again, keyed by chain id.
    for (_, v) in old_evm {
        config.evm.insert(v.chain_id.to_string(), v);
    }

    if config.evm.is_empty() {
        tracing::warn!(
            "!!WARNING!!: no enabled target chains in the config,
            batches and results will be observed but never posted"
        );
    }
    for chain in config.evm.values() {
        if chain.private_key.is_none() {
            tracing::warn!(
                "!!WARNING!!: target chain ({}) has no private key configured,
                startup will fail when its wallet is built",
                chain.name
            );
        }
    }

    tracing::trace!(
        "postloaded config: {}",
        serde_json::to_string_pretty(&config)?
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DuplicateCheckConfig;

    const SAMPLE: &str = r#"
        [source]
        name = "seda-testnet"
        http-endpoint = "https://rpc.testnet.example/"
        starting-batch = 100

        [tx-queue]
        max-per-tx = 5

        [evm.sepolia]
        name = "sepolia"
        enabled = true
        http-endpoint = "https://sepolia.example/"
        chain-id = 11155111
        private-key = "0x000000000000000000000000000000000000000000000000000000000000002a"
        core-address = "0x1111111111111111111111111111111111111111"
        duplicate-check = "off"

        [evm.disabled-chain]
        name = "disabled-chain"
        enabled = false
        http-endpoint = "https://disabled.example/"
        chain-id = 5
        core-address = "0x2222222222222222222222222222222222222222"
    "#;

    fn parse(raw: &str) -> SedaRelayerConfig {
        let cfg = Config::builder()
            .add_source(config::File::from_str(
                raw,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: SedaRelayerConfig =
            serde_path_to_error::deserialize(cfg).unwrap();
        postloading_process(config).unwrap()
    }

    #[test]
    fn parses_and_rekeys_enabled_chains() {
        let config = parse(SAMPLE);
        assert_eq!(config.source.name, "seda-testnet");
        assert_eq!(config.source.starting_batch, Some(100));
        assert_eq!(config.tx_queue.max_per_tx, 5);
        // defaults fill the unspecified knobs
        assert_eq!(config.tx_queue.flush_interval_ms, 5_000);
        assert_eq!(config.source.await_result_timeout_secs, 300);

        // disabled chains are dropped, survivors are keyed by chain id
        assert_eq!(config.evm.len(), 1);
        let chain = config.evm.get("11155111").unwrap();
        assert_eq!(chain.name, "sepolia");
        assert_eq!(chain.duplicate_check, DuplicateCheckConfig::Off);
    }

    #[test]
    fn duplicate_check_defaults_to_query() {
        let raw = SAMPLE.replace("duplicate-check = \"off\"\n", "");
        let config = parse(&raw);
        let chain = config.evm.get("11155111").unwrap();
        assert_eq!(chain.duplicate_check, DuplicateCheckConfig::Query);
    }
}
