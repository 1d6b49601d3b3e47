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

//! # Relayer Configuration Module
//!
//! Loads TOML/JSON config files from a directory, merges `SEDA_*`
//! environment variables on top, and validates the result. Secrets and
//! endpoints support `$ENV_VAR` indirection through the value wrappers of
//! `seda-relayer-types`.

#![warn(missing_docs)]

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Default values for the optional config knobs.
pub mod defaults;
/// Target-chain configuration.
pub mod evm;
/// Source-chain configuration.
pub mod source;
/// Config file discovery and parsing.
pub mod utils;

pub use evm::{DuplicateCheckConfig, EvmChainConfig};
pub use source::SourceChainConfig;

/// The top-level configuration of the relayer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SedaRelayerConfig {
    /// The source chain batches and results are read from.
    pub source: SourceChainConfig,
    /// Target chains, keyed by a human-readable name in the files and
    /// re-keyed by chain id after loading.
    #[serde(default)]
    pub evm: HashMap<String, EvmChainConfig>,
    /// Source-chain transaction queue tuning.
    #[serde(default)]
    pub tx_queue: TxQueueConfig,
}

/// Tuning for the source-chain transaction queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TxQueueConfig {
    /// Maximum number of messages bundled into one transaction.
    #[serde(default = "defaults::max_per_tx")]
    pub max_per_tx: usize,
    /// Flush a partial group after this many milliseconds.
    #[serde(default = "defaults::flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Queue timer granularity in milliseconds.
    #[serde(default = "defaults::tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for TxQueueConfig {
    fn default() -> Self {
        Self {
            max_per_tx: defaults::max_per_tx(),
            flush_interval_ms: defaults::flush_interval_ms(),
            tick_interval_ms: defaults::tick_interval_ms(),
        }
    }
}
