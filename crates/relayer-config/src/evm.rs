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

use ethers::types::Address;
use serde::{Deserialize, Serialize};

use seda_relayer_types::{PrivateKey, RpcUrl};

/// EvmChainConfig is the configuration for one EVM based target network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EvmChainConfig {
    /// String that groups configuration for this chain on a human-readable name.
    pub name: String,
    /// Boolean indicating this target network is enabled or not.
    #[serde(default)]
    pub enabled: bool,
    /// Http(s) Endpoint for quick Req/Res
    #[serde(skip_serializing)]
    pub http_endpoint: RpcUrl,
    /// chain specific id (output of chainId opcode on EVM networks)
    pub chain_id: u64,
    /// The Private Key of this account on this network.
    ///
    /// 1. if it starts with '0x' then this would be raw (64 bytes) hex encoded
    ///    private key.
    /// 2. if it starts with '$' then it would be considered as an Enviroment variable
    ///    of a hex-encoded private key.
    #[serde(skip_serializing)]
    pub private_key: Option<PrivateKey>,
    /// The address of the core contract that knows the prover address.
    pub core_address: Address,
    /// How to detect results that were already posted to this chain.
    #[serde(default)]
    pub duplicate_check: DuplicateCheckConfig,
    /// Block Explorer for this chain.
    ///
    /// Optional, and only used for printing clickable links
    /// for transactions in the logs.
    #[serde(skip_serializing)]
    pub explorer: Option<url::Url>,
}

/// Duplicate detection policy for result posting.
///
/// The query-based check has produced false positives before, so it is a
/// per-chain choice rather than hard-wired behavior.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateCheckConfig {
    /// Ask the prover contract before posting.
    #[default]
    Query,
    /// Post unconditionally and let the contract reject duplicates.
    Off,
}
