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

use serde::{Deserialize, Serialize};

use seda_relayer_types::RpcUrl;

use crate::defaults;

/// Configuration for the source chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceChainConfig {
    /// Human-readable name, for logs.
    pub name: String,
    /// HTTP endpoint of the chain's REST gateway.
    #[serde(skip_serializing)]
    pub http_endpoint: RpcUrl,
    /// Explicit batch number to start relaying from. Starts from the
    /// latest signed batch when absent. An explicit number that cannot be
    /// found halts startup.
    pub starting_batch: Option<u64>,
    /// How often to poll for the next batch, in milliseconds.
    #[serde(default = "defaults::batch_poll_interval_ms")]
    pub batch_poll_interval_ms: u64,
    /// How often to poll watched requests for results, in milliseconds.
    #[serde(default = "defaults::result_poll_interval_ms")]
    pub result_poll_interval_ms: u64,
    /// How long to await a result before giving up, in seconds.
    #[serde(default = "defaults::await_result_timeout_secs")]
    pub await_result_timeout_secs: u64,
}
