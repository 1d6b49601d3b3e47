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

use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};

use seda_relayer_utils::Result;

/// Fees attached to a posted data request, in the chain's smallest
/// denomination. Not part of the request identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Paid to executors for running the request.
    pub request_fee: u128,
    /// Paid for posting the result.
    pub result_fee: u128,
    /// Paid for including the result in a batch.
    pub batch_fee: u128,
}

/// The immutable specification of an oracle computation.
///
/// Identical fields always derive the identical id, which makes the id the
/// idempotency key for posting: re-posting the same request is a duplicate,
/// not a new request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDataRequestArgs {
    /// Version of the data request format, e.g. `"0.0.1"`.
    pub version: String,
    /// Hex-encoded hash of the execution program.
    pub exec_program_id: String,
    /// Input bytes for the execution program.
    pub exec_inputs: Vec<u8>,
    /// Gas limit for the execution phase.
    pub exec_gas_limit: u64,
    /// Hex-encoded hash of the tally program.
    pub tally_program_id: String,
    /// Input bytes for the tally program.
    pub tally_inputs: Vec<u8>,
    /// Gas limit for the tally phase.
    pub tally_gas_limit: u64,
    /// How many executors must run the request.
    pub replication_factor: u16,
    /// Filter applied to executor reveals to decide consensus.
    pub consensus_filter: Vec<u8>,
    /// Gas price the requester is willing to pay.
    pub gas_price: u128,
    /// Free-form memo bytes, part of the request identity.
    pub memo: Vec<u8>,
    /// Where refunds are sent on the destination chain.
    pub payback_address: Vec<u8>,
    /// Attached fees; ride along with the message, outside the identity.
    pub fees: FeeSchedule,
}

impl PostDataRequestArgs {
    /// The deterministic identifier of this request, lowercase hex without a
    /// `0x` prefix.
    pub fn dr_id(&self) -> Result<String> {
        crate::id::derive_data_request_id(self)
    }
}

/// The outcome of executing a data request. Read-only once observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataResult {
    /// The result id as computed by the source chain.
    pub id: H256,
    /// Identifier of the originating data request, lowercase hex.
    pub dr_id: String,
    /// Version of the result format.
    pub version: String,
    /// Exit code of the tally program; `0` is success.
    pub exit_code: u8,
    /// The raw result bytes.
    pub result: Vec<u8>,
    /// Total gas consumed by execution and tally.
    pub gas_used: u128,
    /// Whether the executors reached consensus on the reveal set.
    pub consensus: bool,
    /// Source-chain block height the result was recorded at.
    pub block_height: u64,
    /// Source-chain block timestamp the result was recorded at.
    pub block_timestamp: u64,
    /// Where refunds are sent on the destination chain.
    pub payback_address: Vec<u8>,
    /// Protocol-reserved payload bytes.
    pub seda_payload: Vec<u8>,
}

/// Which batch carries a result's inclusion proof, and at which request
/// height the result was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAssignment {
    /// The number of the batch whose data-result tree includes the result.
    pub batch_number: u64,
    /// Block height of the originating data request, the cache key
    /// component alongside the request id.
    pub dr_block_height: u64,
}

/// A batch header as published by the source chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedBatch {
    /// Monotonic, gap-free batch number.
    pub batch_number: u64,
    /// Source-chain block height the batch was produced at.
    pub block_height: u64,
    /// The batch identifier; the message signed by the validators.
    pub batch_id: H256,
    /// Root of the tree over this batch's own data-result entries.
    pub current_data_result_root: H256,
    /// The published cumulative root: a two-leaf tree over
    /// `[current_data_result_root, previous batch's data_result_root]`.
    pub data_result_root: H256,
    /// Root of the tree over the validator entries.
    pub validator_root: H256,
}

/// One validator signature over a batch id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSignature {
    /// The validator's source-chain account address bytes.
    pub validator_address: Vec<u8>,
    /// A 65-byte recoverable secp256k1 signature (r ‖ s ‖ recovery id).
    pub secp256k1_signature: Vec<u8>,
}

/// One entry of the validator set a batch was signed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorEntry {
    /// The validator's source-chain account address bytes.
    pub validator_address: Vec<u8>,
    /// The target-chain address derived from the validator's public key.
    /// Authoritative, even if signature recovery disagrees.
    pub eth_address: Address,
    /// The validator's voting power share, in parts per 100_000_000.
    pub voting_power_percent: u32,
}

/// A batch with everything needed to prove it: header, signatures, the raw
/// data-result entries of its period, and the validator set. Immutable after
/// fetch; cached by batch number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// The signed header.
    pub header: UnsignedBatch,
    /// One signature per signing validator.
    pub signatures: Vec<BatchSignature>,
    /// The raw data-result entries of the batch's current period, in the
    /// exact bytes the tree leaves are hashed from.
    pub data_result_entries: Vec<Vec<u8>>,
    /// The validator entries the validator tree is built from.
    pub validator_entries: Vec<ValidatorEntry>,
}

impl Batch {
    /// Shorthand for the header's batch number.
    pub fn batch_number(&self) -> u64 {
        self.header.batch_number
    }
}
