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

//! Bindings for the target-chain contracts and the conversions from our
//! domain types into their ABI encodings. The encodings must match the
//! deployed verifier contracts byte for byte.

use ethers::prelude::abigen;
use ethers::types::Bytes;

use seda_chain_query::types::{DataResult, UnsignedBatch};
use seda_proof_generation::ProcessedSignature;
use seda_relayer_utils::{Error, Result};

abigen!(
    SedaCore,
    r#"[
        function getSedaProver() external view returns (address)
    ]"#
);

abigen!(
    SedaProver,
    r#"[
        struct Batch { uint64 batchHeight; uint64 blockHeight; bytes32 validatorsRoot; bytes32 resultsRoot; bytes32 provingMetadata; }
        struct ValidatorProof { address signer; uint32 votingPower; bytes32[] merkleProof; }
        struct DataResult { string version; bytes32 drId; bool consensus; uint8 exitCode; bytes result; uint64 blockHeight; uint64 blockTimestamp; uint128 gasUsed; bytes paybackAddress; bytes sedaPayload; }
        function getLastBatchHeight() external view returns (uint64)
        function postBatch(Batch newBatch, bytes[] signatures, ValidatorProof[] validatorProofs) external
        function postResult(DataResult result, uint64 batchHeight, bytes32[] proof) external returns (bytes32)
        function deriveResultId(DataResult result) external pure returns (bytes32)
        function hasResult(bytes32 resultId) external view returns (bool)
    ]"#
);

pub use seda_prover::{
    Batch as EvmBatch, DataResult as EvmDataResult,
    ValidatorProof as EvmValidatorProof,
};

impl From<&UnsignedBatch> for EvmBatch {
    fn from(header: &UnsignedBatch) -> Self {
        Self {
            batch_height: header.batch_number,
            block_height: header.block_height,
            validators_root: header.validator_root.to_fixed_bytes(),
            results_root: header.data_result_root.to_fixed_bytes(),
            proving_metadata: [0u8; 32],
        }
    }
}

impl From<&ProcessedSignature> for EvmValidatorProof {
    fn from(signature: &ProcessedSignature) -> Self {
        Self {
            signer: signature.eth_address,
            voting_power: signature.voting_power_percent,
            merkle_proof: signature
                .validator_proof
                .iter()
                .map(|node| node.to_fixed_bytes())
                .collect(),
        }
    }
}

impl TryFrom<&DataResult> for EvmDataResult {
    type Error = Error;

    fn try_from(result: &DataResult) -> Result<Self> {
        let dr_id = hex::decode(result.dr_id.trim_start_matches("0x"))?;
        let dr_id: [u8; 32] = dr_id
            .try_into()
            .map_err(|_| Error::Generic("data request id must be 32 bytes"))?;
        Ok(Self {
            version: result.version.clone(),
            dr_id,
            consensus: result.consensus,
            exit_code: result.exit_code,
            result: Bytes::from(result.result.clone()),
            block_height: result.block_height,
            block_timestamp: result.block_timestamp,
            gas_used: result.gas_used,
            payback_address: Bytes::from(result.payback_address.clone()),
            seda_payload: Bytes::from(result.seda_payload.clone()),
        })
    }
}
