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
use ethers::utils::keccak256;

use seda_chain_query::types::Batch;
use seda_relayer_utils::{Error, Result};

use crate::batch::BatchProver;

/// Minimum aggregate voting power for a batch to count as signed, in parts
/// per [`VOTING_POWER_SCALE`] (66.666666%).
pub const CONSENSUS_THRESHOLD: u64 = 66_666_666;
/// The fixed-point scale voting power shares are expressed in.
pub const VOTING_POWER_SCALE: u64 = 100_000_000;

/// A validated batch signature, ready for target-chain submission.
#[derive(Debug, Clone)]
pub struct ProcessedSignature {
    /// The signer's target-chain address, taken from the validator entry.
    pub eth_address: Address,
    /// The signer's voting power share, in parts per 100_000_000.
    pub voting_power_percent: u32,
    /// The signature re-encoded in target-chain layout:
    /// `r(32) ‖ s(32) ‖ v(27|28)`.
    pub signature: Vec<u8>,
    /// Inclusion proof of the signer in the batch's validator tree.
    pub validator_proof: Vec<H256>,
}

/// The outcome of processing all signatures of one batch.
#[derive(Debug, Clone)]
pub struct ProcessedSignatureSet {
    /// Valid signatures, sorted ascending by signer address. The contracts
    /// require canonical order.
    pub signatures: Vec<ProcessedSignature>,
    /// Summed voting power of the valid signatures.
    pub voting_power: u64,
    /// Whether `voting_power >= CONSENSUS_THRESHOLD`.
    pub consensus_reached: bool,
}

impl ProcessedSignatureSet {
    /// Errors with [`Error::ConsensusNotReached`] unless the threshold was
    /// met, for callers that refuse to post unsigned batches.
    pub fn require_consensus(&self, batch_number: u64) -> Result<()> {
        if self.consensus_reached {
            Ok(())
        } else {
            Err(Error::ConsensusNotReached {
                batch_number,
                voting_power: self.voting_power,
            })
        }
    }
}

/// Recover, validate and re-encode every signature of `batch`.
///
/// Individual failures are skipped, not fatal: a batch missing one broken
/// signature can still clear the threshold with the rest. A batch with no
/// valid signature at all simply yields zero voting power.
pub fn process_batch_signatures(
    batch: &Batch,
    prover: &BatchProver,
) -> Result<ProcessedSignatureSet> {
    let batch_id = batch.header.batch_id;
    let mut signatures = Vec::with_capacity(batch.signatures.len());
    let mut voting_power = 0u64;

    for raw in &batch.signatures {
        let Some(entry) = batch
            .validator_entries
            .iter()
            .find(|v| v.validator_address == raw.validator_address)
        else {
            tracing::warn!(
                batch_number = batch.batch_number(),
                validator = %hex::encode(&raw.validator_address),
                "signature without a matching validator entry, skipping"
            );
            continue;
        };

        let (recovered, signature) =
            match recover_signer(batch_id, &raw.secp256k1_signature) {
                Ok(recovered) => recovered,
                Err(e) => {
                    tracing::warn!(
                        batch_number = batch.batch_number(),
                        signer = %entry.eth_address,
                        error = %e,
                        "unparseable batch signature, skipping"
                    );
                    continue;
                }
            };
        if recovered != entry.eth_address {
            // The recorded address stays authoritative; the contracts verify
            // against the validator tree, not against our recovery.
            tracing::warn!(
                batch_number = batch.batch_number(),
                recovered = %recovered,
                recorded = %entry.eth_address,
                "recovered signer differs from the validator entry"
            );
        }

        signatures.push(ProcessedSignature {
            eth_address: entry.eth_address,
            voting_power_percent: entry.voting_power_percent,
            signature,
            validator_proof: prover.validator_proof(entry)?,
        });
        voting_power += u64::from(entry.voting_power_percent);
    }

    signatures.sort_by_key(|s| s.eth_address);
    Ok(ProcessedSignatureSet {
        voting_power,
        consensus_reached: voting_power >= CONSENSUS_THRESHOLD,
        signatures,
    })
}

/// Recover the signer address from a 65-byte recoverable signature over
/// `batch_id`, and return the signature re-encoded with `v ∈ {27, 28}`.
fn recover_signer(
    batch_id: H256,
    signature: &[u8],
) -> Result<(Address, Vec<u8>)> {
    if signature.len() != 65 {
        return Err(Error::Generic(
            "batch signature must be 65 bytes (r ‖ s ‖ recovery id)",
        ));
    }
    let parsed =
        libsecp256k1::Signature::parse_standard_slice(&signature[..64])?;
    let raw_v = signature[64];
    let recovery_id = libsecp256k1::RecoveryId::parse(if raw_v >= 27 {
        raw_v - 27
    } else {
        raw_v
    })?;
    let message = libsecp256k1::Message::parse_slice(batch_id.as_bytes())?;
    let public_key = libsecp256k1::recover(&message, &parsed, &recovery_id)?;

    // uncompressed SEC1 encoding, drop the 0x04 prefix
    let uncompressed = public_key.serialize();
    let hash = keccak256(&uncompressed[1..]);
    let address = Address::from_slice(&hash[12..]);

    let mut target_chain = signature[..64].to_vec();
    target_chain.push(recovery_id.serialize() + 27);
    Ok((address, target_chain))
}
