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

use ethers::types::H256;

use seda_chain_query::types::{Batch, UnsignedBatch, ValidatorEntry};
use seda_relayer_utils::{Error, Result};

use crate::merkle::{
    hash_pair, result_leaf, validator_leaf, Node, SortedMerkleTree,
};

/// The per-batch proof generator.
///
/// Holds the two trees of one batch. Construction recomputes the published
/// data-result root from the raw entries and the previous batch's root; a
/// divergence means our view of the chain data is corrupt, so it fails
/// instead of producing proofs that can never verify.
#[derive(Debug, Clone)]
pub struct BatchProver {
    header: UnsignedBatch,
    result_tree: SortedMerkleTree,
    validator_tree: SortedMerkleTree,
    previous_data_result_root: Node,
}

impl BatchProver {
    /// Builds the trees for `batch`, checking the recomputed cumulative
    /// data-result root against the one published on the source chain.
    ///
    /// `previous_data_result_root` is the published `data_result_root` of
    /// batch `batch_number - 1`.
    pub fn new(
        batch: &Batch,
        previous_data_result_root: H256,
    ) -> Result<Self> {
        let result_tree = SortedMerkleTree::new(
            batch
                .data_result_entries
                .iter()
                .map(|entry| result_leaf(entry))
                .collect(),
        );
        let previous = previous_data_result_root.to_fixed_bytes();
        let computed = hash_pair(result_tree.root(), previous);
        let published = batch.header.data_result_root.to_fixed_bytes();
        if computed != published {
            return Err(Error::ResultRootMismatch {
                batch_number: batch.batch_number(),
                expected: batch.header.data_result_root,
                computed: H256::from(computed),
            });
        }

        let validator_tree = SortedMerkleTree::new(
            batch
                .validator_entries
                .iter()
                .map(|v| validator_leaf(v.eth_address, v.voting_power_percent))
                .collect(),
        );
        if validator_tree.root()
            != batch.header.validator_root.to_fixed_bytes()
        {
            // Not fatal here: the batch posting will be rejected on chain,
            // which surfaces per-network instead of blocking every chain.
            tracing::warn!(
                batch_number = batch.batch_number(),
                "recomputed validator root differs from the published one"
            );
        }

        Ok(Self {
            header: batch.header,
            result_tree,
            validator_tree,
            previous_data_result_root: previous,
        })
    }

    /// The header of the batch this prover was built for.
    pub fn header(&self) -> &UnsignedBatch {
        &self.header
    }

    /// Root of the tree over this batch's own data-result entries.
    pub fn current_data_result_root(&self) -> H256 {
        H256::from(self.result_tree.root())
    }

    /// Inclusion proof of a validator entry in the validator tree.
    pub fn validator_proof(
        &self,
        entry: &ValidatorEntry,
    ) -> Result<Vec<H256>> {
        let leaf =
            validator_leaf(entry.eth_address, entry.voting_power_percent);
        let proof = self
            .validator_tree
            .proof(&leaf)
            .ok_or(Error::Generic("validator entry is not in the tree"))?;
        Ok(proof.into_iter().map(H256::from).collect())
    }

    /// Inclusion proof of a data result against a target batch root.
    ///
    /// The proof layout is fixed and must not be permuted:
    ///
    /// 1. the sibling path inside this batch's data-result tree,
    /// 2. the previous batch's cumulative data-result root,
    /// 3. `intermediate_roots`: the *current-period* roots of the batches
    ///    after this one up to and including the target batch, in ascending
    ///    batch-number order.
    ///
    /// With an empty `intermediate_roots` the proof verifies against this
    /// batch's own published root; each appended root folds the accumulator
    /// forward by one batch, so the full proof verifies against the target
    /// batch's published root.
    pub fn result_proof(
        &self,
        result_id: H256,
        intermediate_roots: &[H256],
    ) -> Result<Vec<H256>> {
        let leaf = result_leaf(result_id.as_bytes());
        let mut proof = self
            .result_tree
            .proof(&leaf)
            .ok_or(Error::Generic("result is not part of this batch"))?;
        proof.push(self.previous_data_result_root);
        proof.extend(intermediate_roots.iter().map(|h| h.to_fixed_bytes()));
        Ok(proof.into_iter().map(H256::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::verify_proof;
    use ethers::types::Address;
    use ethers::utils::keccak256;
    use seda_chain_query::types::BatchSignature;

    fn result_ids(seed: u8, n: u8) -> Vec<Vec<u8>> {
        (0..n).map(|i| keccak256([seed, i]).to_vec()).collect()
    }

    fn validators() -> Vec<ValidatorEntry> {
        (0u8..4)
            .map(|i| ValidatorEntry {
                validator_address: vec![i; 20],
                eth_address: Address::from_slice(&[i + 1; 20]),
                voting_power_percent: 25_000_000,
            })
            .collect()
    }

    /// Builds a batch whose published roots are consistent with its entries,
    /// the way the source chain would have produced it.
    fn make_batch(
        batch_number: u64,
        entries: Vec<Vec<u8>>,
        previous_root: Node,
    ) -> Batch {
        let result_tree = SortedMerkleTree::new(
            entries.iter().map(|e| result_leaf(e)).collect(),
        );
        let validator_entries = validators();
        let validator_tree = SortedMerkleTree::new(
            validator_entries
                .iter()
                .map(|v| validator_leaf(v.eth_address, v.voting_power_percent))
                .collect(),
        );
        Batch {
            header: UnsignedBatch {
                batch_number,
                block_height: batch_number * 100,
                batch_id: H256::from(keccak256(batch_number.to_be_bytes())),
                current_data_result_root: H256::from(result_tree.root()),
                data_result_root: H256::from(hash_pair(
                    result_tree.root(),
                    previous_root,
                )),
                validator_root: H256::from(validator_tree.root()),
            },
            signatures: Vec::<BatchSignature>::new(),
            data_result_entries: entries,
            validator_entries,
        }
    }

    #[test]
    fn proof_round_trips_against_the_published_root() {
        let previous = keccak256(b"previous");
        let entries = result_ids(1, 5);
        let batch = make_batch(100, entries.clone(), previous);
        let prover = BatchProver::new(&batch, H256::from(previous)).unwrap();

        let result_id = H256::from_slice(&entries[3]);
        let proof = prover.result_proof(result_id, &[]).unwrap();
        let nodes: Vec<Node> =
            proof.iter().map(|h| h.to_fixed_bytes()).collect();
        assert!(verify_proof(
            result_leaf(result_id.as_bytes()),
            &nodes,
            batch.header.data_result_root.to_fixed_bytes(),
        ));
    }

    #[test]
    fn mutating_any_proof_element_breaks_reconstruction() {
        let previous = keccak256(b"previous");
        let entries = result_ids(1, 5);
        let batch = make_batch(100, entries.clone(), previous);
        let prover = BatchProver::new(&batch, H256::from(previous)).unwrap();

        let result_id = H256::from_slice(&entries[0]);
        let proof = prover.result_proof(result_id, &[]).unwrap();
        let root = batch.header.data_result_root.to_fixed_bytes();
        for i in 0..proof.len() {
            let mut nodes: Vec<Node> =
                proof.iter().map(|h| h.to_fixed_bytes()).collect();
            nodes[i][31] ^= 0x01;
            assert!(!verify_proof(
                result_leaf(result_id.as_bytes()),
                &nodes,
                root,
            ));
        }
    }

    #[test]
    fn cross_batch_proof_reaches_a_later_target_root() {
        // batches 99..=103, each folding the previous cumulative root
        let mut previous = keccak256(b"genesis");
        let mut batches = Vec::new();
        for number in 99u64..=103 {
            let batch =
                make_batch(number, result_ids(number as u8, 4), previous);
            previous = batch.header.data_result_root.to_fixed_bytes();
            batches.push(batch);
        }

        // prove a result assigned to batch 100 against the root of batch 103
        let assigned = &batches[1];
        let target = &batches[4];
        let prover = BatchProver::new(
            assigned,
            batches[0].header.data_result_root,
        )
        .unwrap();
        let result_id =
            H256::from_slice(&assigned.data_result_entries[2]);
        let intermediates: Vec<H256> = batches[2..]
            .iter()
            .map(|b| b.header.current_data_result_root)
            .collect();
        let proof = prover.result_proof(result_id, &intermediates).unwrap();
        let nodes: Vec<Node> =
            proof.iter().map(|h| h.to_fixed_bytes()).collect();
        assert!(verify_proof(
            result_leaf(result_id.as_bytes()),
            &nodes,
            target.header.data_result_root.to_fixed_bytes(),
        ));
    }

    #[test]
    fn construction_fails_on_a_root_mismatch() {
        let previous = keccak256(b"previous");
        let mut batch = make_batch(100, result_ids(1, 3), previous);
        batch.header.data_result_root = H256::from(keccak256(b"garbage"));
        let err = BatchProver::new(&batch, H256::from(previous)).unwrap_err();
        assert!(matches!(
            err,
            Error::ResultRootMismatch {
                batch_number: 100,
                ..
            }
        ));
    }

    #[test]
    fn validator_proofs_verify_against_the_validator_root() {
        let previous = keccak256(b"previous");
        let batch = make_batch(100, result_ids(1, 3), previous);
        let prover = BatchProver::new(&batch, H256::from(previous)).unwrap();
        for entry in &batch.validator_entries {
            let proof = prover.validator_proof(entry).unwrap();
            let nodes: Vec<Node> =
                proof.iter().map(|h| h.to_fixed_bytes()).collect();
            assert!(verify_proof(
                validator_leaf(entry.eth_address, entry.voting_power_percent),
                &nodes,
                batch.header.validator_root.to_fixed_bytes(),
            ));
        }
    }

    #[test]
    fn unknown_results_are_rejected() {
        let previous = keccak256(b"previous");
        let batch = make_batch(100, result_ids(1, 3), previous);
        let prover = BatchProver::new(&batch, H256::from(previous)).unwrap();
        let foreign = H256::from(keccak256(b"not in the batch"));
        assert!(prover.result_proof(foreign, &[]).is_err());
    }
}
