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

//! # Proof Generation Module
//!
//! Builds the two Merkle trees of a batch (validator tree and data-result
//! tree) and produces inclusion proofs that verify byte-for-byte against the
//! on-chain prover contracts. Also recovers and validates the batch
//! signatures to decide whether the batch reached consensus.

#![warn(missing_docs)]

/// Per-batch tree construction and inclusion proofs.
pub mod batch;
/// Sorted-leaf keccak256 Merkle trees.
pub mod merkle;
/// Batch signature recovery and voting-power accumulation.
pub mod signatures;

pub use batch::BatchProver;
pub use merkle::{verify_proof, SortedMerkleTree};
pub use signatures::{
    process_batch_signatures, ProcessedSignature, ProcessedSignatureSet,
    CONSENSUS_THRESHOLD, VOTING_POWER_SCALE,
};
