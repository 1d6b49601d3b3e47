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
use ethers::utils::keccak256;

/// Leaf domain separator for data-result entries.
pub const RESULT_DOMAIN_SEPARATOR: u8 = 0x00;
/// Leaf domain separator for validator entries.
pub const SECP256K1_DOMAIN_SEPARATOR: u8 = 0x01;

/// A 32 byte tree node.
pub type Node = [u8; 32];

/// Hash a pair of nodes in lexicographic order.
///
/// Ordering the operands makes the hash commutative, so proof verification
/// does not need to know whether a sibling sat on the left or the right.
/// This must match the pair hashing of the on-chain verifier exactly.
pub fn hash_pair(a: Node, b: Node) -> Node {
    let mut data = [0u8; 64];
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    data[..32].copy_from_slice(&lo);
    data[32..].copy_from_slice(&hi);
    keccak256(data)
}

/// The canonical leaf of a data-result entry: `keccak256(0x00 ‖ entry)`.
pub fn result_leaf(entry: &[u8]) -> Node {
    let mut data = Vec::with_capacity(1 + entry.len());
    data.push(RESULT_DOMAIN_SEPARATOR);
    data.extend_from_slice(entry);
    keccak256(data)
}

/// The canonical leaf of a validator entry:
/// `keccak256(0x01 ‖ address ‖ voting_power_be4)`.
pub fn validator_leaf(eth_address: Address, voting_power_percent: u32) -> Node {
    let mut data = [0u8; 1 + 20 + 4];
    data[0] = SECP256K1_DOMAIN_SEPARATOR;
    data[1..21].copy_from_slice(eth_address.as_bytes());
    data[21..].copy_from_slice(&voting_power_percent.to_be_bytes());
    keccak256(data)
}

/// A Merkle tree whose leaves are sorted by value before pairing.
///
/// Sorting the leaves plus the commutative [`hash_pair`] makes proofs
/// independent of the original leaf order: two parties holding the same set
/// of leaves in any order compute the same root. Unpaired nodes of an odd
/// level are promoted unhashed.
#[derive(Debug, Clone)]
pub struct SortedMerkleTree {
    levels: Vec<Vec<Node>>,
}

impl SortedMerkleTree {
    /// Builds the tree from a set of already-hashed leaves.
    ///
    /// The root of an empty tree is defined as the zero node.
    pub fn new(mut leaves: Vec<Node>) -> Self {
        leaves.sort_unstable();
        let mut levels = vec![leaves];
        while levels.last().map(Vec::len).unwrap_or_default() > 1 {
            let next = levels
                .last()
                .expect("levels is never empty")
                .chunks(2)
                .map(|pair| match pair {
                    [a, b] => hash_pair(*a, *b),
                    [a] => *a,
                    _ => unreachable!("chunks(2) yields 1 or 2 items"),
                })
                .collect();
            levels.push(next);
        }
        Self { levels }
    }

    /// The tree root.
    pub fn root(&self) -> Node {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_default()
    }

    /// Number of leaves in the tree.
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(Vec::len).unwrap_or_default()
    }

    /// The sibling path proving that `leaf` belongs to this tree, or `None`
    /// if the leaf is not present.
    pub fn proof(&self, leaf: &Node) -> Option<Vec<Node>> {
        let mut index =
            self.levels.first()?.iter().position(|l| l == leaf)?;
        let mut proof = Vec::new();
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = if index % 2 == 0 { index + 1 } else { index - 1 };
            if let Some(node) = level.get(sibling) {
                proof.push(*node);
            }
            index /= 2;
        }
        Some(proof)
    }
}

/// Replays a proof against a leaf, reconstructing the root it commits to.
///
/// This mirrors the verification loop of the on-chain contracts and is the
/// reference the generated proofs are tested against.
pub fn process_proof(leaf: Node, proof: &[Node]) -> Node {
    proof.iter().fold(leaf, |acc, sibling| hash_pair(acc, *sibling))
}

/// Whether `proof` proves that `leaf` belongs to the tree with `root`.
pub fn verify_proof(leaf: Node, proof: &[Node], root: Node) -> bool {
    process_proof(leaf, proof) == root
}
