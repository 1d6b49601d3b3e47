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

//! # Nonce Manager Module
//!
//! Exclusive nonce reservation per `(target chain, signer)` so that batch
//! and result submissions to many chains can run in parallel without nonce
//! collisions. A reservation is the only lock-like resource in the relayer:
//! reserve, act, release.
//!
//! Collisions still happen (external transactions from the same key, RPC
//! races); [`NonceManager::handle_nonce_failure`] re-syncs from the chain
//! and escalates the gas price so a bounded number of retries converges.

#![warn(missing_docs)]

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use ethers::providers::Middleware;
use ethers::types::{Address, BlockNumber, H256, U256};
use parking_lot::Mutex;

use seda_relayer_utils::{HttpProvider, Result};

/// How many submission attempts callers should make before giving up on a
/// nonce-conflicted transaction.
pub const MAX_SUBMISSION_ATTEMPTS: usize = 3;
/// Gas price escalation applied on every nonce failure, in percent.
pub const GAS_ESCALATION_PERCENT: u64 = 25;
/// Pause before retrying after a plain nonce conflict.
pub const NONCE_RETRY_WAIT: Duration = Duration::from_millis(500);
/// Pause before retrying after an underpriced-replacement signal; longer,
/// to let the mempool state settle.
pub const UNDERPRICED_RETRY_WAIT: Duration = Duration::from_secs(2);

/// Whether an RPC error text indicates a nonce collision.
pub fn is_nonce_conflict(message: &str) -> bool {
    let m = message.to_lowercase();
    m.contains("nonce too low")
        || m.contains("nonce is too low")
        || m.contains("invalid nonce")
        || m.contains("already known")
}

/// Whether an RPC error text indicates an underpriced replacement.
pub fn is_underpriced(message: &str) -> bool {
    let m = message.to_lowercase();
    m.contains("replacement transaction underpriced")
        || m.contains("transaction underpriced")
}

/// The identity a nonce sequence belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NonceKey {
    /// The target chain id.
    pub chain_id: u64,
    /// The submitting account.
    pub signer: Address,
}

#[derive(Debug, Default)]
struct KeyState {
    initialized: bool,
    next_nonce: U256,
    /// Nonces released after a failed submission, reusable lowest-first.
    free: BTreeSet<U256>,
}

/// Tracks reserved and released nonces per [`NonceKey`].
///
/// Cheaply clonable; all clones share state.
#[derive(Debug, Clone, Default)]
pub struct NonceManager {
    inner: Arc<Mutex<HashMap<NonceKey, KeyState>>>,
}

impl NonceManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next usable nonce for `(chain_id, signer)` together with
    /// the current market gas price.
    ///
    /// The reservation must be released exactly once; dropping it without an
    /// explicit [`NonceReservation::release`] counts as a failed release.
    pub async fn reserve(
        &self,
        provider: &HttpProvider,
        chain_id: u64,
        signer: Address,
    ) -> Result<NonceReservation> {
        let chain_nonce = provider
            .get_transaction_count(signer, Some(BlockNumber::Pending.into()))
            .await?;
        let gas_price = provider.get_gas_price().await?;
        Ok(self.reserve_with(
            NonceKey { chain_id, signer },
            chain_nonce,
            gas_price,
        ))
    }

    /// The synchronous reservation step, fed with chain state the caller
    /// already fetched.
    pub fn reserve_with(
        &self,
        key: NonceKey,
        chain_nonce: U256,
        gas_price: U256,
    ) -> NonceReservation {
        let mut inner = self.inner.lock();
        let state = inner.entry(key).or_default();
        if !state.initialized {
            state.initialized = true;
            state.next_nonce = chain_nonce;
        } else if chain_nonce > state.next_nonce {
            // someone else moved the account forward; stale gaps are gone
            state.next_nonce = chain_nonce;
            state.free.retain(|n| *n >= chain_nonce);
        }
        let nonce = match state.free.iter().next().copied() {
            Some(freed) => {
                state.free.remove(&freed);
                freed
            }
            None => {
                let next = state.next_nonce;
                state.next_nonce = next + U256::one();
                next
            }
        };
        tracing::trace!(
            target: seda_relayer_utils::probe::TARGET,
            kind = %seda_relayer_utils::probe::Kind::NonceManager,
            chain_id = key.chain_id,
            signer = %key.signer,
            nonce = %nonce,
            gas_price = %gas_price,
            "reserved nonce"
        );
        NonceReservation {
            key,
            nonce,
            gas_price,
            tx_hash: None,
            released: false,
            manager: self.clone(),
        }
    }

    /// Recover from a nonce collision or underpriced-replacement failure:
    /// release the reservation as failed, wait for the chain state to
    /// settle, re-sync the account nonce and hand out a fresh reservation
    /// with an escalated gas price.
    pub async fn handle_nonce_failure(
        &self,
        provider: &HttpProvider,
        reservation: NonceReservation,
        underpriced: bool,
    ) -> Result<NonceReservation> {
        let key = reservation.key;
        let escalated = escalate(reservation.gas_price);
        reservation.release(false);

        let wait = if underpriced {
            UNDERPRICED_RETRY_WAIT
        } else {
            NONCE_RETRY_WAIT
        };
        tokio::time::sleep(wait).await;

        let chain_nonce = provider
            .get_transaction_count(
                key.signer,
                Some(BlockNumber::Pending.into()),
            )
            .await?;
        let market = provider.get_gas_price().await?;
        Ok(self.reserve_with(key, chain_nonce, escalated.max(market)))
    }

    fn release_inner(&self, key: NonceKey, nonce: U256, success: bool) {
        let mut inner = self.inner.lock();
        let state = inner.entry(key).or_default();
        if !success {
            state.free.insert(nonce);
        }
        tracing::trace!(
            target: seda_relayer_utils::probe::TARGET,
            kind = %seda_relayer_utils::probe::Kind::NonceManager,
            chain_id = key.chain_id,
            signer = %key.signer,
            nonce = %nonce,
            success,
            "released nonce"
        );
    }
}

fn escalate(gas_price: U256) -> U256 {
    gas_price * (100 + GAS_ESCALATION_PERCENT) / 100
}

/// An exclusively-held nonce for one submission attempt.
///
/// Carries the gas price to submit with. Always released: explicitly via
/// [`release`](Self::release), or as failed when dropped.
#[derive(Debug)]
pub struct NonceReservation {
    key: NonceKey,
    nonce: U256,
    gas_price: U256,
    tx_hash: Option<H256>,
    released: bool,
    manager: NonceManager,
}

impl NonceReservation {
    /// The reserved nonce.
    pub fn nonce(&self) -> U256 {
        self.nonce
    }

    /// The gas price this reservation should submit with.
    pub fn gas_price(&self) -> U256 {
        self.gas_price
    }

    /// The key this reservation belongs to.
    pub fn key(&self) -> NonceKey {
        self.key
    }

    /// Attach the transaction hash once the submission is in flight.
    pub fn update_hash(&mut self, tx_hash: H256) {
        self.tx_hash = Some(tx_hash);
    }

    /// The hash attached via [`update_hash`](Self::update_hash), if any.
    pub fn tx_hash(&self) -> Option<H256> {
        self.tx_hash
    }

    /// Release the reservation. On failure the nonce becomes reusable by
    /// the next reservation for the same key.
    pub fn release(mut self, success: bool) {
        self.release_in_place(success);
    }

    fn release_in_place(&mut self, success: bool) {
        if !self.released {
            self.released = true;
            self.manager.release_inner(self.key, self.nonce, success);
        }
    }
}

impl Drop for NonceReservation {
    fn drop(&mut self) {
        if !self.released {
            tracing::trace!(
                nonce = %self.nonce,
                "nonce reservation dropped without release, treating as failed"
            );
            self.release_in_place(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> NonceKey {
        NonceKey {
            chain_id: 1,
            signer: Address::from_low_u64_be(7),
        }
    }

    fn gwei(n: u64) -> U256 {
        U256::from(n) * U256::exp10(9)
    }

    #[test]
    fn concurrent_reservations_are_unique() {
        let manager = NonceManager::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            handles.push(std::thread::spawn(move || {
                let reservation =
                    manager.reserve_with(key(), U256::from(100), gwei(10));
                let nonce = reservation.nonce();
                // hold the reservation: no release, no reuse
                std::mem::forget(reservation);
                nonce
            }));
        }
        let mut nonces: Vec<U256> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        nonces.sort();
        nonces.dedup();
        assert_eq!(nonces.len(), 8, "a nonce was handed out twice");
    }

    #[test]
    fn released_nonce_is_reused_only_after_release() {
        let manager = NonceManager::new();
        let first = manager.reserve_with(key(), U256::from(5), gwei(10));
        let second = manager.reserve_with(key(), U256::from(5), gwei(10));
        assert_eq!(first.nonce(), U256::from(5));
        assert_eq!(second.nonce(), U256::from(6));

        // while `first` is held, new reservations keep advancing
        let third = manager.reserve_with(key(), U256::from(5), gwei(10));
        assert_eq!(third.nonce(), U256::from(7));

        first.release(false);
        let reuse = manager.reserve_with(key(), U256::from(5), gwei(10));
        assert_eq!(reuse.nonce(), U256::from(5));

        // successful releases consume their nonce for good
        second.release(true);
        let after_success =
            manager.reserve_with(key(), U256::from(5), gwei(10));
        assert_eq!(after_success.nonce(), U256::from(8));
    }

    #[test]
    fn dropping_a_reservation_releases_it_as_failed() {
        let manager = NonceManager::new();
        {
            let _reservation =
                manager.reserve_with(key(), U256::from(5), gwei(10));
        }
        let next = manager.reserve_with(key(), U256::from(5), gwei(10));
        assert_eq!(next.nonce(), U256::from(5));
    }

    #[test]
    fn chain_moving_forward_discards_stale_gaps() {
        let manager = NonceManager::new();
        let first = manager.reserve_with(key(), U256::from(5), gwei(10));
        first.release(false);
        // the account was used externally; nonce 5 is burnt
        let next = manager.reserve_with(key(), U256::from(9), gwei(10));
        assert_eq!(next.nonce(), U256::from(9));
    }

    #[test]
    fn separate_keys_have_separate_sequences() {
        let manager = NonceManager::new();
        let other = NonceKey {
            chain_id: 2,
            signer: Address::from_low_u64_be(7),
        };
        let a = manager.reserve_with(key(), U256::from(0), gwei(10));
        let b = manager.reserve_with(other, U256::from(0), gwei(10));
        assert_eq!(a.nonce(), U256::zero());
        assert_eq!(b.nonce(), U256::zero());
    }

    #[test]
    fn escalation_raises_the_gas_price_by_a_quarter() {
        assert_eq!(escalate(gwei(100)), gwei(125));
    }

    #[test]
    fn classifies_rpc_error_texts() {
        assert!(is_nonce_conflict("Nonce too low"));
        assert!(is_nonce_conflict("tx already known"));
        assert!(!is_nonce_conflict("insufficient funds"));
        assert!(is_underpriced("replacement transaction underpriced"));
        assert!(!is_underpriced("nonce too low"));
    }
}
