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

//! # Batch Relay Module
//!
//! The per-batch orchestrator: for every configured target chain, make sure
//! the batch is posted (signatures and validator proofs attached), then
//! post the proven result. Chains are processed independently and in
//! parallel; one chain failing never blocks another, and the caller gets a
//! [`NetworkBatchStatus`] per chain instead of an opaque overall failure.

#![warn(missing_docs)]

use std::sync::Arc;

use ethers::types::H256;
use futures::future::join_all;
use typed_builder::TypedBuilder;

use seda_chain_query::types::{Batch, BatchAssignment, DataResult};
use seda_chain_query::ChainQueryPort;
use seda_proof_generation::{
    process_batch_signatures, BatchProver, ProcessedSignatureSet,
};
use seda_relayer_store::SharedBoundedCache;
use seda_relayer_utils::{probe, Error, Result};

/// The target-chain client seam and its EVM implementation.
pub mod chain;
/// Contract bindings and ABI conversions.
pub mod contracts;

pub use chain::{EvmTargetChain, TargetChainClient};

/// How many fetched batches to keep around for proof generation.
const BATCH_CACHE_CAPACITY: usize = 100;

/// How a chain decides whether a result was already posted.
///
/// The query-based check has produced false positives in the past, so it is
/// configurable per chain instead of hard-wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateCheck {
    /// Ask the prover contract before posting.
    #[default]
    Query,
    /// Post unconditionally and let the contract reject duplicates.
    Off,
}

/// One configured target chain.
pub struct TargetNetwork {
    /// The chain client.
    pub client: Arc<dyn TargetChainClient>,
    /// Duplicate detection policy for result posting.
    pub duplicate_check: DuplicateCheck,
}

/// Per-target-chain outcome of one batch cycle.
#[derive(Debug, Clone)]
pub struct NetworkBatchStatus {
    /// Network name, from the chain config.
    pub network: String,
    /// The chain id.
    pub chain_id: u64,
    /// The batch this cycle processed.
    pub batch_number: u64,
    /// Whether the chain already had the batch.
    pub batch_exists: bool,
    /// Whether we posted the batch this cycle.
    pub batch_posted: bool,
    /// Whether the result ended up on the chain (posted now, or already
    /// there per the duplicate check).
    pub result_posted: bool,
    /// The first error that stopped processing for this chain, if any.
    pub error: Option<String>,
}

impl NetworkBatchStatus {
    fn new(network: &str, chain_id: u64, batch_number: u64) -> Self {
        Self {
            network: network.to_string(),
            chain_id,
            batch_number,
            batch_exists: false,
            batch_posted: false,
            result_posted: false,
            error: None,
        }
    }

    /// Whether this chain completed the cycle without an error.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// A result prepared for posting: re-fetched against its authoritative
/// assigned batch, with the inclusion proof already generated.
#[derive(Debug, Clone)]
struct ResultBundle {
    result: DataResult,
    target_batch_number: u64,
    proof: Vec<H256>,
}

/// The orchestrator over all configured target chains.
#[derive(TypedBuilder)]
pub struct BatchRelayer {
    port: Arc<dyn ChainQueryPort>,
    networks: Vec<TargetNetwork>,
    #[builder(default = SharedBoundedCache::new(BATCH_CACHE_CAPACITY))]
    batch_cache: SharedBoundedCache<u64, Arc<Batch>>,
}

impl BatchRelayer {
    /// Process one batch cycle against every target chain.
    ///
    /// Shared preparation failures (signature processing, proof generation,
    /// a Merkle root mismatch) fail the whole cycle; per-chain failures are
    /// recorded in that chain's status only.
    pub async fn relay(
        &self,
        batch: Arc<Batch>,
        result: Option<&(DataResult, BatchAssignment)>,
    ) -> Result<Vec<NetworkBatchStatus>> {
        let prover = self.prover_for(&batch).await?;
        let signatures = process_batch_signatures(&batch, &prover)?;
        let bundle = match result {
            Some((result, assignment)) => Some(
                self.prepare_result(batch.clone(), assignment, result)
                    .await?,
            ),
            None => None,
        };

        let statuses = join_all(self.networks.iter().map(|network| {
            self.process_network(network, &batch, &signatures, bundle.as_ref())
        }))
        .await;

        for status in &statuses {
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::DEBUG,
                kind = %probe::Kind::BatchRelay,
                network = %status.network,
                batch_number = status.batch_number,
                batch_exists = status.batch_exists,
                batch_posted = status.batch_posted,
                result_posted = status.result_posted,
                error = status.error.as_deref().unwrap_or(""),
            );
        }
        Ok(statuses)
    }

    /// Build the prover for `batch`, fetching the previous batch's
    /// cumulative root the construction folds against.
    async fn prover_for(&self, batch: &Batch) -> Result<BatchProver> {
        let previous_root =
            self.previous_root(batch.batch_number()).await?;
        BatchProver::new(batch, previous_root)
    }

    async fn previous_root(&self, batch_number: u64) -> Result<H256> {
        if batch_number == 0 {
            return Ok(H256::zero());
        }
        let previous = batch_number - 1;
        if let Some(cached) = self.batch_cache.get(&previous) {
            return Ok(cached.header.data_result_root);
        }
        let headers = self.port.get_batches(previous, previous).await?;
        headers
            .first()
            .map(|h| h.data_result_root)
            .ok_or(Error::BatchNotFound(previous))
    }

    /// Generate the result's inclusion proof against its *assigned* batch,
    /// re-fetching the authoritative batch when it differs from the one
    /// this cycle is processing.
    async fn prepare_result(
        &self,
        current: Arc<Batch>,
        assignment: &BatchAssignment,
        result: &DataResult,
    ) -> Result<ResultBundle> {
        let assigned = if assignment.batch_number == current.batch_number() {
            current
        } else if let Some(cached) =
            self.batch_cache.get(&assignment.batch_number)
        {
            cached
        } else {
            let fetched = self
                .port
                .get_batch(assignment.batch_number, false)
                .await?
                .ok_or(Error::BatchNotFound(assignment.batch_number))?;
            let fetched = Arc::new(fetched);
            self.batch_cache
                .set(assignment.batch_number, fetched.clone());
            fetched
        };

        let prover = self.prover_for(&assigned).await?;
        let proof = prover.result_proof(result.id, &[])?;
        Ok(ResultBundle {
            result: result.clone(),
            target_batch_number: assignment.batch_number,
            proof,
        })
    }

    async fn process_network(
        &self,
        network: &TargetNetwork,
        batch: &Batch,
        signatures: &ProcessedSignatureSet,
        bundle: Option<&ResultBundle>,
    ) -> NetworkBatchStatus {
        let client = &network.client;
        let mut status = NetworkBatchStatus::new(
            client.name(),
            client.chain_id(),
            batch.batch_number(),
        );

        let last_height = match client.last_batch_height().await {
            Ok(height) => height,
            Err(error) => {
                status.error = Some(error.to_string());
                return status;
            }
        };
        status.batch_exists = last_height >= batch.batch_number();

        if !status.batch_exists {
            if let Err(error) =
                signatures.require_consensus(batch.batch_number())
            {
                status.error = Some(error.to_string());
                return status;
            }
            match client.post_batch(&batch.header, signatures).await {
                Ok(tx_hash) => {
                    status.batch_posted = true;
                    tracing::info!(
                        network = %status.network,
                        batch_number = status.batch_number,
                        ?tx_hash,
                        "batch posted"
                    );
                }
                Err(error) => {
                    status.error = Some(error.to_string());
                    return status;
                }
            }
        }

        let Some(bundle) = bundle else {
            return status;
        };

        if network.duplicate_check == DuplicateCheck::Query {
            match client.result_exists(&bundle.result).await {
                Ok(true) => {
                    // success-equivalent, nothing left to post
                    tracing::debug!(
                        network = %status.network,
                        dr_id = %bundle.result.dr_id,
                        "result already posted"
                    );
                    status.result_posted = true;
                    return status;
                }
                Ok(false) => {}
                Err(error) => {
                    status.error = Some(error.to_string());
                    return status;
                }
            }
        }

        match client
            .post_result(
                &bundle.result,
                bundle.target_batch_number,
                &bundle.proof,
            )
            .await
        {
            Ok(tx_hash) => {
                status.result_posted = true;
                tracing::info!(
                    network = %status.network,
                    dr_id = %bundle.result.dr_id,
                    target_batch = bundle.target_batch_number,
                    ?tx_hash,
                    "result posted"
                );
            }
            Err(error) => {
                status.error = Some(error.to_string());
            }
        }
        status
    }
}
