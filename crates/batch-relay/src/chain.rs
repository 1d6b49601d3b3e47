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

//! The seam between the orchestrator and one target chain. The trait keeps
//! the orchestrator testable without a chain; [`EvmTargetChain`] is the
//! production implementation over the ethers client stack.

use std::sync::Arc;

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use parking_lot::RwLock;

use seda_chain_query::types::{DataResult, UnsignedBatch};
use seda_nonce_manager::{
    is_nonce_conflict, is_underpriced, NonceManager, MAX_SUBMISSION_ATTEMPTS,
};
use seda_proof_generation::ProcessedSignatureSet;
use seda_relayer_utils::clickable_link;
use seda_relayer_utils::{
    probe, Error, HttpProvider, Result, SignerClient,
};

use crate::contracts::{
    EvmBatch, EvmDataResult, EvmValidatorProof, SedaCore, SedaProver,
};

/// What the orchestrator needs from one target chain.
#[async_trait]
pub trait TargetChainClient: Send + Sync {
    /// Human-readable network name, for logs and status records.
    fn name(&self) -> &str;

    /// The chain id.
    fn chain_id(&self) -> u64;

    /// The highest batch number the chain's prover contract has recorded.
    async fn last_batch_height(&self) -> Result<u64>;

    /// Post a batch header with its signatures and validator proofs.
    async fn post_batch(
        &self,
        header: &UnsignedBatch,
        signatures: &ProcessedSignatureSet,
    ) -> Result<H256>;

    /// Post a result with its inclusion proof against `target_batch_number`.
    async fn post_result(
        &self,
        result: &DataResult,
        target_batch_number: u64,
        proof: &[H256],
    ) -> Result<H256>;

    /// Whether the chain already accepted this result.
    async fn result_exists(&self, result: &DataResult) -> Result<bool>;
}

/// A target chain reached over JSON-RPC, submitting through the shared
/// nonce manager.
pub struct EvmTargetChain {
    name: String,
    chain_id: u64,
    core_address: Address,
    provider: Arc<HttpProvider>,
    client: Arc<SignerClient>,
    signer: Address,
    nonce_manager: NonceManager,
    explorer: Option<url::Url>,
    // discovered once via getSedaProver, then cached
    prover_address: RwLock<Option<Address>>,
}

impl EvmTargetChain {
    /// Wires a target chain from its provider and signing wallet.
    pub fn new(
        name: impl Into<String>,
        chain_id: u64,
        core_address: Address,
        provider: HttpProvider,
        wallet: LocalWallet,
        nonce_manager: NonceManager,
        explorer: Option<url::Url>,
    ) -> Self {
        let wallet = wallet.with_chain_id(chain_id);
        let signer = wallet.address();
        let provider = Arc::new(provider);
        let client = Arc::new(SignerMiddleware::new(
            provider.as_ref().clone(),
            wallet,
        ));
        Self {
            name: name.into(),
            chain_id,
            core_address,
            provider,
            client,
            signer,
            nonce_manager,
            explorer,
            prover_address: RwLock::new(None),
        }
    }

    async fn prover_address(&self) -> Result<Address> {
        if let Some(address) = *self.prover_address.read() {
            return Ok(address);
        }
        let core = SedaCore::new(self.core_address, self.client.clone());
        let address = core.get_seda_prover().call().await?;
        *self.prover_address.write() = Some(address);
        tracing::debug!(
            chain = %self.name,
            prover = %address,
            "discovered prover contract"
        );
        Ok(address)
    }

    async fn prover(&self) -> Result<SedaProver<SignerClient>> {
        Ok(SedaProver::new(
            self.prover_address().await?,
            self.client.clone(),
        ))
    }

    /// Submit `tx` under a reserved nonce, retrying collisions with a fresh
    /// escalated reservation up to [`MAX_SUBMISSION_ATTEMPTS`] times. Every
    /// reservation is released exactly once, whatever the outcome.
    async fn send_with_nonce(
        &self,
        mut tx: TypedTransaction,
    ) -> Result<H256> {
        let mut reservation = self
            .nonce_manager
            .reserve(&self.provider, self.chain_id, self.signer)
            .await?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            tx.set_nonce(reservation.nonce());
            tx.set_gas_price(reservation.gas_price());
            match self.client.send_transaction(tx.clone(), None).await {
                Ok(pending) => {
                    let tx_hash = *pending;
                    reservation.update_hash(tx_hash);
                    tracing::event!(
                        target: probe::TARGET,
                        tracing::Level::DEBUG,
                        kind = %probe::Kind::BatchRelay,
                        chain_id = self.chain_id,
                        pending = true,
                        %tx_hash,
                    );
                    let tx_hash_string = format!("0x{tx_hash:x}");
                    tracing::info!(
                        chain = %self.name,
                        "Tx {} is submitted and pending!",
                        clickable_link::tx_link(
                            &tx_hash_string,
                            self.explorer.as_ref(),
                        ),
                    );
                    return match pending.await {
                        Ok(Some(receipt)) => {
                            // either way the nonce is consumed on chain
                            reservation.release(true);
                            match receipt.status {
                                Some(status) if status.is_zero() => {
                                    Err(Error::Generic(
                                        "transaction reverted",
                                    ))
                                }
                                _ => Ok(receipt.transaction_hash),
                            }
                        }
                        Ok(None) => {
                            reservation.release(false);
                            Err(Error::Generic(
                                "transaction dropped from the mempool",
                            ))
                        }
                        Err(e) => {
                            reservation.release(false);
                            Err(e.into())
                        }
                    };
                }
                Err(e) => {
                    let text = e.to_string();
                    let underpriced = is_underpriced(&text);
                    if !(underpriced || is_nonce_conflict(&text)) {
                        reservation.release(false);
                        return Err(e.into());
                    }
                    if attempt >= MAX_SUBMISSION_ATTEMPTS {
                        reservation.release(false);
                        return Err(Error::NonceRetriesExhausted {
                            chain_id: self.chain_id,
                            attempts: attempt,
                        });
                    }
                    tracing::warn!(
                        chain = %self.name,
                        attempt,
                        error = %text,
                        "nonce conflict, retrying with a fresh reservation"
                    );
                    reservation = self
                        .nonce_manager
                        .handle_nonce_failure(
                            &self.provider,
                            reservation,
                            underpriced,
                        )
                        .await?;
                }
            }
        }
    }
}

#[async_trait]
impl TargetChainClient for EvmTargetChain {
    fn name(&self) -> &str {
        &self.name
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn last_batch_height(&self) -> Result<u64> {
        Ok(self.prover().await?.get_last_batch_height().call().await?)
    }

    async fn post_batch(
        &self,
        header: &UnsignedBatch,
        signatures: &ProcessedSignatureSet,
    ) -> Result<H256> {
        let prover = self.prover().await?;
        let encoded_signatures: Vec<Bytes> = signatures
            .signatures
            .iter()
            .map(|s| Bytes::from(s.signature.clone()))
            .collect();
        let proofs: Vec<EvmValidatorProof> =
            signatures.signatures.iter().map(Into::into).collect();
        let call = prover.post_batch(
            EvmBatch::from(header),
            encoded_signatures,
            proofs,
        );
        self.send_with_nonce(call.tx).await
    }

    async fn post_result(
        &self,
        result: &DataResult,
        target_batch_number: u64,
        proof: &[H256],
    ) -> Result<H256> {
        let prover = self.prover().await?;
        let nodes: Vec<[u8; 32]> =
            proof.iter().map(|h| h.to_fixed_bytes()).collect();
        let call = prover.post_result(
            EvmDataResult::try_from(result)?,
            target_batch_number,
            nodes,
        );
        self.send_with_nonce(call.tx).await
    }

    async fn result_exists(&self, result: &DataResult) -> Result<bool> {
        let prover = self.prover().await?;
        let result_id = prover
            .derive_result_id(EvmDataResult::try_from(result)?)
            .call()
            .await?;
        Ok(prover.has_result(result_id).call().await?)
    }
}
