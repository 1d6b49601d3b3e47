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

//! A thin adapter implementing the chain ports against the source chain's
//! HTTP gateway. Decoding only; all relaying logic lives above the ports.

use async_trait::async_trait;
use ethers::types::{Address, H256};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use seda_relayer_store::SharedBoundedCache;
use seda_relayer_utils::{Error, Result};

use crate::types::{
    Batch, BatchAssignment, BatchSignature, DataResult, PostDataRequestArgs,
    UnsignedBatch, ValidatorEntry,
};
use crate::{ChainQueryPort, ChainSubmitPort};

/// How many observed results to keep. Results are immutable once observed,
/// so cached entries never go stale, only old.
const RESULT_CACHE_CAPACITY: usize = 256;

/// A [`ChainQueryPort`] + [`ChainSubmitPort`] implementation over the source
/// chain's REST gateway.
#[derive(Debug, Clone)]
pub struct RestChainClient {
    http: reqwest::Client,
    base_url: url::Url,
    results_cache:
        SharedBoundedCache<(String, u64), (DataResult, BatchAssignment)>,
}

impl RestChainClient {
    /// Creates a client against `base_url`, e.g. `https://rpc.chain.example/`.
    pub fn new(base_url: url::Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            results_cache: SharedBoundedCache::new(RESULT_CACHE_CAPACITY),
        }
    }

    fn endpoint(&self, path: &str) -> Result<url::Url> {
        Ok(self.base_url.join(path)?)
    }
}

#[async_trait]
impl ChainQueryPort for RestChainClient {
    async fn get_batch(
        &self,
        batch_number: u64,
        latest_signed: bool,
    ) -> Result<Option<Batch>> {
        let path = if latest_signed {
            "batching/batch/latest".to_string()
        } else {
            format!("batching/batch/{batch_number}")
        };
        let response = self.http.get(self.endpoint(&path)?).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let dto: BatchDto = response.error_for_status()?.json().await?;
        Ok(Some(dto.try_into()?))
    }

    async fn get_batches(
        &self,
        start_batch_number: u64,
        end_batch_number: u64,
    ) -> Result<Vec<UnsignedBatch>> {
        let mut url = self.endpoint("batching/batches")?;
        url.query_pairs_mut()
            .append_pair("start", &start_batch_number.to_string())
            .append_pair("end", &end_batch_number.to_string());
        let response: BatchesDto = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        response
            .batches
            .into_iter()
            .map(UnsignedBatchDto::try_into)
            .collect()
    }

    async fn get_data_result(
        &self,
        dr_id: &str,
        dr_block_height: u64,
    ) -> Result<Option<(DataResult, BatchAssignment)>> {
        let cache_key = (dr_id.to_string(), dr_block_height);
        if let Some(hit) = self.results_cache.get(&cache_key) {
            return Ok(Some(hit));
        }
        let path = if dr_block_height == 0 {
            format!("data-result/{dr_id}")
        } else {
            format!("data-result/{dr_id}/{dr_block_height}")
        };
        let response = self.http.get(self.endpoint(&path)?).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let dto: DataResultDto = response.error_for_status()?.json().await?;
        let assignment = BatchAssignment {
            batch_number: dto.batch_assignment,
            dr_block_height: dto.block_height,
        };
        let result: DataResult = dto.try_into()?;
        // a height of 0 means "latest for this id", which a later re-post
        // of the same request can change; only the addressed form is
        // immutable
        if dr_block_height != 0 {
            self.results_cache
                .set(cache_key, (result.clone(), assignment));
        }
        Ok(Some((result, assignment)))
    }
}

#[async_trait]
impl ChainSubmitPort for RestChainClient {
    async fn submit_data_requests(
        &self,
        requests: &[PostDataRequestArgs],
    ) -> Result<String> {
        let body = PostDataRequestsBody {
            requests: requests.iter().map(Into::into).collect(),
        };
        let response = self
            .http
            .post(self.endpoint("data-requests")?)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let raw = response.text().await?;
            return Err(Error::SubmitFailed { raw });
        }
        let tx: TxResponseDto = response.json().await?;
        Ok(tx.tx_hash)
    }
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    Ok(hex::decode(value.trim_start_matches("0x"))?)
}

fn decode_h256(value: &str) -> Result<H256> {
    let bytes = decode_hex(value)?;
    if bytes.len() != 32 {
        return Err(Error::Generic("expected a 32 byte hex value"));
    }
    Ok(H256::from_slice(&bytes))
}

fn decode_address(value: &str) -> Result<Address> {
    let bytes = decode_hex(value)?;
    if bytes.len() != 20 {
        return Err(Error::Generic("expected a 20 byte hex value"));
    }
    Ok(Address::from_slice(&bytes))
}

#[derive(Debug, Deserialize)]
struct UnsignedBatchDto {
    batch_number: u64,
    block_height: u64,
    batch_id: String,
    current_data_result_root: String,
    data_result_root: String,
    validator_root: String,
}

impl TryFrom<UnsignedBatchDto> for UnsignedBatch {
    type Error = Error;

    fn try_from(dto: UnsignedBatchDto) -> Result<Self> {
        Ok(Self {
            batch_number: dto.batch_number,
            block_height: dto.block_height,
            batch_id: decode_h256(&dto.batch_id)?,
            current_data_result_root: decode_h256(
                &dto.current_data_result_root,
            )?,
            data_result_root: decode_h256(&dto.data_result_root)?,
            validator_root: decode_h256(&dto.validator_root)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct BatchSignatureDto {
    validator_address: String,
    secp256k1_signature: String,
}

#[derive(Debug, Deserialize)]
struct ValidatorEntryDto {
    validator_address: String,
    eth_address: String,
    voting_power_percent: u32,
}

#[derive(Debug, Deserialize)]
struct BatchDto {
    #[serde(flatten)]
    header: UnsignedBatchDto,
    signatures: Vec<BatchSignatureDto>,
    data_result_entries: Vec<String>,
    validator_entries: Vec<ValidatorEntryDto>,
}

impl TryFrom<BatchDto> for Batch {
    type Error = Error;

    fn try_from(dto: BatchDto) -> Result<Self> {
        Ok(Self {
            header: dto.header.try_into()?,
            signatures: dto
                .signatures
                .into_iter()
                .map(|s| {
                    Ok(BatchSignature {
                        validator_address: decode_hex(&s.validator_address)?,
                        secp256k1_signature: decode_hex(
                            &s.secp256k1_signature,
                        )?,
                    })
                })
                .collect::<Result<_>>()?,
            data_result_entries: dto
                .data_result_entries
                .iter()
                .map(|e| decode_hex(e))
                .collect::<Result<_>>()?,
            validator_entries: dto
                .validator_entries
                .into_iter()
                .map(|v| {
                    Ok(ValidatorEntry {
                        validator_address: decode_hex(&v.validator_address)?,
                        eth_address: decode_address(&v.eth_address)?,
                        voting_power_percent: v.voting_power_percent,
                    })
                })
                .collect::<Result<_>>()?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct BatchesDto {
    batches: Vec<UnsignedBatchDto>,
}

#[derive(Debug, Deserialize)]
struct DataResultDto {
    id: String,
    dr_id: String,
    version: String,
    exit_code: u8,
    result: String,
    gas_used: u128,
    consensus: bool,
    block_height: u64,
    block_timestamp: u64,
    payback_address: String,
    seda_payload: String,
    batch_assignment: u64,
}

impl TryFrom<DataResultDto> for DataResult {
    type Error = Error;

    fn try_from(dto: DataResultDto) -> Result<Self> {
        Ok(Self {
            id: decode_h256(&dto.id)?,
            dr_id: dto.dr_id,
            version: dto.version,
            exit_code: dto.exit_code,
            result: decode_hex(&dto.result)?,
            gas_used: dto.gas_used,
            consensus: dto.consensus,
            block_height: dto.block_height,
            block_timestamp: dto.block_timestamp,
            payback_address: decode_hex(&dto.payback_address)?,
            seda_payload: decode_hex(&dto.seda_payload)?,
        })
    }
}

#[derive(Debug, Serialize)]
struct PostDataRequestDto {
    version: String,
    exec_program_id: String,
    exec_inputs: String,
    exec_gas_limit: u64,
    tally_program_id: String,
    tally_inputs: String,
    tally_gas_limit: u64,
    replication_factor: u16,
    consensus_filter: String,
    gas_price: u128,
    memo: String,
    payback_address: String,
    request_fee: u128,
    result_fee: u128,
    batch_fee: u128,
}

impl From<&PostDataRequestArgs> for PostDataRequestDto {
    fn from(args: &PostDataRequestArgs) -> Self {
        Self {
            version: args.version.clone(),
            exec_program_id: args.exec_program_id.clone(),
            exec_inputs: hex::encode(&args.exec_inputs),
            exec_gas_limit: args.exec_gas_limit,
            tally_program_id: args.tally_program_id.clone(),
            tally_inputs: hex::encode(&args.tally_inputs),
            tally_gas_limit: args.tally_gas_limit,
            replication_factor: args.replication_factor,
            consensus_filter: hex::encode(&args.consensus_filter),
            gas_price: args.gas_price,
            memo: hex::encode(&args.memo),
            payback_address: hex::encode(&args.payback_address),
            request_fee: args.fees.request_fee,
            result_fee: args.fees.result_fee,
            batch_fee: args.fees.batch_fee,
        }
    }
}

#[derive(Debug, Serialize)]
struct PostDataRequestsBody {
    requests: Vec<PostDataRequestDto>,
}

#[derive(Debug, Deserialize)]
struct TxResponseDto {
    tx_hash: String,
}
