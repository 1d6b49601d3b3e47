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

//! # Chain Query Module
//!
//! Typed access to the SEDA source chain: batches, data requests/results and
//! validator sets, addressed by batch number or block height.
//!
//! The traits here are the seam between the relayer core and the wire
//! protocol. Everything above them works with the domain types of
//! [`types`]; the [`rest`] adapter is the only place that knows about the
//! HTTP encoding. Absence is modeled as `Ok(None)`, never as an error:
//! "not produced yet" is an expected state, not a failure.

#![warn(missing_docs)]

use async_trait::async_trait;
use seda_relayer_utils::Result;

/// Deterministic data request identifiers.
pub mod id;
/// The REST adapter implementing the ports against the chain's HTTP API.
pub mod rest;
/// Domain types for batches, requests and results.
pub mod types;

#[cfg(feature = "testing")]
pub mod testing;

pub use id::derive_data_request_id;
pub use types::{
    Batch, BatchAssignment, BatchSignature, DataResult, FeeSchedule,
    PostDataRequestArgs, UnsignedBatch, ValidatorEntry,
};

/// Read access to the source chain.
#[async_trait]
pub trait ChainQueryPort: Send + Sync {
    /// Fetch a single batch, with its signatures, data-result entries and
    /// validator entries.
    ///
    /// With `latest_signed` set, `batch_number` is ignored and the most
    /// recent batch that has collected signatures is returned.
    async fn get_batch(
        &self,
        batch_number: u64,
        latest_signed: bool,
    ) -> Result<Option<Batch>>;

    /// Fetch the headers of the batches in `[start_batch_number,
    /// end_batch_number]` (inclusive), in ascending order.
    async fn get_batches(
        &self,
        start_batch_number: u64,
        end_batch_number: u64,
    ) -> Result<Vec<UnsignedBatch>>;

    /// Fetch the result of a data request together with the number of the
    /// batch that carries its inclusion proof.
    ///
    /// A `dr_block_height` of `0` addresses the latest result for the
    /// request id.
    async fn get_data_result(
        &self,
        dr_id: &str,
        dr_block_height: u64,
    ) -> Result<Option<(DataResult, BatchAssignment)>>;
}

/// Write access to the source chain.
#[async_trait]
pub trait ChainSubmitPort: Send + Sync {
    /// Submit a group of data request messages as a single transaction and
    /// return its hash.
    ///
    /// On a multi-message failure the chain error text carries the index of
    /// the offending message; see
    /// [`seda_relayer_utils::Error::failed_message_index`].
    async fn submit_data_requests(
        &self,
        requests: &[PostDataRequestArgs],
    ) -> Result<String>;
}
