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

//! An in-memory chain double for tests. Enabled with the `testing` feature.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use seda_relayer_utils::{Error, Result};

use crate::types::{
    Batch, BatchAssignment, DataResult, PostDataRequestArgs, UnsignedBatch,
};
use crate::{ChainQueryPort, ChainSubmitPort};

/// An in-memory stand-in for the source chain.
///
/// Batches and results are seeded by the test; submissions are recorded and
/// answered from a scripted outcome queue (defaulting to success).
#[derive(Default)]
pub struct MockChain {
    batches: Mutex<BTreeMap<u64, Batch>>,
    results: Mutex<HashMap<(String, u64), (DataResult, BatchAssignment)>>,
    submit_outcomes: Mutex<VecDeque<Result<String>>>,
    submissions: Mutex<Vec<Vec<PostDataRequestArgs>>>,
    query_errors: Mutex<VecDeque<Error>>,
}

impl MockChain {
    /// Seed a batch, addressable by its number.
    pub fn insert_batch(&self, batch: Batch) {
        self.batches.lock().insert(batch.batch_number(), batch);
    }

    /// Seed a data result for `(dr_id, dr_block_height)`.
    pub fn insert_result(
        &self,
        dr_id: &str,
        dr_block_height: u64,
        result: DataResult,
        assignment: BatchAssignment,
    ) {
        self.results
            .lock()
            .insert((dr_id.to_string(), dr_block_height), (result, assignment));
    }

    /// Script the outcome of the next submission. Unscripted submissions
    /// succeed with a fixed fake hash.
    pub fn push_submit_outcome(&self, outcome: Result<String>) {
        self.submit_outcomes.lock().push_back(outcome);
    }

    /// Every message group passed to [`ChainSubmitPort::submit_data_requests`]
    /// so far, in call order.
    pub fn submissions(&self) -> Vec<Vec<PostDataRequestArgs>> {
        self.submissions.lock().clone()
    }

    /// Make the next query call fail with `error` before answering from the
    /// seeded state again.
    pub fn push_query_error(&self, error: Error) {
        self.query_errors.lock().push_back(error);
    }

    fn take_query_error(&self) -> Option<Error> {
        self.query_errors.lock().pop_front()
    }
}

#[async_trait]
impl ChainQueryPort for MockChain {
    async fn get_batch(
        &self,
        batch_number: u64,
        latest_signed: bool,
    ) -> Result<Option<Batch>> {
        if let Some(error) = self.take_query_error() {
            return Err(error);
        }
        let batches = self.batches.lock();
        if latest_signed {
            Ok(batches.values().next_back().cloned())
        } else {
            Ok(batches.get(&batch_number).cloned())
        }
    }

    async fn get_batches(
        &self,
        start_batch_number: u64,
        end_batch_number: u64,
    ) -> Result<Vec<UnsignedBatch>> {
        let batches = self.batches.lock();
        Ok(batches
            .range(start_batch_number..=end_batch_number)
            .map(|(_, b)| b.header)
            .collect())
    }

    async fn get_data_result(
        &self,
        dr_id: &str,
        dr_block_height: u64,
    ) -> Result<Option<(DataResult, BatchAssignment)>> {
        Ok(self
            .results
            .lock()
            .get(&(dr_id.to_string(), dr_block_height))
            .cloned())
    }
}

#[async_trait]
impl ChainSubmitPort for MockChain {
    async fn submit_data_requests(
        &self,
        requests: &[PostDataRequestArgs],
    ) -> Result<String> {
        self.submissions.lock().push(requests.to_vec());
        match self.submit_outcomes.lock().pop_front() {
            Some(outcome) => outcome,
            None => Ok(format!("MOCKTX{:04}", self.submissions.lock().len())),
        }
    }
}

impl std::fmt::Debug for MockChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockChain").finish()
    }
}

/// A convenience constructor for an `Error::SubmitFailed` with a Cosmos-SDK
/// style message-index marker, as the real chain produces on multi-message
/// failures.
pub fn submit_failure_at_index(index: usize, reason: &str) -> Error {
    Error::SubmitFailed {
        raw: format!(
            "rpc error: code = Unknown desc = failed to execute message; \
             message index: {index}: {reason}"
        ),
    }
}
