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

//! # Request Manager Module
//!
//! Tracks each data request from submission to result:
//! `processing` (queued, awaiting chain inclusion) → `watching` (included,
//! awaiting the oracle result) → removed (result observed, failed, or timed
//! out). Requests are posted through the transaction queue; results are
//! polled through the chain query port on a single-flight loop.
//!
//! "Already exists" submission failures are duplicates of a deterministic
//! request id and therefore non-fatal: the request simply moves on to
//! watching, reported distinctly from unknown failures.

#![warn(missing_docs)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use seda_chain_query::types::{
    BatchAssignment, DataResult, PostDataRequestArgs,
};
use seda_chain_query::{ChainQueryPort, ChainSubmitPort};
use seda_relayer_utils::{probe, Error, Result};
use seda_tx_queue::{QueueEvent, QueuedMessage, TransactionQueue};

/// Tuning knobs for the manager.
#[derive(Debug, Clone, Copy)]
pub struct RequestManagerOptions {
    /// How often watched requests are polled for results.
    pub poll_interval: Duration,
    /// How long to await a result before giving up on a request.
    /// Recoverable: the caller may re-post, the id is deterministic.
    pub await_result_timeout: Duration,
}

impl Default for RequestManagerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            await_result_timeout: Duration::from_secs(300),
        }
    }
}

/// Lifecycle events emitted by the manager.
#[derive(Debug)]
pub enum RequestEvent {
    /// The oracle produced a result for a watched request.
    Completed {
        /// The observed result.
        result: DataResult,
        /// Which batch carries the result's proof.
        assignment: BatchAssignment,
    },
    /// The request failed to submit and was removed from tracking.
    Failed {
        /// The request id.
        dr_id: String,
        /// The submission failure.
        error: Error,
    },
    /// No result appeared within the configured timeout; the request was
    /// removed from tracking.
    TimedOut {
        /// The request id.
        dr_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    /// Submitted through the queue, awaiting chain inclusion.
    Processing,
    /// Included on the chain, awaiting the oracle result.
    Watching,
}

#[derive(Debug, Clone, Copy)]
struct TrackedRequest {
    state: RequestState,
    posted_at: Instant,
}

/// The request lifecycle manager.
pub struct RequestManager<S> {
    queue: TransactionQueue<S>,
    port: Arc<dyn ChainQueryPort>,
    requests: Arc<Mutex<HashMap<String, TrackedRequest>>>,
    events: mpsc::UnboundedSender<RequestEvent>,
    options: RequestManagerOptions,
    polling: Arc<AtomicBool>,
}

impl<S> Clone for RequestManager<S> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            port: Arc::clone(&self.port),
            requests: Arc::clone(&self.requests),
            events: self.events.clone(),
            options: self.options,
            polling: Arc::clone(&self.polling),
        }
    }
}

impl<S> RequestManager<S>
where
    S: ChainSubmitPort,
{
    /// Creates a manager posting through `queue`, polling through `port`
    /// and reporting lifecycle events on `events`.
    pub fn new(
        queue: TransactionQueue<S>,
        port: Arc<dyn ChainQueryPort>,
        options: RequestManagerOptions,
        events: mpsc::UnboundedSender<RequestEvent>,
    ) -> Self {
        Self {
            queue,
            port,
            requests: Arc::new(Mutex::new(HashMap::new())),
            events,
            options,
            polling: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Derive the request id, start tracking it and enqueue the post
    /// message. Posting the same request twice is a no-op on the second
    /// call.
    pub fn post_request(
        &self,
        request: PostDataRequestArgs,
    ) -> Result<String> {
        let dr_id = request.dr_id()?;
        {
            let mut requests = self.requests.lock();
            if requests.contains_key(&dr_id) {
                tracing::debug!(%dr_id, "request already tracked, skipping");
                return Ok(dr_id);
            }
            requests.insert(
                dr_id.clone(),
                TrackedRequest {
                    state: RequestState::Processing,
                    posted_at: Instant::now(),
                },
            );
        }
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::RequestManager,
            %dr_id,
            posting = true,
        );
        self.queue.enqueue(QueuedMessage {
            id: dr_id.clone(),
            request,
        });
        Ok(dr_id)
    }

    /// Number of requests currently tracked.
    pub fn tracked(&self) -> usize {
        self.requests.lock().len()
    }

    /// Number of messages still waiting in the transaction queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Apply a queue outcome to the tracked request it belongs to.
    pub fn handle_queue_event(&self, event: QueueEvent) {
        match event {
            QueueEvent::TxSuccess {
                message_id,
                tx_hash,
            } => {
                let mut requests = self.requests.lock();
                if let Some(tracked) = requests.get_mut(&message_id) {
                    tracked.state = RequestState::Watching;
                    tracing::debug!(
                        dr_id = %message_id,
                        %tx_hash,
                        "request included, now watching for its result"
                    );
                }
            }
            QueueEvent::TxError { message_id, error } => {
                if error.is_already_exists() {
                    // a duplicate of a deterministic id is the same request
                    let mut requests = self.requests.lock();
                    if let Some(tracked) = requests.get_mut(&message_id) {
                        tracked.state = RequestState::Watching;
                    }
                    tracing::info!(
                        dr_id = %message_id,
                        "request already exists on the chain, watching"
                    );
                } else {
                    self.requests.lock().remove(&message_id);
                    tracing::warn!(
                        dr_id = %message_id,
                        %error,
                        "request submission failed"
                    );
                    self.emit(RequestEvent::Failed {
                        dr_id: message_id,
                        error,
                    });
                }
            }
        }
    }

    /// One polling pass over every watched request. A no-op while a
    /// previous pass is still running.
    pub async fn poll_once(&self) {
        if self
            .polling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let _guard = PollGuard(&self.polling);

        let watched: Vec<(String, TrackedRequest)> = self
            .requests
            .lock()
            .iter()
            .map(|(id, tracked)| (id.clone(), *tracked))
            .collect();

        for (dr_id, tracked) in watched {
            if tracked.posted_at.elapsed() > self.options.await_result_timeout
            {
                self.requests.lock().remove(&dr_id);
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %probe::Kind::RequestManager,
                    %dr_id,
                    timed_out = true,
                );
                self.emit(RequestEvent::TimedOut { dr_id });
                continue;
            }
            if tracked.state != RequestState::Watching {
                continue;
            }
            match self.port.get_data_result(&dr_id, 0).await {
                Ok(Some((result, assignment))) => {
                    self.requests.lock().remove(&dr_id);
                    tracing::event!(
                        target: probe::TARGET,
                        tracing::Level::DEBUG,
                        kind = %probe::Kind::RequestManager,
                        %dr_id,
                        batch_number = assignment.batch_number,
                        completed = true,
                    );
                    self.emit(RequestEvent::Completed { result, assignment });
                }
                Ok(None) => {
                    // not produced yet, stays watched for the next tick
                }
                Err(error) => {
                    tracing::warn!(
                        %dr_id,
                        %error,
                        "result poll failed, retrying next tick"
                    );
                }
            }
        }
    }

    /// Runs the manager: applies queue outcomes as they arrive and polls
    /// watched requests on the configured interval.
    pub async fn run(
        self,
        mut queue_events: mpsc::UnboundedReceiver<QueueEvent>,
    ) -> Result<()> {
        let mut interval =
            tokio::time::interval(self.options.poll_interval);
        loop {
            tokio::select! {
                Some(event) = queue_events.recv() => {
                    self.handle_queue_event(event);
                }
                _ = interval.tick() => {
                    self.poll_once().await;
                }
            }
        }
    }

    fn emit(&self, event: RequestEvent) {
        let _ = self.events.send(event);
    }
}

struct PollGuard<'a>(&'a AtomicBool);

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::H256;
    use seda_chain_query::testing::MockChain;
    use seda_chain_query::types::FeeSchedule;
    use seda_tx_queue::TxQueueOptions;

    fn request(tag: u8) -> PostDataRequestArgs {
        PostDataRequestArgs {
            version: "0.0.1".to_string(),
            exec_program_id: "00".repeat(32),
            exec_inputs: vec![tag],
            exec_gas_limit: 10,
            tally_program_id: "11".repeat(32),
            tally_inputs: Vec::new(),
            tally_gas_limit: 11,
            replication_factor: 1,
            consensus_filter: vec![0],
            gas_price: 10,
            memo: Vec::new(),
            payback_address: Vec::new(),
            fees: FeeSchedule::default(),
        }
    }

    fn result_for(dr_id: &str) -> (DataResult, BatchAssignment) {
        (
            DataResult {
                id: H256::from_low_u64_be(9),
                dr_id: dr_id.to_string(),
                version: "0.0.1".to_string(),
                exit_code: 0,
                result: vec![1],
                gas_used: 100,
                consensus: true,
                block_height: 10,
                block_timestamp: 1_700_000_000,
                payback_address: Vec::new(),
                seda_payload: Vec::new(),
            },
            BatchAssignment {
                batch_number: 100,
                dr_block_height: 10,
            },
        )
    }

    struct Harness {
        chain: Arc<MockChain>,
        manager: RequestManager<MockChain>,
        events: mpsc::UnboundedReceiver<RequestEvent>,
    }

    fn harness(options: RequestManagerOptions) -> Harness {
        let chain = Arc::new(MockChain::default());
        let (queue_tx, _queue_rx) = mpsc::unbounded_channel();
        let queue = TransactionQueue::new(
            chain.clone(),
            TxQueueOptions::default(),
            queue_tx,
        );
        let (events_tx, events) = mpsc::unbounded_channel();
        let manager =
            RequestManager::new(queue, chain.clone(), options, events_tx);
        Harness {
            chain,
            manager,
            events,
        }
    }

    #[tokio::test]
    async fn a_request_travels_processing_watching_completed() {
        let mut h = harness(RequestManagerOptions::default());
        let dr_id = h.manager.post_request(request(1)).unwrap();
        assert_eq!(h.manager.tracked(), 1);

        // still processing: polling must not look for results yet
        h.manager.poll_once().await;
        assert_eq!(h.manager.tracked(), 1);

        h.manager.handle_queue_event(QueueEvent::TxSuccess {
            message_id: dr_id.clone(),
            tx_hash: "AB12".to_string(),
        });

        // watching, but no result yet: stays watched
        h.manager.poll_once().await;
        assert_eq!(h.manager.tracked(), 1);

        let (result, assignment) = result_for(&dr_id);
        h.chain.insert_result(&dr_id, 0, result, assignment);
        h.manager.poll_once().await;
        assert_eq!(h.manager.tracked(), 0);

        match h.events.try_recv().unwrap() {
            RequestEvent::Completed {
                result,
                assignment,
            } => {
                assert_eq!(result.dr_id, dr_id);
                assert_eq!(assignment.batch_number, 100);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn an_existing_duplicate_is_watched_not_failed() {
        let mut h = harness(RequestManagerOptions::default());
        let dr_id = h.manager.post_request(request(1)).unwrap();
        h.manager.handle_queue_event(QueueEvent::TxError {
            message_id: dr_id.clone(),
            error: Error::SubmitFailed {
                raw: format!("data request {dr_id} already exists"),
            },
        });
        assert_eq!(h.manager.tracked(), 1);
        assert!(h.events.try_recv().is_err());

        let (result, assignment) = result_for(&dr_id);
        h.chain.insert_result(&dr_id, 0, result, assignment);
        h.manager.poll_once().await;
        assert!(matches!(
            h.events.try_recv().unwrap(),
            RequestEvent::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn an_unknown_failure_removes_the_request() {
        let mut h = harness(RequestManagerOptions::default());
        let dr_id = h.manager.post_request(request(1)).unwrap();
        h.manager.handle_queue_event(QueueEvent::TxError {
            message_id: dr_id.clone(),
            error: Error::SubmitFailed {
                raw: "out of gas".to_string(),
            },
        });
        assert_eq!(h.manager.tracked(), 0);
        match h.events.try_recv().unwrap() {
            RequestEvent::Failed { dr_id: failed, .. } => {
                assert_eq!(failed, dr_id);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn watching_expires_after_the_timeout() {
        let mut h = harness(RequestManagerOptions {
            await_result_timeout: Duration::from_millis(0),
            ..Default::default()
        });
        let dr_id = h.manager.post_request(request(1)).unwrap();
        h.manager.handle_queue_event(QueueEvent::TxSuccess {
            message_id: dr_id.clone(),
            tx_hash: "AB12".to_string(),
        });
        h.manager.poll_once().await;
        assert_eq!(h.manager.tracked(), 0);
        assert!(matches!(
            h.events.try_recv().unwrap(),
            RequestEvent::TimedOut { .. }
        ));
    }

    #[tokio::test]
    async fn reposting_the_same_request_is_a_no_op() {
        let h = harness(RequestManagerOptions::default());
        let first = h.manager.post_request(request(1)).unwrap();
        let second = h.manager.post_request(request(1)).unwrap();
        assert_eq!(first, second);
        assert_eq!(h.manager.tracked(), 1);
        // only one message made it into the queue
        assert_eq!(h.manager.queued(), 1);
    }
}
