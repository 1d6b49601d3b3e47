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

//! # Transaction Queue Module
//!
//! The TxQueue stores data request messages so the relayer can submit them
//! to the source chain in bounded groups. This prevents issues such as
//! racing the account sequence number with ourselves: one group per
//! transaction, one transaction in flight per tick.
//!
//! A failed group is not retried in place. When the chain error names the
//! offending message, everything after it is re-queued for a future tick
//! and everything up to it is reported through the event channel.

#![warn(missing_docs)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use seda_chain_query::types::PostDataRequestArgs;
use seda_chain_query::ChainSubmitPort;
use seda_relayer_utils::{probe, Error, Result};

/// Tuning knobs for the queue.
#[derive(Debug, Clone, Copy)]
pub struct TxQueueOptions {
    /// Maximum number of messages bundled into one transaction.
    pub max_per_tx: usize,
    /// Flush whatever is queued once this much time passed since the last
    /// flush, even if the group is not full.
    pub flush_interval: Duration,
    /// How often the timer tick fires.
    pub tick_interval: Duration,
}

impl Default for TxQueueOptions {
    fn default() -> Self {
        Self {
            max_per_tx: 10,
            flush_interval: Duration::from_secs(5),
            tick_interval: Duration::from_millis(500),
        }
    }
}

/// A message waiting in the queue, identified by its data request id.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    /// The deterministic data request id, used to correlate events.
    pub id: String,
    /// The request to post.
    pub request: PostDataRequestArgs,
}

/// Per-message submission outcomes, sent on the queue's event channel in
/// original message order.
#[derive(Debug)]
pub enum QueueEvent {
    /// The message was included in a successfully submitted transaction.
    TxSuccess {
        /// Data request id of the message.
        message_id: String,
        /// Hash of the carrying transaction.
        tx_hash: String,
    },
    /// The message failed or was dropped with a failing group.
    TxError {
        /// Data request id of the message.
        message_id: String,
        /// What went wrong.
        error: Error,
    },
}

/// The source-chain transaction queue.
///
/// Cheaply clonable; all clones share the queue.
pub struct TransactionQueue<S> {
    submitter: Arc<S>,
    options: TxQueueOptions,
    queue: Arc<Mutex<VecDeque<QueuedMessage>>>,
    flushing: Arc<AtomicBool>,
    last_flush: Arc<Mutex<Instant>>,
    events: mpsc::UnboundedSender<QueueEvent>,
}

impl<S> Clone for TransactionQueue<S> {
    fn clone(&self) -> Self {
        Self {
            submitter: Arc::clone(&self.submitter),
            options: self.options,
            queue: Arc::clone(&self.queue),
            flushing: Arc::clone(&self.flushing),
            last_flush: Arc::clone(&self.last_flush),
            events: self.events.clone(),
        }
    }
}

impl<S> TransactionQueue<S>
where
    S: ChainSubmitPort,
{
    /// Creates a new queue submitting through `submitter` and reporting
    /// per-message outcomes on `events`.
    pub fn new(
        submitter: Arc<S>,
        options: TxQueueOptions,
        events: mpsc::UnboundedSender<QueueEvent>,
    ) -> Self {
        Self {
            submitter,
            options,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            flushing: Arc::new(AtomicBool::new(false)),
            last_flush: Arc::new(Mutex::new(Instant::now())),
            events,
        }
    }

    /// Appends a message to the queue.
    pub fn enqueue(&self, message: QueuedMessage) {
        tracing::trace!(message_id = %message.id, "enqueued message");
        self.queue.lock().push_back(message);
    }

    /// Number of messages currently queued.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Runs the flush timer until the task is dropped.
    pub async fn run(self) -> Result<()> {
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::TxQueue,
            starting = true,
        );
        let mut interval = tokio::time::interval(self.options.tick_interval);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    /// One timer tick. A no-op while a previous tick is still flushing.
    pub async fn tick(&self) {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // previous tick still executing
            return;
        }
        let _guard = FlushGuard(&self.flushing);

        let due = {
            let queue = self.queue.lock();
            !queue.is_empty()
                && (queue.len() >= self.options.max_per_tx
                    || self.last_flush.lock().elapsed()
                        > self.options.flush_interval)
        };
        if !due {
            return;
        }
        self.flush().await;
        *self.last_flush.lock() = Instant::now();
    }

    /// Dequeue up to `max_per_tx` messages and submit them as one
    /// transaction, reporting per-message outcomes.
    async fn flush(&self) {
        let group: Vec<QueuedMessage> = {
            let mut queue = self.queue.lock();
            let take = queue.len().min(self.options.max_per_tx);
            queue.drain(..take).collect()
        };
        if group.is_empty() {
            return;
        }
        let requests: Vec<PostDataRequestArgs> =
            group.iter().map(|m| m.request.clone()).collect();
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::TxQueue,
            messages = group.len(),
            "submitting group",
        );

        match self.submitter.submit_data_requests(&requests).await {
            Ok(tx_hash) => {
                tracing::info!(
                    %tx_hash,
                    messages = group.len(),
                    "group submitted",
                );
                for message in group {
                    self.emit(QueueEvent::TxSuccess {
                        message_id: message.id,
                        tx_hash: tx_hash.clone(),
                    });
                }
            }
            Err(error) => self.handle_group_failure(group, error),
        }
    }

    /// Failure semantics: with a recoverable message index `k`, messages
    /// before `k` were consumed unsent by the aborted transaction, `k`
    /// itself carries the chain failure, and everything after `k` goes back
    /// to the front of the queue in order. Without an index the whole group
    /// is reported failed with no automatic re-queue.
    fn handle_group_failure(&self, group: Vec<QueuedMessage>, error: Error) {
        let raw = error.to_string();
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::TxQueue,
            errored = true,
            error = %raw,
            messages = group.len(),
        );
        match error.failed_message_index() {
            Some(index) if index < group.len() => {
                let mut iter = group.into_iter();
                for message in iter.by_ref().take(index) {
                    self.emit(QueueEvent::TxError {
                        message_id: message.id,
                        error: Error::SubmitFailed {
                            raw: format!(
                                "dropped: transaction aborted by message {index}: {raw}"
                            ),
                        },
                    });
                }
                let offender =
                    iter.next().expect("index is within the group");
                self.emit(QueueEvent::TxError {
                    message_id: offender.id,
                    error,
                });
                let mut queue = self.queue.lock();
                for message in iter.rev() {
                    queue.push_front(message);
                }
            }
            _ => {
                for message in group {
                    self.emit(QueueEvent::TxError {
                        message_id: message.id,
                        error: Error::SubmitFailed { raw: raw.clone() },
                    });
                }
            }
        }
    }

    fn emit(&self, event: QueueEvent) {
        // a closed receiver only means the consumer is shutting down
        let _ = self.events.send(event);
    }
}

struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seda_chain_query::testing::{submit_failure_at_index, MockChain};
    use seda_chain_query::types::FeeSchedule;

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

    fn message(tag: u8) -> QueuedMessage {
        QueuedMessage {
            id: format!("dr-{tag}"),
            request: request(tag),
        }
    }

    fn queue_with(
        chain: Arc<MockChain>,
        options: TxQueueOptions,
    ) -> (
        TransactionQueue<MockChain>,
        mpsc::UnboundedReceiver<QueueEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TransactionQueue::new(chain, options, tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<QueueEvent>) -> Vec<QueueEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn a_full_group_flushes_and_leaves_the_rest() {
        let chain = Arc::new(MockChain::default());
        let options = TxQueueOptions {
            max_per_tx: 4,
            flush_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let (queue, mut rx) = queue_with(chain.clone(), options);
        for tag in 0..5u8 {
            queue.enqueue(message(tag));
        }
        queue.tick().await;

        let submissions = chain.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].len(), 4);
        assert_eq!(queue.len(), 1);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 4);
        for (i, event) in events.iter().enumerate() {
            match event {
                QueueEvent::TxSuccess { message_id, .. } => {
                    assert_eq!(message_id, &format!("dr-{i}"));
                }
                other => panic!("expected success, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn a_partial_group_waits_for_the_interval() {
        let chain = Arc::new(MockChain::default());
        let options = TxQueueOptions {
            max_per_tx: 4,
            flush_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let (queue, _rx) = queue_with(chain.clone(), options);
        queue.enqueue(message(0));
        queue.tick().await;
        assert!(chain.submissions().is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn the_interval_flushes_a_partial_group() {
        let chain = Arc::new(MockChain::default());
        let options = TxQueueOptions {
            max_per_tx: 4,
            flush_interval: Duration::from_millis(0),
            ..Default::default()
        };
        let (queue, mut rx) = queue_with(chain.clone(), options);
        queue.enqueue(message(0));
        queue.tick().await;
        assert_eq!(chain.submissions().len(), 1);
        assert!(queue.is_empty());
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn a_failing_message_splits_the_group() {
        let chain = Arc::new(MockChain::default());
        chain.push_submit_outcome(Err(submit_failure_at_index(
            1,
            "data request rejected",
        )));
        let options = TxQueueOptions {
            max_per_tx: 4,
            flush_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let (queue, mut rx) = queue_with(chain.clone(), options);
        for tag in 0..4u8 {
            queue.enqueue(message(tag));
        }
        queue.tick().await;

        // message 0 dropped, message 1 errored, messages 2 and 3 re-queued
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        match &events[0] {
            QueueEvent::TxError { message_id, error } => {
                assert_eq!(message_id, "dr-0");
                assert!(error.to_string().contains("dropped"));
            }
            other => panic!("expected error, got {other:?}"),
        }
        match &events[1] {
            QueueEvent::TxError { message_id, error } => {
                assert_eq!(message_id, "dr-1");
                assert_eq!(error.failed_message_index(), Some(1));
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(queue.len(), 2);

        // the survivors submit in order on a later tick
        queue.tick().await;
        let submissions = chain.submissions();
        assert_eq!(submissions.len(), 2);
        assert_eq!(
            submissions[1]
                .iter()
                .map(|r| r.exec_inputs[0])
                .collect::<Vec<_>>(),
            vec![2, 3]
        );
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], QueueEvent::TxSuccess { .. }));
    }

    #[tokio::test]
    async fn an_unattributable_failure_fails_the_whole_group() {
        let chain = Arc::new(MockChain::default());
        chain.push_submit_outcome(Err(Error::SubmitFailed {
            raw: "connection reset".to_string(),
        }));
        let options = TxQueueOptions {
            max_per_tx: 4,
            flush_interval: Duration::from_millis(0),
            ..Default::default()
        };
        let (queue, mut rx) = queue_with(chain.clone(), options);
        for tag in 0..3u8 {
            queue.enqueue(message(tag));
        }
        queue.tick().await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(events
            .iter()
            .all(|e| matches!(e, QueueEvent::TxError { .. })));
        // no automatic re-queue without an index
        assert!(queue.is_empty());
    }
}
