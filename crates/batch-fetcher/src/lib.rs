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

//! # Batch Fetcher Module
//!
//! Walks the source chain batch by batch: resolve a starting point, emit it,
//! then poll for `current + 1` on a fixed interval. The emitted sequence of
//! batch numbers is strictly increasing with no gaps.
//!
//! Failing to resolve the starting batch halts startup; fetch errors while
//! polling are logged and the next tick tries again.

#![warn(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use seda_chain_query::types::Batch;
use seda_chain_query::ChainQueryPort;
use seda_relayer_store::SharedBoundedCache;
use seda_relayer_utils::retry::ConstantWithMaxRetryCount;
use seda_relayer_utils::{probe, Error, Result};

/// How often a failed bootstrap fetch is retried before giving up.
const BOOTSTRAP_RETRY_INTERVAL: Duration = Duration::from_millis(500);
/// How many bootstrap retries to attempt for transient failures.
const BOOTSTRAP_MAX_RETRIES: usize = 5;

/// Where the fetcher starts walking the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartingBatch {
    /// Start from the most recent signed batch.
    Latest,
    /// Start from an explicit batch number; failing to find it is fatal.
    Number(u64),
}

/// The batch polling task.
pub struct BatchFetcher<Q> {
    port: Arc<Q>,
    cache: SharedBoundedCache<u64, Arc<Batch>>,
    start: StartingBatch,
    poll_interval: Duration,
    sender: mpsc::Sender<Arc<Batch>>,
}

impl<Q> BatchFetcher<Q>
where
    Q: ChainQueryPort,
{
    /// Creates a fetcher emitting batches on `sender` and mirroring them
    /// into `cache` for on-demand lookups by other components.
    pub fn new(
        port: Arc<Q>,
        cache: SharedBoundedCache<u64, Arc<Batch>>,
        start: StartingBatch,
        poll_interval: Duration,
        sender: mpsc::Sender<Arc<Batch>>,
    ) -> Self {
        Self {
            port,
            cache,
            start,
            poll_interval,
            sender,
        }
    }

    /// Resolve the starting batch. Transient fetch failures are retried a
    /// few times; a starting batch that cannot be found is fatal, since an
    /// explicit number that is missing (or already pruned) is a
    /// configuration problem, not something polling will fix.
    async fn bootstrap(&self) -> Result<Arc<Batch>> {
        let backoff = ConstantWithMaxRetryCount::new(
            BOOTSTRAP_RETRY_INTERVAL,
            BOOTSTRAP_MAX_RETRIES,
        );
        let resolve = || async {
            let fetched = match self.start {
                StartingBatch::Number(number) => {
                    self.port.get_batch(number, false).await
                }
                StartingBatch::Latest => self.port.get_batch(0, true).await,
            }
            .map_err(|error| {
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %probe::Kind::Retry,
                    error = %error,
                    "retrying the initial batch fetch",
                );
                backoff::Error::transient(error)
            })?;
            let batch = match (fetched, self.start) {
                (Some(batch), _) => batch,
                (None, StartingBatch::Number(number)) => {
                    return Err(backoff::Error::permanent(
                        Error::BatchNotFound(number),
                    ))
                }
                (None, StartingBatch::Latest) => {
                    return Err(backoff::Error::permanent(Error::Generic(
                        "the source chain has no signed batch yet",
                    )))
                }
            };
            Ok(Arc::new(batch))
        };
        backoff::future::retry(backoff, resolve).await
    }

    /// Runs until the receiving side hangs up.
    pub async fn run(self) -> Result<()> {
        let first = self.bootstrap().await?;
        let mut current = first.batch_number();
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::BatchFetcher,
            starting_batch = current,
        );
        self.cache.set(current, first.clone());
        if self.sender.send(first).await.is_err() {
            return Ok(());
        }

        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            interval.tick().await;
            match self.port.get_batch(current + 1, false).await {
                Ok(Some(batch)) => {
                    current += 1;
                    let batch = Arc::new(batch);
                    tracing::event!(
                        target: probe::TARGET,
                        tracing::Level::DEBUG,
                        kind = %probe::Kind::BatchFetcher,
                        batch_number = current,
                        block_height = batch.header.block_height,
                    );
                    self.cache.set(current, batch.clone());
                    if self.sender.send(batch).await.is_err() {
                        // consumer is gone, we are shutting down
                        return Ok(());
                    }
                }
                Ok(None) => {
                    // batch not produced yet, not an error
                    tracing::trace!(
                        batch_number = current + 1,
                        "batch not yet produced"
                    );
                }
                Err(error) => {
                    tracing::event!(
                        target: probe::TARGET,
                        tracing::Level::DEBUG,
                        kind = %probe::Kind::BatchFetcher,
                        errored = true,
                        error = %error,
                        batch_number = current + 1,
                    );
                    tracing::warn!(
                        %error,
                        "batch fetch failed, retrying next tick"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::H256;
    use seda_chain_query::testing::MockChain;
    use seda_chain_query::types::UnsignedBatch;

    fn make_batch(number: u64) -> Batch {
        Batch {
            header: UnsignedBatch {
                batch_number: number,
                block_height: number * 10,
                batch_id: H256::from_low_u64_be(number),
                current_data_result_root: H256::zero(),
                data_result_root: H256::zero(),
                validator_root: H256::zero(),
            },
            signatures: Vec::new(),
            data_result_entries: Vec::new(),
            validator_entries: Vec::new(),
        }
    }

    fn fetcher(
        chain: Arc<MockChain>,
        start: StartingBatch,
    ) -> (BatchFetcher<MockChain>, mpsc::Receiver<Arc<Batch>>) {
        let (tx, rx) = mpsc::channel(16);
        let cache = SharedBoundedCache::new(8);
        (
            BatchFetcher::new(
                chain,
                cache,
                start,
                Duration::from_millis(1),
                tx,
            ),
            rx,
        )
    }

    async fn recv(
        rx: &mut mpsc::Receiver<Arc<Batch>>,
    ) -> Arc<Batch> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a batch")
            .expect("fetcher hung up")
    }

    #[tokio::test]
    async fn a_missing_explicit_start_is_fatal() {
        let chain = Arc::new(MockChain::default());
        let (fetcher, _rx) = fetcher(chain, StartingBatch::Number(42));
        let err = fetcher.run().await.unwrap_err();
        assert!(matches!(err, Error::BatchNotFound(42)));
    }

    #[tokio::test]
    async fn bootstrap_retries_transient_errors() {
        let chain = Arc::new(MockChain::default());
        chain.insert_batch(make_batch(5));
        // the first fetch fails, the retry resolves the starting batch
        chain.push_query_error(Error::Generic("rpc hiccup"));
        let (fetcher, mut rx) = fetcher(chain, StartingBatch::Number(5));
        let task = tokio::spawn(fetcher.run());
        assert_eq!(recv(&mut rx).await.batch_number(), 5);
        task.abort();
    }

    #[tokio::test]
    async fn emits_batches_in_order_without_gaps() {
        let chain = Arc::new(MockChain::default());
        for number in 5..=8 {
            chain.insert_batch(make_batch(number));
        }
        let (fetcher, mut rx) =
            fetcher(chain.clone(), StartingBatch::Number(5));
        let task = tokio::spawn(fetcher.run());

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(recv(&mut rx).await.batch_number());
        }
        assert_eq!(seen, vec![5, 6, 7, 8]);

        // a batch produced later is picked up by a later tick
        chain.insert_batch(make_batch(9));
        assert_eq!(recv(&mut rx).await.batch_number(), 9);
        task.abort();
    }

    #[tokio::test]
    async fn starts_from_the_latest_signed_batch() {
        let chain = Arc::new(MockChain::default());
        chain.insert_batch(make_batch(3));
        chain.insert_batch(make_batch(7));
        let (fetcher, mut rx) = fetcher(chain, StartingBatch::Latest);
        let task = tokio::spawn(fetcher.run());
        assert_eq!(recv(&mut rx).await.batch_number(), 7);
        task.abort();
    }

    #[tokio::test]
    async fn polling_errors_do_not_stop_the_fetcher() {
        let chain = Arc::new(MockChain::default());
        chain.insert_batch(make_batch(5));
        let (fetcher, mut rx) =
            fetcher(chain.clone(), StartingBatch::Number(5));
        let task = tokio::spawn(fetcher.run());
        assert_eq!(recv(&mut rx).await.batch_number(), 5);

        // fail one poll for batch 6, then make it available
        chain.push_query_error(Error::Generic("rpc hiccup"));
        tokio::time::sleep(Duration::from_millis(5)).await;
        chain.insert_batch(make_batch(6));
        assert_eq!(recv(&mut rx).await.batch_number(), 6);
        task.abort();
    }

    #[tokio::test]
    async fn caches_every_emitted_batch() {
        let chain = Arc::new(MockChain::default());
        chain.insert_batch(make_batch(5));
        chain.insert_batch(make_batch(6));
        let (tx, mut rx) = mpsc::channel(16);
        let cache = SharedBoundedCache::new(8);
        let fetcher = BatchFetcher::new(
            chain,
            cache.clone(),
            StartingBatch::Number(5),
            Duration::from_millis(1),
            tx,
        );
        let task = tokio::spawn(fetcher.run());
        recv(&mut rx).await;
        recv(&mut rx).await;
        assert!(cache.get(&5).is_some());
        assert!(cache.get(&6).is_some());
        task.abort();
    }
}
