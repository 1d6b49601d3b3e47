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

//! Fires up all background services: the source-chain transaction queue,
//! the request manager, the batch fetcher and the relay loop feeding the
//! batch relayer. This does not block; every service runs on its own task
//! and stops on the context shutdown signal.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use seda_batch_fetcher::{BatchFetcher, StartingBatch};
use seda_batch_relay::{
    BatchRelayer, DuplicateCheck, EvmTargetChain, NetworkBatchStatus,
    TargetNetwork,
};
use seda_chain_query::rest::RestChainClient;
use seda_chain_query::types::Batch;
use seda_chain_query::ChainQueryPort;
use seda_nonce_manager::NonceManager;
use seda_relayer_config::DuplicateCheckConfig;
use seda_relayer_context::RelayerContext;
use seda_relayer_store::SharedBoundedCache;
use seda_relayer_utils::{probe, Error, Result};
use seda_request_manager::{
    RequestEvent, RequestManager, RequestManagerOptions,
};
use seda_tx_queue::{TransactionQueue, TxQueueOptions};

/// How many fetched batches to keep for proof generation.
const BATCH_CACHE_CAPACITY: usize = 100;

/// Fires up all background services.
///
/// Returns the request manager handle so callers (and tests) can post data
/// requests into the running pipeline.
pub async fn ignite(
    ctx: &RelayerContext,
) -> Result<RequestManager<RestChainClient>> {
    let source = Arc::new(ctx.source_client());
    let source_config = &ctx.config.source;

    // the typed channels wiring the components together
    let (queue_events_tx, queue_events_rx) = mpsc::unbounded_channel();
    let (request_events_tx, request_events_rx) = mpsc::unbounded_channel();
    let (batch_tx, batch_rx) = mpsc::channel(16);

    // source-chain transaction queue
    let queue = TransactionQueue::new(
        source.clone(),
        TxQueueOptions {
            max_per_tx: ctx.config.tx_queue.max_per_tx,
            flush_interval: Duration::from_millis(
                ctx.config.tx_queue.flush_interval_ms,
            ),
            tick_interval: Duration::from_millis(
                ctx.config.tx_queue.tick_interval_ms,
            ),
        },
        queue_events_tx,
    );
    spawn_with_shutdown(ctx, queue.clone().run(), "tx-queue");

    // request lifecycle manager
    let requests = RequestManager::new(
        queue,
        source.clone(),
        RequestManagerOptions {
            poll_interval: Duration::from_millis(
                source_config.result_poll_interval_ms,
            ),
            await_result_timeout: Duration::from_secs(
                source_config.await_result_timeout_secs,
            ),
        },
        request_events_tx,
    );
    spawn_with_shutdown(
        ctx,
        requests.clone().run(queue_events_rx),
        "request-manager",
    );

    // batch fetcher
    let batch_cache = SharedBoundedCache::new(BATCH_CACHE_CAPACITY);
    let starting_batch = source_config
        .starting_batch
        .map(StartingBatch::Number)
        .unwrap_or(StartingBatch::Latest);
    let fetcher = BatchFetcher::new(
        source.clone(),
        batch_cache.clone(),
        starting_batch,
        Duration::from_millis(source_config.batch_poll_interval_ms),
        batch_tx,
    );
    spawn_with_shutdown(ctx, fetcher.run(), "batch-fetcher");

    // target chains, sharing one nonce manager
    let nonce_manager = NonceManager::new();
    let mut networks = Vec::new();
    for (key, chain_config) in &ctx.config.evm {
        let provider = ctx.evm_provider(key)?;
        let wallet = ctx.evm_wallet(key)?;
        tracing::debug!(
            chain = %chain_config.name,
            chain_id = chain_config.chain_id,
            "starting target chain client"
        );
        let client = EvmTargetChain::new(
            chain_config.name.clone(),
            chain_config.chain_id,
            chain_config.core_address,
            provider,
            wallet,
            nonce_manager.clone(),
            chain_config.explorer.clone(),
        );
        networks.push(TargetNetwork {
            client: Arc::new(client),
            duplicate_check: match chain_config.duplicate_check {
                DuplicateCheckConfig::Query => DuplicateCheck::Query,
                DuplicateCheckConfig::Off => DuplicateCheck::Off,
            },
        });
    }

    let relayer = BatchRelayer::builder()
        .port(source.clone() as Arc<dyn ChainQueryPort>)
        .networks(networks)
        .batch_cache(batch_cache.clone())
        .build();
    spawn_with_shutdown(
        ctx,
        relay_loop(relayer, source, batch_cache, batch_rx, request_events_rx),
        "batch-relay",
    );

    Ok(requests)
}

/// The main relay loop: every new batch is posted to all target chains;
/// every completed result triggers a cycle against its assigned batch.
async fn relay_loop(
    relayer: BatchRelayer,
    source: Arc<RestChainClient>,
    batch_cache: SharedBoundedCache<u64, Arc<Batch>>,
    mut batch_rx: mpsc::Receiver<Arc<Batch>>,
    mut request_events_rx: mpsc::UnboundedReceiver<RequestEvent>,
) -> Result<()> {
    loop {
        tokio::select! {
            Some(batch) = batch_rx.recv() => {
                match relayer.relay(batch.clone(), None).await {
                    Ok(statuses) => log_statuses(&statuses),
                    Err(error) => tracing::error!(
                        batch_number = batch.batch_number(),
                        %error,
                        "batch cycle failed"
                    ),
                }
            }
            Some(event) = request_events_rx.recv() => match event {
                RequestEvent::Completed { result, assignment } => {
                    let batch = match assigned_batch(
                        &source,
                        &batch_cache,
                        assignment.batch_number,
                    )
                    .await
                    {
                        Ok(batch) => batch,
                        Err(error) => {
                            tracing::error!(
                                dr_id = %result.dr_id,
                                batch_number = assignment.batch_number,
                                %error,
                                "could not load the assigned batch"
                            );
                            continue;
                        }
                    };
                    match relayer
                        .relay(batch, Some(&(result, assignment)))
                        .await
                    {
                        Ok(statuses) => log_statuses(&statuses),
                        Err(error) => tracing::error!(
                            batch_number = assignment.batch_number,
                            %error,
                            "result cycle failed"
                        ),
                    }
                }
                RequestEvent::Failed { dr_id, error } => {
                    tracing::error!(%dr_id, %error, "request failed");
                }
                RequestEvent::TimedOut { dr_id } => {
                    tracing::warn!(%dr_id, "request timed out");
                }
            },
            else => return Ok(()),
        }
    }
}

async fn assigned_batch(
    source: &RestChainClient,
    cache: &SharedBoundedCache<u64, Arc<Batch>>,
    batch_number: u64,
) -> Result<Arc<Batch>> {
    if let Some(batch) = cache.get(&batch_number) {
        return Ok(batch);
    }
    let batch = source
        .get_batch(batch_number, false)
        .await?
        .ok_or(Error::BatchNotFound(batch_number))?;
    let batch = Arc::new(batch);
    cache.set(batch_number, batch.clone());
    Ok(batch)
}

fn log_statuses(statuses: &[NetworkBatchStatus]) {
    for status in statuses {
        if let Some(error) = &status.error {
            tracing::error!(
                network = %status.network,
                batch_number = status.batch_number,
                %error,
                "network cycle failed"
            );
        } else {
            tracing::info!(
                network = %status.network,
                batch_number = status.batch_number,
                batch_exists = status.batch_exists,
                batch_posted = status.batch_posted,
                result_posted = status.result_posted,
                "network cycle done"
            );
        }
    }
}

/// Spawns `task` on the runtime, stopping it when the context shutdown
/// signal fires. In-flight work finishes; nothing is interrupted mid-call.
fn spawn_with_shutdown<F>(
    ctx: &RelayerContext,
    task: F,
    name: &'static str,
) where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let mut shutdown = ctx.shutdown_signal();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %probe::Kind::Lifecycle,
                    task = name,
                    stopped = true,
                );
            }
            result = task => {
                if let Err(error) = result {
                    tracing::error!(task = name, %error, "task stopped abnormally");
                }
            }
        }
    });
}
