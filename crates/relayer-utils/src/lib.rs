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

//! Common error and instrumentation utilities shared by every crate of the
//! SEDA relayer workspace.

use ethers::types::H256;

/// Clickable terminal hyperlinks, used when logging transaction hashes.
pub mod clickable_link;
/// A module used for debugging relayer lifecycle, sync state, or other relayer state.
pub mod probe;
/// Retry functionality
pub mod retry;

/// Ethereum JSON-RPC client over plain HTTP.
pub type HttpProvider =
    ethers::providers::Provider<ethers::providers::Http>;

/// An [`HttpProvider`] with a local signing key attached, used for
/// target-chain writes.
pub type SignerClient = ethers::middleware::SignerMiddleware<
    HttpProvider,
    ethers::signers::LocalWallet,
>;

/// An enum of all possible errors that could be encountered during the
/// execution of the SEDA relayer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while parsing the config files.
    #[error("Config parse error: {}", _0)]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// Error while iterating over a glob pattern.
    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),
    /// Error from Glob Iterator.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),
    /// Error while parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// HTTP client error, from the source-chain REST adapter.
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    /// Secp256k1 error occurred.
    #[error(transparent)]
    Secp256k1(#[from] libsecp256k1::Error),
    /// Error in Http Provider (ethers client).
    #[error(transparent)]
    EthersProvider(#[from] ethers::providers::ProviderError),
    /// Smart contract error over a read-only client.
    #[error(transparent)]
    EthersContractCall(
        #[from] ethers::contract::ContractError<HttpProvider>,
    ),
    /// Smart contract error over a signing client.
    #[error(transparent)]
    EthersContractCallWithSigner(
        #[from] ethers::contract::ContractError<SignerClient>,
    ),
    /// Error from the signer middleware itself.
    #[error(transparent)]
    EthersSignerMiddleware(
        #[from]
        ethers::middleware::signer::SignerMiddlewareError<
            HttpProvider,
            ethers::signers::LocalWallet,
        >,
    ),
    /// Ether wallet errors.
    #[error(transparent)]
    EtherWalletError(#[from] ethers::signers::WalletError),
    /// Failed to decode a hex string.
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
    /// EVM Chain not found.
    #[error("Chain Not Found: {}", chain_id)]
    ChainNotFound {
        /// The chain id of the chain.
        chain_id: String,
    },
    /// Missing Secrets in the config, either private key, mnemonic, ...etc.
    #[error("Missing required private-key in the config")]
    MissingSecrets,
    /// A batch that should exist on the source chain does not.
    #[error("Batch #{} not found on the source chain", _0)]
    BatchNotFound(u64),
    /// A data request is already posted on the source chain.
    ///
    /// Success-equivalent: the request id is deterministic, so an identical
    /// request is the same request.
    #[error("Data request {} already exists", dr_id)]
    DataRequestAlreadyExists {
        /// The deterministic id of the duplicate request.
        dr_id: String,
    },
    /// The locally recomputed data-result root does not match the root
    /// published in the batch. Data integrity error, never retried.
    #[error(
        "Result root mismatch for batch #{}: expected {:?}, computed {:?}",
        batch_number,
        expected,
        computed
    )]
    ResultRootMismatch {
        /// The batch whose root failed verification.
        batch_number: u64,
        /// The root published on the source chain.
        expected: H256,
        /// The root recomputed from the batch entries.
        computed: H256,
    },
    /// The batch signatures do not add up to the consensus threshold.
    #[error(
        "Consensus not reached for batch #{}: {} / 100000000",
        batch_number,
        voting_power
    )]
    ConsensusNotReached {
        /// The batch lacking consensus.
        batch_number: u64,
        /// The summed voting power of the valid signatures.
        voting_power: u64,
    },
    /// Ran out of nonce-collision retries while submitting to a target chain.
    #[error(
        "Gave up submitting to chain {} after {} nonce retries",
        chain_id,
        attempts
    )]
    NonceRetriesExhausted {
        /// The target chain that kept rejecting our nonces.
        chain_id: u64,
        /// How many submission attempts were made.
        attempts: usize,
    },
    /// A source-chain transaction was rejected. The raw chain error text may
    /// carry the index of the offending message, see
    /// [`Error::failed_message_index`].
    #[error("Source chain rejected the transaction: {}", raw)]
    SubmitFailed {
        /// The raw error text returned by the source chain.
        raw: String,
    },
    /// a background task failed and force restarted.
    #[error("Task Force Restarted from an error")]
    ForceRestart,
    /// a background task failed and stopped Abnormally.
    #[error("Task Stopped Abnormally")]
    TaskStoppedAbnormally,
}

/// A type alias for the result of the SEDA relayer, that uses the `Error` enum.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Extract the failing message index embedded in a source-chain error,
    /// if any.
    ///
    /// Cosmos-SDK style chains report multi-message transaction failures as
    /// `"... message index: 3: ..."`; the index identifies the message that
    /// aborted the transaction.
    pub fn failed_message_index(&self) -> Option<usize> {
        let Self::SubmitFailed { raw } = self else {
            return None;
        };
        let needle = "message index: ";
        let start = raw.find(needle)? + needle.len();
        let digits: String = raw[start..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    }

    /// Whether this error means "the thing is already there", which callers
    /// treat as success-equivalent.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::DataRequestAlreadyExists { .. } => true,
            Self::SubmitFailed { raw } => raw.contains("already exist"),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_the_failing_message_index() {
        let err = Error::SubmitFailed {
            raw: "rpc error: code = Unknown desc = failed to execute message; \
                  message index: 3: data request already exists"
                .to_string(),
        };
        assert_eq!(err.failed_message_index(), Some(3));
    }

    #[test]
    fn no_index_in_unrelated_errors() {
        let err = Error::SubmitFailed {
            raw: "connection refused".to_string(),
        };
        assert_eq!(err.failed_message_index(), None);
        assert_eq!(Error::Generic("nope").failed_message_index(), None);
    }
}
