use ethers::types::{Address, H256, U256};
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the user operation pipeline.
///
/// Encoding errors are local and always fatal to a build attempt. Only
/// `NetworkUnavailable` is safe to retry blindly; everything touching a hash,
/// a signature or a submission has to be rebuilt by the caller instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("account factory query failed: {0}")]
    FactoryQueryFailed(String),

    #[error("value {value} does not fit in {width} bytes")]
    ValueOutOfRange { value: U256, width: usize },

    #[error("invalid execution mode layout: {0}")]
    InvalidModeLayout(String),

    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("insufficient prefund for {account:?}: {reason}")]
    InsufficientPrefund { account: Address, reason: String },

    #[error("stale nonce: {0}")]
    NonceStale(String),

    #[error("recovered signer {recovered:?} does not match expected signer {expected:?}")]
    SignatureMismatch {
        expected: Address,
        recovered: Address,
    },

    #[error("sponsorship window rejected: {0}")]
    SponsorshipWindowRejected(String),

    #[error("sponsorship signature rejected: {0}")]
    SponsorshipSignatureRejected(String),

    #[error("submission reverted (op index {index:?}): {reason}")]
    SubmissionReverted {
        index: Option<usize>,
        reason: String,
    },

    #[error("no confirmation for {tx_hash:?} after {waited:?}; the transaction may still land")]
    ConfirmationTimeout { tx_hash: H256, waited: Duration },

    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

impl Error {
    /// Transport failures of idempotent reads can be retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::NetworkUnavailable(_))
    }

    pub(crate) fn network(err: impl std::fmt::Display) -> Self {
        Error::NetworkUnavailable(err.to_string())
    }
}
