//! Ledger client boundary
//!
//! Everything the handshake needs from a ledger: build an invocation into a
//! bundle, simulate it to discover or check authorization entries, and
//! submit the finished bundle.

pub mod local;

pub use local::LocalLedger;

use crate::types::{Address, Bundle, Invocation, NetworkId, ScValue};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Receipt for a bundle the ledger applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub tx_hash: String,
    pub ledger: u32,
    pub return_value: Option<ScValue>,
}

/// Why the ledger refused a bundle. Nothing is applied when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionFailure {
    #[error("authorization for {address} expired at ledger {expiry_ledger} (current {current_ledger})")]
    EntryExpired {
        address: Address,
        expiry_ledger: u32,
        current_ledger: u32,
    },

    #[error("{address} has {available} points, needs {required}")]
    InsufficientBalance {
        address: Address,
        required: i128,
        available: i128,
    },

    #[error("contract rejected invocation: {0}")]
    ContractRejected(String),

    #[error("missing envelope signature from fee payer")]
    MissingEnvelopeSignature,

    #[error("transaction valid until ledger {valid_until}, ledger is at {current}")]
    TransactionExpired { valid_until: u32, current: u32 },

    #[error("timed out waiting for the ledger")]
    Timeout,

    #[error("invalid authorization: {0}")]
    InvalidAuthorization(String),
}

/// Result of a submission that reached the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Confirmed(SubmissionReceipt),
    Rejected(SubmissionFailure),
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Network id every signature is bound to
    fn network_id(&self) -> NetworkId;

    /// Wrap an invocation into an empty bundle paid for by `fee_payer`
    async fn build(&self, invocation: Invocation, fee_payer: Address) -> Result<Bundle>;

    /// Populate authorization stubs on a fresh bundle, or check the entries already present
    async fn simulate(&self, bundle: Bundle) -> Result<Bundle>;

    /// Submit a fully signed bundle. Bundles are not replayable after `valid_until_ledger`.
    async fn submit(
        &self,
        bundle: Bundle,
        timeout: Duration,
        valid_until_ledger: u32,
    ) -> Result<SubmissionOutcome>;
}
