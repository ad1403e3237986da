//! Expiry computation for authorization entries

use crate::{HandshakeError, Result};
use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use std::sync::Arc;
use tracing::debug;

/// Source of the latest closed ledger sequence
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LatestLedger: Send + Sync {
    async fn latest_ledger(&self) -> Result<u32>;
}

/// Turns a validity window in minutes into an absolute ledger number
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TtlCalculator: Send + Sync {
    async fn compute_expiry_ledger(&self, duration_minutes: u32) -> Result<u32>;
}

/// Number of ledgers covering `minutes`, rounded up
pub fn ledgers_for_minutes(minutes: u32, ledger_close_secs: u32) -> u32 {
    if ledger_close_secs == 0 {
        return u32::MAX;
    }
    let secs = u64::from(minutes) * 60;
    let ledgers = secs.div_ceil(u64::from(ledger_close_secs));
    u32::try_from(ledgers).unwrap_or(u32::MAX)
}

/// Expiry = latest ledger + ledgers in the window
pub struct LedgerTtlCalculator {
    source: Arc<dyn LatestLedger>,
    ledger_close_secs: u32,
}

impl LedgerTtlCalculator {
    pub fn new(source: Arc<dyn LatestLedger>, ledger_close_secs: u32) -> Self {
        Self {
            source,
            ledger_close_secs,
        }
    }
}

#[async_trait]
impl TtlCalculator for LedgerTtlCalculator {
    async fn compute_expiry_ledger(&self, duration_minutes: u32) -> Result<u32> {
        let current = self.source.latest_ledger().await?;
        let expiry =
            current.saturating_add(ledgers_for_minutes(duration_minutes, self.ledger_close_secs));
        debug!(
            "Expiry for {} minutes from ledger {}: {}",
            duration_minutes, current, expiry
        );
        Ok(expiry)
    }
}

/// Ledger height read from an RPC node
pub struct RpcLedgerHeight {
    rpc_client: Arc<RpcClient>,
}

impl RpcLedgerHeight {
    pub fn new(rpc_url: &str) -> Self {
        Self {
            rpc_client: Arc::new(RpcClient::new(rpc_url.to_string())),
        }
    }

    pub fn with_client(rpc_client: Arc<RpcClient>) -> Self {
        Self { rpc_client }
    }
}

#[async_trait]
impl LatestLedger for RpcLedgerHeight {
    async fn latest_ledger(&self) -> Result<u32> {
        let slot = self.rpc_client.get_slot().await?;
        u32::try_from(slot).map_err(|_| {
            HandshakeError::InvalidConfiguration(format!("ledger height {slot} exceeds u32"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculator_at(ledger: u32, close_secs: u32) -> LedgerTtlCalculator {
        let mut source = MockLatestLedger::new();
        source.expect_latest_ledger().returning(move || Ok(ledger));
        LedgerTtlCalculator::new(Arc::new(source), close_secs)
    }

    #[test]
    fn test_ledgers_for_minutes() {
        assert_eq!(ledgers_for_minutes(60, 5), 720);
        assert_eq!(ledgers_for_minutes(1, 7), 9);
        assert_eq!(ledgers_for_minutes(0, 5), 0);
        assert_eq!(ledgers_for_minutes(u32::MAX, 1), u32::MAX);
    }

    #[tokio::test]
    async fn test_expiry_is_relative_to_latest_ledger() {
        let calculator = calculator_at(100, 5);

        assert_eq!(calculator.compute_expiry_ledger(60).await.unwrap(), 820);
        assert_eq!(calculator.compute_expiry_ledger(0).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_expiry_saturates() {
        let calculator = calculator_at(u32::MAX - 3, 5);

        assert_eq!(calculator.compute_expiry_ledger(60).await.unwrap(), u32::MAX);
    }

    #[tokio::test]
    async fn test_source_error_propagates() {
        let mut source = MockLatestLedger::new();
        source
            .expect_latest_ledger()
            .returning(|| Err(HandshakeError::Simulation("node offline".to_string())));
        let calculator = LedgerTtlCalculator::new(Arc::new(source), 5);

        assert!(calculator.compute_expiry_ledger(10).await.is_err());
    }
}
