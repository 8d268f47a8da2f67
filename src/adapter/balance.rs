//! Waiting for a bridged amount to show up on the destination chain

use super::amount::apply_bps;
use crate::config::ExecutionConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::wallet::Wallet;

use ethers::types::U256;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Polls the destination balance until a transfer is credited.
///
/// The wallet is considered credited once its balance grew by at least
/// `expected * (10000 - tolerance_bps) / 10000` over the snapshot taken
/// before the transfer was submitted.
#[derive(Debug, Clone)]
pub struct CreditWatch {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub tolerance_bps: u32,
}

impl CreditWatch {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            timeout: config.balance_wait_timeout(),
            poll_interval: config.balance_poll_interval(),
            tolerance_bps: config.credit_tolerance_bps,
        }
    }

    /// Minimum increase that counts as the expected credit
    pub fn threshold(&self, expected: U256) -> U256 {
        let keep = 10_000u32.saturating_sub(self.tolerance_bps);
        apply_bps(expected, keep)
    }

    /// Wait until `wallet` holds `threshold(expected)` more than `snapshot`.
    ///
    /// Returns the observed increase. Query errors while polling are logged
    /// and retried until the deadline.
    pub async fn wait_for_credit<W: Wallet + ?Sized>(
        &self,
        wallet: &W,
        snapshot: U256,
        expected: U256,
    ) -> BridgeResult<U256> {
        let chain = wallet.chain();
        let threshold = self.threshold(expected);
        let started = Instant::now();

        info!(
            "Waiting for {} credit of at least {} (snapshot {})",
            chain, threshold, snapshot
        );

        let poll = async {
            loop {
                match wallet.stable_balance().await {
                    Ok(current) => {
                        let increase = current.saturating_sub(snapshot);
                        if increase >= threshold && !increase.is_zero() {
                            return increase;
                        }
                        debug!("{} balance {} (+{}), still waiting", chain, current, increase);
                    }
                    Err(e) => warn!("Balance poll on {} failed: {}", chain, e),
                }
                sleep(self.poll_interval).await;
            }
        };

        let result = timeout(self.timeout, poll).await;
        crate::metrics::observe_credit_wait(chain, started.elapsed().as_secs_f64());

        result.map_err(|_| BridgeError::Timeout {
            operation: format!("destination credit on {}", chain),
        })
    }
}
