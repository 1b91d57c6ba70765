//! Collision-free nonce allocation for one signing address.
//!
//! Leases are handed out under an async mutex that is held across the chain
//! refresh, so concurrent liquidation flows can never observe the same
//! cursor. Released nonces are reused lowest first to fill gaps before the
//! cursor advances further.

use crate::provider::{ChainClient, NonceTag};
use alloy::primitives::Address;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct NonceState {
    /// Transaction count last read from the chain
    chain_nonce: u64,
    /// Next never-leased nonce
    next: u64,
    /// Claimed but not yet confirmed
    leased: BTreeSet<u64>,
    /// Returned after a failed submission, available for reuse
    released: BTreeSet<u64>,
    last_refresh: Option<Instant>,
}

/// Snapshot of the manager's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceStatus {
    pub chain_nonce: u64,
    pub next: u64,
    pub leased: usize,
    pub released: usize,
}

/// Allocates transaction nonces for a single address.
#[derive(Debug)]
pub struct NonceManager {
    chain: Arc<dyn ChainClient>,
    address: Address,
    refresh_interval: Duration,
    state: Mutex<NonceState>,
}

impl NonceManager {
    pub fn new(chain: Arc<dyn ChainClient>, address: Address, refresh_interval: Duration) -> Self {
        Self {
            chain,
            address,
            refresh_interval,
            state: Mutex::new(NonceState::default()),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Lease the next unused nonce.
    ///
    /// Refreshes from the chain when the last read is older than the
    /// refresh interval; otherwise allocation is purely local.
    pub async fn get_next_nonce(&self) -> Result<u64> {
        let mut state = self.state.lock().await;

        let stale = state
            .last_refresh
            .map_or(true, |at| at.elapsed() >= self.refresh_interval);
        if stale {
            self.refresh_locked(&mut state).await?;
        }

        let nonce = match state.released.pop_first() {
            Some(reused) => reused,
            None => {
                let mut candidate = state.next;
                while state.leased.contains(&candidate) {
                    candidate += 1;
                }
                state.next = candidate + 1;
                candidate
            }
        };
        state.leased.insert(nonce);

        debug!(
            address = %self.address,
            nonce = nonce,
            leased = state.leased.len(),
            "Nonce leased"
        );
        Ok(nonce)
    }

    /// Return a leased nonce after a failed submission.
    pub async fn release_nonce(&self, nonce: u64) {
        let mut state = self.state.lock().await;
        if !state.leased.remove(&nonce) {
            debug!(nonce = nonce, "Release of unleased nonce ignored");
            return;
        }
        if nonce >= state.chain_nonce {
            state.released.insert(nonce);
        }
        debug!(address = %self.address, nonce = nonce, "Nonce released");
    }

    /// Retire `nonce` and every tracked nonce at or below it.
    pub async fn confirm_nonce(&self, nonce: u64) {
        let mut state = self.state.lock().await;
        state.leased.retain(|n| *n > nonce);
        state.released.retain(|n| *n > nonce);
        state.chain_nonce = state.chain_nonce.max(nonce + 1);
        state.next = state.next.max(nonce + 1);
        debug!(address = %self.address, nonce = nonce, "Nonce confirmed");
    }

    /// Force a refresh from the chain.
    pub async fn refresh(&self) -> Result<u64> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await?;
        Ok(state.chain_nonce)
    }

    pub async fn status(&self) -> NonceStatus {
        let state = self.state.lock().await;
        NonceStatus {
            chain_nonce: state.chain_nonce,
            next: state.next,
            leased: state.leased.len(),
            released: state.released.len(),
        }
    }

    async fn refresh_locked(&self, state: &mut NonceState) -> Result<()> {
        let count = match self
            .chain
            .transaction_count(self.address, NonceTag::Latest)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!(
                    address = %self.address,
                    error = %e,
                    "Nonce read failed, falling back to pending count"
                );
                self.chain
                    .transaction_count(self.address, NonceTag::Pending)
                    .await
                    .context("failed to read pending transaction count")?
            }
        };

        // Anything below the chain count was mined, by us or externally
        state.leased.retain(|n| *n >= count);
        state.released.retain(|n| *n >= count);
        if count > state.chain_nonce || state.last_refresh.is_none() {
            info!(
                address = %self.address,
                previous = state.chain_nonce,
                chain_nonce = count,
                "Nonce synced from chain"
            );
        }
        state.chain_nonce = count;
        state.next = state.next.max(count);
        state.last_refresh = Some(Instant::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChainClient;
    use futures::future::join_all;
    use std::collections::HashSet;

    const SIGNER: Address = Address::repeat_byte(0x5e);

    fn manager(chain: Arc<MockChainClient>) -> Arc<NonceManager> {
        Arc::new(NonceManager::new(chain, SIGNER, Duration::from_secs(30)))
    }

    #[tokio::test]
    async fn test_concurrent_leases_are_distinct() {
        let chain = Arc::new(MockChainClient::new());
        chain.set_nonce(SIGNER, 7, 7);
        let nonces = manager(chain);

        let leases = join_all((0..50).map(|_| {
            let nonces = Arc::clone(&nonces);
            async move { nonces.get_next_nonce().await.unwrap() }
        }))
        .await;

        let unique: HashSet<u64> = leases.iter().copied().collect();
        assert_eq!(unique.len(), 50);
        assert_eq!(unique, (7..57).collect::<HashSet<u64>>());
    }

    #[tokio::test]
    async fn test_concurrent_leases_across_tasks() {
        let chain = Arc::new(MockChainClient::new());
        chain.set_nonce(SIGNER, 0, 0);
        let nonces = manager(chain);

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let nonces = Arc::clone(&nonces);
                tokio::spawn(async move { nonces.get_next_nonce().await.unwrap() })
            })
            .collect();

        let mut leases = Vec::new();
        for handle in handles {
            leases.push(handle.await.unwrap());
        }
        leases.sort_unstable();
        assert_eq!(leases, (0..20).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_released_nonce_reused_lowest_first() {
        let chain = Arc::new(MockChainClient::new());
        chain.set_nonce(SIGNER, 10, 10);
        let nonces = manager(chain);

        let a = nonces.get_next_nonce().await.unwrap();
        let b = nonces.get_next_nonce().await.unwrap();
        let c = nonces.get_next_nonce().await.unwrap();
        assert_eq!((a, b, c), (10, 11, 12));

        nonces.release_nonce(12).await;
        nonces.release_nonce(11).await;
        assert_eq!(nonces.get_next_nonce().await.unwrap(), 11);
        assert_eq!(nonces.get_next_nonce().await.unwrap(), 12);
        assert_eq!(nonces.get_next_nonce().await.unwrap(), 13);
    }

    #[tokio::test]
    async fn test_confirm_retires_lower_nonces() {
        let chain = Arc::new(MockChainClient::new());
        chain.set_nonce(SIGNER, 0, 0);
        let nonces = manager(chain);

        for _ in 0..4 {
            nonces.get_next_nonce().await.unwrap();
        }
        nonces.release_nonce(1).await;
        nonces.confirm_nonce(2).await;

        let status = nonces.status().await;
        assert_eq!(status.leased, 1); // only 3 remains
        assert_eq!(status.released, 0);
        assert_eq!(status.chain_nonce, 3);
        assert_eq!(nonces.get_next_nonce().await.unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_refresh_catches_external_transactions() {
        let chain = Arc::new(MockChainClient::new());
        chain.set_nonce(SIGNER, 5, 5);
        let nonces = manager(chain.clone());

        assert_eq!(nonces.get_next_nonce().await.unwrap(), 5);

        // Another process sent several transactions
        chain.set_nonce(SIGNER, 9, 9);
        assert_eq!(nonces.get_next_nonce().await.unwrap(), 6);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(nonces.get_next_nonce().await.unwrap(), 9);
        assert_eq!(nonces.status().await.leased, 1);
    }

    #[tokio::test]
    async fn test_latest_failure_falls_back_to_pending() {
        let chain = Arc::new(MockChainClient::new());
        chain.set_nonce(SIGNER, 3, 8);
        chain.set_fail_latest_nonce(true);
        let nonces = manager(chain);

        assert_eq!(nonces.get_next_nonce().await.unwrap(), 8);
    }
}
