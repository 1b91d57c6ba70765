//! Periodic gas sampling with congestion detection.

use super::{GasParams, GasQuote, GasStrategy, BPS};
use crate::provider::ChainClient;
use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Gas oracle settings.
#[derive(Debug, Clone)]
pub struct GasOracleConfig {
    pub sample_interval: Duration,
    /// Samples per comparison window (recent N vs the N before them).
    pub congestion_window: usize,
    /// Recent/previous mean ratio that signals congestion, in bps.
    pub congestion_ratio_bps: u32,
    /// Boost applied to the recommendation under congestion, in bps.
    pub congestion_boost_bps: u32,
    /// Hard ceiling for any price component, in wei.
    pub max_gas_price: u128,
    pub history_capacity: usize,
}

impl Default for GasOracleConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(5),
            congestion_window: 10,
            congestion_ratio_bps: 15_000,
            congestion_boost_bps: 2_000,
            max_gas_price: 500_000_000_000,
            history_capacity: 100,
        }
    }
}

/// Samples network fees and recommends a price for the next transaction.
#[derive(Debug)]
pub struct GasOracle {
    chain: Arc<dyn ChainClient>,
    strategy: Box<dyn GasStrategy>,
    config: GasOracleConfig,
    history: RwLock<VecDeque<GasQuote>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl GasOracle {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        strategy: Box<dyn GasStrategy>,
        config: GasOracleConfig,
    ) -> Self {
        let capacity = config.history_capacity.max(1);
        Self {
            chain,
            strategy,
            config,
            history: RwLock::new(VecDeque::with_capacity(capacity)),
            task: Mutex::new(None),
        }
    }

    /// Begin periodic sampling. Calling again while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        info!(
            strategy = self.strategy.strategy_name(),
            interval_ms = self.config.sample_interval.as_millis() as u64,
            max_gwei = (self.config.max_gas_price / 1_000_000_000) as u64,
            "Starting gas oracle"
        );

        let oracle = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(oracle.config.sample_interval);
            loop {
                ticker.tick().await;
                // Failed samples keep the last known good quote
                if let Err(e) = oracle.sample_once().await {
                    warn!(error = %e, "Gas sample failed");
                }
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    /// Take one fee sample from the chain and record it.
    pub async fn sample_once(&self) -> Result<GasQuote> {
        let fee = self.chain.fee_data().await?;
        let quote = GasQuote::new(self.strategy.quote(&fee));
        self.record(quote);
        debug!(
            gas_price = quote.effective_gas_price(),
            samples = self.history_len(),
            "Gas sample recorded"
        );
        Ok(quote)
    }

    /// Append a quote to the ring, evicting the oldest when full.
    pub fn record(&self, quote: GasQuote) {
        let mut history = self.history.write();
        while history.len() >= self.config.history_capacity.max(1) {
            history.pop_front();
        }
        history.push_back(quote);
    }

    pub fn latest(&self) -> Option<GasQuote> {
        self.history.read().back().copied()
    }

    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }

    /// Compare the mean of the latest N samples with the N before them.
    ///
    /// Needs at least 2N samples; returns `false` until then.
    pub fn is_network_congested(&self) -> bool {
        let window = self.config.congestion_window.max(1);
        let history = self.history.read();
        if history.len() < window * 2 {
            return false;
        }

        let recent_start = history.len() - window;
        let previous_start = recent_start - window;
        let mean = |from: usize| -> u128 {
            let sum: u128 = history
                .range(from..from + window)
                .map(|q| q.effective_gas_price())
                .sum();
            sum / window as u128
        };

        let recent = mean(recent_start);
        let previous = mean(previous_start);
        if previous == 0 {
            return recent > 0;
        }
        recent.saturating_mul(BPS) > previous.saturating_mul(u128::from(self.config.congestion_ratio_bps))
    }

    /// Recommended gas for the next transaction.
    ///
    /// Boosted under congestion, always capped at the configured ceiling.
    /// Samples on demand when no history exists yet.
    pub async fn optimal_gas_price(&self) -> Result<GasQuote> {
        let base = match self.latest() {
            Some(quote) => quote,
            None => self.sample_once().await?,
        };

        let mut params: GasParams = base.params;
        if self.is_network_congested() {
            params = params.scaled(BPS + u128::from(self.config.congestion_boost_bps));
            info!(
                base = base.effective_gas_price(),
                boosted = params.effective_gas_price(),
                "Network congested, boosting gas price"
            );
        }

        let capped = params.capped(self.config.max_gas_price);
        if capped != params {
            warn!(
                wanted = params.fee_cap(),
                ceiling = self.config.max_gas_price,
                "Gas price capped at ceiling"
            );
        }

        Ok(GasQuote::new(capped))
    }
}

impl Drop for GasOracle {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}
