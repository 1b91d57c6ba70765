//! Gas pricing for liquidation transactions.
//!
//! A [`GasStrategy`] turns raw network fee data into [`GasParams`] for one
//! transaction type (Legacy or EIP-1559). The [`GasOracle`] samples on a
//! timer, keeps a bounded history and produces a congestion-aware
//! recommendation.
//!
//! # Example
//!
//! ```rust,ignore
//! use liquidator_chain::gas::{create_gas_strategy, GasOracle, GasOracleConfig};
//!
//! let strategy = create_gas_strategy(true, 2_000_000_000);
//! let oracle = Arc::new(GasOracle::new(chain, strategy, GasOracleConfig::default()));
//! oracle.start();
//! let quote = oracle.optimal_gas_price().await?;
//! ```

mod eip1559;
mod legacy;
mod oracle;

pub use eip1559::Eip1559GasStrategy;
pub use legacy::LegacyGasStrategy;
pub use oracle::{GasOracle, GasOracleConfig};

use crate::provider::FeeData;
use alloy::network::TransactionBuilder;
use alloy::rpc::types::TransactionRequest;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Debug;

/// Basis-point denominator.
pub const BPS: u128 = 10_000;

/// Gas pricing for a single transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GasParams {
    /// Legacy gas pricing (pre-EIP-1559).
    Legacy {
        /// Gas price in wei.
        gas_price: u128,
    },
    /// EIP-1559 gas pricing.
    Eip1559 {
        /// Maximum fee per gas in wei.
        max_fee_per_gas: u128,
        /// Maximum priority fee per gas in wei.
        max_priority_fee_per_gas: u128,
        /// Base fee the quote was built from, in wei. Not signed.
        base_fee_per_gas: u128,
    },
}

impl GasParams {
    /// Expected price actually paid per gas, for cost estimates.
    ///
    /// EIP-1559 transactions pay `base_fee + tip`, never more than the
    /// signed `max_fee_per_gas`.
    pub fn effective_gas_price(&self) -> u128 {
        match *self {
            GasParams::Legacy { gas_price } => gas_price,
            GasParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                base_fee_per_gas,
            } => base_fee_per_gas
                .saturating_add(max_priority_fee_per_gas)
                .min(max_fee_per_gas),
        }
    }

    /// Highest price per gas the signed transaction allows.
    pub fn fee_cap(&self) -> u128 {
        match *self {
            GasParams::Legacy { gas_price } => gas_price,
            GasParams::Eip1559 { max_fee_per_gas, .. } => max_fee_per_gas,
        }
    }

    /// Scale every bid component by `bps / 10_000`. The base fee is set by
    /// the network and stays as sampled.
    pub fn scaled(&self, bps: u128) -> Self {
        let scale = |wei: u128| wei.saturating_mul(bps) / BPS;
        match *self {
            GasParams::Legacy { gas_price } => GasParams::Legacy {
                gas_price: scale(gas_price),
            },
            GasParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                base_fee_per_gas,
            } => GasParams::Eip1559 {
                max_fee_per_gas: scale(max_fee_per_gas),
                max_priority_fee_per_gas: scale(max_priority_fee_per_gas),
                base_fee_per_gas,
            },
        }
    }

    /// Clamp every price component to `ceiling` wei.
    pub fn capped(&self, ceiling: u128) -> Self {
        match *self {
            GasParams::Legacy { gas_price } => GasParams::Legacy {
                gas_price: gas_price.min(ceiling),
            },
            GasParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                base_fee_per_gas,
            } => {
                let max_fee = max_fee_per_gas.min(ceiling);
                GasParams::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: max_priority_fee_per_gas.min(max_fee),
                    base_fee_per_gas,
                }
            }
        }
    }

    /// Apply to a transaction request, selecting the matching envelope type.
    pub fn apply_to(&self, tx: &mut TransactionRequest) {
        match *self {
            GasParams::Legacy { gas_price } => tx.set_gas_price(gas_price),
            GasParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                ..
            } => {
                tx.set_max_fee_per_gas(max_fee_per_gas);
                tx.set_max_priority_fee_per_gas(max_priority_fee_per_gas);
            }
        }
    }
}

/// Gas parameters with the time they were produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GasQuote {
    pub params: GasParams,
    pub timestamp: DateTime<Utc>,
}

impl GasQuote {
    pub fn new(params: GasParams) -> Self {
        Self {
            params,
            timestamp: Utc::now(),
        }
    }

    pub fn effective_gas_price(&self) -> u128 {
        self.params.effective_gas_price()
    }

    pub fn fee_cap(&self) -> u128 {
        self.params.fee_cap()
    }
}

/// Converts sampled fee data into gas parameters for one transaction type.
pub trait GasStrategy: Send + Sync + Debug {
    /// Build gas parameters from the latest network fee data.
    fn quote(&self, fee: &FeeData) -> GasParams;

    /// Get the strategy name for logging/debugging.
    fn strategy_name(&self) -> &'static str;
}

/// Create a gas strategy from configuration.
///
/// # Arguments
/// * `eip1559` - Whether the chain accepts type-2 transactions
/// * `default_priority_fee` - Tip in wei used when the node offers no suggestion
pub fn create_gas_strategy(eip1559: bool, default_priority_fee: u128) -> Box<dyn GasStrategy> {
    if eip1559 {
        Box::new(Eip1559GasStrategy::new(default_priority_fee, 2 * BPS))
    } else {
        Box::new(LegacyGasStrategy::new())
    }
}

/// Convert gwei to wei.
pub fn gwei_to_wei(gwei: u64) -> u128 {
    u128::from(gwei) * 1_000_000_000
}
