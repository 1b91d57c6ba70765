//! EIP-1559 gas pricing strategy.
//!
//! This strategy is used for Ethereum mainnet and most L2s that support
//! EIP-1559 transaction types with base fee and priority fee.

use super::{GasParams, GasStrategy, BPS};
use crate::provider::FeeData;

/// EIP-1559 gas pricing strategy.
///
/// `max_fee = base_fee * multiplier + priority_fee`, leaving headroom for
/// base fee growth over the next few blocks.
#[derive(Debug)]
pub struct Eip1559GasStrategy {
    /// Default priority fee (tip) in wei.
    default_priority_fee: u128,
    /// Multiplier for max_fee relative to base_fee, in basis points.
    max_fee_multiplier_bps: u128,
}

impl Eip1559GasStrategy {
    /// Create a new EIP-1559 gas strategy.
    ///
    /// # Arguments
    /// * `default_priority_fee` - Tip in wei when the node offers no suggestion
    /// * `max_fee_multiplier_bps` - e.g. 20_000 means max_fee = 2 * base_fee + priority
    pub fn new(default_priority_fee: u128, max_fee_multiplier_bps: u128) -> Self {
        Self {
            default_priority_fee,
            max_fee_multiplier_bps,
        }
    }

    fn calculate_max_fee(&self, base_fee: u128, priority_fee: u128) -> u128 {
        base_fee
            .saturating_mul(self.max_fee_multiplier_bps)
            / BPS
            + priority_fee
    }
}

impl GasStrategy for Eip1559GasStrategy {
    fn quote(&self, fee: &FeeData) -> GasParams {
        let priority_fee = fee.max_priority_fee.unwrap_or(self.default_priority_fee);

        match fee.base_fee {
            Some(base_fee) => GasParams::Eip1559 {
                max_fee_per_gas: self.calculate_max_fee(base_fee, priority_fee),
                max_priority_fee_per_gas: priority_fee,
                base_fee_per_gas: base_fee,
            },
            // No base fee reported: treat gas_price as the whole budget
            None => {
                let tip = priority_fee.min(fee.gas_price);
                GasParams::Eip1559 {
                    max_fee_per_gas: fee.gas_price,
                    max_priority_fee_per_gas: tip,
                    base_fee_per_gas: fee.gas_price - tip,
                }
            }
        }
    }

    fn strategy_name(&self) -> &'static str {
        "EIP-1559"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eip1559_max_fee_calculation() {
        let strategy = Eip1559GasStrategy::new(2_000_000_000, 20_000);

        // base_fee = 30 gwei, priority = 2 gwei
        // max_fee = 30 * 2.0 + 2 = 62 gwei
        let max_fee = strategy.calculate_max_fee(30_000_000_000, 2_000_000_000);
        assert_eq!(max_fee, 62_000_000_000);
    }

    #[test]
    fn test_eip1559_quote_prefers_node_tip() {
        let strategy = Eip1559GasStrategy::new(2_000_000_000, 20_000);
        let fee = FeeData {
            gas_price: 40_000_000_000,
            base_fee: Some(30_000_000_000),
            max_priority_fee: Some(1_000_000_000),
        };
        assert_eq!(
            strategy.quote(&fee),
            GasParams::Eip1559 {
                max_fee_per_gas: 61_000_000_000,
                max_priority_fee_per_gas: 1_000_000_000,
                base_fee_per_gas: 30_000_000_000,
            }
        );
        // Cost estimates use base + tip, not the doubled-base cap
        assert_eq!(strategy.quote(&fee).effective_gas_price(), 31_000_000_000);
    }

    #[test]
    fn test_eip1559_quote_without_base_fee() {
        let strategy = Eip1559GasStrategy::new(2_000_000_000, 20_000);
        let fee = FeeData {
            gas_price: 1_000_000_000,
            base_fee: None,
            max_priority_fee: None,
        };
        assert_eq!(
            strategy.quote(&fee),
            GasParams::Eip1559 {
                max_fee_per_gas: 1_000_000_000,
                max_priority_fee_per_gas: 1_000_000_000,
                base_fee_per_gas: 0,
            }
        );
    }
}
