//! Legacy gas pricing strategy (pre-EIP-1559).
//!
//! Used for chains that don't support EIP-1559 transaction types.

use super::{GasParams, GasStrategy};
use crate::provider::FeeData;

/// Legacy gas pricing strategy.
///
/// Uses the node's `eth_gasPrice` as the single `gas_price` field.
#[derive(Debug, Default)]
pub struct LegacyGasStrategy;

impl LegacyGasStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl GasStrategy for LegacyGasStrategy {
    fn quote(&self, fee: &FeeData) -> GasParams {
        GasParams::Legacy {
            gas_price: fee.gas_price,
        }
    }

    fn strategy_name(&self) -> &'static str {
        "Legacy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_quote_uses_gas_price() {
        let fee = FeeData {
            gas_price: 7_000_000_000,
            base_fee: Some(5_000_000_000),
            max_priority_fee: Some(1),
        };
        assert_eq!(
            LegacyGasStrategy::new().quote(&fee),
            GasParams::Legacy {
                gas_price: 7_000_000_000
            }
        );
    }
}
