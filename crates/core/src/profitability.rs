//! Liquidation sizing and expected profit.

use crate::config::ProtocolParams;
use crate::position::{AssetPosition, PositionSnapshot};
use crate::units::{to_decimal, to_raw};
use crate::validator::RejectReason;
use alloy::primitives::{Address, U256};
use liquidator_chain::ProtocolKind;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::fmt;

/// How much debt to repay and how much collateral that seizes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiquidationParameters {
    pub user: Address,
    pub protocol: ProtocolKind,
    pub collateral_asset: Address,
    pub collateral_symbol: String,
    pub collateral_decimals: u8,
    pub debt_asset: Address,
    pub debt_symbol: String,
    pub debt_decimals: u8,
    pub debt_to_repay_usd: Decimal,
    pub debt_to_repay_tokens: Decimal,
    /// Repay amount in the debt token's smallest unit
    pub debt_to_repay_raw: U256,
    /// Always `debt_to_repay_usd × (1 + liquidation_bonus)`
    pub collateral_to_seize_usd: Decimal,
    pub collateral_to_seize_tokens: Decimal,
    pub liquidation_bonus: Decimal,
}

impl LiquidationParameters {
    /// Scale the liquidation down so that at most `max_tokens` of the debt
    /// asset are repaid. Returns whether anything changed.
    pub fn cap_debt_tokens(&mut self, max_tokens: Decimal) -> bool {
        if max_tokens >= self.debt_to_repay_tokens || self.debt_to_repay_tokens.is_zero() {
            return false;
        }
        let ratio = max_tokens / self.debt_to_repay_tokens;
        self.debt_to_repay_tokens = truncate(max_tokens, self.debt_decimals);
        self.debt_to_repay_raw = to_raw(self.debt_to_repay_tokens, self.debt_decimals).unwrap_or_default();
        self.debt_to_repay_usd *= ratio;
        self.collateral_to_seize_usd = self.debt_to_repay_usd * (Decimal::ONE + self.liquidation_bonus);
        self.collateral_to_seize_tokens = truncate(self.collateral_to_seize_tokens * ratio, self.collateral_decimals);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProfitEstimate {
    pub seized_usd: Decimal,
    pub repaid_usd: Decimal,
    pub gas_cost_usd: Decimal,
    pub net_profit_usd: Decimal,
}

impl ProfitEstimate {
    pub fn new(params: &LiquidationParameters, gas_cost_usd: Decimal) -> Self {
        Self {
            seized_usd: params.collateral_to_seize_usd,
            repaid_usd: params.debt_to_repay_usd,
            gas_cost_usd,
            net_profit_usd: params.collateral_to_seize_usd - params.debt_to_repay_usd - gas_cost_usd,
        }
    }

    /// Payoff of a liquidation that seizes nothing for the caller, such as
    /// a Comet absorb: the caller only pays gas.
    pub fn gas_only(gas_cost_usd: Decimal) -> Self {
        Self {
            seized_usd: Decimal::ZERO,
            repaid_usd: Decimal::ZERO,
            gas_cost_usd,
            net_profit_usd: -gas_cost_usd,
        }
    }

    pub fn is_profitable(&self, min_profit_usd: Decimal) -> bool {
        self.net_profit_usd >= min_profit_usd
    }
}

impl fmt::Display for ProfitEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seized=${:.2} - repaid=${:.2} - gas=${:.2} = net=${:.2}",
            self.seized_usd, self.repaid_usd, self.gas_cost_usd, self.net_profit_usd
        )
    }
}

/// Hinted asset if the snapshot holds it, else the largest by value.
fn resolve<'a>(assets: &'a [AssetPosition], hint: Option<Address>) -> Option<&'a AssetPosition> {
    hint.and_then(|h| assets.iter().find(|a| a.address == h))
        .or_else(|| assets.iter().max_by_key(|a| a.value_usd))
}

fn truncate(amount: Decimal, decimals: u8) -> Decimal {
    amount
        .round_dp_with_strategy(u32::from(decimals), RoundingStrategy::ToZero)
        .normalize()
}

/// Size a liquidation for `snapshot`.
///
/// The repay amount is `close_factor × total debt`, capped by the debt
/// asset's own value and by what the collateral asset can cover once the
/// bonus is added.
pub fn compute_parameters(
    snapshot: &PositionSnapshot,
    collateral_hint: Option<Address>,
    debt_hint: Option<Address>,
    params: &ProtocolParams,
) -> Result<LiquidationParameters, RejectReason> {
    let collateral = resolve(&snapshot.collaterals, collateral_hint).ok_or(RejectReason::NoCollateral)?;
    let debt = resolve(&snapshot.debts, debt_hint).ok_or(RejectReason::NoDebt)?;

    let debt_price = debt
        .unit_price()
        .ok_or_else(|| RejectReason::PriceUnavailable(debt.symbol.clone()))?;
    let collateral_price = collateral
        .unit_price()
        .ok_or_else(|| RejectReason::PriceUnavailable(collateral.symbol.clone()))?;

    let bonus_multiplier = Decimal::ONE + params.liquidation_bonus;
    let debt_to_repay_usd = (params.close_factor * snapshot.total_debt_usd)
        .min(debt.value_usd)
        .min(collateral.value_usd / bonus_multiplier);
    let collateral_to_seize_usd = debt_to_repay_usd * bonus_multiplier;

    let debt_to_repay_tokens = truncate(debt_to_repay_usd / debt_price, debt.decimals);
    let collateral_to_seize_tokens = truncate(collateral_to_seize_usd / collateral_price, collateral.decimals);

    Ok(LiquidationParameters {
        user: snapshot.user,
        protocol: snapshot.protocol,
        collateral_asset: collateral.address,
        collateral_symbol: collateral.symbol.clone(),
        collateral_decimals: collateral.decimals,
        debt_asset: debt.address,
        debt_symbol: debt.symbol.clone(),
        debt_decimals: debt.decimals,
        debt_to_repay_usd,
        debt_to_repay_tokens,
        debt_to_repay_raw: to_raw(debt_to_repay_tokens, debt.decimals).unwrap_or_default(),
        collateral_to_seize_usd,
        collateral_to_seize_tokens,
        liquidation_bonus: params.liquidation_bonus,
    })
}

/// Native cost of `gas_budget` units at `gas_price_wei`, in USD.
pub fn gas_cost_usd(gas_budget: u64, gas_price_wei: u128, native_usd: Decimal) -> Option<Decimal> {
    let wei = U256::from(gas_budget).checked_mul(U256::from(gas_price_wei))?;
    to_decimal(wei, 18)?.checked_mul(native_usd)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::position::tests::{asset, dec};
    use smallvec::smallvec;

    /// Parameters with only the addresses and raw repay amount filled in.
    pub(crate) fn parameters(
        user: Address,
        protocol: ProtocolKind,
        collateral: Address,
        debt: Address,
        raw: u64,
    ) -> LiquidationParameters {
        LiquidationParameters {
            user,
            protocol,
            collateral_asset: collateral,
            collateral_symbol: String::new(),
            collateral_decimals: 18,
            debt_asset: debt,
            debt_symbol: String::new(),
            debt_decimals: 6,
            debt_to_repay_usd: Decimal::ZERO,
            debt_to_repay_tokens: Decimal::ZERO,
            debt_to_repay_raw: U256::from(raw),
            collateral_to_seize_usd: Decimal::ZERO,
            collateral_to_seize_tokens: Decimal::ZERO,
            liquidation_bonus: Decimal::ZERO,
        }
    }

    fn protocol_params(close_factor: &str, bonus: &str) -> ProtocolParams {
        ProtocolParams {
            close_factor: dec(close_factor),
            liquidation_bonus: dec(bonus),
            min_profit_usd: Decimal::TEN,
            gas_budget: 500_000,
        }
    }

    fn snapshot() -> PositionSnapshot {
        PositionSnapshot::derived(
            ProtocolKind::AaveV3,
            Address::repeat_byte(0xbb),
            smallvec![asset(1, "WETH", "0.5", "1000")],
            smallvec![asset(3, "USDC", "900", "900")],
            dec("0.85"),
        )
    }

    #[test]
    fn test_seize_includes_bonus() {
        let params = compute_parameters(&snapshot(), None, None, &protocol_params("0.5", "0.05")).unwrap();
        assert_eq!(params.debt_to_repay_usd, dec("450"));
        assert_eq!(params.collateral_to_seize_usd, dec("472.5"));
        assert_eq!(params.debt_to_repay_tokens, dec("450"));
        assert_eq!(params.collateral_to_seize_tokens, dec("0.23625"));
        assert_eq!(params.debt_to_repay_raw, U256::from(450u64) * crate::units::WAD);
    }

    #[test]
    fn test_repay_capped_by_collateral() {
        let mut snapshot = snapshot();
        snapshot.collaterals = smallvec![asset(1, "WETH", "0.1", "210")];
        let params = compute_parameters(&snapshot, None, None, &protocol_params("0.5", "0.05")).unwrap();
        assert_eq!(params.debt_to_repay_usd, dec("200"));
        assert_eq!(params.collateral_to_seize_usd, dec("210"));
    }

    #[test]
    fn test_hint_selects_asset() {
        let mut snapshot = snapshot();
        snapshot.debts.push(asset(4, "DAI", "100", "100"));
        let hinted = compute_parameters(
            &snapshot,
            None,
            Some(Address::repeat_byte(4)),
            &protocol_params("0.5", "0.05"),
        )
        .unwrap();
        assert_eq!(hinted.debt_symbol, "DAI");
        assert_eq!(hinted.debt_to_repay_usd, dec("100"));

        // A hint for an asset the debtor does not hold falls back to the largest
        let fallback = compute_parameters(
            &snapshot,
            Some(Address::repeat_byte(9)),
            None,
            &protocol_params("0.5", "0.05"),
        )
        .unwrap();
        assert_eq!(fallback.collateral_symbol, "WETH");
        assert_eq!(fallback.debt_symbol, "USDC");
    }

    #[test]
    fn test_empty_sides_are_rejected() {
        let mut snapshot = snapshot();
        snapshot.debts.clear();
        assert_eq!(
            compute_parameters(&snapshot, None, None, &protocol_params("0.5", "0.05")),
            Err(RejectReason::NoDebt)
        );
        snapshot.collaterals.clear();
        assert_eq!(
            compute_parameters(&snapshot, None, None, &protocol_params("0.5", "0.05")),
            Err(RejectReason::NoCollateral)
        );
    }

    #[test]
    fn test_cap_debt_tokens_scales_proportionally() {
        let mut params = compute_parameters(&snapshot(), None, None, &protocol_params("0.5", "0.05")).unwrap();
        assert!(params.cap_debt_tokens(dec("225")));
        assert_eq!(params.debt_to_repay_tokens, dec("225"));
        assert_eq!(params.debt_to_repay_usd, dec("225"));
        assert_eq!(params.collateral_to_seize_usd, dec("236.25"));
        assert!(!params.cap_debt_tokens(dec("1000")));
    }

    #[test]
    fn test_gas_cost_and_profit() {
        // 500k gas at 20 gwei = 0.01 ETH = 30 USD at 3000
        let gas = gas_cost_usd(500_000, 20_000_000_000, dec("3000")).unwrap();
        assert_eq!(gas, dec("30"));

        let params = compute_parameters(&snapshot(), None, None, &protocol_params("0.5", "0.05")).unwrap();
        let profit = ProfitEstimate::new(&params, gas);
        assert_eq!(profit.net_profit_usd, dec("-7.5"));
        assert!(!profit.is_profitable(dec("10")));
        assert!(ProfitEstimate::new(&params, Decimal::ZERO).is_profitable(dec("10")));
    }

    #[test]
    fn test_gas_only_payoff() {
        let profit = ProfitEstimate::gas_only(dec("1.5"));
        assert_eq!(profit.seized_usd, Decimal::ZERO);
        assert_eq!(profit.repaid_usd, Decimal::ZERO);
        assert_eq!(profit.net_profit_usd, dec("-1.5"));
        assert!(!profit.is_profitable(Decimal::ZERO));
        assert!(profit.is_profitable(dec("-2")));
    }
}
