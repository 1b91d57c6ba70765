//! Position snapshots produced by the protocol adapters.

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use liquidator_chain::ProtocolKind;
use rust_decimal::Decimal;
use serde::Serialize;
use smallvec::SmallVec;

/// Health factor reported for positions with no debt.
pub const HEALTH_FACTOR_SENTINEL: Decimal = Decimal::from_parts(999_999, 0, 0, false, 0);

/// One asset balance inside a position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetPosition {
    /// Underlying token address
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
    /// Token amount (decimals applied)
    pub amount: Decimal,
    pub value_usd: Decimal,
}

pub type CollateralAsset = AssetPosition;
pub type DebtAsset = AssetPosition;

impl AssetPosition {
    /// USD price of one token, if the position carries any amount.
    pub fn unit_price(&self) -> Option<Decimal> {
        if self.amount.is_zero() {
            return None;
        }
        Some(self.value_usd / self.amount)
    }
}

/// Immutable view of a debtor's position at fetch time.
#[derive(Debug, Clone, Serialize)]
pub struct PositionSnapshot {
    pub protocol: ProtocolKind,
    pub user: Address,
    pub total_collateral_usd: Decimal,
    pub total_debt_usd: Decimal,
    pub health_factor: Decimal,
    /// Risk-adjusted fraction of collateral that backs debt
    pub liquidation_threshold: Decimal,
    pub collaterals: SmallVec<[CollateralAsset; 4]>,
    pub debts: SmallVec<[DebtAsset; 4]>,
    pub fetched_at: DateTime<Utc>,
}

impl PositionSnapshot {
    /// Build a snapshot whose health factor is derived from its totals.
    pub fn derived(
        protocol: ProtocolKind,
        user: Address,
        collaterals: SmallVec<[CollateralAsset; 4]>,
        debts: SmallVec<[DebtAsset; 4]>,
        liquidation_threshold: Decimal,
    ) -> Self {
        let total_collateral_usd = collaterals.iter().map(|a| a.value_usd).sum();
        let total_debt_usd = debts.iter().map(|a| a.value_usd).sum();
        Self {
            protocol,
            user,
            total_collateral_usd,
            total_debt_usd,
            health_factor: compute_health_factor(
                total_collateral_usd,
                total_debt_usd,
                liquidation_threshold,
            ),
            liquidation_threshold,
            collaterals,
            debts,
            fetched_at: Utc::now(),
        }
    }

    /// Replace the derived health factor with a protocol-reported one.
    pub fn with_reported_health_factor(mut self, health_factor: Decimal) -> Self {
        self.health_factor = health_factor;
        self
    }

    pub fn is_liquidatable(&self) -> bool {
        self.health_factor < Decimal::ONE
    }

    pub fn collateral(&self, address: Address) -> Option<&CollateralAsset> {
        self.collaterals.iter().find(|a| a.address == address)
    }

    pub fn debt(&self, address: Address) -> Option<&DebtAsset> {
        self.debts.iter().find(|a| a.address == address)
    }

    pub fn largest_collateral(&self) -> Option<&CollateralAsset> {
        largest(&self.collaterals)
    }

    pub fn largest_debt(&self) -> Option<&DebtAsset> {
        largest(&self.debts)
    }
}

fn largest(assets: &[AssetPosition]) -> Option<&AssetPosition> {
    assets.iter().max_by_key(|a| a.value_usd)
}

/// collateral × threshold / debt, or the sentinel when there is no debt.
pub fn compute_health_factor(collateral_usd: Decimal, debt_usd: Decimal, threshold: Decimal) -> Decimal {
    if debt_usd <= Decimal::ZERO {
        return HEALTH_FACTOR_SENTINEL;
    }
    collateral_usd
        .checked_mul(threshold)
        .and_then(|weighted| weighted.checked_div(debt_usd))
        .unwrap_or(HEALTH_FACTOR_SENTINEL)
}

/// USD-weighted average of per-asset factors.
///
/// Used by protocols that configure a risk factor per market rather than
/// reporting one for the whole account.
pub fn weighted_threshold(weighted: &[(Decimal, Decimal)]) -> Decimal {
    let total: Decimal = weighted.iter().map(|(value, _)| *value).sum();
    if total.is_zero() {
        return Decimal::ZERO;
    }
    weighted
        .iter()
        .map(|(value, factor)| value * factor)
        .sum::<Decimal>()
        / total
}
