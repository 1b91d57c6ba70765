//! Aave V3 pool adapter.
//!
//! The pool reports the account's health factor and liquidation threshold
//! directly; those values are authoritative and replace the derived ones.

use super::{AdapterError, AssetValuer, LendingProtocol};
use crate::config::AaveV3Config;
use crate::position::{PositionSnapshot, HEALTH_FACTOR_SENTINEL};
use crate::profitability::LiquidationParameters;
use crate::units::{bps_to_fraction, wad_to_decimal};
use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use futures::future::join_all;
use liquidator_chain::contracts::{IPool, IPoolDataProvider};
use liquidator_chain::{call_contract, ProtocolKind, TxPayload};
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct AaveV3Adapter {
    config: AaveV3Config,
    valuer: Arc<AssetValuer>,
}

/// Raw balances of one reserve.
struct ReserveBalances {
    reserve: Address,
    supplied: U256,
    borrowed: U256,
}

impl AaveV3Adapter {
    pub fn new(config: AaveV3Config, valuer: Arc<AssetValuer>) -> Self {
        Self { config, valuer }
    }

    async fn reserve_balances(&self, reserve: Address, user: Address) -> Option<ReserveBalances> {
        let call = IPoolDataProvider::getUserReserveDataCall { asset: reserve, user };
        match call_contract(self.valuer.chain(), self.config.data_provider, call).await {
            Ok(data) => Some(ReserveBalances {
                reserve,
                supplied: if data.usageAsCollateralEnabled {
                    data.currentATokenBalance
                } else {
                    U256::ZERO
                },
                borrowed: data.currentStableDebt.saturating_add(data.currentVariableDebt),
            }),
            Err(e) => {
                warn!(reserve = %reserve, user = %user, error = %e, "Reserve read failed");
                None
            }
        }
    }
}

#[async_trait]
impl LendingProtocol for AaveV3Adapter {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::AaveV3
    }

    async fn fetch_position(&self, user: Address) -> Option<PositionSnapshot> {
        debug!(user = %user, protocol = %self.kind(), "Fetching position");

        let account = match call_contract(
            self.valuer.chain(),
            self.config.pool,
            IPool::getUserAccountDataCall { user },
        )
        .await
        {
            Ok(account) => account,
            Err(e) => {
                warn!(user = %user, error = %e, "Account data unavailable");
                return None;
            }
        };

        let reserves = join_all(
            self.config
                .reserves
                .iter()
                .map(|reserve| self.reserve_balances(*reserve, user)),
        )
        .await;

        let mut collaterals = SmallVec::new();
        let mut debts = SmallVec::new();
        for balances in reserves.into_iter().flatten() {
            if let Some(asset) = self.valuer.value(balances.reserve, balances.supplied).await {
                collaterals.push(asset);
            }
            if let Some(asset) = self.valuer.value(balances.reserve, balances.borrowed).await {
                debts.push(asset);
            }
        }

        let threshold = bps_to_fraction(account.currentLiquidationThreshold.saturating_to::<u64>());
        let health_factor = if account.healthFactor == U256::MAX || account.totalDebtBase.is_zero() {
            HEALTH_FACTOR_SENTINEL
        } else {
            wad_to_decimal(account.healthFactor).unwrap_or(HEALTH_FACTOR_SENTINEL)
        };

        Some(
            PositionSnapshot::derived(self.kind(), user, collaterals, debts, threshold)
                .with_reported_health_factor(health_factor),
        )
    }

    fn build_transaction(
        &self,
        params: &LiquidationParameters,
        _liquidator: Address,
    ) -> Result<TxPayload, AdapterError> {
        for asset in [params.collateral_asset, params.debt_asset] {
            if !self.config.reserves.contains(&asset) {
                return Err(AdapterError::UnknownMarket(asset));
            }
        }
        if params.debt_to_repay_raw.is_zero() {
            return Err(AdapterError::Encoding("debt to cover rounds to zero".into()));
        }
        let call = IPool::liquidationCallCall {
            collateralAsset: params.collateral_asset,
            debtAsset: params.debt_asset,
            user: params.user,
            debtToCover: params.debt_to_repay_raw,
            receiveAToken: false,
        };
        Ok(TxPayload::new(self.config.pool, call.abi_encode()))
    }

    fn gas_budget(&self) -> u64 {
        self.config.gas_budget
    }
}
