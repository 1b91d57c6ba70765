//! Compound V2 style cToken adapter.
//!
//! Each configured market is a cToken over one underlying. Balances come
//! from `getAccountSnapshot`; collateral is converted from cTokens to
//! underlying with the market's exchange rate.

use super::{AdapterError, AssetValuer, LendingProtocol};
use crate::config::{CTokenMarket, CompoundV2Config};
use crate::position::{weighted_threshold, PositionSnapshot};
use crate::profitability::LiquidationParameters;
use crate::units::WAD;
use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use futures::future::join_all;
use liquidator_chain::contracts::ICToken;
use liquidator_chain::{call_contract, ProtocolKind, TxPayload};
use rust_decimal::Decimal;
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct CompoundV2Adapter {
    config: CompoundV2Config,
    valuer: Arc<AssetValuer>,
}

/// Underlying balances of one market.
struct MarketBalances {
    supplied: U256,
    borrowed: U256,
}

impl CompoundV2Adapter {
    pub fn new(config: CompoundV2Config, valuer: Arc<AssetValuer>) -> Self {
        Self { config, valuer }
    }

    fn market(&self, underlying: Address) -> Option<&CTokenMarket> {
        self.config.markets.iter().find(|m| m.underlying == underlying)
    }

    fn is_configured(&self, address: Address) -> bool {
        self.config
            .markets
            .iter()
            .any(|m| m.ctoken == address || m.underlying == address)
    }

    async fn market_balances(&self, market: &CTokenMarket, user: Address) -> Option<MarketBalances> {
        let call = ICToken::getAccountSnapshotCall { account: user };
        let snapshot = match call_contract(self.valuer.chain(), market.ctoken, call).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(ctoken = %market.ctoken, user = %user, error = %e, "Market read failed");
                return None;
            }
        };
        if !snapshot._0.is_zero() {
            warn!(ctoken = %market.ctoken, user = %user, code = %snapshot._0, "Market returned error code");
            return None;
        }
        let supplied = snapshot
            ._1
            .checked_mul(snapshot._3)
            .map(|v| v / WAD)
            .unwrap_or(U256::ZERO);
        Some(MarketBalances {
            supplied,
            borrowed: snapshot._2,
        })
    }

    /// Non-zero, not the borrower and part of a configured market.
    fn check_address(&self, role: &'static str, address: Address, borrower: Address) -> Result<(), AdapterError> {
        if address.is_zero() || address == borrower || !self.is_configured(address) {
            return Err(AdapterError::InvalidAddress { role, address });
        }
        Ok(())
    }
}

#[async_trait]
impl LendingProtocol for CompoundV2Adapter {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::CompoundV2
    }

    async fn fetch_position(&self, user: Address) -> Option<PositionSnapshot> {
        debug!(user = %user, protocol = %self.kind(), "Fetching position");

        let balances = join_all(
            self.config
                .markets
                .iter()
                .map(|market| self.market_balances(market, user)),
        )
        .await;

        if balances.iter().all(Option::is_none) {
            warn!(user = %user, markets = self.config.markets.len(), "Every market read failed");
            return None;
        }

        let mut collaterals = SmallVec::new();
        let mut debts = SmallVec::new();
        let mut weighted: Vec<(Decimal, Decimal)> = Vec::new();
        for (market, balances) in self.config.markets.iter().zip(balances) {
            let Some(balances) = balances else { continue };
            if let Some(asset) = self.valuer.value(market.underlying, balances.supplied).await {
                weighted.push((asset.value_usd, market.collateral_factor));
                collaterals.push(asset);
            }
            if let Some(asset) = self.valuer.value(market.underlying, balances.borrowed).await {
                debts.push(asset);
            }
        }

        Some(PositionSnapshot::derived(
            self.kind(),
            user,
            collaterals,
            debts,
            weighted_threshold(&weighted),
        ))
    }

    fn build_transaction(
        &self,
        params: &LiquidationParameters,
        _liquidator: Address,
    ) -> Result<TxPayload, AdapterError> {
        let borrower = params.user;
        self.check_address("debt asset", params.debt_asset, borrower)?;
        self.check_address("collateral asset", params.collateral_asset, borrower)?;

        let debt_market = self
            .market(params.debt_asset)
            .ok_or(AdapterError::UnknownMarket(params.debt_asset))?;
        let collateral_market = self
            .market(params.collateral_asset)
            .ok_or(AdapterError::UnknownMarket(params.collateral_asset))?;
        self.check_address("debt cToken", debt_market.ctoken, borrower)?;
        self.check_address("collateral cToken", collateral_market.ctoken, borrower)?;

        if params.debt_to_repay_raw.is_zero() {
            return Err(AdapterError::Encoding("repay amount rounds to zero".into()));
        }

        let call = ICToken::liquidateBorrowCall {
            borrower,
            repayAmount: params.debt_to_repay_raw,
            cTokenCollateral: collateral_market.ctoken,
        };
        Ok(TxPayload::new(debt_market.ctoken, call.abi_encode()))
    }

    fn gas_budget(&self) -> u64 {
        self.config.gas_budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::tests::valuer;
    use crate::position::tests::dec;
    use crate::profitability::tests::parameters;
    use crate::tokens::tests::{USDC, WETH};
    use liquidator_chain::testing::MockChainClient;

    const CETH: Address = Address::repeat_byte(0xce);
    const CUSDC: Address = Address::repeat_byte(0xcd);
    const USER: Address = Address::repeat_byte(0xbb);

    fn config() -> CompoundV2Config {
        CompoundV2Config {
            enabled: true,
            markets: vec![
                CTokenMarket {
                    ctoken: CETH,
                    underlying: WETH,
                    collateral_factor: dec("0.75"),
                },
                CTokenMarket {
                    ctoken: CUSDC,
                    underlying: USDC,
                    collateral_factor: dec("0.8"),
                },
            ],
            close_factor: None,
            liquidation_bonus: None,
            min_profit_usd: None,
            gas_budget: 600_000,
        }
    }

    fn account_snapshot(error: u64, ctokens: U256, borrow: U256, rate: U256) -> Vec<u8> {
        ICToken::getAccountSnapshotCall::abi_encode_returns(&(U256::from(error), ctokens, borrow, rate))
    }

    fn mock_position(chain: &MockChainClient) {
        // 25 cETH at 0.02 = 0.5 WETH
        chain.set_call(
            CETH,
            &ICToken::getAccountSnapshotCall { account: USER },
            account_snapshot(
                0,
                U256::from(2_500_000_000u64),
                U256::ZERO,
                U256::from(200_000_000_000_000_000_000_000_000u128),
            ),
        );
        chain.set_call(
            CUSDC,
            &ICToken::getAccountSnapshotCall { account: USER },
            account_snapshot(0, U256::ZERO, U256::from(1_200_000_000u64), WAD),
        );
    }

    #[tokio::test]
    async fn test_fetch_position_converts_ctokens() {
        let chain = Arc::new(MockChainClient::new());
        mock_position(&chain);
        let adapter = CompoundV2Adapter::new(config(), valuer(chain));

        let snapshot = adapter.fetch_position(USER).await.unwrap();
        assert_eq!(snapshot.collaterals[0].amount, dec("0.5"));
        assert_eq!(snapshot.total_collateral_usd, dec("1500"));
        assert_eq!(snapshot.total_debt_usd, dec("1200"));
        assert_eq!(snapshot.liquidation_threshold, dec("0.75"));
        assert_eq!(snapshot.health_factor, dec("0.9375"));
    }

    #[tokio::test]
    async fn test_error_code_counts_as_failed_read() {
        let chain = Arc::new(MockChainClient::new());
        mock_position(&chain);
        chain.set_call(
            CETH,
            &ICToken::getAccountSnapshotCall { account: USER },
            account_snapshot(3, U256::from(1u64), U256::ZERO, WAD),
        );
        let adapter = CompoundV2Adapter::new(config(), valuer(chain.clone()));
        let snapshot = adapter.fetch_position(USER).await.unwrap();
        assert!(snapshot.collaterals.is_empty());

        chain.set_fail_reads(true);
        assert!(adapter.fetch_position(USER).await.is_none());
    }

    #[test]
    fn test_build_liquidate_borrow() {
        let adapter = CompoundV2Adapter::new(config(), valuer(Arc::new(MockChainClient::new())));
        let params = parameters(USER, ProtocolKind::CompoundV2, WETH, USDC, 600_000_000);

        let payload = adapter
            .build_transaction(&params, Address::repeat_byte(0x01))
            .unwrap();
        assert_eq!(payload.to, CUSDC);
        let decoded = ICToken::liquidateBorrowCall::abi_decode(&payload.data, true).unwrap();
        assert_eq!(decoded.borrower, USER);
        assert_eq!(decoded.repayAmount, U256::from(600_000_000u64));
        assert_eq!(decoded.cTokenCollateral, CETH);
        assert!(adapter.repays_from_wallet());
    }

    #[test]
    fn test_invalid_addresses_are_rejected() {
        let adapter = CompoundV2Adapter::new(config(), valuer(Arc::new(MockChainClient::new())));
        let liquidator = Address::repeat_byte(0x01);

        let zero = parameters(USER, ProtocolKind::CompoundV2, WETH, Address::ZERO, 1);
        assert_eq!(
            adapter.build_transaction(&zero, liquidator),
            Err(AdapterError::InvalidAddress {
                role: "debt asset",
                address: Address::ZERO
            })
        );

        let self_collateral = parameters(USER, ProtocolKind::CompoundV2, USER, USDC, 1);
        assert!(matches!(
            adapter.build_transaction(&self_collateral, liquidator),
            Err(AdapterError::InvalidAddress { role: "collateral asset", .. })
        ));

        let unknown = Address::repeat_byte(0x42);
        let unconfigured = parameters(USER, ProtocolKind::CompoundV2, unknown, USDC, 1);
        assert!(matches!(
            adapter.build_transaction(&unconfigured, liquidator),
            Err(AdapterError::InvalidAddress { address, .. }) if address == unknown
        ));
    }
}
