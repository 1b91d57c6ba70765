//! Compound V3 (Comet) adapter.
//!
//! A Comet market lends a single base asset against a fixed set of
//! collateral assets. Liquidation is an `absorb` of the whole account.

use super::{AdapterError, AssetValuer, LendingProtocol};
use crate::config::CompoundV3Config;
use crate::position::{weighted_threshold, PositionSnapshot};
use crate::profitability::LiquidationParameters;
use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use futures::future::join_all;
use liquidator_chain::contracts::IComet;
use liquidator_chain::{call_contract, ProtocolKind, TxPayload};
use rust_decimal::Decimal;
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct CompoundV3Adapter {
    config: CompoundV3Config,
    valuer: Arc<AssetValuer>,
}

impl CompoundV3Adapter {
    pub fn new(config: CompoundV3Config, valuer: Arc<AssetValuer>) -> Self {
        Self { config, valuer }
    }

    async fn collateral_balance(&self, asset: Address, user: Address) -> Option<U256> {
        let call = IComet::collateralBalanceOfCall { account: user, asset };
        match call_contract(self.valuer.chain(), self.config.comet, call).await {
            Ok(balance) => Some(U256::from(balance._0)),
            Err(e) => {
                warn!(asset = %asset, user = %user, error = %e, "Collateral read failed");
                None
            }
        }
    }
}

#[async_trait]
impl LendingProtocol for CompoundV3Adapter {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::CompoundV3
    }

    async fn fetch_position(&self, user: Address) -> Option<PositionSnapshot> {
        debug!(user = %user, protocol = %self.kind(), "Fetching position");

        let borrowed = match call_contract(
            self.valuer.chain(),
            self.config.comet,
            IComet::borrowBalanceOfCall { account: user },
        )
        .await
        {
            Ok(balance) => Some(balance._0),
            Err(e) => {
                warn!(user = %user, error = %e, "Borrow balance read failed");
                None
            }
        };

        let supplied = join_all(
            self.config
                .collateral
                .iter()
                .map(|c| self.collateral_balance(c.asset, user)),
        )
        .await;

        if borrowed.is_none() && supplied.iter().all(Option::is_none) {
            warn!(user = %user, comet = %self.config.comet, "Every market read failed");
            return None;
        }

        let mut debts = SmallVec::new();
        if let Some(raw) = borrowed {
            if let Some(asset) = self.valuer.value(self.config.base_asset, raw).await {
                debts.push(asset);
            }
        }

        let mut collaterals = SmallVec::new();
        let mut weighted: Vec<(Decimal, Decimal)> = Vec::with_capacity(self.config.collateral.len());
        for (market, raw) in self.config.collateral.iter().zip(supplied) {
            let Some(raw) = raw else { continue };
            if let Some(asset) = self.valuer.value(market.asset, raw).await {
                weighted.push((asset.value_usd, market.liquidation_factor));
                collaterals.push(asset);
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
        liquidator: Address,
    ) -> Result<TxPayload, AdapterError> {
        if liquidator.is_zero() {
            return Err(AdapterError::InvalidAddress {
                role: "absorber",
                address: liquidator,
            });
        }
        let call = IComet::absorbCall {
            absorber: liquidator,
            accounts: vec![params.user],
        };
        Ok(TxPayload::new(self.config.comet, call.abi_encode()))
    }

    fn gas_budget(&self) -> u64 {
        self.config.gas_budget
    }

    /// `absorb` moves the debt and collateral onto the protocol's books.
    fn repays_from_wallet(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::tests::valuer;
    use crate::config::CometCollateral;
    use crate::position::tests::dec;
    use crate::profitability::tests::parameters;
    use crate::tokens::tests::{USDC, WBTC, WETH};
    use liquidator_chain::testing::MockChainClient;

    const COMET: Address = Address::repeat_byte(0xc3);
    const USER: Address = Address::repeat_byte(0xbb);

    fn config() -> CompoundV3Config {
        CompoundV3Config {
            enabled: true,
            comet: COMET,
            base_asset: USDC,
            collateral: vec![
                CometCollateral {
                    asset: WETH,
                    liquidation_factor: dec("0.9"),
                },
                CometCollateral {
                    asset: WBTC,
                    liquidation_factor: dec("0.8"),
                },
            ],
            close_factor: None,
            liquidation_bonus: None,
            min_profit_usd: None,
            gas_budget: 500_000,
        }
    }

    fn collateral_response(amount: u128) -> Vec<u8> {
        IComet::collateralBalanceOfCall::abi_encode_returns(&(amount,))
    }

    fn mock_position(chain: &MockChainClient) {
        chain.set_call(
            COMET,
            &IComet::borrowBalanceOfCall { account: USER },
            IComet::borrowBalanceOfCall::abi_encode_returns(&(U256::from(2_000_000_000u64),)),
        );
        // 0.5 WETH = 1500 USD
        chain.set_call(
            COMET,
            &IComet::collateralBalanceOfCall { account: USER, asset: WETH },
            collateral_response(500_000_000_000_000_000),
        );
        // 0.01 WBTC = 600 USD
        chain.set_call(
            COMET,
            &IComet::collateralBalanceOfCall { account: USER, asset: WBTC },
            collateral_response(1_000_000),
        );
    }

    #[tokio::test]
    async fn test_fetch_position_weights_liquidation_factors() {
        let chain = Arc::new(MockChainClient::new());
        mock_position(&chain);
        let adapter = CompoundV3Adapter::new(config(), valuer(chain));

        let snapshot = adapter.fetch_position(USER).await.unwrap();
        assert_eq!(snapshot.total_collateral_usd, dec("2100"));
        assert_eq!(snapshot.total_debt_usd, dec("2000"));
        // (1500 × 0.9 + 600 × 0.8) / 2100
        assert_eq!(snapshot.liquidation_threshold.round_dp(6), dec("0.871429"));
        assert_eq!(snapshot.health_factor.round_dp(6), dec("0.915"));
        assert!(snapshot.is_liquidatable());
    }

    #[tokio::test]
    async fn test_partial_failure_omits_market() {
        let chain = Arc::new(MockChainClient::new());
        mock_position(&chain);
        chain.revert_call(
            COMET,
            &IComet::collateralBalanceOfCall { account: USER, asset: WBTC },
        );
        let adapter = CompoundV3Adapter::new(config(), valuer(chain));

        let snapshot = adapter.fetch_position(USER).await.unwrap();
        assert_eq!(snapshot.collaterals.len(), 1);
        assert_eq!(snapshot.collaterals[0].symbol, "WETH");
    }

    #[tokio::test]
    async fn test_all_reads_failing_is_null() {
        let chain = Arc::new(MockChainClient::new());
        let adapter = CompoundV3Adapter::new(config(), valuer(chain));
        assert!(adapter.fetch_position(USER).await.is_none());
    }

    #[test]
    fn test_build_absorb() {
        let adapter = CompoundV3Adapter::new(config(), valuer(Arc::new(MockChainClient::new())));
        let liquidator = Address::repeat_byte(0x01);
        let params = parameters(USER, ProtocolKind::CompoundV3, WETH, USDC, 1_000_000_000);

        let payload = adapter.build_transaction(&params, liquidator).unwrap();
        assert_eq!(payload.to, COMET);
        let decoded = IComet::absorbCall::abi_decode(&payload.data, true).unwrap();
        assert_eq!(decoded.absorber, liquidator);
        assert_eq!(decoded.accounts, vec![USER]);

        assert!(matches!(
            adapter.build_transaction(&params, Address::ZERO),
            Err(AdapterError::InvalidAddress { role: "absorber", .. })
        ));
        assert!(!adapter.repays_from_wallet());
    }
}
