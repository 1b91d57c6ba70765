//! Price sources behind the oracle's fallback chain.

use super::{PriceSource, PriceSourceKind};
use crate::config::{DexKind, DexPoolConfig, TokenConfig};
use crate::tokens::TokenRegistry;
use crate::units::{pow10, pow10_decimal, to_decimal};
use alloy::primitives::{Address, U256};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use liquidator_api::PriceApi;
use liquidator_chain::contracts::{IAggregatorV3, IUniswapV2Pair, IUniswapV3Pool};
use liquidator_chain::{call_contract, ChainClient};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

/// Chainlink USD feed registered for the token.
#[derive(Debug)]
pub struct ChainlinkSource {
    chain: Arc<dyn ChainClient>,
    /// Feed decimals never change, read once per feed
    feed_decimals: DashMap<Address, u8>,
}

impl ChainlinkSource {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self {
            chain,
            feed_decimals: DashMap::new(),
        }
    }

    async fn decimals(&self, feed: Address) -> Result<u8> {
        if let Some(d) = self.feed_decimals.get(&feed) {
            return Ok(*d);
        }
        let decimals = call_contract(self.chain.as_ref(), feed, IAggregatorV3::decimalsCall {})
            .await?
            ._0;
        self.feed_decimals.insert(feed, decimals);
        Ok(decimals)
    }
}

#[async_trait]
impl PriceSource for ChainlinkSource {
    fn kind(&self) -> PriceSourceKind {
        PriceSourceKind::Chainlink
    }

    async fn price(&self, _token: Address, info: Option<&TokenConfig>) -> Result<Option<Decimal>> {
        let Some(feed) = info.and_then(|t| t.chainlink_feed) else {
            return Ok(None);
        };
        let round = call_contract(
            self.chain.as_ref(),
            feed,
            IAggregatorV3::latestRoundDataCall {},
        )
        .await?;
        if !round.answer.is_positive() {
            return Ok(None);
        }
        let decimals = self.decimals(feed).await?;
        Ok(to_decimal(round.answer.into_raw(), decimals))
    }
}

/// External price APIs, tried in configuration order.
#[derive(Debug)]
pub struct AggregatorSource {
    apis: Vec<Arc<dyn PriceApi>>,
}

impl AggregatorSource {
    pub fn new(apis: Vec<Arc<dyn PriceApi>>) -> Self {
        Self { apis }
    }
}

#[async_trait]
impl PriceSource for AggregatorSource {
    fn kind(&self) -> PriceSourceKind {
        PriceSourceKind::Aggregator
    }

    async fn price(&self, token: Address, info: Option<&TokenConfig>) -> Result<Option<Decimal>> {
        let symbol = info.map(|t| t.symbol.as_str()).unwrap_or_default();
        for api in &self.apis {
            match api.fetch_price(token, symbol).await {
                Ok(Some(price)) => return Ok(Some(price)),
                Ok(None) => debug!(api = api.name(), "Aggregator has no price"),
                Err(e) => debug!(api = api.name(), error = %e, "Aggregator request failed"),
            }
        }
        Ok(None)
    }
}

/// Uniswap pool quoting the token against a stablecoin.
#[derive(Debug)]
pub struct DexPoolSource {
    chain: Arc<dyn ChainClient>,
    registry: Arc<TokenRegistry>,
}

impl DexPoolSource {
    pub fn new(chain: Arc<dyn ChainClient>, registry: Arc<TokenRegistry>) -> Self {
        Self { chain, registry }
    }

    /// Quote-token amount per token from V2 reserves.
    async fn v2_price(&self, token: &TokenConfig, pool: &DexPoolConfig, quote_decimals: u8) -> Result<Option<Decimal>> {
        let chain = self.chain.as_ref();
        let token0 = call_contract(chain, pool.address, IUniswapV2Pair::token0Call {}).await?._0;
        let reserves = call_contract(chain, pool.address, IUniswapV2Pair::getReservesCall {}).await?;
        let reserve0: u128 = reserves.reserve0.to();
        let reserve1: u128 = reserves.reserve1.to();

        let (token_reserve, quote_reserve) = if token0 == token.address {
            (reserve0, reserve1)
        } else {
            (reserve1, reserve0)
        };
        let token_amount = to_decimal(U256::from(token_reserve), token.decimals);
        let quote_amount = to_decimal(U256::from(quote_reserve), quote_decimals);
        Ok(match (token_amount, quote_amount) {
            (Some(t), Some(q)) if !t.is_zero() => q.checked_div(t),
            _ => None,
        })
    }

    /// Quote-token amount per token from the V3 `slot0` square-root price.
    async fn v3_price(&self, token: &TokenConfig, pool: &DexPoolConfig, quote_decimals: u8) -> Result<Option<Decimal>> {
        let chain = self.chain.as_ref();
        let token0 = call_contract(chain, pool.address, IUniswapV3Pool::token0Call {}).await?._0;
        let slot0 = call_contract(chain, pool.address, IUniswapV3Pool::slot0Call {}).await?;
        let sqrt_price_x96 = U256::from(slot0.sqrtPriceX96);

        let token_is_token0 = token0 == token.address;
        let (decimals0, decimals1) = if token_is_token0 {
            (token.decimals, quote_decimals)
        } else {
            (quote_decimals, token.decimals)
        };

        // raw token1 per raw token0 = (sqrtPriceX96 / 2^96)^2
        let sqrt_scaled = (sqrt_price_x96 * pow10(18)) >> 96;
        let Some(sqrt) = to_decimal(sqrt_scaled, 18) else {
            return Ok(None);
        };
        let shift = pow10_decimal(i32::from(decimals0) - i32::from(decimals1))
            .ok_or_else(|| anyhow!("decimal gap too wide"))?;
        let Some(price0_in_1) = sqrt.checked_mul(sqrt).and_then(|p| p.checked_mul(shift)) else {
            return Ok(None);
        };
        if price0_in_1.is_zero() {
            return Ok(None);
        }

        Ok(if token_is_token0 {
            Some(price0_in_1)
        } else {
            Decimal::ONE.checked_div(price0_in_1)
        })
    }
}

#[async_trait]
impl PriceSource for DexPoolSource {
    fn kind(&self) -> PriceSourceKind {
        PriceSourceKind::DexPool
    }

    async fn price(&self, _token: Address, info: Option<&TokenConfig>) -> Result<Option<Decimal>> {
        let Some((token, pool)) = info.and_then(|t| t.dex_pool.as_ref().map(|p| (t, p))) else {
            return Ok(None);
        };
        if !self.registry.is_stablecoin(pool.quote_token) {
            return Err(anyhow!("pool quote token {} is not a known stablecoin", pool.quote_token));
        }
        let quote_decimals = self
            .registry
            .decimals(pool.quote_token)
            .ok_or_else(|| anyhow!("unknown quote token {}", pool.quote_token))?;

        match pool.kind {
            DexKind::UniswapV2 => self.v2_price(token, pool, quote_decimals).await,
            DexKind::UniswapV3 => self.v3_price(token, pool, quote_decimals).await,
        }
    }
}

/// Hardcoded conservative estimate from the token registry.
#[derive(Debug)]
pub struct FallbackSource;

#[async_trait]
impl PriceSource for FallbackSource {
    fn kind(&self) -> PriceSourceKind {
        PriceSourceKind::Fallback
    }

    async fn price(&self, _token: Address, info: Option<&TokenConfig>) -> Result<Option<Decimal>> {
        Ok(info.and_then(|t| t.fallback_price_usd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::tests::{registry, token, USDC, WETH};
    use alloy::primitives::aliases::{I256, U112, U160};
    use alloy::primitives::{Signed, Uint};
    use alloy::sol_types::SolCall;
    use liquidator_chain::testing::MockChainClient;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    const FEED: Address = Address::repeat_byte(0xfe);
    const POOL: Address = Address::repeat_byte(0xb0);

    fn weth_with_feed() -> TokenConfig {
        TokenConfig {
            chainlink_feed: Some(FEED),
            ..token("WETH", WETH, 18)
        }
    }

    fn weth_with_pool(kind: DexKind) -> TokenConfig {
        TokenConfig {
            dex_pool: Some(DexPoolConfig {
                address: POOL,
                kind,
                quote_token: USDC,
            }),
            ..token("WETH", WETH, 18)
        }
    }

    fn round_data(answer: i64) -> Vec<u8> {
        IAggregatorV3::latestRoundDataCall::abi_encode_returns(&(
            Uint::<80, 2>::from(1u64),
            I256::try_from(answer).unwrap(),
            U256::from(0u64),
            U256::from(1_700_000_000u64),
            Uint::<80, 2>::from(1u64),
        ))
    }

    #[tokio::test]
    async fn test_chainlink_scales_by_feed_decimals() {
        let chain = MockChainClient::new();
        chain.set_call_response(
            FEED,
            IAggregatorV3::latestRoundDataCall::SELECTOR,
            round_data(301_255_000_000),
        );
        chain.set_call_response(
            FEED,
            IAggregatorV3::decimalsCall::SELECTOR,
            IAggregatorV3::decimalsCall::abi_encode_returns(&(8u8,)),
        );
        let source = ChainlinkSource::new(Arc::new(chain));

        let price = source.price(WETH, Some(&weth_with_feed())).await.unwrap();
        assert_eq!(price, Some(dec("3012.55")));
    }

    #[tokio::test]
    async fn test_chainlink_ignores_non_positive_and_unregistered() {
        let chain = MockChainClient::new();
        chain.set_call_response(FEED, IAggregatorV3::latestRoundDataCall::SELECTOR, round_data(-5));
        let source = ChainlinkSource::new(Arc::new(chain));

        assert_eq!(source.price(WETH, Some(&weth_with_feed())).await.unwrap(), None);
        assert_eq!(source.price(WETH, Some(&token("WETH", WETH, 18))).await.unwrap(), None);
        assert_eq!(source.price(WETH, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_chainlink_rpc_failure_is_error() {
        let chain = MockChainClient::new();
        chain.set_fail_reads(true);
        let source = ChainlinkSource::new(Arc::new(chain));
        assert!(source.price(WETH, Some(&weth_with_feed())).await.is_err());
    }

    #[tokio::test]
    async fn test_v2_reserves_price() {
        let chain = MockChainClient::new();
        // token0 = USDC: 3,000,000 USDC against 1,000 WETH
        chain.set_call_response(
            POOL,
            IUniswapV2Pair::token0Call::SELECTOR,
            IUniswapV2Pair::token0Call::abi_encode_returns(&(USDC,)),
        );
        chain.set_call_response(
            POOL,
            IUniswapV2Pair::getReservesCall::SELECTOR,
            IUniswapV2Pair::getReservesCall::abi_encode_returns(&(
                U112::from(3_000_000_000_000u64),
                U112::from(1_000u128 * 10u128.pow(18)),
                0u32,
            )),
        );
        let source = DexPoolSource::new(Arc::new(chain), Arc::new(registry()));

        let price = source
            .price(WETH, Some(&weth_with_pool(DexKind::UniswapV2)))
            .await
            .unwrap();
        assert_eq!(price, Some(Decimal::from(3000)));
    }

    #[tokio::test]
    async fn test_v3_sqrt_price() {
        let chain = MockChainClient::new();
        // token0 = USDC (6), token1 = WETH (18) at 4000 USDC per WETH:
        // raw WETH per raw USDC = 1e12 / 4000 = 2.5e8, sqrt = 15811.38...
        // sqrtPriceX96 = 15811.388300841896 * 2^96
        let sqrt_price = U256::from(15_811_388_300_841_896u64) * (U256::from(1u64) << 96)
            / U256::from(10u64).pow(U256::from(12u64));
        chain.set_call_response(
            POOL,
            IUniswapV3Pool::token0Call::SELECTOR,
            IUniswapV3Pool::token0Call::abi_encode_returns(&(USDC,)),
        );
        chain.set_call_response(
            POOL,
            IUniswapV3Pool::slot0Call::SELECTOR,
            IUniswapV3Pool::slot0Call::abi_encode_returns(&(
                U160::from(sqrt_price),
                Signed::<24, 1>::try_from(-198_000i64).unwrap(),
                0u16,
                1u16,
                1u16,
                0u8,
                true,
            )),
        );
        let source = DexPoolSource::new(Arc::new(chain), Arc::new(registry()));

        let price = source
            .price(WETH, Some(&weth_with_pool(DexKind::UniswapV3)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(price.round_dp(2), Decimal::from(4000));
    }

    #[tokio::test]
    async fn test_pool_against_non_stablecoin_is_error() {
        let chain = MockChainClient::new();
        let source = DexPoolSource::new(Arc::new(chain), Arc::new(registry()));
        let mut token = weth_with_pool(DexKind::UniswapV2);
        if let Some(pool) = token.dex_pool.as_mut() {
            pool.quote_token = WETH;
        }
        assert!(source.price(WETH, Some(&token)).await.is_err());
    }

    #[tokio::test]
    async fn test_fallback_uses_registry_estimate() {
        let registry = registry();
        let weth = registry.get(WETH).cloned();
        assert_eq!(
            FallbackSource.price(WETH, weth.as_ref()).await.unwrap(),
            Some(Decimal::from(2000))
        );
        assert_eq!(FallbackSource.price(WETH, None).await.unwrap(), None);
    }
}
