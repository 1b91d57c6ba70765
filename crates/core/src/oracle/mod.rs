//! USD price discovery with an ordered fallback chain.
//!
//! Resolution order, first success wins:
//!
//! 1. Stablecoin short-circuit (exactly 1, never cached)
//! 2. Chainlink feed registered for the token
//! 3. External aggregator APIs
//! 4. Uniswap pool price against a stablecoin
//! 5. Hardcoded conservative estimate
//!
//! A source that errors or has no data simply hands over to the next one.
//! Successful prices are cached per token for a fixed TTL.

mod sources;

pub use sources::{AggregatorSource, ChainlinkSource, DexPoolSource, FallbackSource};

use crate::cache::TtlCache;
use crate::config::TokenConfig;
use crate::tokens::TokenRegistry;
use alloy::primitives::Address;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use liquidator_api::PriceApi;
use liquidator_chain::ChainClient;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Where a price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriceSourceKind {
    Stablecoin,
    Chainlink,
    Aggregator,
    DexPool,
    Fallback,
}

impl fmt::Display for PriceSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stablecoin => "stablecoin",
            Self::Chainlink => "chainlink",
            Self::Aggregator => "aggregator",
            Self::DexPool => "dex-pool",
            Self::Fallback => "fallback",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceQuote {
    pub token: Address,
    pub price_usd: Decimal,
    pub source: PriceSourceKind,
    pub fetched_at: DateTime<Utc>,
}

/// One link in the fallback chain.
#[async_trait]
pub trait PriceSource: Send + Sync + fmt::Debug {
    fn kind(&self) -> PriceSourceKind;

    /// `Ok(None)` and `Err` both mean "no price here, try the next source".
    /// `info` is `None` for tokens missing from the registry.
    async fn price(&self, token: Address, info: Option<&TokenConfig>) -> Result<Option<Decimal>>;
}

/// Liveness summary for the status boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleHealth {
    pub healthy: bool,
    pub last_price: Option<Decimal>,
    pub cache_size: usize,
}

#[derive(Debug)]
pub struct PriceOracle {
    registry: Arc<TokenRegistry>,
    sources: Vec<Box<dyn PriceSource>>,
    cache: TtlCache<Address, PriceQuote>,
    last_health_price: Mutex<Option<Decimal>>,
}

impl PriceOracle {
    /// Plausible USD range for the health check's reference token.
    const HEALTH_MIN: Decimal = Decimal::ONE;
    const HEALTH_MAX: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

    pub fn new(
        registry: Arc<TokenRegistry>,
        sources: Vec<Box<dyn PriceSource>>,
        ttl: Duration,
        max_entries: usize,
    ) -> Self {
        Self {
            registry,
            sources,
            cache: TtlCache::new(ttl, max_entries),
            last_health_price: Mutex::new(None),
        }
    }

    /// Oracle with the full source chain: Chainlink, aggregators, DEX pools, fallback.
    pub fn with_default_sources(
        chain: Arc<dyn ChainClient>,
        registry: Arc<TokenRegistry>,
        apis: Vec<Arc<dyn PriceApi>>,
        ttl: Duration,
        max_entries: usize,
    ) -> Self {
        let sources: Vec<Box<dyn PriceSource>> = vec![
            Box::new(ChainlinkSource::new(chain.clone())),
            Box::new(AggregatorSource::new(apis)),
            Box::new(DexPoolSource::new(chain, registry.clone())),
            Box::new(FallbackSource),
        ];
        Self::new(registry, sources, ttl, max_entries)
    }

    pub fn registry(&self) -> &TokenRegistry {
        &self.registry
    }

    /// Resolve a USD price for `token`, or `None` if every source came up empty.
    #[instrument(skip(self), fields(token = %token))]
    pub async fn price(&self, token: Address) -> Option<PriceQuote> {
        let info = self.registry.get(token);

        if info.is_some_and(|t| t.stablecoin) {
            return Some(PriceQuote {
                token,
                price_usd: Decimal::ONE,
                source: PriceSourceKind::Stablecoin,
                fetched_at: Utc::now(),
            });
        }

        if let Some(cached) = self.cache.get(&token) {
            return Some(cached);
        }

        for source in &self.sources {
            match source.price(token, info).await {
                Ok(Some(price)) if price > Decimal::ZERO => {
                    let quote = PriceQuote {
                        token,
                        price_usd: price,
                        source: source.kind(),
                        fetched_at: Utc::now(),
                    };
                    debug!(price = %price, source = %quote.source, "Price resolved");
                    self.cache.set(token, quote.clone());
                    return Some(quote);
                }
                Ok(_) => debug!(source = %source.kind(), "No price from source"),
                Err(e) => debug!(source = %source.kind(), error = %e, "Price source failed"),
            }
        }

        warn!(
            token = %token,
            symbol = %self.registry.symbol(token),
            "No price available from any source"
        );
        None
    }

    /// price(token) × amount.
    pub async fn calculate_usd_value(&self, token: Address, amount: Decimal) -> Option<Decimal> {
        let quote = self.price(token).await?;
        quote.price_usd.checked_mul(amount)
    }

    /// Price the wrapped native token and check it is plausible.
    pub async fn health_check(&self) -> OracleHealth {
        let price = self
            .price(self.registry.wrapped_native())
            .await
            .map(|q| q.price_usd);
        let healthy = price.is_some_and(|p| (Self::HEALTH_MIN..=Self::HEALTH_MAX).contains(&p));
        if price.is_some() {
            *self.last_health_price.lock() = price;
        }
        OracleHealth {
            healthy,
            last_price: *self.last_health_price.lock(),
            cache_size: self.cache.len(),
        }
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }
}
