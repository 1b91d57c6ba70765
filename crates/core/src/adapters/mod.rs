//! Protocol adapters: position reads and liquidation payloads.
//!
//! Each supported protocol family has one adapter behind the
//! [`LendingProtocol`] capability trait. [`ProtocolAdapters`] owns the
//! enabled adapters, selects one by matching on [`ProtocolKind`] and caches
//! snapshots per (debtor, protocol).

mod aave_v3;
mod compound_v2;
mod compound_v3;

pub use aave_v3::AaveV3Adapter;
pub use compound_v2::CompoundV2Adapter;
pub use compound_v3::CompoundV3Adapter;

use crate::cache::TtlCache;
use crate::config::ProtocolsConfig;
use crate::oracle::PriceOracle;
use crate::position::{AssetPosition, PositionSnapshot};
use crate::profitability::LiquidationParameters;
use crate::units::to_decimal;
use alloy::primitives::{Address, U256};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use liquidator_chain::contracts::IERC20;
use liquidator_chain::{call_contract, ChainClient, ProtocolKind, TxPayload};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Payload construction failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("invalid {role} address {address}")]
    InvalidAddress { role: &'static str, address: Address },

    #[error("no configured market for asset {0}")]
    UnknownMarket(Address),

    #[error("cannot encode liquidation: {0}")]
    Encoding(String),

    #[error("protocol {0} is not enabled")]
    Disabled(ProtocolKind),
}

/// Capability shared by every protocol family.
#[async_trait]
pub trait LendingProtocol: Send + Sync + Debug {
    fn kind(&self) -> ProtocolKind;

    /// Read and value the debtor's position.
    ///
    /// `None` means the position as a whole could not be read; individual
    /// asset failures only drop that asset.
    async fn fetch_position(&self, user: Address) -> Option<PositionSnapshot>;

    /// Encode the liquidation call for `params`.
    fn build_transaction(
        &self,
        params: &LiquidationParameters,
        liquidator: Address,
    ) -> Result<TxPayload, AdapterError>;

    /// Gas units budgeted for one liquidation.
    fn gas_budget(&self) -> u64;

    /// Whether the liquidator repays debt out of its own wallet and is paid
    /// in seized collateral. When false the call settles inside the protocol
    /// and neither the balance gate nor the seize model applies.
    fn repays_from_wallet(&self) -> bool {
        true
    }
}

/// Converts raw balances into valued asset positions.
#[derive(Debug)]
pub struct AssetValuer {
    chain: Arc<dyn ChainClient>,
    oracle: Arc<PriceOracle>,
    /// Decimals read on-chain for tokens missing from the registry
    onchain_decimals: DashMap<Address, u8>,
}

impl AssetValuer {
    pub fn new(chain: Arc<dyn ChainClient>, oracle: Arc<PriceOracle>) -> Self {
        Self {
            chain,
            oracle,
            onchain_decimals: DashMap::new(),
        }
    }

    pub fn chain(&self) -> &dyn ChainClient {
        self.chain.as_ref()
    }

    async fn decimals(&self, token: Address) -> Result<u8> {
        if let Some(d) = self.oracle.registry().decimals(token) {
            return Ok(d);
        }
        if let Some(d) = self.onchain_decimals.get(&token) {
            return Ok(*d);
        }
        let d = call_contract(self.chain.as_ref(), token, IERC20::decimalsCall {})
            .await?
            ._0;
        self.onchain_decimals.insert(token, d);
        Ok(d)
    }

    /// Value a raw balance. Zero balances and unpriceable assets yield `None`.
    pub async fn value(&self, token: Address, raw: U256) -> Option<AssetPosition> {
        if raw.is_zero() {
            return None;
        }
        let symbol = self.oracle.registry().symbol(token);
        let result: Result<AssetPosition> = async {
            let decimals = self.decimals(token).await?;
            let amount = to_decimal(raw, decimals).ok_or_else(|| anyhow!("balance out of range"))?;
            let quote = self
                .oracle
                .price(token)
                .await
                .ok_or_else(|| anyhow!("no price"))?;
            let value_usd = quote
                .price_usd
                .checked_mul(amount)
                .ok_or_else(|| anyhow!("value overflow"))?;
            Ok(AssetPosition {
                address: token,
                symbol: symbol.clone(),
                decimals,
                amount,
                value_usd,
            })
        }
        .await;

        match result {
            Ok(asset) => Some(asset),
            Err(e) => {
                warn!(token = %token, symbol = %symbol, error = %e, "Omitting asset from position");
                None
            }
        }
    }
}

/// Enabled adapters plus the position cache.
#[derive(Debug)]
pub struct ProtocolAdapters {
    aave_v3: Option<Arc<AaveV3Adapter>>,
    compound_v3: Option<Arc<CompoundV3Adapter>>,
    compound_v2: Option<Arc<CompoundV2Adapter>>,
    positions: TtlCache<(Address, ProtocolKind), PositionSnapshot>,
}

impl ProtocolAdapters {
    pub fn new(position_ttl: Duration, max_entries: usize) -> Self {
        Self {
            aave_v3: None,
            compound_v3: None,
            compound_v2: None,
            positions: TtlCache::new(position_ttl, max_entries),
        }
    }

    /// Build an adapter for every enabled protocol section.
    pub fn from_config(
        config: &ProtocolsConfig,
        valuer: Arc<AssetValuer>,
        position_ttl: Duration,
        max_entries: usize,
    ) -> Self {
        let mut adapters = Self::new(position_ttl, max_entries);
        if let Some(aave) = config.aave_v3.as_ref().filter(|p| p.enabled) {
            adapters.aave_v3 = Some(Arc::new(AaveV3Adapter::new(aave.clone(), valuer.clone())));
        }
        if let Some(comet) = config.compound_v3.as_ref().filter(|p| p.enabled) {
            adapters.compound_v3 = Some(Arc::new(CompoundV3Adapter::new(comet.clone(), valuer.clone())));
        }
        if let Some(v2) = config.compound_v2.as_ref().filter(|p| p.enabled) {
            adapters.compound_v2 = Some(Arc::new(CompoundV2Adapter::new(v2.clone(), valuer)));
        }
        adapters
    }

    pub fn get(&self, kind: ProtocolKind) -> Option<&dyn LendingProtocol> {
        match kind {
            ProtocolKind::AaveV3 => self.aave_v3.as_deref().map(|a| a as &dyn LendingProtocol),
            ProtocolKind::CompoundV3 => self.compound_v3.as_deref().map(|a| a as &dyn LendingProtocol),
            ProtocolKind::CompoundV2 => self.compound_v2.as_deref().map(|a| a as &dyn LendingProtocol),
        }
    }

    pub fn enabled(&self) -> Vec<ProtocolKind> {
        ProtocolKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).is_some())
            .collect()
    }

    /// Snapshot from cache, or freshly fetched and cached.
    pub async fn fetch_position(&self, kind: ProtocolKind, user: Address) -> Option<PositionSnapshot> {
        if let Some(snapshot) = self.positions.get(&(user, kind)) {
            debug!(user = %user, protocol = %kind, "Position cache hit");
            return Some(snapshot);
        }
        let snapshot = self.get(kind)?.fetch_position(user).await?;
        self.positions.set((user, kind), snapshot.clone());
        Some(snapshot)
    }

    /// Drop a cached snapshot, e.g. after liquidating it.
    pub fn invalidate(&self, kind: ProtocolKind, user: Address) {
        self.positions.evict(&(user, kind));
    }

    pub fn cached_positions(&self) -> usize {
        self.positions.len()
    }
}
