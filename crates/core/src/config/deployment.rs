//! Deployment configuration: what to connect to and which markets to watch.
//!
//! Loaded once from a TOML file. `${VAR}` placeholders anywhere in the file
//! are replaced with environment variables before parsing.

use super::bot::{check_bonus, check_fraction, BotConfig, ProfitabilityConfig};
use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use liquidator_api::PriceApiConfig;
use liquidator_chain::{ProtocolKind, ProtocolSubscription};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Full deployment configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    pub chain: ChainConfig,

    /// Token registry used for pricing and symbol lookup
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,

    /// External price APIs, queried in order
    #[serde(default)]
    pub price_apis: Vec<PriceApiConfig>,

    #[serde(default)]
    pub protocols: ProtocolsConfig,

    /// Bot configuration overrides (otherwise chosen by `BOT_PROFILE`)
    #[serde(default)]
    pub bot: Option<BotConfig>,
}

/// Chain connection and signer.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    #[serde(default = "default_chain_name")]
    pub name: String,
    pub http_url: String,
    pub ws_url: String,
    /// Separate endpoint for transaction broadcast
    #[serde(default)]
    pub send_url: Option<String>,
    pub private_key: String,
    /// Wrapped native token, also the reference token for oracle health
    pub wrapped_native: Address,
    #[serde(default = "default_native_symbol")]
    pub native_symbol: String,
}

fn default_chain_name() -> String {
    "ethereum".to_string()
}
fn default_native_symbol() -> String {
    "ETH".to_string()
}

/// One entry of the token registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenConfig {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
    #[serde(default)]
    pub stablecoin: bool,
    /// Chainlink USD feed
    #[serde(default)]
    pub chainlink_feed: Option<Address>,
    #[serde(default)]
    pub dex_pool: Option<DexPoolConfig>,
    /// Conservative last-resort price
    #[serde(default)]
    pub fallback_price_usd: Option<Decimal>,
}

/// Liquidity pool quoting a token against a stablecoin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DexPoolConfig {
    pub address: Address,
    pub kind: DexKind,
    /// Stablecoin on the other side of the pool
    pub quote_token: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DexKind {
    UniswapV2,
    UniswapV3,
}

/// Per-protocol sections; a missing section means the protocol is unused.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProtocolsConfig {
    #[serde(default)]
    pub aave_v3: Option<AaveV3Config>,
    #[serde(default)]
    pub compound_v3: Option<CompoundV3Config>,
    #[serde(default)]
    pub compound_v2: Option<CompoundV2Config>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AaveV3Config {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub pool: Address,
    pub data_provider: Address,
    /// Reserves read for every position
    pub reserves: Vec<Address>,
    #[serde(default)]
    pub close_factor: Option<Decimal>,
    #[serde(default)]
    pub liquidation_bonus: Option<Decimal>,
    /// Profit floor for this protocol; may be negative
    #[serde(default)]
    pub min_profit_usd: Option<Decimal>,
    #[serde(default = "default_aave_gas_budget")]
    pub gas_budget: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompoundV3Config {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub comet: Address,
    pub base_asset: Address,
    #[serde(default)]
    pub collateral: Vec<CometCollateral>,
    #[serde(default)]
    pub close_factor: Option<Decimal>,
    #[serde(default)]
    pub liquidation_bonus: Option<Decimal>,
    /// Profit floor for this protocol; may be negative
    #[serde(default)]
    pub min_profit_usd: Option<Decimal>,
    #[serde(default = "default_comet_gas_budget")]
    pub gas_budget: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CometCollateral {
    pub asset: Address,
    pub liquidation_factor: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompoundV2Config {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub markets: Vec<CTokenMarket>,
    #[serde(default)]
    pub close_factor: Option<Decimal>,
    #[serde(default)]
    pub liquidation_bonus: Option<Decimal>,
    /// Profit floor for this protocol; may be negative
    #[serde(default)]
    pub min_profit_usd: Option<Decimal>,
    #[serde(default = "default_ctoken_gas_budget")]
    pub gas_budget: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CTokenMarket {
    pub ctoken: Address,
    pub underlying: Address,
    pub collateral_factor: Decimal,
}

fn default_enabled() -> bool {
    true
}
fn default_aave_gas_budget() -> u64 {
    800_000
}
fn default_comet_gas_budget() -> u64 {
    500_000
}
fn default_ctoken_gas_budget() -> u64 {
    600_000
}

/// Resolved liquidation parameters for one protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolParams {
    pub close_factor: Decimal,
    pub liquidation_bonus: Decimal,
    pub min_profit_usd: Decimal,
    pub gas_budget: u64,
}

impl ProtocolsConfig {
    pub fn enabled_kinds(&self) -> Vec<ProtocolKind> {
        let mut kinds = Vec::new();
        if self.aave_v3.as_ref().is_some_and(|p| p.enabled) {
            kinds.push(ProtocolKind::AaveV3);
        }
        if self.compound_v3.as_ref().is_some_and(|p| p.enabled) {
            kinds.push(ProtocolKind::CompoundV3);
        }
        if self.compound_v2.as_ref().is_some_and(|p| p.enabled) {
            kinds.push(ProtocolKind::CompoundV2);
        }
        kinds
    }

    /// Close factor, bonus, profit floor and gas budget, falling back to bot defaults.
    pub fn params(&self, kind: ProtocolKind, defaults: &ProfitabilityConfig) -> Option<ProtocolParams> {
        let (close_factor, bonus, min_profit, gas_budget) = match kind {
            ProtocolKind::AaveV3 => {
                let p = self.aave_v3.as_ref().filter(|p| p.enabled)?;
                (p.close_factor, p.liquidation_bonus, p.min_profit_usd, p.gas_budget)
            }
            ProtocolKind::CompoundV3 => {
                let p = self.compound_v3.as_ref().filter(|p| p.enabled)?;
                (p.close_factor, p.liquidation_bonus, p.min_profit_usd, p.gas_budget)
            }
            ProtocolKind::CompoundV2 => {
                let p = self.compound_v2.as_ref().filter(|p| p.enabled)?;
                (p.close_factor, p.liquidation_bonus, p.min_profit_usd, p.gas_budget)
            }
        };
        Some(ProtocolParams {
            close_factor: close_factor.unwrap_or(defaults.default_close_factor),
            liquidation_bonus: bonus.unwrap_or(defaults.default_liquidation_bonus),
            min_profit_usd: min_profit.unwrap_or(defaults.min_profit_usd),
            gas_budget,
        })
    }

    /// Range-check every configured ratio, enabled or not.
    pub fn validate(&self) -> Result<()> {
        if let Some(aave) = &self.aave_v3 {
            check_overrides("protocols.aave_v3", aave.close_factor, aave.liquidation_bonus)?;
        }
        if let Some(comet) = &self.compound_v3 {
            check_overrides("protocols.compound_v3", comet.close_factor, comet.liquidation_bonus)?;
            for c in &comet.collateral {
                check_fraction(
                    &format!("protocols.compound_v3 liquidation_factor of {}", c.asset),
                    c.liquidation_factor,
                )?;
            }
        }
        if let Some(v2) = &self.compound_v2 {
            check_overrides("protocols.compound_v2", v2.close_factor, v2.liquidation_bonus)?;
            for m in &v2.markets {
                check_fraction(
                    &format!("protocols.compound_v2 collateral_factor of {}", m.ctoken),
                    m.collateral_factor,
                )?;
            }
        }
        Ok(())
    }

    /// Event subscriptions for every enabled protocol.
    pub fn subscriptions(&self) -> Vec<ProtocolSubscription> {
        let mut subs = Vec::new();
        if let Some(aave) = self.aave_v3.as_ref().filter(|p| p.enabled) {
            subs.push(ProtocolSubscription::aave_v3(aave.pool));
        }
        if let Some(comet) = self.compound_v3.as_ref().filter(|p| p.enabled) {
            subs.push(ProtocolSubscription::compound_v3(comet.comet, comet.base_asset));
        }
        if let Some(v2) = self.compound_v2.as_ref().filter(|p| p.enabled) {
            subs.push(ProtocolSubscription::compound_v2(
                v2.markets.iter().map(|m| (m.ctoken, m.underlying)),
            ));
        }
        subs
    }
}

impl DeploymentConfig {
    /// Load deployment config from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading deployment file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("loading {}", path.display()))
    }

    /// Parse and validate TOML content after env expansion.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env(content)?;
        let config: Self = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Bot config from the file, or from `BOT_PROFILE` when absent.
    pub fn bot_config(&self) -> BotConfig {
        self.bot.clone().unwrap_or_else(BotConfig::from_env)
    }

    pub fn token(&self, address: Address) -> Option<&TokenConfig> {
        self.tokens.iter().find(|t| t.address == address)
    }

    fn validate(&self) -> Result<()> {
        if self.chain.chain_id == 0 {
            bail!("chain.chain_id must be non-zero");
        }
        for (field, value) in [
            ("chain.http_url", &self.chain.http_url),
            ("chain.ws_url", &self.chain.ws_url),
            ("chain.private_key", &self.chain.private_key),
        ] {
            if value.trim().is_empty() || value.contains("${") {
                bail!("{} is empty or references an unset environment variable", field);
            }
        }
        if self.protocols.enabled_kinds().is_empty() {
            bail!("no protocol is enabled");
        }
        self.protocols.validate()?;
        if let Some(bot) = &self.bot {
            bot.validate().context("invalid [bot] section")?;
        }

        let mut seen = HashSet::new();
        for token in &self.tokens {
            if !seen.insert(token.address) {
                bail!("token {} ({}) is listed twice", token.symbol, token.address);
            }
        }
        Ok(())
    }
}

fn check_overrides(section: &str, close_factor: Option<Decimal>, bonus: Option<Decimal>) -> Result<()> {
    if let Some(value) = close_factor {
        check_fraction(&format!("{section}.close_factor"), value)?;
    }
    if let Some(value) = bonus {
        check_bonus(&format!("{section}.liquidation_bonus"), value)?;
    }
    Ok(())
}

/// Expand `${VAR_NAME}` patterns with environment variable values.
///
/// Unset variables are left in place so validation can name them.
pub fn expand_env(s: &str) -> Result<String> {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")?;
    let mut result = s.to_string();

    for cap in re.captures_iter(s) {
        if let (Some(full_match), Some(var_match)) = (cap.get(0), cap.get(1)) {
            if let Ok(value) = std::env::var(var_match.as_str()) {
                result = result.replace(full_match.as_str(), &value);
            }
        }
    }

    Ok(result)
}
