//! Runtime knobs with profile support.
//!
//! Every field has a serde default so a deployment file only needs to name
//! the values it changes. Profiles (`default`, `testing`, `production`) are
//! selected with `BOT_PROFILE`.

use anyhow::ensure;
use liquidator_chain::gas::gwei_to_wei;
use liquidator_chain::{EventSourceConfig, GasOracleConfig};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure containing all bot parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    #[serde(default)]
    pub profitability: ProfitabilityConfig,

    #[serde(default)]
    pub gas: GasConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub balance: BalanceConfig,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Profit threshold and protocol fallbacks for liquidation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitabilityConfig {
    /// Minimum expected profit (USD) to execute
    #[serde(default = "default_min_profit")]
    pub min_profit_usd: Decimal,

    /// Fraction of total debt repayable in one liquidation
    #[serde(default = "default_close_factor")]
    pub default_close_factor: Decimal,

    /// Extra collateral awarded to the liquidator
    #[serde(default = "default_liquidation_bonus")]
    pub default_liquidation_bonus: Decimal,
}

fn default_min_profit() -> Decimal {
    Decimal::TEN
}
fn default_close_factor() -> Decimal {
    Decimal::new(5, 1)
}
fn default_liquidation_bonus() -> Decimal {
    Decimal::new(5, 2)
}

impl Default for ProfitabilityConfig {
    fn default() -> Self {
        Self {
            min_profit_usd: default_min_profit(),
            default_close_factor: default_close_factor(),
            default_liquidation_bonus: default_liquidation_bonus(),
        }
    }
}

/// Gas sampling and congestion detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasConfig {
    #[serde(default = "default_sample_interval")]
    pub sample_interval_ms: u64,

    /// Samples per comparison window
    #[serde(default = "default_congestion_window")]
    pub congestion_window: usize,

    /// Recent/previous mean ratio that signals congestion (15000 = 1.5x)
    #[serde(default = "default_congestion_ratio")]
    pub congestion_ratio_bps: u32,

    /// Boost applied while congested (2000 = +20%)
    #[serde(default = "default_congestion_boost")]
    pub congestion_boost_bps: u32,

    /// Hard ceiling on any recommended price
    #[serde(default = "default_max_gas_price")]
    pub max_gas_price_gwei: u64,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Price EIP-1559 transactions (false = legacy gas price)
    #[serde(default = "default_true")]
    pub eip1559: bool,

    #[serde(default = "default_priority_fee")]
    pub priority_fee_gwei: u64,
}

fn default_sample_interval() -> u64 {
    5_000
}
fn default_congestion_window() -> usize {
    10
}
fn default_congestion_ratio() -> u32 {
    15_000
}
fn default_congestion_boost() -> u32 {
    2_000
}
fn default_max_gas_price() -> u64 {
    500
}
fn default_history_capacity() -> usize {
    100
}
fn default_priority_fee() -> u64 {
    2
}
fn default_true() -> bool {
    true
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval(),
            congestion_window: default_congestion_window(),
            congestion_ratio_bps: default_congestion_ratio(),
            congestion_boost_bps: default_congestion_boost(),
            max_gas_price_gwei: default_max_gas_price(),
            history_capacity: default_history_capacity(),
            eip1559: default_true(),
            priority_fee_gwei: default_priority_fee(),
        }
    }
}

impl GasConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn oracle_config(&self) -> GasOracleConfig {
        GasOracleConfig {
            sample_interval: self.sample_interval(),
            congestion_window: self.congestion_window,
            congestion_ratio_bps: self.congestion_ratio_bps,
            congestion_boost_bps: self.congestion_boost_bps,
            max_gas_price: gwei_to_wei(self.max_gas_price_gwei),
            history_capacity: self.history_capacity,
        }
    }

    pub fn priority_fee_wei(&self) -> u128 {
        gwei_to_wei(self.priority_fee_gwei)
    }
}

/// Cache lifetimes. Each cache is owned by one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_position_ttl")]
    pub position_ttl_secs: u64,

    #[serde(default = "default_price_ttl")]
    pub price_ttl_secs: u64,

    #[serde(default = "default_balance_ttl")]
    pub balance_ttl_secs: u64,

    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_position_ttl() -> u64 {
    30
}
fn default_price_ttl() -> u64 {
    300
}
fn default_balance_ttl() -> u64 {
    30
}
fn default_max_entries() -> usize {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            position_ttl_secs: default_position_ttl(),
            price_ttl_secs: default_price_ttl(),
            balance_ttl_secs: default_balance_ttl(),
            max_entries: default_max_entries(),
        }
    }
}

impl CacheConfig {
    pub fn position_ttl(&self) -> Duration {
        Duration::from_secs(self.position_ttl_secs)
    }
    pub fn price_ttl(&self) -> Duration {
        Duration::from_secs(self.price_ttl_secs)
    }
    pub fn balance_ttl(&self) -> Duration {
        Duration::from_secs(self.balance_ttl_secs)
    }
}

/// Event subscription and reconnection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_max_reconnect")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_liveness_interval")]
    pub liveness_interval_secs: u64,

    /// Bounded queue between event source and orchestrator
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_max_reconnect() -> u32 {
    5
}
fn default_reconnect_delay() -> u64 {
    5_000
}
fn default_liveness_interval() -> u64 {
    120
}
fn default_queue_capacity() -> usize {
    1_024
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: default_max_reconnect(),
            reconnect_delay_ms: default_reconnect_delay(),
            liveness_interval_secs: default_liveness_interval(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl EventsConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs)
    }

    pub fn source_config(&self) -> EventSourceConfig {
        EventSourceConfig {
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_delay: self.reconnect_delay(),
            liveness_interval: self.liveness_interval(),
            queue_capacity: self.queue_capacity,
        }
    }
}

/// Transaction submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// End-to-end execution target; misses are logged, not enforced
    #[serde(default = "default_sla")]
    pub sla_ms: u64,

    #[serde(default = "default_nonce_refresh")]
    pub nonce_refresh_secs: u64,

    #[serde(default = "default_receipt_timeout")]
    pub receipt_timeout_secs: u64,
}

fn default_sla() -> u64 {
    200
}
fn default_nonce_refresh() -> u64 {
    30
}
fn default_receipt_timeout() -> u64 {
    120
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            sla_ms: default_sla(),
            nonce_refresh_secs: default_nonce_refresh(),
            receipt_timeout_secs: default_receipt_timeout(),
        }
    }
}

impl ExecutionConfig {
    pub fn sla(&self) -> Duration {
        Duration::from_millis(self.sla_ms)
    }
    pub fn nonce_refresh(&self) -> Duration {
        Duration::from_secs(self.nonce_refresh_secs)
    }
    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }
}

/// Wallet balance gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceConfig {
    /// Skip the balance gate entirely when false
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Fraction of each debt asset that makes a bulk check useful
    #[serde(default = "default_min_useful_fraction")]
    pub min_useful_fraction: Decimal,

    /// Append a flash-loan hint to insufficient-balance rejections
    #[serde(default)]
    pub suggest_flash_loans: bool,
}

fn default_min_useful_fraction() -> Decimal {
    Decimal::new(1, 1)
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            min_useful_fraction: default_min_useful_fraction(),
            suggest_flash_loans: false,
        }
    }
}

/// Reject ratios outside (0, 1].
pub(crate) fn check_fraction(field: &str, value: Decimal) -> anyhow::Result<()> {
    ensure!(
        value > Decimal::ZERO && value <= Decimal::ONE,
        "{field} must be in (0, 1], got {value}"
    );
    Ok(())
}

/// Reject bonuses outside [0, 1).
pub(crate) fn check_bonus(field: &str, value: Decimal) -> anyhow::Result<()> {
    ensure!(
        value >= Decimal::ZERO && value < Decimal::ONE,
        "{field} must be in [0, 1), got {value}"
    );
    Ok(())
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            profitability: ProfitabilityConfig::default(),
            gas: GasConfig::default(),
            cache: CacheConfig::default(),
            events: EventsConfig::default(),
            execution: ExecutionConfig::default(),
            balance: BalanceConfig::default(),
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Range-check the ratios that feed liquidation sizing.
    pub fn validate(&self) -> anyhow::Result<()> {
        check_fraction(
            "profitability.default_close_factor",
            self.profitability.default_close_factor,
        )?;
        check_bonus(
            "profitability.default_liquidation_bonus",
            self.profitability.default_liquidation_bonus,
        )?;
        check_fraction("balance.min_useful_fraction", self.balance.min_useful_fraction)?;
        Ok(())
    }

    /// Testing profile: no profit floor, short caches, fast sampling.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            profitability: ProfitabilityConfig {
                min_profit_usd: Decimal::ZERO,
                ..Default::default()
            },
            gas: GasConfig {
                sample_interval_ms: 1_000,
                max_gas_price_gwei: 100,
                ..Default::default()
            },
            cache: CacheConfig {
                position_ttl_secs: 5,
                price_ttl_secs: 30,
                balance_ttl_secs: 5,
                max_entries: 1_000,
            },
            events: EventsConfig {
                reconnect_delay_ms: 1_000,
                liveness_interval_secs: 30,
                ..Default::default()
            },
            execution: ExecutionConfig {
                sla_ms: 500,
                nonce_refresh_secs: 10,
                receipt_timeout_secs: 60,
            },
            balance: BalanceConfig {
                suggest_flash_loans: true,
                ..Default::default()
            },
        }
    }

    /// Production profile: higher profit floor, tighter gas ceiling.
    pub fn production() -> Self {
        Self {
            profile: "production".to_string(),
            profitability: ProfitabilityConfig {
                min_profit_usd: Decimal::from(25),
                ..Default::default()
            },
            gas: GasConfig {
                max_gas_price_gwei: 300,
                ..Default::default()
            },
            cache: CacheConfig::default(),
            events: EventsConfig::default(),
            execution: ExecutionConfig::default(),
            balance: BalanceConfig::default(),
        }
    }

    /// Get profile from environment variable BOT_PROFILE, or default.
    /// Supported values: testing, production
    pub fn from_env() -> Self {
        let profile = std::env::var("BOT_PROFILE").unwrap_or_else(|_| "default".to_string());
        Self::from_profile(&profile)
    }

    pub fn from_profile(profile: &str) -> Self {
        match profile.to_lowercase().as_str() {
            "testing" | "test" => Self::testing(),
            "production" | "prod" => Self::production(),
            _ => Self::default(),
        }
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Bot configuration loaded");
        tracing::info!(
            min_profit_usd = %self.profitability.min_profit_usd,
            close_factor = %self.profitability.default_close_factor,
            liquidation_bonus = %self.profitability.default_liquidation_bonus,
            "Profitability"
        );
        tracing::info!(
            eip1559 = self.gas.eip1559,
            sample_interval_ms = self.gas.sample_interval_ms,
            max_gas_price_gwei = self.gas.max_gas_price_gwei,
            congestion_ratio_bps = self.gas.congestion_ratio_bps,
            congestion_boost_bps = self.gas.congestion_boost_bps,
            "Gas"
        );
        tracing::info!(
            position_ttl_secs = self.cache.position_ttl_secs,
            price_ttl_secs = self.cache.price_ttl_secs,
            balance_ttl_secs = self.cache.balance_ttl_secs,
            "Cache TTLs"
        );
        tracing::info!(
            max_reconnect_attempts = self.events.max_reconnect_attempts,
            reconnect_delay_ms = self.events.reconnect_delay_ms,
            queue_capacity = self.events.queue_capacity,
            sla_ms = self.execution.sla_ms,
            "Events and execution"
        );
        if !self.balance.enabled {
            tracing::warn!("Wallet balance check DISABLED: liquidations may revert for lack of funds");
        }
    }
}
