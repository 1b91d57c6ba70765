//! Configuration for the liquidation engine.
//!
//! This module provides:
//! - Bot runtime configuration (profiles, thresholds, timing, cache TTLs)
//! - Deployment configuration (chain, signer, token registry, price APIs,
//!   protocol markets)
//!
//! Both are read once at startup and passed explicitly to each component.

mod bot;
mod deployment;

pub use bot::{
    BalanceConfig, BotConfig, CacheConfig, EventsConfig, ExecutionConfig, GasConfig,
    ProfitabilityConfig,
};

pub use deployment::{
    expand_env, AaveV3Config, CTokenMarket, ChainConfig, CometCollateral, CompoundV2Config,
    CompoundV3Config, DeploymentConfig, DexKind, DexPoolConfig, ProtocolParams, ProtocolsConfig,
    TokenConfig,
};
