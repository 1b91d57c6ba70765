//! Liquidator core logic.
//!
//! This crate provides the liquidation decision and execution engine:
//! - Deployment and bot configuration (profiles, TTLs, thresholds)
//! - A token registry and a multi-source USD price oracle
//! - Per-protocol position adapters (Aave V3, Compound V3, Compound V2)
//! - Liquidation parameter and profit calculation
//! - Wallet balance feasibility checks
//! - Opportunity validation, transaction execution and orchestration
//!
//! Components are constructed once at startup and shared behind `Arc`.

pub mod adapters;
pub mod balance;
mod cache;
pub mod config;
pub mod executor;
mod metrics;
pub mod oracle;
pub mod orchestrator;
mod position;
pub mod profitability;
mod tokens;
pub mod units;
pub mod validator;

pub use adapters::{AdapterError, AssetValuer, LendingProtocol, ProtocolAdapters};
pub use balance::{BalanceCheckResult, BalanceKind, BalanceValidator};
pub use cache::TtlCache;
pub use config::{BotConfig, DeploymentConfig, ProtocolParams, ProtocolsConfig};
pub use executor::{ExecutionError, ExecutionReceipt, TransactionExecutor};
pub use metrics::{LiquidationMetrics, MetricsSummary};
pub use oracle::{OracleHealth, PriceOracle, PriceQuote, PriceSource, PriceSourceKind};
pub use orchestrator::{LiquidationHandler, LiquidationPipeline, Orchestrator, StatusReport};
pub use position::{
    compute_health_factor, AssetPosition, CollateralAsset, DebtAsset, PositionSnapshot,
    HEALTH_FACTOR_SENTINEL,
};
pub use profitability::{LiquidationParameters, ProfitEstimate};
pub use tokens::{TokenRegistry, NATIVE_TOKEN};
pub use validator::{OpportunityValidator, RejectReason, ValidatedOpportunity, ValidationResult};
