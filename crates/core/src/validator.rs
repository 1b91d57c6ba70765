//! Opportunity validation.
//!
//! Turns a [`LiquidationEvent`] into either a fully parameterized
//! liquidation plan or a rejection reason. Gates run in order: position
//! fetch, health factor, sizing, wallet balance, gas, profit.
//!
//! Protocols whose liquidation settles on the protocol's own books (Comet
//! `absorb`) skip the wallet gate and are priced at zero minus gas.

use crate::adapters::ProtocolAdapters;
use crate::balance::{BalanceCheckResult, BalanceValidator};
use crate::config::{BalanceConfig, BotConfig, ProtocolParams, ProtocolsConfig};
use crate::oracle::PriceOracle;
use crate::position::PositionSnapshot;
use crate::profitability::{compute_parameters, gas_cost_usd, LiquidationParameters, ProfitEstimate};
use liquidator_chain::{GasOracle, GasQuote, LiquidationEvent, ProtocolKind};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Why an opportunity was not pursued. These are expected outcomes.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RejectReason {
    #[error("protocol {0} is not enabled")]
    UnsupportedProtocol(ProtocolKind),

    #[error("could not fetch position data")]
    PositionUnavailable,

    #[error("health factor {0} is not below 1")]
    HealthFactorTooHigh(Decimal),

    #[error("position has no collateral")]
    NoCollateral,

    #[error("position has no debt")]
    NoDebt,

    #[error("{0}")]
    InsufficientBalance(String),

    #[error("expected profit ${profit:.2} is below minimum ${minimum:.2}")]
    InsufficientProfit { profit: Decimal, minimum: Decimal },

    #[error("no price for {0}")]
    PriceUnavailable(String),

    #[error("gas price unavailable: {0}")]
    GasUnavailable(String),
}

impl RejectReason {
    pub fn category(&self) -> &'static str {
        match self {
            RejectReason::UnsupportedProtocol(_) => "unsupported_protocol",
            RejectReason::PositionUnavailable => "position_unavailable",
            RejectReason::HealthFactorTooHigh(_) => "health_factor",
            RejectReason::NoCollateral => "no_collateral",
            RejectReason::NoDebt => "no_debt",
            RejectReason::InsufficientBalance(_) => "insufficient_balance",
            RejectReason::InsufficientProfit { .. } => "insufficient_profit",
            RejectReason::PriceUnavailable(_) => "price_unavailable",
            RejectReason::GasUnavailable(_) => "gas_unavailable",
        }
    }
}

/// Everything the executor needs to submit a liquidation.
#[derive(Debug, Clone)]
pub struct ValidatedOpportunity {
    pub event: LiquidationEvent,
    pub snapshot: PositionSnapshot,
    pub parameters: LiquidationParameters,
    pub profit: ProfitEstimate,
    pub gas: GasQuote,
    /// `None` when balance checks are disabled or the protocol does not
    /// draw on the wallet
    pub balance: Option<BalanceCheckResult>,
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub outcome: Result<ValidatedOpportunity, RejectReason>,
    /// Known whenever the position could be read
    pub health_factor: Option<Decimal>,
    pub duration: Duration,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn reason(&self) -> Option<&RejectReason> {
        self.outcome.as_ref().err()
    }

    pub fn opportunity(&self) -> Option<&ValidatedOpportunity> {
        self.outcome.as_ref().ok()
    }
}

const FLASH_LOAN_HINT: &str = "; a flash loan could fund this liquidation";

#[derive(Debug)]
pub struct OpportunityValidator {
    adapters: Arc<ProtocolAdapters>,
    oracle: Arc<PriceOracle>,
    balances: Arc<BalanceValidator>,
    gas: Arc<GasOracle>,
    params: HashMap<ProtocolKind, ProtocolParams>,
    balance_config: BalanceConfig,
}

impl OpportunityValidator {
    pub fn new(
        adapters: Arc<ProtocolAdapters>,
        oracle: Arc<PriceOracle>,
        balances: Arc<BalanceValidator>,
        gas: Arc<GasOracle>,
        protocols: &ProtocolsConfig,
        bot: &BotConfig,
    ) -> Self {
        let params = ProtocolKind::ALL
            .into_iter()
            .filter_map(|kind| Some((kind, protocols.params(kind, &bot.profitability)?)))
            .collect();
        Self {
            adapters,
            oracle,
            balances,
            gas,
            params,
            balance_config: bot.balance.clone(),
        }
    }

    #[instrument(skip_all, fields(borrower = %event.debtor, protocol = %event.protocol))]
    pub async fn validate(&self, event: &LiquidationEvent) -> ValidationResult {
        let started = Instant::now();

        let (health_factor, outcome) = match self.position(event).await {
            Ok(snapshot) => (Some(snapshot.health_factor), self.evaluate(event, snapshot).await),
            Err(reason) => (None, Err(reason)),
        };
        let duration = started.elapsed();

        match &outcome {
            Ok(opportunity) => info!(
                borrower = %event.debtor,
                protocol = %event.protocol,
                health_factor = %opportunity.snapshot.health_factor,
                collateral = %opportunity.parameters.collateral_symbol,
                debt = %opportunity.parameters.debt_symbol,
                repay_usd = %opportunity.parameters.debt_to_repay_usd.round_dp(2),
                seize_usd = %opportunity.parameters.collateral_to_seize_usd.round_dp(2),
                profit = %opportunity.profit,
                elapsed_ms = duration.as_millis() as u64,
                "Opportunity validated"
            ),
            Err(reason) => info!(
                borrower = %event.debtor,
                protocol = %event.protocol,
                reason = %reason,
                category = reason.category(),
                elapsed_ms = duration.as_millis() as u64,
                "Opportunity rejected"
            ),
        }

        ValidationResult {
            outcome,
            health_factor,
            duration,
        }
    }

    async fn position(&self, event: &LiquidationEvent) -> Result<PositionSnapshot, RejectReason> {
        if self.adapters.get(event.protocol).is_none() {
            return Err(RejectReason::UnsupportedProtocol(event.protocol));
        }
        self.adapters
            .fetch_position(event.protocol, event.debtor)
            .await
            .ok_or(RejectReason::PositionUnavailable)
    }

    async fn evaluate(
        &self,
        event: &LiquidationEvent,
        snapshot: PositionSnapshot,
    ) -> Result<ValidatedOpportunity, RejectReason> {
        if !snapshot.is_liquidatable() {
            return Err(RejectReason::HealthFactorTooHigh(snapshot.health_factor));
        }

        let unsupported = RejectReason::UnsupportedProtocol(event.protocol);
        let adapter = self.adapters.get(event.protocol).ok_or_else(|| unsupported.clone())?;
        let params = self.params.get(&event.protocol).ok_or(unsupported)?;
        let gas_budget = adapter.gas_budget();
        let repays_from_wallet = adapter.repays_from_wallet();

        let mut parameters = compute_parameters(&snapshot, event.collateral_hint, event.debt_hint, params)?;
        let balance = if repays_from_wallet {
            self.check_funding(event, &snapshot, params, &mut parameters).await?
        } else {
            debug!(borrower = %event.debtor, protocol = %event.protocol, "Settles in-protocol, no wallet funds needed");
            None
        };

        let gas = self
            .gas
            .optimal_gas_price()
            .await
            .map_err(|e| RejectReason::GasUnavailable(e.to_string()))?;

        let registry = self.oracle.registry();
        let native_symbol = registry.native_symbol().to_string();
        let native = self
            .oracle
            .price(registry.wrapped_native())
            .await
            .ok_or_else(|| RejectReason::PriceUnavailable(native_symbol.clone()))?;
        let gas_cost = gas_cost_usd(gas_budget, gas.effective_gas_price(), native.price_usd)
            .ok_or(RejectReason::PriceUnavailable(native_symbol))?;

        let profit = if repays_from_wallet {
            ProfitEstimate::new(&parameters, gas_cost)
        } else {
            ProfitEstimate::gas_only(gas_cost)
        };
        if !profit.is_profitable(params.min_profit_usd) {
            return Err(RejectReason::InsufficientProfit {
                profit: profit.net_profit_usd,
                minimum: params.min_profit_usd,
            });
        }

        Ok(ValidatedOpportunity {
            event: event.clone(),
            snapshot,
            parameters,
            profit,
            gas,
            balance,
        })
    }

    /// Wallet balance gate.
    ///
    /// With a debt hint the full repay amount must be held. Without one,
    /// every debt asset is checked against the minimum useful amount, the
    /// largest fundable one is chosen and the repay is capped to what the
    /// wallet holds.
    async fn check_funding(
        &self,
        event: &LiquidationEvent,
        snapshot: &PositionSnapshot,
        params: &ProtocolParams,
        parameters: &mut LiquidationParameters,
    ) -> Result<Option<BalanceCheckResult>, RejectReason> {
        if !self.balance_config.enabled {
            warn!(borrower = %event.debtor, "Balance check disabled, submitting without funding check");
            return Ok(None);
        }

        if event.debt_hint.is_some_and(|hint| hint == parameters.debt_asset) {
            let result = self
                .balances
                .check_balance(parameters.debt_asset, parameters.debt_to_repay_tokens)
                .await;
            if !result.has_balance {
                return Err(self.insufficient(&result));
            }
            return Ok(Some(result));
        }

        let results = self.balances.check_all_debt_assets(&snapshot.debts).await;
        let funded = snapshot
            .debts
            .iter()
            .zip(&results)
            .filter(|(_, result)| result.has_balance)
            .max_by_key(|(debt, _)| debt.value_usd);

        let Some((debt, result)) = funded else {
            let primary = results
                .iter()
                .find(|r| r.token == parameters.debt_asset)
                .or(results.first());
            return Err(match primary {
                Some(result) => self.insufficient(result),
                None => RejectReason::NoDebt,
            });
        };

        if debt.address != parameters.debt_asset {
            *parameters = compute_parameters(snapshot, event.collateral_hint, Some(debt.address), params)?;
        }
        if parameters.cap_debt_tokens(result.available) {
            info!(
                borrower = %event.debtor,
                debt = %parameters.debt_symbol,
                available = %result.available,
                "Repay capped to wallet balance"
            );
        }
        Ok(Some(result.clone()))
    }

    fn insufficient(&self, result: &BalanceCheckResult) -> RejectReason {
        let mut reason = result
            .reason
            .clone()
            .unwrap_or_else(|| format!("Insufficient {} balance", result.symbol));
        if self.balance_config.suggest_flash_loans {
            reason.push_str(FLASH_LOAN_HINT);
        }
        RejectReason::InsufficientBalance(reason)
    }
}
