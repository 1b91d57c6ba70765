//! Event loop tying the event source to validation and execution.
//!
//! Each debtor has at most one flow in flight: an event for a debtor that
//! is already being processed is dropped, not queued. Flows for different
//! debtors run concurrently.

use crate::adapters::ProtocolAdapters;
use crate::balance::BalanceValidator;
use crate::executor::TransactionExecutor;
use crate::metrics::{LiquidationMetrics, MetricsSummary};
use crate::oracle::{OracleHealth, PriceOracle};
use crate::validator::OpportunityValidator;
use alloy::primitives::Address;
use async_trait::async_trait;
use dashmap::DashSet;
use liquidator_chain::{EventChannels, EventSourceError, LiquidationEvent};
use serde::Serialize;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Processes one liquidation event end to end.
#[async_trait]
pub trait LiquidationHandler: Send + Sync + Debug {
    async fn handle(&self, event: LiquidationEvent);
}

/// Validate, execute, confirm, record.
#[derive(Debug)]
pub struct LiquidationPipeline {
    validator: Arc<OpportunityValidator>,
    executor: Arc<TransactionExecutor>,
    adapters: Arc<ProtocolAdapters>,
    balances: Arc<BalanceValidator>,
    metrics: Arc<LiquidationMetrics>,
}

impl LiquidationPipeline {
    pub fn new(
        validator: Arc<OpportunityValidator>,
        executor: Arc<TransactionExecutor>,
        adapters: Arc<ProtocolAdapters>,
        balances: Arc<BalanceValidator>,
        metrics: Arc<LiquidationMetrics>,
    ) -> Self {
        Self {
            validator,
            executor,
            adapters,
            balances,
            metrics,
        }
    }
}

#[async_trait]
impl LiquidationHandler for LiquidationPipeline {
    async fn handle(&self, event: LiquidationEvent) {
        info!(
            borrower = %event.debtor,
            protocol = %event.protocol,
            block = ?event.block_number,
            tx_hash = ?event.tx_hash,
            "Opportunity detected"
        );
        self.metrics.record_opportunity();

        let validation = self.validator.validate(&event).await;
        let opportunity = match validation.outcome {
            Ok(opportunity) => opportunity,
            Err(reason) => {
                self.metrics.record_rejection(reason.category());
                return;
            }
        };

        self.metrics.record_attempt();
        let params = &opportunity.parameters;
        let started = Instant::now();

        match self.executor.execute(&opportunity).await {
            Ok(receipt) => {
                info!(
                    borrower = %event.debtor,
                    protocol = %event.protocol,
                    tx_hash = %receipt.tx_hash,
                    nonce = receipt.nonce,
                    repay = %params.debt_to_repay_tokens,
                    debt = %params.debt_symbol,
                    expected_profit_usd = %opportunity.profit.net_profit_usd.round_dp(2),
                    elapsed_ms = receipt.elapsed.as_millis() as u64,
                    "Liquidation executed"
                );

                match self.executor.confirm(&receipt).await {
                    Ok(Some(true)) => {
                        self.metrics
                            .record_success(receipt.elapsed, opportunity.profit.net_profit_usd);
                        info!(
                            borrower = %event.debtor,
                            protocol = %event.protocol,
                            tx_hash = %receipt.tx_hash,
                            profit_usd = %opportunity.profit.net_profit_usd.round_dp(2),
                            total_ms = started.elapsed().as_millis() as u64,
                            "Liquidation confirmed"
                        );
                    }
                    Ok(Some(false)) => {
                        self.metrics.record_failure("reverted", receipt.elapsed);
                        error!(
                            borrower = %event.debtor,
                            protocol = %event.protocol,
                            tx_hash = %receipt.tx_hash,
                            "Liquidation failed: transaction reverted"
                        );
                    }
                    Ok(None) => {
                        self.metrics.record_failure("unconfirmed", receipt.elapsed);
                        warn!(borrower = %event.debtor, tx_hash = %receipt.tx_hash, "Liquidation unconfirmed");
                    }
                    Err(e) => {
                        self.metrics.record_failure("receipt", receipt.elapsed);
                        warn!(borrower = %event.debtor, tx_hash = %receipt.tx_hash, error = %e, "Receipt lookup failed");
                    }
                }
            }
            Err(e) => {
                let elapsed = started.elapsed();
                self.metrics.record_failure(e.category(), elapsed);
                error!(
                    borrower = %event.debtor,
                    protocol = %event.protocol,
                    category = e.category(),
                    error = %e,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Liquidation failed"
                );
            }
        }

        self.adapters.invalidate(event.protocol, event.debtor);
        self.balances.invalidate(params.debt_asset);
    }
}

/// Pull-based status for the external status boundary.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub running: bool,
    pub active_debtors: usize,
    pub signer: Address,
    pub oracle: OracleHealth,
    pub metrics: MetricsSummary,
}

/// Membership in the active set, released on drop.
struct DebtorClaim {
    active: Arc<DashSet<Address>>,
    debtor: Address,
}

impl DebtorClaim {
    fn acquire(active: &Arc<DashSet<Address>>, debtor: Address) -> Option<Self> {
        active.insert(debtor).then(|| Self {
            active: active.clone(),
            debtor,
        })
    }
}

impl Drop for DebtorClaim {
    fn drop(&mut self) {
        self.active.remove(&self.debtor);
    }
}

#[derive(Debug)]
pub struct Orchestrator {
    handler: Arc<dyn LiquidationHandler>,
    active: Arc<DashSet<Address>>,
    running: AtomicBool,
    metrics: Arc<LiquidationMetrics>,
    oracle: Arc<PriceOracle>,
    signer: Address,
}

impl Orchestrator {
    pub fn new(
        handler: Arc<dyn LiquidationHandler>,
        metrics: Arc<LiquidationMetrics>,
        oracle: Arc<PriceOracle>,
        signer: Address,
    ) -> Self {
        Self {
            handler,
            active: Arc::new(DashSet::new()),
            running: AtomicBool::new(false),
            metrics,
            oracle,
            signer,
        }
    }

    /// Start a flow for `event` unless its debtor already has one.
    pub fn dispatch(&self, event: LiquidationEvent) -> bool {
        let Some(claim) = DebtorClaim::acquire(&self.active, event.debtor) else {
            debug!(borrower = %event.debtor, protocol = %event.protocol, "Debtor already in flight, dropping event");
            return false;
        };
        let handler = self.handler.clone();
        tokio::spawn(async move {
            let _claim = claim;
            handler.handle(event).await;
        });
        true
    }

    /// Consume events until the feed closes or fails fatally.
    pub async fn run(&self, channels: EventChannels) -> Result<(), EventSourceError> {
        let EventChannels { mut events, mut errors } = channels;
        self.running.store(true, Ordering::SeqCst);
        info!(signer = %self.signer, "Orchestrator running");

        let mut errors_open = true;
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        self.dispatch(event);
                    }
                    None => {
                        info!("Event channel closed");
                        break;
                    }
                },
                err = errors.recv(), if errors_open => match err {
                    Some(e) if e.is_fatal() => {
                        error!(error = %e, "Event source failed, stopping");
                        self.running.store(false, Ordering::SeqCst);
                        return Err(e);
                    }
                    Some(e) => warn!(error = %e, "Event source error"),
                    None => errors_open = false,
                },
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn active_debtors(&self) -> usize {
        self.active.len()
    }

    pub async fn status(&self) -> StatusReport {
        StatusReport {
            running: self.is_running(),
            active_debtors: self.active_debtors(),
            signer: self.signer,
            oracle: self.oracle.health_check().await,
            metrics: self.metrics.summary(),
        }
    }
}
