//! Transaction submission for validated opportunities.
//!
//! Pipeline: build payload, price gas, lease a nonce, sign, broadcast. Any
//! failure after the lease hands the nonce back before returning.

use crate::adapters::{AdapterError, ProtocolAdapters};
use crate::config::ExecutionConfig;
use crate::validator::ValidatedOpportunity;
use alloy::primitives::B256;
use anyhow::Result;
use liquidator_chain::{ChainClient, GasOracle, GasQuote, NonceManager, TransactionSigner, TxPayload};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to build transaction: {0}")]
    Build(#[from] AdapterError),

    #[error("gas price unavailable: {0}")]
    Gas(#[source] anyhow::Error),

    #[error("nonce unavailable: {0}")]
    Nonce(#[source] anyhow::Error),

    #[error("signing failed for nonce {nonce}: {source}")]
    Signing { nonce: u64, source: anyhow::Error },

    #[error("broadcast failed for nonce {nonce}: {source}")]
    Broadcast { nonce: u64, source: anyhow::Error },
}

impl ExecutionError {
    pub fn category(&self) -> &'static str {
        match self {
            ExecutionError::Build(_) => "build",
            ExecutionError::Gas(_) => "gas",
            ExecutionError::Nonce(_) => "nonce",
            ExecutionError::Signing { .. } => "signing",
            ExecutionError::Broadcast { .. } => "broadcast",
        }
    }
}

/// A broadcast liquidation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReceipt {
    pub tx_hash: B256,
    pub nonce: u64,
    pub gas: GasQuote,
    pub elapsed: Duration,
    pub sla_missed: bool,
}

#[derive(Debug)]
pub struct TransactionExecutor {
    chain: Arc<dyn ChainClient>,
    adapters: Arc<ProtocolAdapters>,
    gas: Arc<GasOracle>,
    nonces: Arc<NonceManager>,
    signer: Arc<TransactionSigner>,
    sla: Duration,
    receipt_timeout: Duration,
}

impl TransactionExecutor {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        adapters: Arc<ProtocolAdapters>,
        gas: Arc<GasOracle>,
        nonces: Arc<NonceManager>,
        signer: Arc<TransactionSigner>,
        config: &ExecutionConfig,
    ) -> Self {
        Self {
            chain,
            adapters,
            gas,
            nonces,
            signer,
            sla: config.sla(),
            receipt_timeout: config.receipt_timeout(),
        }
    }

    pub fn signer_address(&self) -> alloy::primitives::Address {
        self.signer.address()
    }

    /// Submit the liquidation for `opportunity`.
    #[instrument(skip_all, fields(borrower = %opportunity.event.debtor, protocol = %opportunity.event.protocol))]
    pub async fn execute(&self, opportunity: &ValidatedOpportunity) -> Result<ExecutionReceipt, ExecutionError> {
        let started = Instant::now();
        let params = &opportunity.parameters;

        let adapter = self
            .adapters
            .get(params.protocol)
            .ok_or(AdapterError::Disabled(params.protocol))?;
        let payload = adapter.build_transaction(params, self.signer.address())?;
        let gas_limit = adapter.gas_budget();

        let gas = self.gas.optimal_gas_price().await.map_err(ExecutionError::Gas)?;
        let nonce = self.nonces.get_next_nonce().await.map_err(ExecutionError::Nonce)?;

        let tx_hash = match self.submit(&payload, nonce, &gas, gas_limit).await {
            Ok(hash) => hash,
            Err(e) => {
                self.nonces.release_nonce(nonce).await;
                return Err(e);
            }
        };

        let elapsed = started.elapsed();
        let sla_missed = elapsed > self.sla;
        if sla_missed {
            warn!(
                borrower = %params.user,
                elapsed_ms = elapsed.as_millis() as u64,
                sla_ms = self.sla.as_millis() as u64,
                "Execution exceeded SLA"
            );
        }

        Ok(ExecutionReceipt {
            tx_hash,
            nonce,
            gas,
            elapsed,
            sla_missed,
        })
    }

    async fn submit(
        &self,
        payload: &TxPayload,
        nonce: u64,
        gas: &GasQuote,
        gas_limit: u64,
    ) -> Result<B256, ExecutionError> {
        let signed = self
            .signer
            .sign(payload, nonce, &gas.params, gas_limit)
            .await
            .map_err(|source| ExecutionError::Signing { nonce, source })?;

        let hash = self
            .chain
            .send_raw_transaction(signed.raw)
            .await
            .map_err(|source| ExecutionError::Broadcast { nonce, source })?;

        debug!(
            tx_hash = %hash,
            nonce = nonce,
            max_fee = gas.fee_cap(),
            "Transaction broadcast"
        );
        Ok(hash)
    }

    /// Wait for the receipt of a broadcast liquidation.
    ///
    /// A mined receipt, successful or reverted, retires the nonce. On
    /// timeout the lease stays until the nonce manager's next refresh.
    pub async fn confirm(&self, receipt: &ExecutionReceipt) -> Result<Option<bool>> {
        let status = self
            .chain
            .wait_for_receipt(receipt.tx_hash, self.receipt_timeout, RECEIPT_POLL_INTERVAL)
            .await?;

        match status {
            Some(success) => {
                self.nonces.confirm_nonce(receipt.nonce).await;
                info!(tx_hash = %receipt.tx_hash, nonce = receipt.nonce, success, "Receipt received");
            }
            None => warn!(
                tx_hash = %receipt.tx_hash,
                nonce = receipt.nonce,
                timeout_secs = self.receipt_timeout.as_secs(),
                "Receipt wait timed out"
            ),
        }
        Ok(status)
    }
}
