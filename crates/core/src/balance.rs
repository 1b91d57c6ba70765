//! Wallet balance feasibility checks.
//!
//! Liquidations are funded from the signer's own wallet, so the debt asset
//! must already be held. The native currency and its wrapped token count as
//! interchangeable.

use crate::cache::TtlCache;
use crate::position::DebtAsset;
use crate::tokens::{TokenRegistry, NATIVE_TOKEN};
use crate::units::to_decimal;
use alloy::primitives::Address;
use anyhow::{anyhow, Result};
use liquidator_chain::contracts::IERC20;
use liquidator_chain::{call_contract, ChainClient};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceKind {
    Native,
    Token,
}

impl fmt::Display for BalanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceKind::Native => write!(f, "native"),
            BalanceKind::Token => write!(f, "token"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceCheckResult {
    pub token: Address,
    pub symbol: String,
    pub required: Decimal,
    pub available: Decimal,
    pub kind: BalanceKind,
    pub has_balance: bool,
    pub reason: Option<String>,
}

impl BalanceCheckResult {
    fn evaluate(token: Address, symbol: String, kind: BalanceKind, required: Decimal, available: Decimal) -> Self {
        let has_balance = available >= required;
        let reason = (!has_balance).then(|| {
            format!(
                "Insufficient {} balance: have {}, need {}",
                symbol,
                available.normalize(),
                required.normalize()
            )
        });
        Self {
            token,
            symbol,
            required,
            available,
            kind,
            has_balance,
            reason,
        }
    }

    fn unreadable(token: Address, symbol: String, kind: BalanceKind, required: Decimal, error: &anyhow::Error) -> Self {
        Self {
            token,
            reason: Some(format!("Could not read {} balance: {}", symbol, error)),
            symbol,
            required,
            available: Decimal::ZERO,
            kind,
            has_balance: false,
        }
    }
}

/// Checks the signer's holdings, caching balances per (wallet, token).
#[derive(Debug)]
pub struct BalanceValidator {
    chain: Arc<dyn ChainClient>,
    registry: Arc<TokenRegistry>,
    wallet: Address,
    balances: TtlCache<(Address, Address), Decimal>,
    /// Share of each debt that must be covered in bulk mode
    min_useful_fraction: Decimal,
}

impl BalanceValidator {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        registry: Arc<TokenRegistry>,
        wallet: Address,
        ttl: Duration,
        max_entries: usize,
        min_useful_fraction: Decimal,
    ) -> Self {
        Self {
            chain,
            registry,
            wallet,
            balances: TtlCache::new(ttl, max_entries),
            min_useful_fraction,
        }
    }

    pub fn wallet(&self) -> Address {
        self.wallet
    }

    async fn decimals(&self, token: Address) -> Result<u8> {
        if let Some(d) = self.registry.decimals(token) {
            return Ok(d);
        }
        Ok(call_contract(self.chain.as_ref(), token, IERC20::decimalsCall {})
            .await?
            ._0)
    }

    /// Wallet balance of `token` in token units.
    async fn available(&self, token: Address) -> Result<Decimal> {
        let key = (self.wallet, token);
        if let Some(balance) = self.balances.get(&key) {
            return Ok(balance);
        }
        let raw = if token == NATIVE_TOKEN {
            self.chain.native_balance(self.wallet).await?
        } else {
            self.chain.erc20_balance(token, self.wallet).await?
        };
        let balance = to_decimal(raw, self.decimals(token).await?).ok_or_else(|| anyhow!("balance out of range"))?;
        self.balances.set(key, balance);
        Ok(balance)
    }

    async fn check_single(&self, token: Address, kind: BalanceKind, required: Decimal) -> BalanceCheckResult {
        let symbol = self.registry.symbol(token);
        match self.available(token).await {
            Ok(available) => BalanceCheckResult::evaluate(token, symbol, kind, required, available),
            Err(e) => {
                warn!(token = %token, symbol = %symbol, error = %e, "Balance read failed");
                BalanceCheckResult::unreadable(token, symbol, kind, required, &e)
            }
        }
    }

    /// Whether the wallet holds `required` units of `token`.
    ///
    /// For the wrapped native token the native balance is tried first and
    /// reported as a native match when it suffices.
    pub async fn check_balance(&self, token: Address, required: Decimal) -> BalanceCheckResult {
        if token == NATIVE_TOKEN {
            return self.check_single(NATIVE_TOKEN, BalanceKind::Native, required).await;
        }

        if token == self.registry.wrapped_native() {
            let native = self.check_single(NATIVE_TOKEN, BalanceKind::Native, required).await;
            if native.has_balance {
                debug!(required = %required, available = %native.available, "Native balance covers wrapped debt");
                return native;
            }
        }

        self.check_single(token, BalanceKind::Token, required).await
    }

    /// Check every debt asset against the minimum useful amount rather than
    /// the full debt.
    pub async fn check_all_debt_assets(&self, debts: &[DebtAsset]) -> Vec<BalanceCheckResult> {
        let mut results = Vec::with_capacity(debts.len());
        for debt in debts {
            let minimum = debt.amount * self.min_useful_fraction;
            results.push(self.check_balance(debt.address, minimum).await);
        }
        results
    }

    /// Forget the cached balance of `token` (and the native balance that
    /// may stand in for it).
    pub fn invalidate(&self, token: Address) {
        self.balances.evict(&(self.wallet, token));
        if token == self.registry.wrapped_native() {
            self.balances.evict(&(self.wallet, NATIVE_TOKEN));
        }
    }

    pub fn cached_balances(&self) -> usize {
        self.balances.len()
    }
}
