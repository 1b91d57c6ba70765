//! Liquidation-signaling events and their normalization.
//!
//! Each protocol emits different events when a position moves toward
//! liquidation. They are all reduced to a single [`LiquidationEvent`].

use super::ProtocolKind;
use crate::contracts::{IComet, ICToken, IPool};
use alloy::primitives::{Address, Bytes, B256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Chain log reduced to the fields normalization needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub tx_hash: Option<B256>,
}

impl From<&Log> for RawLog {
    fn from(log: &Log) -> Self {
        Self {
            address: log.address(),
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
            block_number: log.block_number,
            tx_hash: log.transaction_hash,
        }
    }
}

/// A debtor that may have become liquidatable.
///
/// Immutable once constructed. Asset hints come from the triggering log and
/// are only suggestions; the validator checks them against the position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiquidationEvent {
    pub protocol: ProtocolKind,
    pub debtor: Address,
    pub collateral_hint: Option<Address>,
    pub debt_hint: Option<Address>,
    pub detected_at: DateTime<Utc>,
    pub tx_hash: Option<B256>,
    pub block_number: Option<u64>,
}

impl LiquidationEvent {
    /// Event for a debtor with no log context (manual checks, tests).
    pub fn new(protocol: ProtocolKind, debtor: Address) -> Self {
        Self {
            protocol,
            debtor,
            collateral_hint: None,
            debt_hint: None,
            detected_at: Utc::now(),
            tx_hash: None,
            block_number: None,
        }
    }

    pub fn with_hints(mut self, collateral: Option<Address>, debt: Option<Address>) -> Self {
        self.collateral_hint = collateral;
        self.debt_hint = debt;
        self
    }

    fn from_log(
        protocol: ProtocolKind,
        debtor: Address,
        collateral_hint: Option<Address>,
        debt_hint: Option<Address>,
        log: &RawLog,
    ) -> Option<Self> {
        if debtor.is_zero() {
            return None;
        }
        Some(Self {
            protocol,
            debtor,
            collateral_hint,
            debt_hint,
            detected_at: Utc::now(),
            tx_hash: log.tx_hash,
            block_number: log.block_number,
        })
    }
}

/// Log subscription for one protocol deployment.
#[derive(Debug, Clone)]
pub struct ProtocolSubscription {
    pub kind: ProtocolKind,
    /// Contracts emitting the events (pool, comet, or cTokens)
    pub addresses: Vec<Address>,
    /// cToken to underlying asset (CompoundV2)
    pub underlyings: HashMap<Address, Address>,
    /// Comet base asset (CompoundV3)
    pub base_asset: Option<Address>,
}

impl ProtocolSubscription {
    pub fn aave_v3(pool: Address) -> Self {
        Self {
            kind: ProtocolKind::AaveV3,
            addresses: vec![pool],
            underlyings: HashMap::new(),
            base_asset: None,
        }
    }

    pub fn compound_v3(comet: Address, base_asset: Address) -> Self {
        Self {
            kind: ProtocolKind::CompoundV3,
            addresses: vec![comet],
            underlyings: HashMap::new(),
            base_asset: Some(base_asset),
        }
    }

    /// `markets` yields `(cToken, underlying)` pairs.
    pub fn compound_v2(markets: impl IntoIterator<Item = (Address, Address)>) -> Self {
        let underlyings: HashMap<Address, Address> = markets.into_iter().collect();
        let mut addresses: Vec<Address> = underlyings.keys().copied().collect();
        addresses.sort();
        Self {
            kind: ProtocolKind::CompoundV2,
            addresses,
            underlyings,
            base_asset: None,
        }
    }

    /// Topic0 values to filter on.
    pub fn event_signatures(&self) -> Vec<B256> {
        match self.kind {
            ProtocolKind::AaveV3 => vec![
                IPool::Borrow::SIGNATURE_HASH,
                IPool::LiquidationCall::SIGNATURE_HASH,
            ],
            ProtocolKind::CompoundV3 => vec![
                IComet::Withdraw::SIGNATURE_HASH,
                IComet::AbsorbDebt::SIGNATURE_HASH,
            ],
            ProtocolKind::CompoundV2 => vec![
                ICToken::Borrow::SIGNATURE_HASH,
                ICToken::LiquidateBorrow::SIGNATURE_HASH,
            ],
        }
    }

    /// Normalize a log emitted by one of this subscription's contracts.
    ///
    /// Returns `None` for foreign, unrecognized or malformed logs.
    pub fn normalize(&self, log: &RawLog) -> Option<LiquidationEvent> {
        if !self.addresses.contains(&log.address) {
            return None;
        }
        let Some(topic0) = log.topics.first().copied() else {
            debug!(address = %log.address, "Skipping anonymous log");
            return None;
        };

        let event = match self.kind {
            ProtocolKind::AaveV3 => self.normalize_aave_v3(topic0, log),
            ProtocolKind::CompoundV3 => self.normalize_compound_v3(topic0, log),
            ProtocolKind::CompoundV2 => self.normalize_compound_v2(topic0, log),
        };

        if event.is_none() {
            debug!(
                protocol = %self.kind,
                address = %log.address,
                topic0 = %topic0,
                "Skipping unrecognized or malformed log"
            );
        }
        event
    }

    fn normalize_aave_v3(&self, topic0: B256, log: &RawLog) -> Option<LiquidationEvent> {
        if topic0 == IPool::Borrow::SIGNATURE_HASH {
            let ev = decode::<IPool::Borrow>(log)?;
            LiquidationEvent::from_log(self.kind, ev.onBehalfOf, None, Some(ev.reserve), log)
        } else if topic0 == IPool::LiquidationCall::SIGNATURE_HASH {
            let ev = decode::<IPool::LiquidationCall>(log)?;
            LiquidationEvent::from_log(
                self.kind,
                ev.user,
                Some(ev.collateralAsset),
                Some(ev.debtAsset),
                log,
            )
        } else {
            None
        }
    }

    fn normalize_compound_v3(&self, topic0: B256, log: &RawLog) -> Option<LiquidationEvent> {
        if topic0 == IComet::Withdraw::SIGNATURE_HASH {
            let ev = decode::<IComet::Withdraw>(log)?;
            LiquidationEvent::from_log(self.kind, ev.src, None, self.base_asset, log)
        } else if topic0 == IComet::AbsorbDebt::SIGNATURE_HASH {
            let ev = decode::<IComet::AbsorbDebt>(log)?;
            LiquidationEvent::from_log(self.kind, ev.borrower, None, self.base_asset, log)
        } else {
            None
        }
    }

    fn normalize_compound_v2(&self, topic0: B256, log: &RawLog) -> Option<LiquidationEvent> {
        let underlying = self.underlyings.get(&log.address).copied();
        if topic0 == ICToken::Borrow::SIGNATURE_HASH {
            let ev = decode::<ICToken::Borrow>(log)?;
            LiquidationEvent::from_log(self.kind, ev.borrower, None, underlying, log)
        } else if topic0 == ICToken::LiquidateBorrow::SIGNATURE_HASH {
            let ev = decode::<ICToken::LiquidateBorrow>(log)?;
            let collateral = self.underlyings.get(&ev.cTokenCollateral).copied();
            LiquidationEvent::from_log(self.kind, ev.borrower, collateral, underlying, log)
        } else {
            None
        }
    }
}

fn decode<E: SolEvent>(log: &RawLog) -> Option<E> {
    E::decode_raw_log(log.topics.iter().copied(), &log.data, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn raw(address: Address, topics: Vec<B256>, data: Vec<u8>) -> RawLog {
        RawLog {
            address,
            topics,
            data: Bytes::from(data),
            block_number: Some(100),
            tx_hash: Some(B256::repeat_byte(0xaa)),
        }
    }

    #[test]
    fn test_aave_liquidation_call_normalized() {
        let pool = addr(0x01);
        let ev = IPool::LiquidationCall {
            collateralAsset: addr(0x10),
            debtAsset: addr(0x20),
            user: addr(0x30),
            debtToCover: U256::from(5u64),
            liquidatedCollateralAmount: U256::from(6u64),
            liquidator: addr(0x40),
            receiveAToken: false,
        };
        let log_data = ev.encode_log_data();
        let log = raw(pool, log_data.topics().to_vec(), log_data.data.to_vec());

        let normalized = ProtocolSubscription::aave_v3(pool).normalize(&log).unwrap();
        assert_eq!(normalized.protocol, ProtocolKind::AaveV3);
        assert_eq!(normalized.debtor, addr(0x30));
        assert_eq!(normalized.collateral_hint, Some(addr(0x10)));
        assert_eq!(normalized.debt_hint, Some(addr(0x20)));
        assert_eq!(normalized.block_number, Some(100));
    }

    #[test]
    fn test_aave_borrow_uses_on_behalf_of() {
        let pool = addr(0x01);
        let ev = IPool::Borrow {
            reserve: addr(0x20),
            user: addr(0x31),
            onBehalfOf: addr(0x32),
            amount: U256::from(1u64),
            interestRateMode: 2,
            borrowRate: U256::ZERO,
            referralCode: 0,
        };
        let log_data = ev.encode_log_data();
        let log = raw(pool, log_data.topics().to_vec(), log_data.data.to_vec());

        let normalized = ProtocolSubscription::aave_v3(pool).normalize(&log).unwrap();
        assert_eq!(normalized.debtor, addr(0x32));
        assert_eq!(normalized.debt_hint, Some(addr(0x20)));
        assert_eq!(normalized.collateral_hint, None);
    }

    #[test]
    fn test_ctoken_liquidate_borrow_maps_underlyings() {
        let c_usdc = addr(0x0c);
        let c_eth = addr(0x0e);
        let sub = ProtocolSubscription::compound_v2([(c_usdc, addr(0xc0)), (c_eth, addr(0xe0))]);

        let ev = ICToken::LiquidateBorrow {
            liquidator: addr(0x40),
            borrower: addr(0x50),
            repayAmount: U256::from(10u64),
            cTokenCollateral: c_eth,
            seizeTokens: U256::from(3u64),
        };
        let log_data = ev.encode_log_data();
        let log = raw(c_usdc, log_data.topics().to_vec(), log_data.data.to_vec());

        let normalized = sub.normalize(&log).unwrap();
        assert_eq!(normalized.debtor, addr(0x50));
        assert_eq!(normalized.debt_hint, Some(addr(0xc0)));
        assert_eq!(normalized.collateral_hint, Some(addr(0xe0)));
    }

    #[test]
    fn test_comet_withdraw_hints_base_asset() {
        let comet = addr(0x02);
        let base = addr(0xba);
        let ev = IComet::Withdraw {
            src: addr(0x60),
            to: addr(0x61),
            amount: U256::from(1u64),
        };
        let log_data = ev.encode_log_data();
        let log = raw(comet, log_data.topics().to_vec(), log_data.data.to_vec());

        let normalized = ProtocolSubscription::compound_v3(comet, base)
            .normalize(&log)
            .unwrap();
        assert_eq!(normalized.debtor, addr(0x60));
        assert_eq!(normalized.debt_hint, Some(base));
    }

    #[test]
    fn test_foreign_and_malformed_logs_skipped() {
        let pool = addr(0x01);
        let sub = ProtocolSubscription::aave_v3(pool);

        // Wrong emitter
        let ev = IPool::Borrow {
            reserve: addr(0x20),
            user: addr(0x31),
            onBehalfOf: addr(0x32),
            amount: U256::from(1u64),
            interestRateMode: 2,
            borrowRate: U256::ZERO,
            referralCode: 0,
        };
        let log_data = ev.encode_log_data();
        let foreign = raw(addr(0x99), log_data.topics().to_vec(), log_data.data.to_vec());
        assert!(sub.normalize(&foreign).is_none());

        // Right topic, truncated data
        let truncated = raw(pool, log_data.topics().to_vec(), vec![0u8; 8]);
        assert!(sub.normalize(&truncated).is_none());

        // No topics
        assert!(sub.normalize(&raw(pool, vec![], vec![])).is_none());
    }

    #[test]
    fn test_event_signatures_per_protocol() {
        let sub = ProtocolSubscription::compound_v2([(addr(1), addr(2))]);
        assert_eq!(sub.event_signatures().len(), 2);
        assert!(sub
            .event_signatures()
            .contains(&ICToken::LiquidateBorrow::SIGNATURE_HASH));
    }
}
