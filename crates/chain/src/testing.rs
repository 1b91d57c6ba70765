//! In-memory chain and log subscriber for tests.
//!
//! Enabled for this crate's unit tests and for dependents through the
//! `test-utils` feature.

use crate::event_source::{LogStream, LogSubscriber};
use crate::protocol::RawLog;
use crate::provider::{ChainClient, FeeData, NonceTag};
use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol_types::SolCall;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
enum CallResponse {
    Data(Vec<u8>),
    Revert,
}

/// Scripted [`ChainClient`].
///
/// Calls are answered by exact calldata first, then by selector. Anything
/// unscripted fails like a reverted `eth_call`.
#[derive(Debug, Default)]
pub struct MockChainClient {
    block_number: AtomicU64,
    native: Mutex<HashMap<Address, U256>>,
    erc20: Mutex<HashMap<(Address, Address), U256>>,
    nonces: Mutex<HashMap<Address, (u64, u64)>>,
    fee: Mutex<FeeData>,
    exact_calls: Mutex<HashMap<(Address, Bytes), CallResponse>>,
    selector_calls: Mutex<HashMap<(Address, [u8; 4]), CallResponse>>,
    receipts: Mutex<HashMap<B256, bool>>,
    auto_receipt: Mutex<Option<bool>>,
    broadcasts: Mutex<Vec<Bytes>>,
    fail_reads: AtomicBool,
    fail_latest_nonce: AtomicBool,
    fail_broadcast: AtomicBool,
    call_count: AtomicUsize,
    balance_reads: AtomicUsize,
}

impl MockChainClient {
    pub fn new() -> Self {
        let mock = Self::default();
        mock.block_number.store(1, Ordering::Relaxed);
        *mock.fee.lock() = FeeData {
            gas_price: 1_000_000_000,
            base_fee: None,
            max_priority_fee: None,
        };
        mock
    }

    pub fn set_block_number(&self, block: u64) {
        self.block_number.store(block, Ordering::Relaxed);
    }

    pub fn set_native_balance(&self, owner: Address, wei: U256) {
        self.native.lock().insert(owner, wei);
    }

    pub fn set_erc20_balance(&self, token: Address, owner: Address, amount: U256) {
        self.erc20.lock().insert((token, owner), amount);
    }

    pub fn set_nonce(&self, owner: Address, latest: u64, pending: u64) {
        self.nonces.lock().insert(owner, (latest, pending));
    }

    pub fn set_fee_data(&self, fee: FeeData) {
        *self.fee.lock() = fee;
    }

    /// Answer calls to `to` with this selector, whatever the arguments.
    pub fn set_call_response(&self, to: Address, selector: [u8; 4], data: Vec<u8>) {
        self.selector_calls
            .lock()
            .insert((to, selector), CallResponse::Data(data));
    }

    /// Answer exactly this call.
    pub fn set_call<C: SolCall>(&self, to: Address, call: &C, data: Vec<u8>) {
        self.exact_calls
            .lock()
            .insert((to, Bytes::from(call.abi_encode())), CallResponse::Data(data));
    }

    /// Make exactly this call revert.
    pub fn revert_call<C: SolCall>(&self, to: Address, call: &C) {
        self.exact_calls
            .lock()
            .insert((to, Bytes::from(call.abi_encode())), CallResponse::Revert);
    }

    pub fn set_receipt(&self, hash: B256, success: bool) {
        self.receipts.lock().insert(hash, success);
    }

    /// Every broadcast transaction gets a receipt with this status.
    pub fn set_auto_receipt(&self, status: Option<bool>) {
        *self.auto_receipt.lock() = status;
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_latest_nonce(&self, fail: bool) {
        self.fail_latest_nonce.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_broadcast(&self, fail: bool) {
        self.fail_broadcast.store(fail, Ordering::Relaxed);
    }

    pub fn broadcasts(&self) -> Vec<Bytes> {
        self.broadcasts.lock().clone()
    }

    /// Number of `eth_call`s served.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Number of native and ERC20 balance reads served.
    pub fn balance_reads(&self) -> usize {
        self.balance_reads.load(Ordering::Relaxed)
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(anyhow!("mock rpc unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn block_number(&self) -> Result<u64> {
        self.check_reads()?;
        Ok(self.block_number.load(Ordering::Relaxed))
    }

    async fn native_balance(&self, owner: Address) -> Result<U256> {
        self.check_reads()?;
        self.balance_reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.native.lock().get(&owner).copied().unwrap_or_default())
    }

    async fn erc20_balance(&self, token: Address, owner: Address) -> Result<U256> {
        self.check_reads()?;
        self.balance_reads.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .erc20
            .lock()
            .get(&(token, owner))
            .copied()
            .unwrap_or_default())
    }

    async fn transaction_count(&self, owner: Address, tag: NonceTag) -> Result<u64> {
        self.check_reads()?;
        if tag == NonceTag::Latest && self.fail_latest_nonce.load(Ordering::Relaxed) {
            return Err(anyhow!("mock latest nonce unavailable"));
        }
        let (latest, pending) = self.nonces.lock().get(&owner).copied().unwrap_or_default();
        Ok(match tag {
            NonceTag::Latest => latest,
            NonceTag::Pending => pending,
        })
    }

    async fn fee_data(&self) -> Result<FeeData> {
        self.check_reads()?;
        Ok(*self.fee.lock())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        self.check_reads()?;
        self.call_count.fetch_add(1, Ordering::Relaxed);

        let response = self
            .exact_calls
            .lock()
            .get(&(to, data.clone()))
            .cloned()
            .or_else(|| {
                let selector: [u8; 4] = data.get(..4)?.try_into().ok()?;
                self.selector_calls.lock().get(&(to, selector)).cloned()
            });

        match response {
            Some(CallResponse::Data(bytes)) => Ok(Bytes::from(bytes)),
            Some(CallResponse::Revert) => Err(anyhow!("execution reverted")),
            None => Err(anyhow!("execution reverted: no mock for call to {}", to)),
        }
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256> {
        if self.fail_broadcast.load(Ordering::Relaxed) {
            return Err(anyhow!("mock broadcast rejected"));
        }
        let hash = keccak256(&raw);
        self.broadcasts.lock().push(raw);
        if let Some(status) = *self.auto_receipt.lock() {
            self.receipts.lock().insert(hash, status);
        }
        Ok(hash)
    }

    async fn transaction_status(&self, hash: B256) -> Result<Option<bool>> {
        self.check_reads()?;
        Ok(self.receipts.lock().get(&hash).copied())
    }
}

/// What a [`MockLogSubscriber`] returns for one `subscribe` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Stream stays open and yields logs passed to `emit`.
    Live,
    /// Stream ends immediately, as if the socket dropped.
    Ended,
    /// Subscription fails.
    Fail,
}

/// Scripted [`LogSubscriber`].
///
/// Each `subscribe` consumes the next scripted outcome; once the script is
/// exhausted every further subscription fails.
#[derive(Debug)]
pub struct MockLogSubscriber {
    script: Mutex<VecDeque<SubscribeOutcome>>,
    live: Mutex<Vec<mpsc::UnboundedSender<RawLog>>>,
    subscribe_calls: AtomicUsize,
    ping_ok: AtomicBool,
}

impl MockLogSubscriber {
    pub fn new(script: Vec<SubscribeOutcome>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            live: Mutex::new(Vec::new()),
            subscribe_calls: AtomicUsize::new(0),
            ping_ok: AtomicBool::new(true),
        }
    }

    /// Deliver a log to every open subscription.
    pub fn emit(&self, log: RawLog) {
        self.live
            .lock()
            .retain(|tx| tx.send(log.clone()).is_ok());
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn set_ping_ok(&self, ok: bool) {
        self.ping_ok.store(ok, Ordering::SeqCst);
    }
}

#[async_trait]
impl LogSubscriber for MockLogSubscriber {
    async fn subscribe(&self, _addresses: Vec<Address>, _signatures: Vec<B256>) -> Result<LogStream> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(SubscribeOutcome::Fail);

        match outcome {
            SubscribeOutcome::Live => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.live.lock().push(tx);
                let logs = stream::unfold(rx, |mut rx| async move {
                    let log = rx.recv().await?;
                    Some((log, rx))
                });
                Ok(Box::pin(logs))
            }
            SubscribeOutcome::Ended => Ok(Box::pin(stream::empty())),
            SubscribeOutcome::Fail => Err(anyhow!("mock subscription refused")),
        }
    }

    async fn ping(&self) -> Result<u64> {
        if self.ping_ok.load(Ordering::SeqCst) {
            Ok(1)
        } else {
            Err(anyhow!("mock ping failed"))
        }
    }
}
