//! Transaction signing for liquidations.
//!
//! Builds a fully-specified transaction (nonce, gas, limit and chain id are
//! always set explicitly, no provider fillers) and signs it locally into an
//! EIP-2718 envelope ready for `eth_sendRawTransaction`.

use crate::gas::GasParams;
use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use anyhow::Result;
use std::fmt;
use tracing::{debug, info};

/// Unsigned contract call produced by a protocol adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxPayload {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

impl TxPayload {
    pub fn new(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            to,
            data: data.into(),
            value: U256::ZERO,
        }
    }

    /// 4-byte function selector, hex encoded, for logs.
    pub fn selector_hex(&self) -> String {
        hex::encode(self.data.get(..4).unwrap_or_default())
    }
}

/// A signed, encoded transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: Bytes,
    pub hash: B256,
    pub nonce: u64,
}

/// Local private-key signer bound to one chain.
pub struct TransactionSigner {
    wallet: EthereumWallet,
    address: Address,
    chain_id: u64,
}

impl fmt::Debug for TransactionSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionSigner")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

impl TransactionSigner {
    /// Create from a hex private key (with or without 0x prefix).
    pub fn from_private_key(private_key: &str, chain_id: u64) -> Result<Self> {
        let key_str = private_key.trim().trim_start_matches("0x");
        let signer: PrivateKeySigner = key_str.parse()?;
        let address = signer.address();

        info!(address = %address, chain_id = chain_id, "Transaction signer initialized");

        Ok(Self {
            wallet: EthereumWallet::from(signer),
            address,
            chain_id,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Sign `payload` with explicit nonce, gas pricing and gas limit.
    pub async fn sign(
        &self,
        payload: &TxPayload,
        nonce: u64,
        gas: &GasParams,
        gas_limit: u64,
    ) -> Result<SignedTransaction> {
        let mut tx = TransactionRequest::default()
            .with_from(self.address)
            .with_to(payload.to)
            .with_input(payload.data.clone())
            .with_value(payload.value)
            .with_nonce(nonce)
            .with_gas_limit(gas_limit)
            .with_chain_id(self.chain_id);
        gas.apply_to(&mut tx);

        let envelope = tx.build(&self.wallet).await?;
        let hash = *envelope.tx_hash();
        let raw = Bytes::from(envelope.encoded_2718());

        debug!(
            to = %payload.to,
            selector = %payload.selector_hex(),
            nonce = nonce,
            gas_limit = gas_limit,
            tx_hash = %hash,
            "Transaction signed"
        );

        Ok(SignedTransaction { raw, hash, nonce })
    }
}
