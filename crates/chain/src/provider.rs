//! Provider management for HTTP RPC connections.
//! Uses Alloy providers for type-safe RPC interactions.
//!
//! Every chain read the engine performs goes through the [`ChainClient`]
//! trait so components can be exercised against an in-memory chain.

use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolCall;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, info};

use crate::contracts::IERC20;

/// Which view of an account's transaction count to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceTag {
    /// Count of transactions mined in the latest block.
    Latest,
    /// Count including transactions still in the mempool.
    Pending,
}

/// Raw fee data sampled from the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeeData {
    /// `eth_gasPrice` in wei.
    pub gas_price: u128,
    /// Base fee of the latest block, if the chain is EIP-1559.
    pub base_fee: Option<u128>,
    /// Suggested priority fee, if the node supports it.
    pub max_priority_fee: Option<u128>,
}

/// Read/write access to a single EVM chain.
#[async_trait]
pub trait ChainClient: Send + Sync + Debug {
    /// Current block number.
    async fn block_number(&self) -> Result<u64>;

    /// Native currency balance of `owner` in wei.
    async fn native_balance(&self, owner: Address) -> Result<U256>;

    /// ERC20 balance of `owner`.
    async fn erc20_balance(&self, token: Address, owner: Address) -> Result<U256>;

    /// Transaction count (nonce) of `owner`.
    async fn transaction_count(&self, owner: Address, tag: NonceTag) -> Result<u64>;

    /// Current fee data.
    async fn fee_data(&self) -> Result<FeeData>;

    /// Read-only contract call against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;

    /// Broadcast a signed, EIP-2718 encoded transaction.
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256>;

    /// Receipt status: `None` while unmined, `Some(true)` on success, `Some(false)` on revert.
    async fn transaction_status(&self, hash: B256) -> Result<Option<bool>>;

    /// Poll for a receipt until `timeout` elapses.
    async fn wait_for_receipt(
        &self,
        hash: B256,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Option<bool>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(status) = self.transaction_status(hash).await? {
                return Ok(Some(status));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

/// Typed contract call through any [`ChainClient`].
pub async fn call_contract<C>(client: &dyn ChainClient, to: Address, call: C) -> Result<C::Return>
where
    C: SolCall + Send,
{
    let output = client.call(to, Bytes::from(call.abi_encode())).await?;
    let decoded = C::abi_decode_returns(&output, true)?;
    Ok(decoded)
}

/// Provider manager backed by Alloy HTTP providers.
#[derive(Debug, Clone)]
pub struct ProviderManager {
    /// HTTP URL for reads
    http_url: String,
    /// Send URL (defaults to the read URL)
    send_url: String,
}

impl ProviderManager {
    /// Create a new provider manager and verify the endpoint responds.
    pub async fn new(http_url: &str, send_url: Option<&str>) -> Result<Self> {
        let manager = Self {
            http_url: http_url.to_string(),
            send_url: send_url.unwrap_or(http_url).to_string(),
        };

        info!(
            http = %manager.http_url,
            send = %manager.send_url,
            "Initializing provider manager"
        );

        let block = manager.block_number().await?;
        info!(block = block, "Provider connection verified");

        Ok(manager)
    }

    /// Get the HTTP URL.
    pub fn http_url(&self) -> &str {
        &self.http_url
    }

    fn reader(&self) -> Result<impl Provider + Clone> {
        Ok(ProviderBuilder::new().on_http(self.http_url.parse()?))
    }

    fn sender(&self) -> Result<impl Provider + Clone> {
        Ok(ProviderBuilder::new().on_http(self.send_url.parse()?))
    }

    /// Check if provider is healthy.
    pub async fn health_check(&self) -> Result<bool> {
        let block = self.block_number().await?;
        debug!(block = block, "Provider health check passed");
        Ok(block > 0)
    }
}

#[async_trait]
impl ChainClient for ProviderManager {
    async fn block_number(&self) -> Result<u64> {
        Ok(self.reader()?.get_block_number().await?)
    }

    async fn native_balance(&self, owner: Address) -> Result<U256> {
        Ok(self.reader()?.get_balance(owner).await?)
    }

    async fn erc20_balance(&self, token: Address, owner: Address) -> Result<U256> {
        let provider = self.reader()?;
        let contract = IERC20::new(token, &provider);
        Ok(contract.balanceOf(owner).call().await?._0)
    }

    async fn transaction_count(&self, owner: Address, tag: NonceTag) -> Result<u64> {
        let block = match tag {
            NonceTag::Latest => BlockId::latest(),
            NonceTag::Pending => BlockId::pending(),
        };
        Ok(self
            .reader()?
            .get_transaction_count(owner)
            .block_id(block)
            .await?)
    }

    async fn fee_data(&self) -> Result<FeeData> {
        let provider = self.reader()?;
        let gas_price = provider.get_gas_price().await?;

        let base_fee = provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await?
            .and_then(|block| block.header.base_fee_per_gas)
            .map(u128::from);

        // Legacy chains reject eth_maxPriorityFeePerGas
        let max_priority_fee = match base_fee {
            Some(_) => provider.get_max_priority_fee_per_gas().await.ok(),
            None => None,
        };

        Ok(FeeData {
            gas_price,
            base_fee,
            max_priority_fee,
        })
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let request = TransactionRequest::default().with_to(to).with_input(data);
        let output: Bytes = self
            .reader()?
            .raw_request("eth_call".into(), (request, BlockNumberOrTag::Latest))
            .await?;
        Ok(output)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256> {
        let pending = self.sender()?.send_raw_transaction(&raw).await?;
        Ok(*pending.tx_hash())
    }

    async fn transaction_status(&self, hash: B256) -> Result<Option<bool>> {
        let receipt = self.reader()?.get_transaction_receipt(hash).await?;
        Ok(receipt.map(|r| r.status()))
    }
}
