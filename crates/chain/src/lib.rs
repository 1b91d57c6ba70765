//! Liquidator chain interaction layer.
//!
//! This crate provides:
//! - The [`ChainClient`] RPC seam and its Alloy HTTP implementation
//! - Contract bindings for Aave V3, Compound V3 (Comet), Compound V2 cTokens,
//!   ERC20, Chainlink feeds and Uniswap pools
//! - Protocol identification and liquidation event normalization
//! - A WebSocket event source with a reconnection state machine
//! - Gas sampling with congestion detection (Legacy + EIP-1559)
//! - Collision-free nonce allocation and local transaction signing

pub mod contracts;
pub mod event_source;
pub mod gas;
mod nonce;
pub mod protocol;
mod provider;
mod signer;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use event_source::{
    ConnectionState, EventChannels, EventSource, EventSourceConfig, EventSourceError, LogStream,
    LogSubscriber, WsLogSubscriber,
};
pub use gas::{GasOracle, GasOracleConfig, GasParams, GasQuote};
pub use nonce::{NonceManager, NonceStatus};
pub use protocol::{LiquidationEvent, ProtocolKind, ProtocolSubscription, RawLog};
pub use provider::{call_contract, ChainClient, FeeData, NonceTag, ProviderManager};
pub use signer::{SignedTransaction, TransactionSigner, TxPayload};
