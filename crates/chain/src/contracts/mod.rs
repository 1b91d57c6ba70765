//! Contract bindings for lending protocols.
//!
//! ABI definitions generated with `sol!` for the three supported lending
//! protocol families and the price references the oracle reads.

pub mod aave_v3;
pub mod common;
pub mod compound;

pub use aave_v3::{IPool, IPoolDataProvider};
pub use common::{IAggregatorV3, IUniswapV2Pair, IUniswapV3Pool, IERC20};
pub use compound::{IComet, ICToken};
