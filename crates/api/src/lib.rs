//! API clients for external services.
//!
//! This crate provides HTTP clients for:
//! - Price aggregator APIs (DefiLlama, CoinGecko or any JSON endpoint)

mod price;

pub use price::{extract_price, PriceApi, PriceApiClient, PriceApiConfig};
