//! Token registry built from the deployment file.
//!
//! Lookup by address for symbol, decimals, stablecoin flag and the price
//! references configured for each token.

use crate::config::TokenConfig;
use alloy::primitives::{address, Address};
use std::collections::HashMap;

/// Sentinel address standing for the chain's native currency.
pub const NATIVE_TOKEN: Address = address!("EeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE");

/// Native currency precision on EVM chains.
pub const NATIVE_DECIMALS: u8 = 18;

#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    by_address: HashMap<Address, TokenConfig>,
    native_symbol: String,
    wrapped_native: Address,
}

impl TokenRegistry {
    pub fn new(tokens: impl IntoIterator<Item = TokenConfig>, native_symbol: &str, wrapped_native: Address) -> Self {
        Self {
            by_address: tokens.into_iter().map(|t| (t.address, t)).collect(),
            native_symbol: native_symbol.to_string(),
            wrapped_native,
        }
    }

    pub fn get(&self, token: Address) -> Option<&TokenConfig> {
        self.by_address.get(&token)
    }

    /// Symbol for logs and reasons; unknown tokens render as a short address.
    pub fn symbol(&self, token: Address) -> String {
        if token == NATIVE_TOKEN {
            return self.native_symbol.clone();
        }
        match self.by_address.get(&token) {
            Some(t) => t.symbol.clone(),
            None => {
                let hex = token.to_string();
                format!("{}…{}", &hex[..6], &hex[hex.len() - 4..])
            }
        }
    }

    pub fn decimals(&self, token: Address) -> Option<u8> {
        if token == NATIVE_TOKEN {
            return Some(NATIVE_DECIMALS);
        }
        self.by_address.get(&token).map(|t| t.decimals)
    }

    pub fn is_stablecoin(&self, token: Address) -> bool {
        self.by_address.get(&token).is_some_and(|t| t.stablecoin)
    }

    pub fn wrapped_native(&self) -> Address {
        self.wrapped_native
    }

    pub fn native_symbol(&self) -> &str {
        &self.native_symbol
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}
